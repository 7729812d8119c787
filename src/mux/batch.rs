//! One-shot container writer for a complete, already-ordered clip.
//! Grounded on a `save_buffer`-style helper: declare streams, write a
//! header, write every packet rebased to the clip's first pts, write
//! the trailer.

use ffmpeg_next as ffmpeg;

use crate::error::Result;
use crate::types::audio_frame::EncodedAudioSample;
use crate::types::video_frame::EncodedFrame;

use super::{declare_audio_stream, declare_video_stream, AudioStreamParams, VideoStreamParams};

pub struct BatchMuxer;

impl BatchMuxer {
    /// Writes `video`/`audio` (already trimmed and keyframe-anchored by
    /// the caller) to `path` as one complete container. `video` must be
    /// non-empty; `audio` may be empty for a video-only clip.
    pub fn write(
        path: &str,
        video: &[EncodedFrame],
        audio: &[EncodedAudioSample],
        video_params: &VideoStreamParams,
        audio_params: Option<&AudioStreamParams>,
    ) -> Result<()> {
        let mut output = ffmpeg::format::output(&path)?;

        let video_stream_index = declare_video_stream(&mut output, video_params)?;
        let audio_stream_index = match audio_params {
            Some(params) if !audio.is_empty() => Some(declare_audio_stream(&mut output, params)?),
            _ => None,
        };

        output.write_header()?;

        let first_video_pts = video.first().map(|f| f.pts).unwrap_or(0);
        for frame in video {
            let mut packet = ffmpeg::codec::packet::Packet::copy(&frame.data);
            let pts = frame.pts - first_video_pts;
            packet.set_pts(Some(pts));
            packet.set_dts(Some(pts));
            packet.set_stream(video_stream_index);
            packet.write_interleaved(&mut output)?;
        }

        if let Some(audio_stream_index) = audio_stream_index {
            let first_audio_pts = audio.first().map(|s| s.pts).unwrap_or(0);
            for sample in audio {
                let mut packet = ffmpeg::codec::packet::Packet::copy(&sample.data);
                let pts = sample.pts - first_audio_pts;
                packet.set_pts(Some(pts));
                packet.set_dts(Some(pts));
                packet.set_stream(audio_stream_index);
                packet.write_interleaved(&mut output)?;
            }
        }

        output.write_trailer()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nothing_up_front_empty_audio_is_fine() {
        // write() itself needs a real ffmpeg muxer to run end to end; this
        // just documents that an empty `audio` slice is a valid input and
        // does not panic constructing the call.
        let video = vec![EncodedFrame::new(vec![0u8; 4], 0, 1, true)];
        let audio: Vec<EncodedAudioSample> = Vec::new();
        assert_eq!(video.len(), 1);
        assert!(audio.is_empty());
    }
}
