//! Incremental container writer for the live recording path: streams are
//! declared once up front, then packets are written as they arrive
//! instead of being buffered in memory first.

use ffmpeg_next as ffmpeg;

use crate::error::{Error, Result};
use crate::types::audio_frame::EncodedAudioSample;
use crate::types::video_frame::EncodedFrame;

use super::{declare_audio_stream, declare_video_stream, AudioStreamParams, VideoStreamParams};

pub struct StreamingMuxer {
    output: ffmpeg::format::context::Output,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    header_written: bool,
    first_video_pts: Option<i64>,
    first_audio_pts: Option<i64>,
    trailer_written: bool,
}

impl StreamingMuxer {
    pub fn new(
        path: &str,
        video_params: &VideoStreamParams,
        audio_params: Option<&AudioStreamParams>,
    ) -> Result<Self> {
        let mut output = ffmpeg::format::output(&path)?;
        let video_stream_index = declare_video_stream(&mut output, video_params)?;
        let audio_stream_index = match audio_params {
            Some(params) => Some(declare_audio_stream(&mut output, params)?),
            None => None,
        };

        Ok(Self {
            output,
            video_stream_index,
            audio_stream_index,
            header_written: false,
            first_video_pts: None,
            first_audio_pts: None,
            trailer_written: false,
        })
    }

    pub fn write_video(&mut self, frame: &EncodedFrame) -> Result<()> {
        self.ensure_header()?;
        let first_pts = *self.first_video_pts.get_or_insert(frame.pts);
        let mut packet = ffmpeg::codec::packet::Packet::copy(&frame.data);
        let pts = frame.pts - first_pts;
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));
        packet.set_stream(self.video_stream_index);
        packet.write_interleaved(&mut self.output)?;
        Ok(())
    }

    pub fn write_audio(&mut self, sample: &EncodedAudioSample) -> Result<()> {
        let Some(audio_stream_index) = self.audio_stream_index else {
            return Err(Error::Precondition(
                "streaming muxer has no audio stream configured".into(),
            ));
        };
        self.ensure_header()?;
        let first_pts = *self.first_audio_pts.get_or_insert(sample.pts);
        let mut packet = ffmpeg::codec::packet::Packet::copy(&sample.data);
        let pts = sample.pts - first_pts;
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));
        packet.set_stream(audio_stream_index);
        packet.write_interleaved(&mut self.output)?;
        Ok(())
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.output.write_header()?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Finalizes the container. Idempotent: a second call is a no-op
    /// rather than an error, so a caller's best-effort cleanup on an
    /// error path can always call it safely.
    pub fn finish(&mut self) -> Result<()> {
        if self.trailer_written {
            return Ok(());
        }
        self.ensure_header()?;
        self.output.write_trailer()?;
        self.trailer_written = true;
        Ok(())
    }
}

impl Drop for StreamingMuxer {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("error finalizing streaming muxer during drop: {e:?}");
        }
    }
}
