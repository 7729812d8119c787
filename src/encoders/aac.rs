//! AAC audio encoder, for broad container compatibility with the
//! MP4/AVI/WMV sinks. Keeps the same leftover-sample chunking idiom an
//! Opus encoder would: PCM arrives in arbitrary-sized buffers but the
//! codec wants fixed-size frames, so samples are queued in a `VecDeque`
//! and drained in `frame_size` chunks.

use std::collections::VecDeque;

use ffmpeg_next::{self as ffmpeg, Rational};

use crate::error::Result;
use crate::types::audio_frame::EncodedAudioSample;

use super::audio::AudioEncoder;

pub struct AacEncoder {
    encoder: Option<ffmpeg::codec::encoder::Audio>,
    next_pts: i64,
    leftover: VecDeque<f32>,
}

impl AacEncoder {
    pub fn new(sample_rate: u32, bit_rate: usize) -> Result<Self> {
        Ok(Self {
            encoder: Some(Self::create_encoder(sample_rate, bit_rate)?),
            next_pts: 0,
            leftover: VecDeque::with_capacity(4096),
        })
    }

    fn create_encoder(sample_rate: u32, bit_rate: usize) -> Result<ffmpeg::codec::encoder::Audio> {
        let codec = ffmpeg::codec::encoder::find(ffmpeg::codec::Id::AAC)
            .ok_or(ffmpeg::Error::EncoderNotFound)?;

        let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()?;

        encoder_ctx.set_rate(sample_rate as i32);
        encoder_ctx.set_bit_rate(bit_rate);
        encoder_ctx.set_format(ffmpeg::format::Sample::F32(
            ffmpeg::format::sample::Type::Planar,
        ));
        encoder_ctx.set_time_base(Rational::new(1, sample_rate as i32));
        encoder_ctx.set_channel_layout(ffmpeg::channel_layout::ChannelLayout::STEREO);

        let encoder = encoder_ctx.open()?;
        Ok(encoder)
    }

    fn encode_chunks(&mut self, timestamp: i64, out: &mut Vec<EncodedAudioSample>) -> Result<()> {
        let Some(encoder) = &mut self.encoder else {
            return Ok(());
        };
        let frame_size = encoder.frame_size() as usize;
        if frame_size == 0 {
            return Ok(());
        }

        while self.leftover.len() >= frame_size {
            let chunk: Vec<f32> = self.leftover.drain(..frame_size).collect();
            let mut frame = ffmpeg::frame::Audio::new(
                encoder.format(),
                frame_size,
                encoder.channel_layout(),
            );
            frame.plane_mut(0).copy_from_slice(&chunk);
            frame.set_pts(Some(self.next_pts));
            frame.set_rate(encoder.rate());

            encoder.send_frame(&frame)?;
            Self::collect_packets(encoder, timestamp, out)?;
            self.next_pts += frame_size as i64;
        }
        Ok(())
    }

    fn collect_packets(
        encoder: &mut ffmpeg::codec::encoder::Audio,
        timestamp: i64,
        out: &mut Vec<EncodedAudioSample>,
    ) -> Result<()> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            if let Some(data) = packet.data() {
                out.push(EncodedAudioSample::new(
                    data.to_vec(),
                    packet.pts().unwrap_or(timestamp),
                    packet.duration(),
                ));
            }
            packet = ffmpeg::codec::packet::Packet::empty();
        }
        Ok(())
    }
}

impl AudioEncoder for AacEncoder {
    fn process(&mut self, samples: &[f32], timestamp: i64) -> Result<Vec<EncodedAudioSample>> {
        self.leftover.extend(samples.iter().copied());
        let mut out = Vec::new();
        self.encode_chunks(timestamp, &mut out)?;
        Ok(out)
    }

    fn drain(&mut self) -> Result<Vec<EncodedAudioSample>> {
        let mut out = Vec::new();
        if let Some(encoder) = &mut self.encoder {
            encoder.send_eof()?;
            Self::collect_packets(encoder, self.next_pts, &mut out)?;
        }
        Ok(out)
    }

    fn reset(&mut self) -> Result<()> {
        let (rate, bit_rate) = match &self.encoder {
            Some(e) => (e.rate(), 128_000),
            None => (48_000, 128_000),
        };
        self.encoder.take();
        self.leftover.clear();
        self.encoder = Some(Self::create_encoder(rate, bit_rate)?);
        Ok(())
    }
}

impl Drop for AacEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            log::error!("error draining aac encoder during drop: {e:?}");
        }
    }
}
