//! Fail-closed hardware video encoder selection: probe available
//! encoders and fail closed rather than assume a vendor.
//!
//! GPU-vendor probing through EGL only ever tells you *which* encoder to
//! try, not whether it actually works on this machine/driver/ffmpeg
//! build. This instead tries VAAPI first, then NVENC, each by attempting
//! the real `ffmpeg_next::codec::encoder::find_by_name` + context-open
//! sequence, and only returns `Error::InitFailure` once every candidate
//! has failed — no encoder is selected, not a silent stdlib fallback.

use crate::config::QualityPreset;
use crate::error::{Error, Result};
use crate::types::video_frame::{EncodedFrame, RawVideoFrame, SequenceHeader};

use super::nvenc::NvencEncoder;
use super::vaapi::VaapiEncoder;
use super::video::VideoEncoder;

pub enum DynamicVideoEncoder {
    Vaapi(VaapiEncoder),
    Nvenc(NvencEncoder),
}

impl DynamicVideoEncoder {
    /// Tries VAAPI, then NVENC, in that order; the first constructor that
    /// succeeds wins. `preferred` lets a caller skip straight to a known
    /// backend instead of probing.
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        is_hevc: bool,
        quality: QualityPreset,
        preferred: Option<VideoEncoderBackend>,
    ) -> Result<Self> {
        if let Some(backend) = preferred {
            return Self::try_backend(backend, width, height, fps, is_hevc, quality);
        }

        match VaapiEncoder::new(width, height, fps, is_hevc, quality) {
            Ok(enc) => return Ok(DynamicVideoEncoder::Vaapi(enc)),
            Err(e) => log::warn!("vaapi encoder unavailable, trying nvenc: {e:?}"),
        }

        match NvencEncoder::new(width, height, fps, is_hevc, quality) {
            Ok(enc) => Ok(DynamicVideoEncoder::Nvenc(enc)),
            Err(e) => Err(Error::InitFailure(format!(
                "no hardware video encoder available (vaapi and nvenc both failed: {e:?})"
            ))),
        }
    }

    fn try_backend(
        backend: VideoEncoderBackend,
        width: u32,
        height: u32,
        fps: u32,
        is_hevc: bool,
        quality: QualityPreset,
    ) -> Result<Self> {
        match backend {
            VideoEncoderBackend::Vaapi => Ok(DynamicVideoEncoder::Vaapi(VaapiEncoder::new(
                width, height, fps, is_hevc, quality,
            )?)),
            VideoEncoderBackend::Nvenc => Ok(DynamicVideoEncoder::Nvenc(NvencEncoder::new(
                width, height, fps, is_hevc, quality,
            )?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoderBackend {
    Vaapi,
    Nvenc,
}

impl VideoEncoder for DynamicVideoEncoder {
    fn submit(&mut self, frame: &RawVideoFrame) -> Result<()> {
        match self {
            DynamicVideoEncoder::Vaapi(e) => e.submit(frame),
            DynamicVideoEncoder::Nvenc(e) => e.submit(frame),
        }
    }

    fn drain(&mut self) -> Result<Vec<EncodedFrame>> {
        match self {
            DynamicVideoEncoder::Vaapi(e) => e.drain(),
            DynamicVideoEncoder::Nvenc(e) => e.drain(),
        }
    }

    fn flush(&mut self) -> Result<Vec<EncodedFrame>> {
        match self {
            DynamicVideoEncoder::Vaapi(e) => e.flush(),
            DynamicVideoEncoder::Nvenc(e) => e.flush(),
        }
    }

    fn reset(&mut self) -> Result<()> {
        match self {
            DynamicVideoEncoder::Vaapi(e) => e.reset(),
            DynamicVideoEncoder::Nvenc(e) => e.reset(),
        }
    }

    fn sequence_header(&self) -> Option<SequenceHeader> {
        match self {
            DynamicVideoEncoder::Vaapi(e) => e.sequence_header(),
            DynamicVideoEncoder::Nvenc(e) => e.sequence_header(),
        }
    }
}
