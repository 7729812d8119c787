//! Hardware video encoder interface.

use ffmpeg_next::{self as ffmpeg, ffi::AVBufferRef};

use crate::config::QualityPreset;
use crate::error::{Error, Result};
use crate::types::video_frame::{EncodedFrame, RawVideoFrame, SequenceHeader};

/// Frames between forced IDRs: frequent enough that the ring never has to
/// keep more than one GOP's worth of trailing non-keyframes before it can
/// anchor an extraction.
pub const GOP_SIZE: u32 = 60;

/// 1080p60 is the reference point every quality preset's base rate is
/// quoted at; other resolutions and frame rates scale away from it.
const REFERENCE_MEGAPIXELS: f64 = 1920.0 * 1080.0;
const REFERENCE_FPS: f64 = 60.0;

const RESOLUTION_SCALE_RANGE: (f64, f64) = (0.25, 4.0);
const FPS_SCALE_RANGE: (f64, f64) = (0.5, 4.0);
const BITRATE_RANGE_MBPS: (f64, f64) = (10.0, 150.0);

fn base_mbps(quality: QualityPreset) -> f64 {
    match quality {
        QualityPreset::Good => 10.0,
        QualityPreset::High => 18.0,
        QualityPreset::Ultra => 32.0,
        QualityPreset::Lossless => 60.0,
    }
}

/// Quality-to-bitrate mapping: a per-quality base rate at 1080p60, scaled by
/// resolution and frame rate relative to that reference, each scale factor
/// clamped before being applied, and the final result clamped to
/// `BITRATE_RANGE_MBPS`. Returns kbps, since that's the unit
/// `set_bit_rate` wants.
pub fn bitrate_kbps(width: u32, height: u32, fps: u32, quality: QualityPreset) -> u32 {
    let pixels = width as f64 * height as f64;
    let resolution_scale =
        (pixels / REFERENCE_MEGAPIXELS).clamp(RESOLUTION_SCALE_RANGE.0, RESOLUTION_SCALE_RANGE.1);
    let fps_scale =
        (fps as f64 / REFERENCE_FPS).clamp(FPS_SCALE_RANGE.0, FPS_SCALE_RANGE.1);

    let mbps = (base_mbps(quality) * resolution_scale * fps_scale)
        .clamp(BITRATE_RANGE_MBPS.0, BITRATE_RANGE_MBPS.1);
    (mbps * 1000.0) as u32
}

/// A hardware-backed video encoder: submits NV12 surfaces, emits
/// [`EncodedFrame`]s. `reset` tears down and recreates the underlying
/// codec context in place, surviving the reset without losing session
/// state.
pub trait VideoEncoder: Send {
    fn submit(&mut self, frame: &RawVideoFrame) -> Result<()>;
    /// Non-terminal: polls whatever packets the codec is ready to emit
    /// without telling it encoding is over. Safe to call every frame.
    fn drain(&mut self) -> Result<Vec<EncodedFrame>>;
    /// Terminal: signals end-of-stream and collects the trailing packets
    /// the codec was holding back (B-frame reorder, lookahead). The codec
    /// cannot accept another `submit` until `reset`.
    fn flush(&mut self) -> Result<Vec<EncodedFrame>>;
    fn reset(&mut self) -> Result<()>;
    fn sequence_header(&self) -> Option<SequenceHeader>;
}

pub(crate) fn create_hw_device(
    device_type: ffmpeg::ffi::AVHWDeviceType,
) -> Result<*mut AVBufferRef> {
    use std::ptr::null_mut;
    let mut device_ctx: *mut AVBufferRef = null_mut();
    let err = unsafe {
        ffmpeg::ffi::av_hwdevice_ctx_create(
            &mut device_ctx,
            device_type,
            null_mut(),
            null_mut(),
            0,
        )
    };
    if err < 0 || device_ctx.is_null() {
        return Err(Error::InitFailure(format!(
            "failed to create hw device context: {err}"
        )));
    }
    Ok(device_ctx)
}

/// Pulls the codec's out-of-band header (VPS/SPS/PPS for HEVC, SPS/PPS for
/// H.264) from the opened encoder's extradata, if the codec populated one.
/// Most HW encoders only fill this in after `open()` returns.
pub(crate) fn extract_sequence_header(
    encoder: &ffmpeg::codec::encoder::Video,
) -> Option<SequenceHeader> {
    unsafe {
        let ctx = encoder.as_ptr();
        let size = (*ctx).extradata_size;
        if size <= 0 || (*ctx).extradata.is_null() {
            return None;
        }
        Some(std::slice::from_raw_parts((*ctx).extradata, size as usize).to_vec())
    }
}

pub(crate) fn create_hw_frame_ctx(device_ctx: *mut AVBufferRef) -> Result<*mut AVBufferRef> {
    let frame_ctx = unsafe { ffmpeg::ffi::av_hwframe_ctx_alloc(device_ctx) };
    if frame_ctx.is_null() {
        return Err(Error::InitFailure(
            "failed to allocate hw frame context".into(),
        ));
    }
    Ok(frame_ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_scales_with_quality_at_fixed_resolution() {
        let good = bitrate_kbps(1920, 1080, 60, QualityPreset::Good);
        let high = bitrate_kbps(1920, 1080, 60, QualityPreset::High);
        let ultra = bitrate_kbps(1920, 1080, 60, QualityPreset::Ultra);
        let lossless = bitrate_kbps(1920, 1080, 60, QualityPreset::Lossless);
        assert!(good < high);
        assert!(high < ultra);
        assert!(ultra < lossless);
    }

    #[test]
    fn bitrate_scales_with_resolution_at_fixed_quality() {
        let hd = bitrate_kbps(1920, 1080, 60, QualityPreset::High);
        let qhd = bitrate_kbps(2560, 1440, 60, QualityPreset::High);
        let uhd = bitrate_kbps(3840, 2160, 60, QualityPreset::High);
        assert!(hd < qhd);
        assert!(qhd < uhd);
    }

    #[test]
    fn bitrate_scales_with_fps_at_fixed_resolution_and_quality() {
        let slow = bitrate_kbps(1920, 1080, 30, QualityPreset::High);
        let fast = bitrate_kbps(1920, 1080, 120, QualityPreset::High);
        assert!(slow < fast);
    }

    #[test]
    fn bitrate_never_drops_below_the_floor() {
        let kbps = bitrate_kbps(640, 480, 30, QualityPreset::Good);
        assert!(kbps >= (BITRATE_RANGE_MBPS.0 * 1000.0) as u32);
    }

    #[test]
    fn bitrate_never_exceeds_the_ceiling() {
        let kbps = bitrate_kbps(7680, 4320, 240, QualityPreset::Lossless);
        assert!(kbps <= (BITRATE_RANGE_MBPS.1 * 1000.0) as u32);
    }
}
