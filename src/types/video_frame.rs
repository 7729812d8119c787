use std::os::fd::RawFd;

use crate::ring::RingEntry;

/// One compressed video access unit.
///
/// Created by a [`crate::encoders::video::VideoEncoder`], moved into a
/// [`crate::ring::FrameRing`] on insert, and deep-copied out by
/// [`crate::ring::FrameRing::drain_for_extract`]. `data` is non-empty iff
/// `size > 0`.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub size: u32,
    /// Presentation timestamp, 100-ns units, monotonically non-decreasing.
    pub pts: i64,
    /// Duration, 100-ns units.
    pub duration: i64,
    /// True iff this is an IDR that independently resets the decoder.
    pub is_keyframe: bool,
}

impl EncodedFrame {
    pub fn new(data: Vec<u8>, pts: i64, duration: i64, is_keyframe: bool) -> Self {
        let size = data.len() as u32;
        Self {
            data,
            size,
            pts,
            duration,
            is_keyframe,
        }
    }
}

impl RingEntry for EncodedFrame {
    fn pts(&self) -> i64 {
        self.pts
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }
}

/// A raw GPU surface handed from [`crate::capture::CaptureSource`] to
/// [`crate::color::ColorConverter`].
#[derive(Debug)]
pub struct RawVideoFrame {
    pub data: Vec<u8>,
    /// Opaque monotonic timestamp as reported by the capture source,
    /// 100-ns units.
    pub pts: i64,
    pub dmabuf_fd: Option<RawFd>,
    pub stride: i32,
    pub offset: u32,
    pub width: u32,
    pub height: u32,
}

/// An on-GPU NV12 surface produced by [`crate::color::ColorConverter`] and
/// consumed by [`crate::encoders::video::VideoEncoder::submit`].
pub struct Nv12Frame {
    pub frame: ffmpeg_next::util::frame::Video,
    pub pts: i64,
}

/// Immutable decoder-initialization bytes (VPS/SPS/PPS for HEVC), constant
/// for the life of an encoder session and re-emitted after a reset.
pub type SequenceHeader = Vec<u8>;
