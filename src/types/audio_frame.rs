use crate::ring::RingEntry;

/// One AAC access unit. Same shape as [`crate::types::video_frame::EncodedFrame`]
/// minus `is_keyframe` (every AAC frame is independently decodable); runs on
/// the same 100-ns clock as video.
#[derive(Debug, Clone)]
pub struct EncodedAudioSample {
    pub data: Vec<u8>,
    pub size: u32,
    pub pts: i64,
    pub duration: i64,
}

impl EncodedAudioSample {
    pub fn new(data: Vec<u8>, pts: i64, duration: i64) -> Self {
        let size = data.len() as u32;
        Self {
            data,
            size,
            pts,
            duration,
        }
    }
}

impl RingEntry for EncodedAudioSample {
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
        // Every AAC access unit is independently decodable.
        true
    }

    fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }
}

/// One endpoint's raw PCM capture, pre-mix.
#[derive(Debug)]
pub struct RawAudioFrame {
    pub samples: Vec<f32>,
    /// Capture timestamp, 100-ns units (same clock as video).
    pub timestamp: i64,
    pub device_id: usize,
}
