//! Session configuration, built with a fluent builder and validated at
//! `build()` time (`Error::Precondition` on any invalid combination).
//! Loading/persisting this struct from disk is out of scope — the core
//! only consumes an already-populated `Configuration`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Good,
    High,
    Ultra,
    Lossless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fps {
    Fps30,
    Fps60,
    Fps120,
    Fps240,
}

impl Fps {
    pub fn as_u32(self) -> u32 {
        match self {
            Fps::Fps30 => 30,
            Fps::Fps60 => 60,
            Fps::Fps120 => 120,
            Fps::Fps240 => 240,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp4H264,
    Mp4H265,
    Avi,
    Wmv,
}

impl OutputFormat {
    /// AVI/WMV are recording-only containers; replay extraction always
    /// targets MP4.
    pub fn supports_replay(self) -> bool {
        matches!(self, OutputFormat::Mp4H264 | OutputFormat::Mp4H265)
    }

    pub fn is_hevc(self) -> bool {
        matches!(self, OutputFormat::Mp4H265)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Native,
    R16x9,
    R9x16,
    R1x1,
    R4x5,
    R16x10,
    R4x3,
    R21x9,
    R32x9,
}

/// Region of the desktop the `CaptureSource` binds to. Resolved by the UI
/// collaborator (monitor enumeration, window picking) before it reaches
/// the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRegion {
    Monitor(u32),
    AllMonitors,
    Window(u64),
    Area {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSourceConfig {
    pub device_id: String,
    pub gain_pct: u8,
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub quality: QualityPreset,
    pub fps: Fps,
    pub output_format: OutputFormat,
    pub replay_duration_s: u32,
    pub capture_region: CaptureRegion,
    pub aspect_ratio: AspectRatio,
    pub audio_enabled: bool,
    pub audio_sources: Vec<AudioSourceConfig>,
    pub save_dir: String,
    pub cancel_key: Option<String>,
    pub save_hotkey: Option<String>,
}

impl Configuration {
    fn validate(&self) -> Result<()> {
        if !(1..=72_000).contains(&self.replay_duration_s) {
            return Err(Error::Precondition(format!(
                "replay_duration_s must be in [1, 72000], got {}",
                self.replay_duration_s
            )));
        }

        if self.audio_sources.len() > 2 {
            return Err(Error::Precondition(format!(
                "at most 2 audio sources supported, got {}",
                self.audio_sources.len()
            )));
        }

        for source in &self.audio_sources {
            if source.gain_pct > 100 {
                return Err(Error::Precondition(format!(
                    "gain_pct must be in [0, 100], got {}",
                    source.gain_pct
                )));
            }
        }

        if let CaptureRegion::Area { width, height, .. } = self.capture_region {
            if width == 0 || height == 0 {
                return Err(Error::Precondition(
                    "capture area must have non-zero width and height".into(),
                ));
            }
        }

        Ok(())
    }
}

pub struct ConfigurationBuilder {
    quality: QualityPreset,
    fps: Fps,
    output_format: OutputFormat,
    replay_duration_s: u32,
    capture_region: CaptureRegion,
    aspect_ratio: AspectRatio,
    audio_enabled: bool,
    audio_sources: Vec<AudioSourceConfig>,
    save_dir: String,
    cancel_key: Option<String>,
    save_hotkey: Option<String>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            quality: QualityPreset::High,
            fps: Fps::Fps60,
            output_format: OutputFormat::Mp4H265,
            replay_duration_s: 60,
            capture_region: CaptureRegion::AllMonitors,
            aspect_ratio: AspectRatio::Native,
            audio_enabled: false,
            audio_sources: Vec::new(),
            save_dir: ".".to_string(),
            cancel_key: None,
            save_hotkey: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_fps(mut self, fps: Fps) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_replay_duration_s(mut self, secs: u32) -> Self {
        self.replay_duration_s = secs;
        self
    }

    pub fn with_capture_region(mut self, region: CaptureRegion) -> Self {
        self.capture_region = region;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect: AspectRatio) -> Self {
        self.aspect_ratio = aspect;
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.audio_enabled = true;
        self
    }

    pub fn with_audio_source(mut self, device_id: impl Into<String>, gain_pct: u8) -> Self {
        self.audio_sources.push(AudioSourceConfig {
            device_id: device_id.into(),
            gain_pct,
        });
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<String>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_cancel_key(mut self, key: impl Into<String>) -> Self {
        self.cancel_key = Some(key.into());
        self
    }

    pub fn with_save_hotkey(mut self, key: impl Into<String>) -> Self {
        self.save_hotkey = Some(key.into());
        self
    }

    pub fn build(self) -> Result<Configuration> {
        let config = Configuration {
            quality: self.quality,
            fps: self.fps,
            output_format: self.output_format,
            replay_duration_s: self.replay_duration_s,
            capture_region: self.capture_region,
            aspect_ratio: self.aspect_ratio,
            audio_enabled: self.audio_enabled,
            audio_sources: self.audio_sources,
            save_dir: self.save_dir,
            cancel_key: self.cancel_key,
            save_hotkey: self.save_hotkey,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_replay_duration() {
        let err = ConfigurationBuilder::new()
            .with_replay_duration_s(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));

        let err = ConfigurationBuilder::new()
            .with_replay_duration_s(72_001)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn rejects_more_than_two_audio_sources() {
        let err = ConfigurationBuilder::new()
            .with_audio()
            .with_audio_source("a", 50)
            .with_audio_source("b", 50)
            .with_audio_source("c", 50)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn accepts_boundary_durations() {
        assert!(ConfigurationBuilder::new()
            .with_replay_duration_s(1)
            .build()
            .is_ok());
        assert!(ConfigurationBuilder::new()
            .with_replay_duration_s(72_000)
            .build()
            .is_ok());
    }
}
