//! # replaybuffer-core
//!
//! `replaybuffer-core` is a low-latency screen-capture pipeline for Linux:
//! PipeWire capture, hardware-accelerated encoding (VAAPI or NVENC), and
//! either a rolling in-memory replay buffer or a continuous streaming
//! recording, behind one [`supervisor::Supervisor`] lifecycle.
//!
//! ## Features
//!
//! - Hardware-accelerated encoding (VAAPI and NVENC), selected automatically
//!   and failing closed if neither is available
//! - Zero-copy DMA-BUF capture into the encoder via [`color::ColorConverter`]
//! - Up to three mixed audio endpoints, encoded to AAC
//! - A span-bounded [`ring::FrameRing`] for "save the last N seconds" replay,
//!   or a [`mux::streaming::StreamingMuxer`] for continuous recording
//! - Automatic stall detection and restart via [`health::HealthMonitor`]
//!
//! ## Platform support
//!
//! Linux with a Wayland (or PipeWire-capable X11) compositor exposing
//! PipeWire for screen capture; VAAPI or NVENC drivers for encoding.
//!
//! ## Example
//!
//! ```no_run
//! use replaybuffer_core::config::{ConfigurationBuilder, QualityPreset};
//! use replaybuffer_core::logger::AsyncLogger;
//! use replaybuffer_core::replay::{CaptureHandles, ReplayBuffer};
//! use replaybuffer_core::supervisor::Supervisor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigurationBuilder::new()
//!     .with_quality(QualityPreset::High)
//!     .with_replay_duration_s(60)
//!     .build()?;
//!
//! let logger = AsyncLogger::init("replaybuffer.log", false)?;
//! let handles = CaptureHandles {
//!     pipewire_fd: 0,
//!     stream_node: 0,
//!     use_nvidia_modifiers: false,
//! };
//! let buffer = ReplayBuffer::new(config, handles, 1920, 1080, logger.clone())?;
//! let supervisor = Supervisor::new(Box::new(buffer), logger, vec!["replay_video_encode"], 10_000);
//! supervisor.start()?;
//! // ... later, on a hotkey ...
//! // buffer.save_async("clip.mp4".to_string());
//! supervisor.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod capture;
pub mod color;
pub mod config;
pub mod encoders;
pub mod error;
pub mod health;
pub mod logger;
pub mod mixer;
pub mod mux;
pub mod recorder;
pub mod replay;
pub mod ring;
pub mod supervisor;
pub mod types;
mod utils;

pub use config::{Configuration, ConfigurationBuilder, QualityPreset};
pub use error::{Error, Result};
pub use recorder::Recorder;
pub use replay::{CaptureHandles, ReplayBuffer};
pub use supervisor::{PipelineDriver, Supervisor};
