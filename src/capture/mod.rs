//! Capture-side backends.
//!
//! The only concrete backing implementation shipped is [`video::PipewireCaptureSource`]
//! / [`audio::PipewireAudioSource`], the Linux analogue of a desktop-duplication
//! API, reached through PipeWire the way the rest of this crate's platform
//! primitives are reached through whatever concrete API the host offers.
//! [`SyntheticCaptureSource`] is a deterministic test double standing in for
//! the platform's capture device in unit tests.

pub mod audio;
pub mod video;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::types::video_frame::RawVideoFrame;

/// Sent over a `pipewire::channel` to break a running main loop out of
/// `pw_loop.run()` from another thread.
pub struct Terminate;

/// Shared readiness flags a capture backend flips once its stream starts
/// delivering buffers, gating the companion stream (video waits on audio
/// and vice versa).
#[derive(Default, Debug)]
pub struct CaptureState {
    pub video_ready: Arc<AtomicBool>,
    pub audio_ready: Arc<AtomicBool>,
}

impl CaptureState {
    pub fn new() -> Self {
        Self {
            video_ready: Arc::new(AtomicBool::new(false)),
            audio_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_video_ready(&self) -> bool {
        self.video_ready.load(Ordering::Acquire)
    }

    pub fn is_audio_ready(&self) -> bool {
        self.audio_ready.load(Ordering::Acquire)
    }
}

/// A source of raw video frames: the platform capability this crate models
/// as a capability interface rather than a concrete Windows/Wayland call,
/// the same way a desktop-duplication API would be modeled.
pub trait CaptureSource: Send {
    /// Blocks the calling thread running the backend's event loop until
    /// terminated. Must be called from its own thread.
    fn run(&mut self) -> Result<()>;
}

/// A deterministic capture double that emits synthetic NV12-sized frames at
/// a fixed cadence, used by tests that exercise the ring/mux/replay
/// machinery without a real display server.
pub struct SyntheticCaptureSource {
    frame_tx: crossbeam::channel::Sender<RawVideoFrame>,
    width: u32,
    height: u32,
    frame_count: u32,
    interval_100ns: i64,
    stop: Arc<AtomicBool>,
}

impl SyntheticCaptureSource {
    pub fn new(
        frame_tx: crossbeam::channel::Sender<RawVideoFrame>,
        width: u32,
        height: u32,
        frame_count: u32,
        interval_100ns: i64,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frame_tx,
            width,
            height,
            frame_count,
            interval_100ns,
            stop,
        }
    }
}

impl CaptureSource for SyntheticCaptureSource {
    fn run(&mut self) -> Result<()> {
        for i in 0..self.frame_count {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let pts = i as i64 * self.interval_100ns;
            let frame = RawVideoFrame {
                data: vec![0u8; (self.width * self.height * 4) as usize],
                pts,
                dmabuf_fd: None,
                stride: (self.width * 4) as i32,
                offset: 0,
                width: self.width,
                height: self.height,
            };
            if self.frame_tx.try_send(frame).is_err() {
                log::warn!("synthetic capture source: frame channel full or closed");
            }
        }
        Ok(())
    }
}
