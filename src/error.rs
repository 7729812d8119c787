use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Behavioral error taxonomy for the pipeline.
///
/// Leaf components (capture, encoders, muxers) return one of these kinds
/// and never render a user-facing message. Mid-level components log and
/// classify. The [`crate::supervisor::Supervisor`] is the single place
/// that translates a kind into lifecycle effects and a UI-visible message.
#[derive(Debug)]
pub enum Error {
    /// Invalid parameters: zero dimension, non-positive duration, bad region.
    /// Reported synchronously; no state change.
    Precondition(String),
    /// Capture, encoder, or muxer could not be brought up.
    InitFailure(String),
    /// Recoverable condition (e.g. access-lost) handled by bounded retry
    /// inside the affected component.
    TransientDeviceError(String),
    /// Encoder or GPU session is irrecoverable; bubbles to the Supervisor
    /// as a restart request for the whole pipeline.
    DeviceLost(String),
    /// The audio path failed while video can proceed.
    AudioError(String),
    /// Raised by the HealthMonitor; handled by the Supervisor as a
    /// recoverable stop+restart.
    StallDetected(String),
    /// Allocation failed during a ring insert (frame dropped, counted) or
    /// during extract (partial allocation unwound, save fails).
    AllocFailure(String),
    /// Errors surfaced from FFmpeg.
    FFmpeg(ffmpeg_next::Error),
    /// Errors surfaced from PipeWire.
    PipeWire(String),
    /// I/O errors.
    Io(io::Error),
    /// Anything not classified above. The Supervisor tears the session
    /// down to `Idle` and reports to the UI.
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            Error::InitFailure(msg) => write!(f, "initialization failed: {msg}"),
            Error::TransientDeviceError(msg) => write!(f, "transient device error: {msg}"),
            Error::DeviceLost(msg) => write!(f, "device lost: {msg}"),
            Error::AudioError(msg) => write!(f, "audio error: {msg}"),
            Error::StallDetected(msg) => write!(f, "stall detected: {msg}"),
            Error::AllocFailure(msg) => write!(f, "allocation failure: {msg}"),
            Error::FFmpeg(err) => write!(f, "ffmpeg error: {err}"),
            Error::PipeWire(msg) => write!(f, "pipewire error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::FFmpeg(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ffmpeg_next::Error> for Error {
    fn from(err: ffmpeg_next::Error) -> Self {
        Error::FFmpeg(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<pipewire::Error> for Error {
    fn from(err: pipewire::Error) -> Self {
        Error::PipeWire(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Fatal(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Fatal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
