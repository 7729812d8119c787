//! Records continuously to `recording.mp4` until you press Enter.
//!
//! Portal/monitor negotiation (the PipeWire fd and stream node) is out of
//! scope for this crate; this demo expects them in `PIPEWIRE_FD` and
//! `PIPEWIRE_STREAM_NODE` env vars, same as a desktop-shell integration
//! would pass them in after its own picker UI runs.

use replaybuffer_core::config::{ConfigurationBuilder, QualityPreset};
use replaybuffer_core::logger::AsyncLogger;
use replaybuffer_core::recorder::Recorder;
use replaybuffer_core::replay::CaptureHandles;
use replaybuffer_core::supervisor::Supervisor;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logging::log_to_stderr(log::LevelFilter::Info);
    log::info!("Streaming Recording Demo");
    log::info!("Recording to recording.mp4. Press Enter to stop.");

    let pipewire_fd: i32 = std::env::var("PIPEWIRE_FD")?.parse()?;
    let stream_node: u32 = std::env::var("PIPEWIRE_STREAM_NODE")?.parse()?;

    let config = ConfigurationBuilder::new()
        .with_quality(QualityPreset::High)
        .with_audio()
        .with_audio_source("default", 100)
        .build()?;

    let logger = AsyncLogger::init("stream_recording.log", false)?;
    let handles = CaptureHandles {
        pipewire_fd,
        stream_node,
        use_nvidia_modifiers: false,
    };

    let recorder = Recorder::new(config, handles, 1920, 1080, "recording.mp4", logger.clone())?;
    let supervisor = Supervisor::new(
        Box::new(recorder),
        logger,
        vec!["record_video_encode", "record_audio_mix"],
        10_000,
    );

    supervisor.start()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    log::info!("Stopping recording...");
    supervisor.stop()?;
    log::info!("Saved recording.mp4");
    Ok(())
}
