//! Keeps a rolling 30-second replay buffer running and saves a clip each
//! time you press Enter, until you type `q`.
//!
//! Portal/monitor negotiation (the PipeWire fd and stream node) is out of
//! scope for this crate; this demo expects them in `PIPEWIRE_FD` and
//! `PIPEWIRE_STREAM_NODE` env vars, same as a desktop-shell integration
//! would pass them in after its own picker UI runs.

use std::io::BufRead;

use replaybuffer_core::config::{ConfigurationBuilder, QualityPreset};
use replaybuffer_core::logger::AsyncLogger;
use replaybuffer_core::replay::{CaptureHandles, ReplayBuffer};
use replaybuffer_core::supervisor::Supervisor;
use replaybuffer_core::{PipelineDriver, Result as CoreResult};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logging::log_to_stderr(log::LevelFilter::Info);
    log::info!("Replay Buffer Hotkey Demo");
    log::info!("Press Enter to save the last 30 seconds, type 'q' + Enter to quit.");

    let pipewire_fd: i32 = std::env::var("PIPEWIRE_FD")?.parse()?;
    let stream_node: u32 = std::env::var("PIPEWIRE_STREAM_NODE")?.parse()?;

    let config = ConfigurationBuilder::new()
        .with_quality(QualityPreset::High)
        .with_replay_duration_s(30)
        .build()?;

    let logger = AsyncLogger::init("replay_hotkey.log", false)?;
    let handles = CaptureHandles {
        pipewire_fd,
        stream_node,
        use_nvidia_modifiers: false,
    };

    let buffer = std::sync::Arc::new(std::sync::Mutex::new(ReplayBuffer::new(
        config,
        handles,
        1920,
        1080,
        logger.clone(),
    )?));

    // Supervisor owns lifecycle/restart; it needs its own driver handle,
    // separate from the one we hold to call `save_async`.
    let driver: Box<dyn PipelineDriver> = Box::new(SharedReplayDriver {
        buffer: std::sync::Arc::clone(&buffer),
    });
    let supervisor = Supervisor::new(driver, logger.clone(), vec!["replay_video_encode"], 10_000);
    supervisor.start()?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line?.trim() {
            "q" => break,
            _ => {
                let path = format!(
                    "replay-{}.mp4",
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_secs()
                );
                log::info!("saving clip to {path}");
                let handle = buffer.lock().unwrap().save_async(path);
                let _ = handle.join();
            }
        }
    }

    supervisor.stop()?;
    Ok(())
}

/// Adapts a shared, already-constructed [`ReplayBuffer`] to
/// [`replaybuffer_core::PipelineDriver`] so the caller can keep its own
/// handle for `save_async` while the [`Supervisor`] drives start/stop.
struct SharedReplayDriver {
    buffer: std::sync::Arc<std::sync::Mutex<ReplayBuffer>>,
}

impl PipelineDriver for SharedReplayDriver {
    fn start(&mut self) -> CoreResult<()> {
        self.buffer.lock().unwrap().start()
    }
    fn stop(&mut self) -> CoreResult<()> {
        self.buffer.lock().unwrap().stop()
    }
}
