//! Stall detection and restart: a worker that stops heartbeating gets
//! restarted instead of wedging the whole pipeline forever. Built fresh,
//! reusing [`crate::logger::AsyncLogger`]'s heartbeat table as the source
//! of truth and [`crate::types::state::AtomicPipelineState`] for the
//! transition it drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logger::AsyncLogger;
use crate::types::state::AtomicPipelineState;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls a fixed set of worker ids for staleness and transitions
/// `Active -> Stalled` the first time any of them exceeds
/// `stall_threshold_ms`. Does not itself restart anything; a
/// [`crate::supervisor::Supervisor`] watching the same state reacts to the
/// transition.
pub struct HealthMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn spawn(
        logger: AsyncLogger,
        state: Arc<AtomicPipelineState>,
        worker_ids: Vec<&'static str>,
        stall_threshold_ms: u64,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            use crate::types::state::PipelineState;
            while !thread_stop.load(Ordering::Acquire) {
                if state.get() == PipelineState::Active {
                    for worker_id in &worker_ids {
                        if logger.is_worker_stalled(worker_id, stall_threshold_ms) {
                            logger.log(format!("worker '{worker_id}' stalled, marking pipeline"));
                            state.compare_and_set(PipelineState::Active, PipelineState::Stalled);
                            break;
                        }
                    }
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::state::PipelineState;
    use std::time::Instant;

    fn tmp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("replaybuffer-core-test-{name}-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn marks_stalled_when_registered_worker_goes_quiet() {
        let path = tmp_path("health-stall");
        let logger = AsyncLogger::init(&path, false).unwrap();
        let state = Arc::new(AtomicPipelineState::new(PipelineState::Active));

        logger.heartbeat("capture");
        // Force staleness by waiting past an aggressively small threshold.
        let mut monitor = HealthMonitor::spawn(logger.clone(), Arc::clone(&state), vec!["capture"], 10);

        let deadline = Instant::now() + Duration::from_secs(2);
        while state.get() != PipelineState::Stalled && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(state.get(), PipelineState::Stalled);

        monitor.shutdown();
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn does_not_touch_state_outside_active() {
        let path = tmp_path("health-idle");
        let logger = AsyncLogger::init(&path, false).unwrap();
        let state = Arc::new(AtomicPipelineState::new(PipelineState::Idle));
        let mut monitor = HealthMonitor::spawn(logger.clone(), Arc::clone(&state), vec!["capture"], 1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(state.get(), PipelineState::Idle);
        monitor.shutdown();
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
