//! Top-level lifecycle state machine. Wraps any
//! [`PipelineDriver`] (a [`crate::replay::ReplayBuffer`] or
//! [`crate::recorder::Recorder`]) with the
//! `Idle -> Starting -> Active -> Stopping -> Idle` state machine, a
//! [`crate::health::HealthMonitor`] watchdog, and automatic restart when
//! the watchdog marks the pipeline `Stalled`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::logger::AsyncLogger;
use crate::types::state::{AtomicPipelineState, PipelineState};

const RESTART_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What [`Supervisor`] drives: start/stop the underlying capture-encode
/// pipeline. Implemented by [`crate::replay::ReplayBuffer`] and
/// [`crate::recorder::Recorder`].
pub trait PipelineDriver: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

pub struct Supervisor {
    driver: Arc<std::sync::Mutex<Box<dyn PipelineDriver>>>,
    state: Arc<AtomicPipelineState>,
    logger: AsyncLogger,
    health: Option<HealthMonitor>,
    restart_thread_stop: Arc<AtomicBool>,
    restart_thread: Option<std::thread::JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        driver: Box<dyn PipelineDriver>,
        logger: AsyncLogger,
        worker_ids: Vec<&'static str>,
        stall_threshold_ms: u64,
    ) -> Self {
        let state = Arc::new(AtomicPipelineState::default());
        let health = HealthMonitor::spawn(
            logger.clone(),
            Arc::clone(&state),
            worker_ids,
            stall_threshold_ms,
        );

        let driver = Arc::new(std::sync::Mutex::new(driver));
        let restart_thread_stop = Arc::new(AtomicBool::new(false));

        let watch_state = Arc::clone(&state);
        let watch_driver = Arc::clone(&driver);
        let watch_logger = logger.clone();
        let watch_stop = Arc::clone(&restart_thread_stop);
        let restart_thread = std::thread::spawn(move || {
            while !watch_stop.load(Ordering::Acquire) {
                if watch_state.get() == PipelineState::Stalled {
                    watch_logger.log("pipeline stalled, restarting".to_string());
                    watch_state.set(PipelineState::Stopping);
                    {
                        let mut driver = watch_driver.lock().unwrap();
                        if let Err(e) = driver.stop() {
                            watch_logger.log(format!("restart: stop failed: {e}"));
                        }
                    }
                    watch_state.set(PipelineState::Starting);
                    {
                        let mut driver = watch_driver.lock().unwrap();
                        match driver.start() {
                            Ok(()) => watch_state.set(PipelineState::Active),
                            Err(e) => {
                                watch_logger.log(format!("restart: start failed: {e}"));
                                watch_state.set(PipelineState::Error);
                            }
                        }
                    }
                }
                std::thread::sleep(RESTART_POLL_INTERVAL);
            }
        });

        Self {
            driver,
            state,
            logger,
            health: Some(health),
            restart_thread_stop,
            restart_thread: Some(restart_thread),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn start(&self) -> Result<()> {
        if !self.state.compare_and_set(PipelineState::Idle, PipelineState::Starting) {
            return Err(Error::Precondition(format!(
                "cannot start from state {:?}",
                self.state.get()
            )));
        }
        let result = self.driver.lock().unwrap().start();
        match &result {
            Ok(()) => self.state.set(PipelineState::Active),
            Err(_) => self.state.set(PipelineState::Error),
        }
        result
    }

    pub fn stop(&self) -> Result<()> {
        let from = self.state.get();
        if !matches!(from, PipelineState::Active | PipelineState::Stalled) {
            return Err(Error::Precondition(format!("cannot stop from state {from:?}")));
        }
        self.state.set(PipelineState::Stopping);
        let result = self.driver.lock().unwrap().stop();
        self.state.set(PipelineState::Idle);
        self.logger.flush();
        result
    }

    /// Blocking shutdown of the supervisor's own background threads. Does
    /// not stop the underlying pipeline; call [`Supervisor::stop`] first
    /// if it's still active.
    pub fn shutdown(&mut self) {
        self.restart_thread_stop.store(true, Ordering::Release);
        if let Some(handle) = self.restart_thread.take() {
            let _ = handle.join();
        }
        if let Some(mut health) = self.health.take() {
            health.shutdown();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingDriver {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
    }

    impl PipelineDriver for CountingDriver {
        fn start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn tmp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("replaybuffer-core-test-{name}-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn start_requires_idle_state() {
        let path = tmp_path("supervisor-start");
        let logger = AsyncLogger::init(&path, false).unwrap();
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let driver = Box::new(CountingDriver {
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        });
        let mut sup = Supervisor::new(driver, logger.clone(), vec![], 10_000);
        sup.start().unwrap();
        assert_eq!(sup.state(), PipelineState::Active);
        assert!(sup.start().is_err());
        sup.stop().unwrap();
        assert_eq!(sup.state(), PipelineState::Idle);
        assert_eq!(starts.load(Ordering::Relaxed), 1);
        assert_eq!(stops.load(Ordering::Relaxed), 1);
        sup.shutdown();
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn stalled_pipeline_is_automatically_restarted() {
        let path = tmp_path("supervisor-restart");
        let logger = AsyncLogger::init(&path, false).unwrap();
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let driver = Box::new(CountingDriver {
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        });
        let mut sup = Supervisor::new(driver, logger.clone(), vec![], 10_000);
        sup.start().unwrap();
        sup.state.set(PipelineState::Stalled);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while starts.load(Ordering::Relaxed) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(starts.load(Ordering::Relaxed), 2);
        assert_eq!(stops.load(Ordering::Relaxed), 1);
        assert_eq!(sup.state(), PipelineState::Active);

        sup.stop().unwrap();
        sup.shutdown();
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
