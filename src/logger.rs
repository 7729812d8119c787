//! Process-wide asynchronous diagnostic logger.
//!
//! Producers never block: [`AsyncLogger::log`] formats into a bounded
//! entry and publishes it to a fixed-capacity channel, dropping the entry
//! if the channel is full rather than waiting on the writer. A dedicated
//! writer thread drains the channel, timestamps each line relative to
//! `init`, and also owns the per-worker heartbeat table that
//! [`crate::health::HealthMonitor`] reads.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};
use crate::types::state::WorkerHeartbeat;

const RING_CAPACITY: usize = 4096;
const MAX_ENTRY_BYTES: usize = 512;
const HEARTBEAT_SUMMARY_INTERVAL: Duration = Duration::from_secs(5);
const STALL_THRESHOLD_MS_DEFAULT: u64 = 10_000;

struct LogEntry {
    at: Instant,
    line: String,
}

struct Shared {
    start: Instant,
    heartbeats: Mutex<HashMap<&'static str, Arc<WorkerHeartbeat>>>,
}

/// Handle to the running logger. Cloning is cheap (all fields are
/// `Arc`/channel handles); every clone publishes into the same ring and
/// shares the same heartbeat table. The writer thread is joined once the
/// last clone is dropped or [`AsyncLogger::shutdown`] is called.
#[derive(Clone)]
pub struct AsyncLogger {
    sender: Sender<LogEntry>,
    shared: Arc<Shared>,
    stop_requested: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
}

impl AsyncLogger {
    /// Opens `path`, starts the writer thread, and returns a handle. Each
    /// call starts its own independent writer thread and heartbeat table;
    /// a process normally calls this once and shares the resulting handle.
    pub fn init(path: &str, append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(Error::Io)?;

        let (sender, receiver) = bounded(RING_CAPACITY);
        let shared = Arc::new(Shared {
            start: Instant::now(),
            heartbeats: Mutex::new(HashMap::new()),
        });
        let stop_requested = Arc::new(AtomicBool::new(false));

        let writer_shared = Arc::clone(&shared);
        let writer_stop = Arc::clone(&stop_requested);
        let join = std::thread::spawn(move || {
            run_writer(file, receiver, writer_shared, writer_stop);
        });

        Ok(Self {
            sender,
            shared,
            stop_requested,
            writer: Arc::new(Mutex::new(Some(join))),
        })
    }

    /// Formats `line` and publishes it. Never blocks; the entry is
    /// silently dropped if the ring is full.
    pub fn log(&self, line: impl Into<String>) {
        let mut line = line.into();
        line.truncate(MAX_ENTRY_BYTES);
        let _ = self.sender.try_send(LogEntry {
            at: Instant::now(),
            line,
        });
    }

    /// Stamps `worker_id`'s last-beat time and increments its count.
    /// Non-blocking.
    pub fn heartbeat(&self, worker_id: &'static str) {
        let mut heartbeats = self.shared.heartbeats.lock().unwrap();
        let hb = heartbeats
            .entry(worker_id)
            .or_insert_with(|| Arc::new(WorkerHeartbeat::new(now_ms(self.shared.start))));
        hb.beat(now_ms(self.shared.start));
    }

    pub fn mark_worker_inactive(&self, worker_id: &'static str) {
        if let Some(hb) = self.shared.heartbeats.lock().unwrap().get(worker_id) {
            hb.set_active(false);
        }
    }

    /// Pure read: `true` iff the worker is active and its last heartbeat
    /// is older than `threshold_ms`.
    pub fn is_worker_stalled(&self, worker_id: &'static str, threshold_ms: u64) -> bool {
        let heartbeats = self.shared.heartbeats.lock().unwrap();
        match heartbeats.get(worker_id) {
            Some(hb) => hb.is_stalled(now_ms(self.shared.start), threshold_ms),
            None => false,
        }
    }

    pub fn heartbeat_handle(&self, worker_id: &'static str) -> Arc<WorkerHeartbeat> {
        let mut heartbeats = self.shared.heartbeats.lock().unwrap();
        Arc::clone(
            heartbeats
                .entry(worker_id)
                .or_insert_with(|| Arc::new(WorkerHeartbeat::new(now_ms(self.shared.start)))),
        )
    }

    /// Best-effort drain with a bounded wait of at most 1 second.
    pub fn flush(&self) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while !self.sender.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Signals the writer, joins it (bounded by the writer's own 1s
    /// recv timeout), and closes the file.
    pub fn shutdown(&self) {
        self.flush();
        self.stop_requested.store(true, Ordering::Release);
        if let Some(join) = self.writer.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

fn now_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn run_writer(
    mut file: File,
    receiver: Receiver<LogEntry>,
    shared: Arc<Shared>,
    stop_requested: Arc<AtomicBool>,
) {
    let mut last_summary = Instant::now();
    loop {
        match receiver.recv_timeout(Duration::from_secs(1)) {
            Ok(entry) => {
                write_line(&mut file, shared.start, &entry);
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                drain_remaining(&mut file, &receiver, shared.start);
                break;
            }
        }

        if last_summary.elapsed() >= HEARTBEAT_SUMMARY_INTERVAL {
            write_heartbeat_summary(&mut file, &shared);
            last_summary = Instant::now();
        }

        if stop_requested.load(Ordering::Acquire) {
            drain_remaining(&mut file, &receiver, shared.start);
            break;
        }
    }
    let _ = file.flush();
}

fn drain_remaining(file: &mut File, receiver: &Receiver<LogEntry>, start: Instant) {
    loop {
        match receiver.try_recv() {
            Ok(entry) => write_line(file, start, &entry),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

fn write_line(file: &mut File, start: Instant, entry: &LogEntry) {
    let elapsed = entry.at.duration_since(start);
    let line = format!("{} {}\n", format_hms(elapsed), entry.line);
    // Best-effort: a full disk or similar I/O failure is silently
    // swallowed per the writer's failure semantics.
    let _ = file.write_all(line.as_bytes());
}

fn format_hms(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn write_heartbeat_summary(file: &mut File, shared: &Shared) {
    let heartbeats = shared.heartbeats.lock().unwrap();
    if heartbeats.is_empty() {
        return;
    }
    let now = now_ms(shared.start);
    let mut line = String::from("-- heartbeats --\n");
    for (worker, hb) in heartbeats.iter() {
        if !hb.is_active() {
            continue;
        }
        let age = now.saturating_sub(hb.last_beat_ms());
        let status = if age > STALL_THRESHOLD_MS_DEFAULT {
            "STALLED!"
        } else if age > STALL_THRESHOLD_MS_DEFAULT / 2 {
            "SLOW"
        } else {
            "OK"
        };
        line.push_str(&format!(
            "  {worker}: beats={} last_age_ms={age} status={status}\n",
            hb.beat_count()
        ));
    }
    let _ = file.write_all(line.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("replaybuffer-core-test-{name}-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn heartbeat_and_stall_detection_round_trip() {
        let path = tmp_path("heartbeat");
        let logger = AsyncLogger::init(&path, false).unwrap();
        logger.heartbeat("capture");
        assert!(!logger.is_worker_stalled("capture", 10_000));
        // No heartbeat recorded for an unknown worker: never considered stalled.
        assert!(!logger.is_worker_stalled("nonexistent", 0));
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn log_entries_are_dropped_not_blocked_when_full() {
        let path = tmp_path("dropwhenfull");
        let logger = AsyncLogger::init(&path, false).unwrap();
        // Flood well past the ring capacity; none of these calls may block.
        for i in 0..(RING_CAPACITY * 2) {
            logger.log(format!("line {i}"));
        }
        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn format_hms_matches_spec_shape() {
        assert_eq!(format_hms(Duration::from_millis(3_723_045)), "01:02:03.045");
    }
}
