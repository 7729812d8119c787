use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle state of a [`crate::replay::ReplayBuffer`] or [`crate::recorder::Recorder`].
///
/// Transitions (spec, unchanged):
/// `Idle -> Starting -> Active -> Stopping -> Idle`;
/// `Starting|Active -> Error` on fatal init/runtime failure;
/// `Active -> Stalled -> Stopping -> Idle` (recovery restart, driven by
/// [`crate::health::HealthMonitor`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Starting = 1,
    Active = 2,
    Stopping = 3,
    Stalled = 4,
    Error = 5,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Idle,
            1 => PipelineState::Starting,
            2 => PipelineState::Active,
            3 => PipelineState::Stopping,
            4 => PipelineState::Stalled,
            _ => PipelineState::Error,
        }
    }
}

/// Atomic holder for [`PipelineState`], mutated only via compare-and-set.
#[derive(Debug)]
pub struct AtomicPipelineState {
    inner: AtomicU8,
}

impl AtomicPipelineState {
    pub fn new(initial: PipelineState) -> Self {
        Self {
            inner: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: PipelineState) {
        self.inner.store(state as u8, Ordering::Release);
    }

    /// Atomically transition `from -> to`. Returns `true` iff the state was
    /// `from` at the time of the swap.
    pub fn compare_and_set(&self, from: PipelineState, to: PipelineState) -> bool {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicPipelineState {
    fn default() -> Self {
        Self::new(PipelineState::Idle)
    }
}

/// Per-worker liveness record: `{last_beat_ms, beat_count, active}`.
///
/// A worker is stalled iff `now - last_beat_ms > stall_threshold` and
/// `active`. Updated by the worker itself, read by
/// [`crate::health::HealthMonitor`] and [`crate::logger::AsyncLogger`].
#[derive(Debug, Default)]
pub struct WorkerHeartbeat {
    last_beat_ms: AtomicU64,
    beat_count: AtomicU64,
    active: AtomicU64,
}

impl WorkerHeartbeat {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_beat_ms: AtomicU64::new(now_ms),
            beat_count: AtomicU64::new(0),
            active: AtomicU64::new(1),
        }
    }

    pub fn beat(&self, now_ms: u64) {
        self.last_beat_ms.store(now_ms, Ordering::Release);
        self.beat_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn last_beat_ms(&self) -> u64 {
        self.last_beat_ms.load(Ordering::Acquire)
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active as u64, Ordering::Release);
    }

    pub fn is_stalled(&self, now_ms: u64, stall_threshold_ms: u64) -> bool {
        self.is_active() && now_ms.saturating_sub(self.last_beat_ms()) > stall_threshold_ms
    }
}

/// Debug-mode alloc/free counters per subsystem, used to detect leaks.
/// Compiled in only under `debug_assertions`.
#[derive(Debug, Default)]
pub struct Counters {
    pub nvenc_frame: AtomicU64,
    pub aac_sample: AtomicU64,
    pub frame_ring: AtomicU64,
}

impl Counters {
    pub fn alloc_nvenc_frame(&self) {
        if cfg!(debug_assertions) {
            self.nvenc_frame.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn free_nvenc_frame(&self) {
        if cfg!(debug_assertions) {
            self.nvenc_frame.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn alloc_aac_sample(&self) {
        if cfg!(debug_assertions) {
            self.aac_sample.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn free_aac_sample(&self) {
        if cfg!(debug_assertions) {
            self.aac_sample.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn alloc_frame_ring(&self) {
        if cfg!(debug_assertions) {
            self.frame_ring.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn free_frame_ring(&self) {
        if cfg!(debug_assertions) {
            self.frame_ring.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// `true` iff every alloc/free pair is balanced — used by the
    /// round-trip `start/stop` idempotence property.
    pub fn is_balanced(&self) -> bool {
        self.nvenc_frame.load(Ordering::Relaxed) == 0
            && self.aac_sample.load(Ordering::Relaxed) == 0
            && self.frame_ring.load(Ordering::Relaxed) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_state_cas_only_succeeds_from_expected_state() {
        let state = AtomicPipelineState::new(PipelineState::Idle);
        assert!(state.compare_and_set(PipelineState::Idle, PipelineState::Starting));
        assert_eq!(state.get(), PipelineState::Starting);
        // Wrong `from` does not clobber the state.
        assert!(!state.compare_and_set(PipelineState::Idle, PipelineState::Active));
        assert_eq!(state.get(), PipelineState::Starting);
    }

    #[test]
    fn heartbeat_monotonicity() {
        let hb = WorkerHeartbeat::new(0);
        hb.beat(10);
        hb.beat(20);
        assert_eq!(hb.beat_count(), 2);
        assert_eq!(hb.last_beat_ms(), 20);
        assert!(hb.is_stalled(10_031, 10_000));
        assert!(!hb.is_stalled(10_020, 10_000));
    }

    #[test]
    fn counters_balance_after_matched_alloc_free() {
        let counters = Counters::default();
        counters.alloc_frame_ring();
        counters.alloc_frame_ring();
        counters.free_frame_ring();
        counters.free_frame_ring();
        assert!(counters.is_balanced());
    }
}
