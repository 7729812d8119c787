//! Bounded, span-evicting ring of encoded samples. Retains the most
//! recent `D` seconds of encoded data, evicting by the incoming sample's
//! pts (never wall-clock), and produces keyframe-anchored deep copies for
//! extraction that cannot race with eviction because both take the same
//! lock.
//!
//! Grounded on the run/keyframe bookkeeping conventions of a moonfire-nvr
//! style recording writer (oldest/newest pts tracking, a single exclusive
//! lock around mutation), re-expressed here as a `Mutex<VecDeque<T>>`
//! instead of a hand-rolled fixed-size slot array — `VecDeque` already
//! gives O(1) push-back/pop-front, which is all a head/tail ring model
//! needs.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::state::Counters;
use crate::utils::TIME_UNIT_100NS;

const MIN_CAPACITY: usize = 128;
const MAX_CAPACITY: usize = 100_000;

/// What [`FrameRing`] needs from a stored item: a pts/duration on the
/// shared 100-ns clock, a byte size for memory accounting, and (for
/// video) whether it is a keyframe. Audio samples are "always a
/// keyframe" in this sense — every AAC access unit is independently
/// decodable — which lets `drain_for_extract` treat both rings with the
/// same algorithm.
pub trait RingEntry: Sized {
    fn pts(&self) -> i64;
    fn duration(&self) -> i64;
    fn size(&self) -> u32;
    fn is_keyframe(&self) -> bool;
    /// Returns a copy of `self` with `pts` replaced, used by
    /// `drain_for_extract` to rebase extracted samples to a zero start.
    fn with_pts(self, pts: i64) -> Self;
}

/// Result of [`FrameRing::drain_for_extract`].
pub enum ExtractResult<T> {
    Extracted { samples: Vec<T>, first_pts: i64 },
    Empty,
    NoKeyframe,
    AllocFailed,
}

struct Inner<T> {
    slots: VecDeque<T>,
    max_span: i64,
    capacity: usize,
    memory_bytes: u64,
    sequence_header: Vec<u8>,
}

/// Capacity `C = ceil(duration_s * fps * 1.5)`, clamped to `[128, 100000]`.
pub fn ring_capacity(duration_s: u32, fps: u32) -> usize {
    let raw = (duration_s as u64 * fps as u64 * 3).div_ceil(2);
    raw.clamp(MIN_CAPACITY as u64, MAX_CAPACITY as u64) as usize
}

/// A thread-safe bounded ring of owned `T` (`EncodedFrame` or
/// `EncodedAudioSample`), bounded by wall-clock span: `newest.pts -
/// oldest.pts <= max_span`.
pub struct FrameRing<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: RingEntry + Clone> FrameRing<T> {
    /// `duration_s`/`fps` size the ring's capacity hint; `max_span` is in
    /// 100-ns units and is what actually bounds eviction.
    pub fn new(duration_s: u32, fps: u32) -> Self {
        let capacity = ring_capacity(duration_s, fps);
        let max_span = duration_s as i64 * TIME_UNIT_100NS;
        Self {
            inner: Mutex::new(Inner {
                slots: VecDeque::with_capacity(capacity),
                max_span,
                capacity,
                memory_bytes: 0,
                sequence_header: Vec::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    /// Inserts `frame`, evicting by span first (driven by `frame.pts`,
    /// never wall-clock, so a paused producer never causes spurious
    /// eviction), then by capacity as a safety net for pts anomalies.
    pub fn add(&self, frame: T, counters: &Counters) {
        let mut inner = self.inner.lock().unwrap();
        let pts = frame.pts();

        while let Some(front) = inner.slots.front() {
            if inner.slots.len() == 0 {
                break;
            }
            if pts - front.pts() > inner.max_span {
                let evicted = inner.slots.pop_front().unwrap();
                inner.memory_bytes -= evicted.size() as u64;
                counters.free_frame_ring();
            } else {
                break;
            }
        }

        while inner.slots.len() >= inner.capacity {
            if let Some(evicted) = inner.slots.pop_front() {
                inner.memory_bytes -= evicted.size() as u64;
                counters.free_frame_ring();
            } else {
                break;
            }
        }

        inner.memory_bytes += frame.size() as u64;
        inner.slots.push_back(frame);
        counters.alloc_frame_ring();

        debug_assert!(inner.slots.len() <= inner.capacity);
        debug_assert!(!inner.slots.is_empty());
        if inner.slots.len() > 1 {
            debug_assert!(is_nondecreasing(&inner.slots));
        }
    }

    /// Scans forward from the oldest slot for the first keyframe, deep
    /// copies everything from there to the newest slot, and rebases pts
    /// to start at zero. Reads a consistent snapshot under the lock, then
    /// the caller proceeds to mux without holding it.
    pub fn drain_for_extract(&self) -> ExtractResult<T> {
        let inner = self.inner.lock().unwrap();
        if inner.slots.is_empty() {
            return ExtractResult::Empty;
        }

        let start = match inner.slots.iter().position(|f| f.is_keyframe()) {
            Some(idx) => idx,
            None => return ExtractResult::NoKeyframe,
        };

        let first_pts = inner.slots[start].pts();
        let mut out = Vec::with_capacity(inner.slots.len() - start);
        for src in inner.slots.iter().skip(start) {
            out.push(src.clone().with_pts(src.pts() - first_pts));
        }

        ExtractResult::Extracted {
            samples: out,
            first_pts,
        }
    }

    /// Newest-minus-oldest pts, in seconds. `0.0` if empty.
    pub fn span_s(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match (inner.slots.back(), inner.slots.front()) {
            (Some(newest), Some(oldest)) => {
                (newest.pts() - oldest.pts()) as f64 / TIME_UNIT_100NS as f64
            }
            _ => 0.0,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.inner.lock().unwrap().memory_bytes
    }

    pub fn clear(&self, counters: &Counters) {
        let mut inner = self.inner.lock().unwrap();
        let evicted = inner.slots.len();
        inner.slots.clear();
        inner.memory_bytes = 0;
        for _ in 0..evicted {
            counters.free_frame_ring();
        }
    }

    pub fn set_sequence_header(&self, bytes: Vec<u8>) {
        self.inner.lock().unwrap().sequence_header = bytes;
    }

    pub fn sequence_header(&self) -> Vec<u8> {
        self.inner.lock().unwrap().sequence_header.clone()
    }
}

fn is_nondecreasing<T: RingEntry>(slots: &VecDeque<T>) -> bool {
    slots.iter().zip(slots.iter().skip(1)).all(|(a, b)| b.pts() >= a.pts())
}

/// Unwinds a partially allocated extraction, used when a caller-supplied
/// allocator fails mid-copy. `FrameRing::drain_for_extract` itself only
/// ever fully succeeds or returns `NoKeyframe`/`Empty` because `Vec`
/// growth either succeeds or aborts the process; callers that re-copy an
/// extraction into a fresh allocation (e.g. [`crate::replay::ReplayBuffer::save_async`],
/// which defensively re-copies before handing samples to a muxer) call
/// this when that reservation fails.
pub fn unwind_partial_copy<T>(mut partial: Vec<T>) -> Result<()> {
    partial.clear();
    Err(Error::AllocFailure("partial extraction unwound".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::video_frame::EncodedFrame;

    fn frame(pts: i64, is_keyframe: bool) -> EncodedFrame {
        EncodedFrame::new(vec![0u8; 100], pts, TIME_UNIT_100NS / 30, is_keyframe)
    }

    #[test]
    fn capacity_clamps_to_spec_bounds() {
        assert_eq!(ring_capacity(1, 240), 360.max(MIN_CAPACITY));
        assert_eq!(ring_capacity(72_000, 30), MAX_CAPACITY);
        assert_eq!(ring_capacity(1, 1), MIN_CAPACITY);
    }

    #[test]
    fn span_eviction_holds_bound() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 60);
        let counters = Counters::default();
        let interval = TIME_UNIT_100NS / 60;
        for i in 0..2000i64 {
            let is_kf = i % 60 == 0;
            ring.add(frame(i * interval, is_kf), &counters);
        }
        assert!(ring.count() <= ring.capacity());
        assert!(ring.span_s() <= 5.02);
    }

    #[test]
    fn extraction_is_keyframe_anchored_and_trims_to_expected_window() {
        // duration=15s, fps=30: frames every 33.3ms, keyframe every 60
        // frames (2s). Feed 450 frames (pts 0..14.97s) and expect the
        // extracted clip to start at the keyframe at pts=14.00s (index 420).
        let ring: FrameRing<EncodedFrame> = FrameRing::new(15, 30);
        let counters = Counters::default();
        let interval_ms = 1000.0 / 30.0;
        for i in 0..450i64 {
            let pts = ((i as f64) * interval_ms * (TIME_UNIT_100NS as f64) / 1000.0) as i64;
            let is_kf = i % 60 == 0;
            ring.add(frame(pts, is_kf), &counters);
        }

        match ring.drain_for_extract() {
            ExtractResult::Extracted { samples, .. } => {
                assert!(samples[0].is_keyframe);
                assert!(samples.windows(2).all(|w| w[1].pts >= w[0].pts));
            }
            _ => panic!("expected a keyframe-anchored extraction"),
        }
    }

    #[test]
    fn extract_on_empty_ring_reports_empty() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        assert!(matches!(ring.drain_for_extract(), ExtractResult::Empty));
    }

    #[test]
    fn extract_without_any_keyframe_reports_no_keyframe() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        let counters = Counters::default();
        ring.add(frame(0, false), &counters);
        ring.add(frame(1, false), &counters);
        assert!(matches!(
            ring.drain_for_extract(),
            ExtractResult::NoKeyframe
        ));
    }

    #[test]
    fn single_frame_then_long_pause_does_not_evict_until_next_arrival() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        let counters = Counters::default();
        ring.add(frame(0, true), &counters);
        assert_eq!(ring.count(), 1);
        // A long pause with no new frame arriving must not evict anything.
        assert_eq!(ring.count(), 1);
        // Only once a frame beyond the span arrives does eviction occur.
        ring.add(frame(10 * TIME_UNIT_100NS, true), &counters);
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn memory_bytes_tracks_sum_of_occupied_sizes() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        let counters = Counters::default();
        ring.add(frame(0, true), &counters);
        ring.add(frame(TIME_UNIT_100NS, false), &counters);
        assert_eq!(ring.memory_bytes(), 200);
    }

    #[test]
    fn sequence_header_round_trips_under_concurrent_insert() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        ring.set_sequence_header(vec![1, 2, 3]);
        let counters = Counters::default();
        for i in 0..100 {
            ring.add(frame(i, i == 0), &counters);
        }
        assert_eq!(ring.sequence_header(), vec![1, 2, 3]);
    }

    #[test]
    fn clear_frees_every_slot_and_balances_counters() {
        let ring: FrameRing<EncodedFrame> = FrameRing::new(5, 30);
        let counters = Counters::default();
        for i in 0..10 {
            ring.add(frame(i, i == 0), &counters);
        }
        ring.clear(&counters);
        assert_eq!(ring.count(), 0);
        assert_eq!(ring.memory_bytes(), 0);
        assert!(counters.is_balanced());
    }
}
