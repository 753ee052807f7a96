//! Fixed-capacity rings of serialized frame snapshots.
//!
//! A session may keep two snapshot streams: one sampled for checksum-history
//! diagnostics and one sampled for instant replay. Each stream is a
//! [`SnapshotRingBuffer`]: entries are tick-ordered, capacity is fixed at
//! construction, and pushing into a full ring evicts the oldest entry.
//!
//! [`plan_buffers`] sizes both rings and decides whether one ring can serve
//! both streams. Sharing only saves memory; each stream gets at least the
//! coverage it asked for either way.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::{InvalidFrameReason, LockstepError};
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Frame;

/// How [`SnapshotRingBuffer::find`] matches a requested tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindMode {
    /// Only an entry with exactly the requested tick.
    Equal,
    /// The entry with the largest tick not greater than the requested one.
    ClosestLessThanOrEqual,
    /// The entry with the smallest distance to the requested tick; ties go to the earlier tick.
    Closest,
}

/// A serialized frame and its tick.
///
/// The bytes are shared, so handing a snapshot to a reader never copies it
/// and never lets the reader mutate the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Tick of the serialized frame.
    pub tick: Frame,
    /// Output of [`FrameState::serialize`](crate::frame_state::FrameState::serialize).
    pub bytes: Arc<[u8]>,
}

/// Circular buffer of serialized frames ordered by tick.
#[derive(Debug, Clone)]
pub struct SnapshotRingBuffer {
    entries: VecDeque<SnapshotEntry>,
    capacity: usize,
}

impl SnapshotRingBuffer {
    /// Creates an empty ring holding up to `capacity` snapshots.
    pub fn new(capacity: usize) -> Result<Self, LockstepError> {
        if capacity == 0 {
            return Err(LockstepError::invalid_request(
                "snapshot ring capacity must be at least 1",
            ));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Maximum number of snapshots held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of snapshots held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a snapshot, evicting the oldest one when full.
    ///
    /// Ticks must be strictly increasing.
    pub fn push_back(&mut self, tick: Frame, bytes: Arc<[u8]>) -> Result<(), LockstepError> {
        if let Some(reason) = InvalidFrameReason::for_negative(tick) {
            return Err(LockstepError::InvalidFrame {
                frame: tick,
                reason,
            });
        }
        if let Some(last) = self.entries.back() {
            if tick <= last.tick {
                return Err(LockstepError::InvalidFrame {
                    frame: tick,
                    reason: InvalidFrameReason::NotIncreasing { last: last.tick },
                });
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SnapshotEntry { tick, bytes });
        Ok(())
    }

    /// The newest snapshot.
    #[must_use]
    pub fn peek_back(&self) -> Option<&SnapshotEntry> {
        self.entries.back()
    }

    /// The oldest snapshot still held.
    #[must_use]
    pub fn peek_front(&self) -> Option<&SnapshotEntry> {
        self.entries.front()
    }

    /// Finds a snapshot for `tick` according to `mode`.
    #[must_use]
    pub fn find(&self, tick: Frame, mode: FindMode) -> Option<&SnapshotEntry> {
        // Index of the first entry with entry.tick > tick.
        let upper = self.entries.partition_point(|e| e.tick <= tick);
        match mode {
            FindMode::Equal => upper
                .checked_sub(1)
                .and_then(|i| self.entries.get(i))
                .filter(|e| e.tick == tick),
            FindMode::ClosestLessThanOrEqual => {
                upper.checked_sub(1).and_then(|i| self.entries.get(i))
            },
            FindMode::Closest => {
                let below = upper.checked_sub(1).and_then(|i| self.entries.get(i));
                let above = self.entries.get(upper);
                match (below, above) {
                    (Some(b), Some(a)) => {
                        let above_distance = i64::from(a.tick.as_i32()) - i64::from(tick.as_i32());
                        let below_distance = i64::from(tick.as_i32()) - i64::from(b.tick.as_i32());
                        if above_distance < below_distance {
                            Some(a)
                        } else {
                            Some(b)
                        }
                    },
                    (Some(b), None) => Some(b),
                    (None, a) => a,
                }
            },
        }
    }

    /// Iterates snapshots oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    /// Drops every snapshot newer than `tick`.
    pub fn truncate_after(&mut self, tick: Frame) {
        let keep = self.entries.partition_point(|e| e.tick <= tick);
        self.entries.truncate(keep);
    }

    /// Removes all snapshots.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl InvariantChecker for SnapshotRingBuffer {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.entries.len() > self.capacity {
            return Err(InvariantViolation::new(
                "SnapshotRingBuffer",
                "holds more entries than its capacity",
            )
            .with_details(format!("len={}, capacity={}", self.entries.len(), self.capacity)));
        }
        let mut previous: Option<Frame> = None;
        for entry in &self.entries {
            if previous.is_some_and(|p| entry.tick <= p) {
                return Err(InvariantViolation::new(
                    "SnapshotRingBuffer",
                    "entries must be strictly increasing by tick",
                ));
            }
            previous = Some(entry.tick);
        }
        Ok(())
    }
}

// ==========================================
// Sizing and sharing
// ==========================================

/// How often and how far back a snapshot stream samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Sample every `interval` verified ticks.
    pub interval: u32,
    /// How much simulated time the stream must cover.
    pub window: Duration,
}

impl SamplingConfig {
    /// Creates a sampling configuration.
    #[must_use]
    pub const fn new(interval: u32, window: Duration) -> Self {
        Self { interval, window }
    }

    /// Minimal ring size for this stream at its own interval.
    #[must_use]
    pub fn minimal_size(&self, simulation_rate: u32) -> usize {
        minimal_size(simulation_rate, self.window, self.interval)
    }
}

/// `ceil(1 + simulation_rate * window_seconds / interval)`, computed without floating point.
#[must_use]
pub fn minimal_size(simulation_rate: u32, window: Duration, interval: u32) -> usize {
    let interval = u128::from(interval.max(1));
    let numerator = u128::from(simulation_rate) * window.as_micros();
    let denominator = interval * 1_000_000;
    1 + numerator.div_ceil(denominator) as usize
}

/// Interval and capacity of one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingSpec {
    /// Sampling interval in ticks.
    pub interval: u32,
    /// Ring capacity.
    pub capacity: usize,
}

/// Result of [`plan_buffers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferPlan {
    /// Each requested stream gets its own ring.
    Separate {
        /// Ring for checksum-history diagnostics.
        checksum_history: Option<RingSpec>,
        /// Ring for instant replay.
        instant_replay: Option<RingSpec>,
    },
    /// One ring serves both streams.
    Shared(RingSpec),
}

impl BufferPlan {
    /// Total snapshot slots allocated by this plan.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        match self {
            Self::Separate {
                checksum_history,
                instant_replay,
            } => {
                checksum_history.map_or(0, |r| r.capacity) + instant_replay.map_or(0, |r| r.capacity)
            },
            Self::Shared(ring) => ring.capacity,
        }
    }
}

/// Sizes the snapshot rings and merges them when one interval divides the other.
///
/// A shared ring samples at the smaller interval. Each stream's requirement is
/// recomputed at that interval and the shared ring takes the larger of the two.
/// The merge happens only if it does not allocate more than two separate rings.
#[must_use]
pub fn plan_buffers(
    simulation_rate: u32,
    checksum_history: Option<SamplingConfig>,
    instant_replay: Option<SamplingConfig>,
) -> BufferPlan {
    let spec = |cfg: SamplingConfig| RingSpec {
        interval: cfg.interval.max(1),
        capacity: cfg.minimal_size(simulation_rate),
    };
    let separate = BufferPlan::Separate {
        checksum_history: checksum_history.map(spec),
        instant_replay: instant_replay.map(spec),
    };
    let (Some(a), Some(b)) = (checksum_history, instant_replay) else {
        return separate;
    };

    let (ia, ib) = (a.interval.max(1), b.interval.max(1));
    let (small, large) = if ia <= ib { (ia, ib) } else { (ib, ia) };
    if large % small != 0 {
        return separate;
    }
    let shared = RingSpec {
        interval: small,
        capacity: minimal_size(simulation_rate, a.window, small)
            .max(minimal_size(simulation_rate, b.window, small)),
    };
    if shared.capacity <= separate.total_capacity() {
        BufferPlan::Shared(shared)
    } else {
        separate
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn ring_with(ticks: &[i32], capacity: usize) -> SnapshotRingBuffer {
        let mut ring = SnapshotRingBuffer::new(capacity).unwrap();
        for &t in ticks {
            ring.push_back(Frame::new(t), Arc::from(vec![t as u8])).unwrap();
        }
        ring
    }

    fn found(ring: &SnapshotRingBuffer, tick: i32, mode: FindMode) -> Option<i32> {
        ring.find(Frame::new(tick), mode).map(|e| e.tick.as_i32())
    }

    // ==========================================
    // Ring semantics
    // ==========================================

    #[test]
    fn push_evicts_oldest_when_full() {
        let ring = ring_with(&[10, 20, 30, 40], 3);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.peek_front().unwrap().tick, Frame::new(20));
        assert_eq!(ring.peek_back().unwrap().tick, Frame::new(40));
        assert!(ring.check_invariants().is_ok());
    }

    #[test]
    fn push_rejects_out_of_order() {
        let mut ring = ring_with(&[10], 3);
        assert!(ring.push_back(Frame::new(10), Arc::from(vec![])).is_err());
        assert!(ring.push_back(Frame::NULL, Arc::from(vec![])).is_err());
    }

    #[test]
    fn push_rejects_negative_ticks() {
        let mut ring = SnapshotRingBuffer::new(2).unwrap();
        let err = ring.push_back(Frame::new(-5), Arc::from(vec![])).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::Negative,
                ..
            }
        ));
        assert!(ring.is_empty());
    }

    #[test]
    fn find_closest_spans_the_whole_tick_range() {
        let ring = ring_with(&[0, i32::MAX], 2);
        assert_eq!(found(&ring, i32::MAX / 2, FindMode::Closest), Some(0));
        assert_eq!(found(&ring, i32::MAX / 2 + 1, FindMode::Closest), Some(i32::MAX));
        assert_eq!(found(&ring, i32::MIN, FindMode::Closest), Some(0));
        assert_eq!(found(&ring, i32::MIN, FindMode::ClosestLessThanOrEqual), None);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(SnapshotRingBuffer::new(0).is_err());
    }

    // ==========================================
    // Find modes
    // ==========================================

    #[test]
    fn find_equal() {
        let ring = ring_with(&[10, 20, 30], 4);
        assert_eq!(found(&ring, 20, FindMode::Equal), Some(20));
        assert_eq!(found(&ring, 25, FindMode::Equal), None);
        assert_eq!(found(&ring, 5, FindMode::Equal), None);
    }

    #[test]
    fn find_closest_less_than_or_equal() {
        let ring = ring_with(&[10, 20, 30], 4);
        assert_eq!(found(&ring, 25, FindMode::ClosestLessThanOrEqual), Some(20));
        assert_eq!(found(&ring, 30, FindMode::ClosestLessThanOrEqual), Some(30));
        assert_eq!(found(&ring, 99, FindMode::ClosestLessThanOrEqual), Some(30));
        assert_eq!(found(&ring, 9, FindMode::ClosestLessThanOrEqual), None);
    }

    #[test]
    fn find_closest_breaks_ties_toward_earlier() {
        let ring = ring_with(&[10, 20, 30], 4);
        assert_eq!(found(&ring, 15, FindMode::Closest), Some(10));
        assert_eq!(found(&ring, 16, FindMode::Closest), Some(20));
        assert_eq!(found(&ring, 0, FindMode::Closest), Some(10));
        assert_eq!(found(&ring, 100, FindMode::Closest), Some(30));
        assert!(SnapshotRingBuffer::new(1)
            .unwrap()
            .find(Frame::new(1), FindMode::Closest)
            .is_none());
    }

    #[test]
    fn truncate_after_drops_newer() {
        let mut ring = ring_with(&[10, 20, 30], 4);
        ring.truncate_after(Frame::new(25));
        assert_eq!(ring.peek_back().unwrap().tick, Frame::new(20));
    }

    // ==========================================
    // Sizing
    // ==========================================

    #[test]
    fn minimal_size_formula() {
        assert_eq!(minimal_size(60, Duration::from_secs(1), 10), 7);
        assert_eq!(minimal_size(60, Duration::from_secs(2), 5), 25);
        assert_eq!(minimal_size(60, Duration::from_millis(1500), 7), 14);
        assert_eq!(minimal_size(60, Duration::ZERO, 10), 1);
    }

    #[test]
    fn plan_shares_when_intervals_divide() {
        let checksum = SamplingConfig::new(10, Duration::from_secs(1));
        let replay = SamplingConfig::new(5, Duration::from_secs(2));
        let plan = plan_buffers(60, Some(checksum), Some(replay));
        assert_eq!(
            plan,
            BufferPlan::Shared(RingSpec {
                interval: 5,
                capacity: 25
            })
        );
    }

    #[test]
    fn plan_keeps_separate_when_intervals_unrelated() {
        let checksum = SamplingConfig::new(7, Duration::from_secs(1));
        let replay = SamplingConfig::new(5, Duration::from_secs(1));
        assert!(matches!(
            plan_buffers(60, Some(checksum), Some(replay)),
            BufferPlan::Separate {
                checksum_history: Some(_),
                instant_replay: Some(_)
            }
        ));
    }

    #[test]
    fn plan_keeps_separate_when_sharing_costs_more() {
        // A long checksum window sampled at the replay's fine interval outgrows two rings.
        let checksum = SamplingConfig::new(60, Duration::from_secs(60));
        let replay = SamplingConfig::new(1, Duration::from_secs(1));
        let plan = plan_buffers(60, Some(checksum), Some(replay));
        assert_eq!(
            plan,
            BufferPlan::Separate {
                checksum_history: Some(RingSpec {
                    interval: 60,
                    capacity: 61
                }),
                instant_replay: Some(RingSpec {
                    interval: 1,
                    capacity: 61
                }),
            }
        );
    }

    #[test]
    fn plan_single_stream() {
        let replay = SamplingConfig::new(5, Duration::from_secs(2));
        assert_eq!(
            plan_buffers(60, None, Some(replay)),
            BufferPlan::Separate {
                checksum_history: None,
                instant_replay: Some(RingSpec {
                    interval: 5,
                    capacity: 25
                }),
            }
        );
    }
}
