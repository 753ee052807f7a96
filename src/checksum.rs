//! Checksum recording and verification for desync detection.
//!
//! A [`ChecksumLog`] is an append-only record of `(tick, checksum)` pairs sampled
//! every `interval` verified ticks. A session in record mode appends to it; a
//! session replaying a recording verifies each sampled tick against it.
//!
//! Verification never fails hard: a divergent checksum is a diagnostic
//! ([`ChecksumVerification::Mismatch`]) reported through telemetry so the caller
//! can surface it, attach snapshots, and keep simulating.
//!
//! ```
//! use fortress_lockstep::checksum::{ChecksumLog, ChecksumVerification};
//! use fortress_lockstep::Frame;
//!
//! let mut log = ChecksumLog::new(10);
//! log.record(Frame::new(100), 0xAAAA).unwrap();
//! log.record(Frame::new(110), 0xBBBB).unwrap();
//! log.record(Frame::new(120), 0xCCCC).unwrap();
//!
//! assert_eq!(log.verify(Frame::new(120), 0xCCCC), ChecksumVerification::Match);
//! assert!(matches!(
//!     log.verify(Frame::new(120), 0xDEAD),
//!     ChecksumVerification::Mismatch { .. }
//! ));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{InvalidFrameReason, LockstepError};
use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::Frame;

/// Storage grows in blocks of at least this many entries.
pub const CHECKSUM_LOG_GROWTH: usize = 64;

/// One recorded checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumEntry {
    /// The verified tick that was checksummed.
    pub tick: Frame,
    /// The frame checksum at that tick.
    pub checksum: u64,
}

/// Outcome of [`ChecksumLog::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a mismatch is only useful if somebody looks at it"]
pub enum ChecksumVerification {
    /// The live checksum equals the recorded one.
    Match,
    /// The live checksum differs from the recorded one.
    Mismatch {
        /// The tick being verified.
        tick: Frame,
        /// The recorded checksum.
        expected: u64,
        /// The live checksum.
        actual: u64,
    },
    /// The log holds no entry for this tick's index (before the first entry,
    /// past the last one, or off the sampling interval).
    NotRecorded,
    /// The entry at the computed index belongs to another tick, so the log was
    /// recorded with a different interval or is corrupt.
    TickMismatch {
        /// The tick being verified.
        tick: Frame,
        /// The tick stored at the computed index.
        recorded: Frame,
    },
}

impl ChecksumVerification {
    /// `true` for [`ChecksumVerification::Mismatch`] and [`ChecksumVerification::TickMismatch`].
    #[must_use]
    pub const fn is_divergent(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::TickMismatch { .. })
    }
}

/// Append-only log of sampled checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumLog {
    interval: u32,
    entries: Vec<ChecksumEntry>,
}

impl ChecksumLog {
    /// Creates an empty log sampling every `interval` ticks. An interval of 0 is treated as 1.
    #[must_use]
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            entries: Vec::new(),
        }
    }

    /// The sampling interval in ticks.
    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// The first recorded tick, or [`Frame::NULL`] if empty.
    #[must_use]
    pub fn first_tick(&self) -> Frame {
        self.entries.first().map_or(Frame::NULL, |e| e.tick)
    }

    /// The last recorded tick, or [`Frame::NULL`] if empty.
    #[must_use]
    pub fn last_tick(&self) -> Frame {
        self.entries.last().map_or(Frame::NULL, |e| e.tick)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in tick order.
    #[must_use]
    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    /// Appends a checksum.
    ///
    /// The first entry fixes the log's origin. Every later tick must be greater
    /// than the last and a whole number of intervals past the origin.
    pub fn record(&mut self, tick: Frame, checksum: u64) -> Result<(), LockstepError> {
        if let Some(reason) = InvalidFrameReason::for_negative(tick) {
            return Err(LockstepError::InvalidFrame {
                frame: tick,
                reason,
            });
        }
        if let Some(last) = self.entries.last() {
            if tick <= last.tick {
                return Err(LockstepError::InvalidFrame {
                    frame: tick,
                    reason: InvalidFrameReason::NotIncreasing { last: last.tick },
                });
            }
            if ticks_between(self.first_tick(), tick) % i64::from(self.interval) != 0 {
                return Err(LockstepError::InvalidFrame {
                    frame: tick,
                    reason: InvalidFrameReason::OffInterval {
                        interval: self.interval,
                    },
                });
            }
        }

        if self.entries.len() == self.entries.capacity() {
            let extra = self.entries.capacity().max(CHECKSUM_LOG_GROWTH);
            self.entries.reserve_exact(extra);
        }
        self.entries.push(ChecksumEntry { tick, checksum });
        Ok(())
    }

    /// Looks up the recorded checksum at `(tick - first) / interval`.
    #[must_use]
    pub fn recorded(&self, tick: Frame) -> Option<ChecksumEntry> {
        let first = self.entries.first()?.tick;
        if tick < first {
            return None;
        }
        let offset = ticks_between(first, tick);
        let interval = i64::from(self.interval);
        if offset % interval != 0 {
            return None;
        }
        let index = usize::try_from(offset / interval).ok()?;
        self.entries.get(index).copied()
    }

    /// Compares a live checksum against the log.
    ///
    /// Divergence is reported as a [`ViolationKind::Determinism`] violation and returned;
    /// it is never an error.
    pub fn verify(&self, tick: Frame, checksum: u64) -> ChecksumVerification {
        let Some(entry) = self.recorded(tick) else {
            return ChecksumVerification::NotRecorded;
        };
        if entry.tick != tick {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Determinism,
                "checksum log index for tick {} holds tick {}; log interval {} does not match the recording",
                tick,
                entry.tick,
                self.interval
            );
            return ChecksumVerification::TickMismatch {
                tick,
                recorded: entry.tick,
            };
        }
        if entry.checksum != checksum {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Determinism,
                "checksum mismatch at tick {}: recorded {:#018x}, live {:#018x}",
                tick,
                entry.checksum,
                checksum
            );
            return ChecksumVerification::Mismatch {
                tick,
                expected: entry.checksum,
                actual: checksum,
            };
        }
        ChecksumVerification::Match
    }

    /// Drops every entry after `tick`.
    pub fn truncate_after(&mut self, tick: Frame) {
        let keep = self.entries.partition_point(|e| e.tick <= tick);
        self.entries.truncate(keep);
    }

    /// Removes all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `to - from` widened so no pair of ticks can overflow.
fn ticks_between(from: Frame, to: Frame) -> i64 {
    i64::from(to.as_i32()) - i64::from(from.as_i32())
}

impl InvariantChecker for ChecksumLog {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.interval == 0 {
            return Err(InvariantViolation::new("ChecksumLog", "interval is zero"));
        }
        let first = self.first_tick();
        for (index, pair) in self.entries.windows(2).enumerate() {
            if pair[1].tick <= pair[0].tick {
                return Err(InvariantViolation::new(
                    "ChecksumLog",
                    "entries must be strictly increasing by tick",
                )
                .with_details(format!("index {}: {} then {}", index, pair[0].tick, pair[1].tick)));
            }
        }
        for (index, entry) in self.entries.iter().enumerate() {
            let expected = i64::from(first.as_i32()) + index as i64 * i64::from(self.interval);
            if i64::from(entry.tick.as_i32()) != expected {
                return Err(InvariantViolation::new(
                    "ChecksumLog",
                    "entry tick does not match its interval index",
                )
                .with_details(format!("index {} holds {}, expected {}", index, entry.tick, expected)));
            }
        }
        Ok(())
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

    fn log_from(first: i32, interval: u32, checksums: &[u64]) -> ChecksumLog {
        let mut log = ChecksumLog::new(interval);
        for (i, cs) in checksums.iter().enumerate() {
            log.record(Frame::new(first + i as i32 * interval as i32), *cs)
                .unwrap();
        }
        log
    }

    // ==========================================
    // Recording
    // ==========================================

    #[test]
    fn record_rejects_non_increasing_ticks() {
        let mut log = log_from(100, 10, &[1, 2]);
        let err = log.record(Frame::new(110), 3).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::NotIncreasing { .. },
                ..
            }
        ));
    }

    #[test]
    fn record_rejects_off_interval_ticks() {
        let mut log = log_from(100, 10, &[1]);
        let err = log.record(Frame::new(105), 3).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::OffInterval { interval: 10 },
                ..
            }
        ));
    }

    #[test]
    fn record_rejects_null() {
        let mut log = ChecksumLog::new(1);
        assert!(log.record(Frame::NULL, 0).is_err());
    }

    #[test]
    fn record_rejects_negative_ticks() {
        let mut log = ChecksumLog::new(1);
        let err = log.record(Frame::new(-5), 0).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::Negative,
                ..
            }
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn interval_above_i32_range_is_not_truncated() {
        let mut log = ChecksumLog::new(u32::MAX);
        log.record(Frame::new(0), 1).unwrap();
        // Truncated to -1, every tick would sit on the interval.
        let err = log.record(Frame::new(i32::MAX), 2).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::OffInterval { interval: u32::MAX },
                ..
            }
        ));
        assert_eq!(log.verify(Frame::new(0), 1), ChecksumVerification::Match);
        assert_eq!(
            log.verify(Frame::new(i32::MAX), 2),
            ChecksumVerification::NotRecorded
        );
        assert!(log.check_invariants().is_ok());
    }

    #[test]
    fn lookups_across_the_tick_range_do_not_overflow() {
        let log = log_from(i32::MAX - 20, 10, &[1, 2, 3]);
        assert_eq!(log.last_tick(), Frame::new(i32::MAX));
        assert_eq!(log.recorded(Frame::new(i32::MIN)), None);
        assert_eq!(log.recorded(Frame::new(i32::MAX)).map(|e| e.checksum), Some(3));
        assert_eq!(log.verify(Frame::new(0), 0), ChecksumVerification::NotRecorded);
        assert!(log.check_invariants().is_ok());
    }

    #[test]
    fn growth_is_blockwise() {
        let mut log = ChecksumLog::new(1);
        log.record(Frame::new(0), 0).unwrap();
        assert!(log.entries.capacity() >= CHECKSUM_LOG_GROWTH);
        for tick in 1..CHECKSUM_LOG_GROWTH as i32 {
            log.record(Frame::new(tick), 0).unwrap();
        }
        let before = log.entries.capacity();
        log.record(Frame::new(CHECKSUM_LOG_GROWTH as i32), 0)
            .unwrap();
        assert!(log.entries.capacity() >= before * 2);
    }

    // ==========================================
    // Verification
    // ==========================================

    #[test]
    fn verify_uses_interval_index() {
        let log = log_from(100, 10, &[0xA, 0xB, 0xC]);
        assert_eq!(log.verify(Frame::new(120), 0xC), ChecksumVerification::Match);
        assert_eq!(
            log.verify(Frame::new(120), 0xD),
            ChecksumVerification::Mismatch {
                tick: Frame::new(120),
                expected: 0xC,
                actual: 0xD
            }
        );
    }

    #[test]
    fn verify_outside_log_is_not_recorded() {
        let log = log_from(100, 10, &[0xA, 0xB]);
        assert_eq!(log.verify(Frame::new(90), 0), ChecksumVerification::NotRecorded);
        assert_eq!(log.verify(Frame::new(130), 0), ChecksumVerification::NotRecorded);
        assert_eq!(log.verify(Frame::new(115), 0), ChecksumVerification::NotRecorded);
    }

    #[test]
    fn verify_detects_interval_disagreement() {
        // Deserialized from a recording made at interval 20 but labelled 10.
        let log = ChecksumLog {
            interval: 10,
            entries: vec![
                ChecksumEntry {
                    tick: Frame::new(0),
                    checksum: 1,
                },
                ChecksumEntry {
                    tick: Frame::new(20),
                    checksum: 2,
                },
            ],
        };
        assert!(log.check_invariants().is_err());
        assert_eq!(
            log.verify(Frame::new(10), 2),
            ChecksumVerification::TickMismatch {
                tick: Frame::new(10),
                recorded: Frame::new(20)
            }
        );
    }

    #[test]
    fn truncate_after_keeps_prefix() {
        let mut log = log_from(0, 5, &[1, 2, 3, 4]);
        log.truncate_after(Frame::new(7));
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_tick(), Frame::new(5));
        assert!(log.check_invariants().is_ok());
    }
}
