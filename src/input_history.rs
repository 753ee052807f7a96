//! Per-tick, per-player input storage for lockstep simulation and replay.
//!
//! [`InputHistory`] is a flat growable table indexed by `tick - start_frame`
//! with one [`InputRecord`] per player. A slot is *stamped* once it holds a
//! confirmed input for its tick; a tick is *complete* (simulatable) once every
//! player's slot is stamped, and *finished* once every slot is also marked sent.
//!
//! Unstamped slots carry [`Frame::NULL`] so tick 0 is an ordinary stamped tick.

pub mod prediction;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{InvalidFrameReason, LockstepError};
use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::{Frame, PlayerHandle};

pub use prediction::{BlankPrediction, PredictionStrategy, RepeatLastConfirmed};

/// Inline capacity for input payloads; most games fit a tick of input in 16 bytes.
pub type InputBytes = SmallVec<[u8; 16]>;

/// Marker bits attached to an input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputFlags(u8);

impl InputFlags {
    /// An ordinary gameplay input.
    pub const NONE: Self = Self(0);
    /// The payload is a side-channel command (player data), not gameplay input.
    pub const COMMAND: Self = Self(1);
    /// The player disconnected at this tick; the payload is ignored.
    pub const DISCONNECTED: Self = Self(1 << 1);

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for InputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// One player's input for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRecord {
    /// The tick this record was confirmed for, or [`Frame::NULL`] when unstamped.
    pub tick: Frame,
    /// Side-channel markers.
    pub flags: InputFlags,
    /// Whether the local transport has sent this input to peers.
    pub sent: bool,
    /// Raw encoded input.
    pub bytes: InputBytes,
}

impl InputRecord {
    fn empty() -> Self {
        Self {
            tick: Frame::NULL,
            flags: InputFlags::NONE,
            sent: false,
            bytes: SmallVec::new(),
        }
    }

    /// Whether this slot holds a confirmed input.
    #[must_use]
    pub fn is_stamped(&self) -> bool {
        !self.tick.is_null()
    }
}

/// How the table grows when a tick beyond its capacity arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GrowthPolicy {
    /// Double the capacity (or more, if the incoming tick needs it).
    #[default]
    Geometric,
    /// Grow by exactly this many ticks at a time.
    Fixed(usize),
}

/// Default number of ticks allocated up front (one minute at 60 Hz).
pub const DEFAULT_INITIAL_TICKS: usize = 3600;

/// Default limit on how far past the last complete tick an input may be
/// confirmed (one minute at 60 Hz).
pub const DEFAULT_MAX_LEAD_TICKS: usize = 3600;

/// Exported, complete and confirmed input history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputExport {
    /// First tick in `records`.
    pub start_frame: Frame,
    /// Number of players per tick.
    pub player_count: usize,
    /// `player_count` records per tick, tick-major.
    pub records: Vec<InputRecord>,
}

impl InputExport {
    /// Number of exported ticks.
    #[must_use]
    pub fn tick_count(&self) -> usize {
        self.records.len().checked_div(self.player_count).unwrap_or(0)
    }

    /// The last exported tick, or [`Frame::NULL`] if nothing was exported.
    #[must_use]
    pub fn last_tick(&self) -> Frame {
        match self.tick_count() {
            0 => Frame::NULL,
            n => self.start_frame + (n as i32 - 1),
        }
    }
}

/// Growable sparse table of confirmed inputs.
#[derive(Debug, Clone)]
pub struct InputHistory {
    player_count: usize,
    start_frame: Frame,
    records: Vec<InputRecord>,
    growth: GrowthPolicy,
    highest_stamped: Frame,
    complete_through: Frame,
    max_lead: usize,
}

impl InputHistory {
    /// Creates a history for `player_count` players whose first tick is `start_frame`.
    pub fn new(player_count: usize, start_frame: Frame) -> Result<Self, LockstepError> {
        Self::with_growth(
            player_count,
            start_frame,
            DEFAULT_INITIAL_TICKS,
            GrowthPolicy::Geometric,
        )
    }

    /// Creates a history with an explicit initial capacity (in ticks) and growth policy.
    pub fn with_growth(
        player_count: usize,
        start_frame: Frame,
        initial_ticks: usize,
        growth: GrowthPolicy,
    ) -> Result<Self, LockstepError> {
        if player_count == 0 {
            return Err(LockstepError::invalid_request(
                "input history needs at least one player",
            ));
        }
        if !start_frame.is_valid() {
            return Err(LockstepError::InvalidFrame {
                frame: start_frame,
                reason: InvalidFrameReason::NullFrame,
            });
        }
        if let GrowthPolicy::Fixed(0) = growth {
            return Err(LockstepError::invalid_request(
                "fixed input history growth must be at least one tick",
            ));
        }
        Ok(Self {
            player_count,
            start_frame,
            records: vec![InputRecord::empty(); initial_ticks * player_count],
            growth,
            highest_stamped: Frame::NULL,
            complete_through: Frame::NULL,
            max_lead: DEFAULT_MAX_LEAD_TICKS,
        })
    }

    /// Number of players per tick.
    #[must_use]
    pub const fn player_count(&self) -> usize {
        self.player_count
    }

    /// The first tick the history covers.
    #[must_use]
    pub const fn start_frame(&self) -> Frame {
        self.start_frame
    }

    /// Number of ticks currently allocated.
    #[must_use]
    pub fn capacity_ticks(&self) -> usize {
        self.records.len() / self.player_count
    }

    /// The highest tick with at least one stamped slot.
    #[must_use]
    pub const fn highest_stamped(&self) -> Frame {
        self.highest_stamped
    }

    /// How many ticks past the last complete tick an input may be written.
    #[must_use]
    pub const fn max_lead(&self) -> usize {
        self.max_lead
    }

    /// Limits how far past the last complete tick an input may be written.
    ///
    /// Writes beyond the limit are rejected before any slot is allocated. A
    /// limit of 0 is treated as 1.
    pub fn set_max_lead(&mut self, ticks: usize) {
        self.max_lead = ticks.max(1);
    }

    /// The highest tick an input may currently be written for.
    #[must_use]
    pub fn horizon(&self) -> Frame {
        let base = if self.complete_through.is_null() {
            i64::from(self.start_frame.as_i32()) - 1
        } else {
            i64::from(self.complete_through.as_i32())
        };
        let lead = i64::try_from(self.max_lead).unwrap_or(i64::MAX);
        let horizon = base.saturating_add(lead).min(i64::from(i32::MAX));
        Frame::new(horizon as i32)
    }

    fn tick_offset(&self, tick: Frame) -> Result<usize, LockstepError> {
        if tick.is_null() {
            return Err(LockstepError::InvalidFrame {
                frame: tick,
                reason: InvalidFrameReason::NullFrame,
            });
        }
        if tick < self.start_frame {
            return Err(LockstepError::InvalidFrame {
                frame: tick,
                reason: InvalidFrameReason::BeforeStart {
                    start: self.start_frame,
                },
            });
        }
        Ok((tick - self.start_frame) as usize)
    }

    fn check_player(&self, player: PlayerHandle) -> Result<(), LockstepError> {
        if !player.is_valid_player_for(self.player_count) {
            return Err(LockstepError::InvalidPlayerHandle {
                handle: player,
                max_handle: PlayerHandle::new(self.player_count - 1),
            });
        }
        Ok(())
    }

    fn slot(&self, tick: Frame, player: PlayerHandle) -> Option<&InputRecord> {
        let offset = self.tick_offset(tick).ok()?;
        self.records
            .get(offset * self.player_count + player.as_usize())
    }

    fn ensure_capacity(&mut self, offset: usize) {
        let needed = offset + 1;
        let current = self.capacity_ticks();
        if needed <= current {
            return;
        }
        let new_ticks = match self.growth {
            GrowthPolicy::Geometric => needed.max(current.saturating_mul(2)).max(1),
            GrowthPolicy::Fixed(step) => {
                let missing = needed - current;
                current + missing.div_ceil(step) * step
            },
        };
        tracing::debug!(
            from_ticks = current,
            to_ticks = new_ticks,
            "growing input history"
        );
        self.records
            .resize(new_ticks * self.player_count, InputRecord::empty());
    }

    fn write(
        &mut self,
        tick: Frame,
        player: PlayerHandle,
        bytes: &[u8],
        flags: InputFlags,
    ) -> Result<&mut InputRecord, LockstepError> {
        self.check_player(player)?;
        let offset = self.tick_offset(tick)?;
        let horizon = self.horizon();
        if tick > horizon {
            return Err(LockstepError::InvalidFrame {
                frame: tick,
                reason: InvalidFrameReason::BeyondHorizon { horizon },
            });
        }
        self.ensure_capacity(offset);
        if tick > self.highest_stamped || self.highest_stamped.is_null() {
            self.highest_stamped = tick;
        }
        let index = offset * self.player_count + player.as_usize();
        {
            let record = self
                .records
                .get_mut(index)
                .ok_or_else(|| LockstepError::InternalError {
                    context: format!("input slot {} missing after growth", index),
                })?;
            record.tick = tick;
            record.flags = flags;
            record.bytes.clear();
            record.bytes.extend_from_slice(bytes);
        }
        self.advance_complete_through();
        self.records
            .get_mut(index)
            .ok_or_else(|| LockstepError::InternalError {
                context: format!("input slot {} missing after growth", index),
            })
    }

    fn advance_complete_through(&mut self) {
        loop {
            let next = if self.complete_through.is_null() {
                self.start_frame
            } else if self.complete_through.as_i32() == i32::MAX {
                return;
            } else {
                self.complete_through + 1
            };
            if !self.can_simulate(next) {
                return;
            }
            self.complete_through = next;
        }
    }

    /// Stores a confirmed input from the transport.
    ///
    /// Confirming the same input twice is a no-op. A second confirmation with a
    /// different payload is reported as an input fault and ignored: the first
    /// confirmation is authoritative.
    pub fn on_input_confirmed(
        &mut self,
        tick: Frame,
        player: PlayerHandle,
        bytes: &[u8],
        flags: InputFlags,
    ) -> Result<(), LockstepError> {
        self.check_player(player)?;
        if let Some(existing) = self.slot(tick, player).filter(|r| r.is_stamped()) {
            if existing.bytes.as_slice() != bytes || existing.flags != flags {
                report_violation!(
                    ViolationSeverity::Warning,
                    ViolationKind::InputFault,
                    "conflicting confirmation for player {} at tick {} ignored",
                    player,
                    tick
                );
            }
            return Ok(());
        }
        self.write(tick, player, bytes, flags).map(|_| ())
    }

    /// Writes an input unconditionally, replacing whatever the slot held.
    ///
    /// Used when importing recorded history and by tests.
    pub fn inject_input(
        &mut self,
        tick: Frame,
        player: PlayerHandle,
        bytes: &[u8],
        flags: InputFlags,
    ) -> Result<(), LockstepError> {
        let record = self.write(tick, player, bytes, flags)?;
        record.sent = false;
        Ok(())
    }

    /// Marks a stamped input as sent to peers.
    pub fn mark_sent(&mut self, tick: Frame, player: PlayerHandle) -> Result<(), LockstepError> {
        self.check_player(player)?;
        let offset = self.tick_offset(tick)?;
        let index = offset * self.player_count + player.as_usize();
        match self.records.get_mut(index) {
            Some(record) if record.is_stamped() => {
                record.sent = true;
                Ok(())
            },
            _ => Err(LockstepError::invalid_request(format!(
                "cannot mark unconfirmed input of player {} at tick {} as sent",
                player, tick
            ))),
        }
    }

    /// The stamped record for `(tick, player)`, if any.
    #[must_use]
    pub fn record(&self, tick: Frame, player: PlayerHandle) -> Option<&InputRecord> {
        if !player.is_valid_player_for(self.player_count) {
            return None;
        }
        self.slot(tick, player).filter(|r| r.is_stamped())
    }

    /// All slots for `tick`, stamped or not. `None` if outside the allocated range.
    #[must_use]
    pub fn tick_records(&self, tick: Frame) -> Option<&[InputRecord]> {
        let offset = self.tick_offset(tick).ok()?;
        let begin = offset * self.player_count;
        self.records.get(begin..begin + self.player_count)
    }

    /// Whether every player's input for `tick` is confirmed.
    #[must_use]
    pub fn can_simulate(&self, tick: Frame) -> bool {
        self.tick_records(tick)
            .is_some_and(|records| records.iter().all(InputRecord::is_stamped))
    }

    /// Whether every player's input for `tick` is confirmed and sent.
    #[must_use]
    pub fn is_finished(&self, tick: Frame) -> bool {
        self.tick_records(tick)
            .is_some_and(|records| records.iter().all(|r| r.is_stamped() && r.sent))
    }

    /// The newest stamped, non-command record for `player` at or before `tick`.
    #[must_use]
    pub fn last_confirmed(&self, tick: Frame, player: PlayerHandle) -> Option<&InputRecord> {
        if !player.is_valid_player_for(self.player_count) || tick < self.start_frame {
            return None;
        }
        if self.highest_stamped.is_null() {
            return None;
        }
        let mut cursor = if tick < self.highest_stamped {
            tick
        } else {
            self.highest_stamped
        };
        while cursor >= self.start_frame {
            if let Some(record) = self.record(cursor, player) {
                if !record.flags.contains(InputFlags::COMMAND) {
                    return Some(record);
                }
            }
            cursor -= 1;
        }
        None
    }

    /// The last tick `t` such that every tick in `start_frame..=t` is complete.
    #[must_use]
    pub const fn last_complete_tick(&self) -> Frame {
        self.complete_through
    }

    /// Exports the complete, confirmed prefix of the history.
    ///
    /// Trailing ticks that are unstamped or past `verified` are dropped, so
    /// the export can always be replayed to its last tick.
    #[must_use]
    pub fn export(&self, verified: Frame) -> InputExport {
        let last = self.last_complete_tick();
        let last = if verified.is_null() || last.is_null() {
            Frame::NULL
        } else if verified < last {
            verified
        } else {
            last
        };
        let ticks = if last.is_null() || last < self.start_frame {
            0
        } else {
            (last - self.start_frame) as usize + 1
        };
        InputExport {
            start_frame: self.start_frame,
            player_count: self.player_count,
            records: self
                .records
                .get(..ticks * self.player_count)
                .map(<[InputRecord]>::to_vec)
                .unwrap_or_default(),
        }
    }

    /// Rebuilds a history from an export.
    pub fn import(export: &InputExport, growth: GrowthPolicy) -> Result<Self, LockstepError> {
        if export.player_count == 0 || export.records.len() % export.player_count != 0 {
            return Err(LockstepError::serialization(format!(
                "input export holds {} records for {} players",
                export.records.len(),
                export.player_count
            )));
        }
        let ticks = export.tick_count();
        let mut history = Self::with_growth(
            export.player_count,
            export.start_frame,
            ticks.max(1),
            growth,
        )?;
        for (index, record) in export.records.iter().enumerate() {
            let tick = export.start_frame + (index / export.player_count) as i32;
            if record.tick != tick {
                return Err(LockstepError::serialization(format!(
                    "input export slot {} is stamped {} but belongs to tick {}",
                    index, record.tick, tick
                )));
            }
            let player = PlayerHandle::new(index % export.player_count);
            history.inject_input(tick, player, &record.bytes, record.flags)?;
            if record.sent {
                history.mark_sent(tick, player)?;
            }
        }
        Ok(history)
    }
}

impl InvariantChecker for InputHistory {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.player_count == 0 {
            return Err(InvariantViolation::new("InputHistory", "player_count is zero"));
        }
        if self.records.len() % self.player_count != 0 {
            return Err(InvariantViolation::new(
                "InputHistory",
                "record table is not a whole number of ticks",
            )
            .with_details(format!(
                "{} records, {} players",
                self.records.len(),
                self.player_count
            )));
        }
        let mut highest = Frame::NULL;
        for (index, record) in self.records.iter().enumerate() {
            if !record.is_stamped() {
                continue;
            }
            let tick = self.start_frame + (index / self.player_count) as i32;
            if record.tick != tick {
                return Err(InvariantViolation::new(
                    "InputHistory",
                    "stamped record does not match its slot tick",
                )
                .with_details(format!("slot {} stamped {}, expected {}", index, record.tick, tick)));
            }
            highest = tick;
        }
        let complete_ticks = self
            .records
            .chunks_exact(self.player_count)
            .take_while(|tick| tick.iter().all(InputRecord::is_stamped))
            .count();
        let complete_through = match complete_ticks {
            0 => Frame::NULL,
            n => self.start_frame + (n as i32 - 1),
        };
        if complete_through != self.complete_through {
            return Err(InvariantViolation::new(
                "InputHistory",
                "complete_through is out of date",
            )
            .with_details(format!("cached {}, actual {}", self.complete_through, complete_through)));
        }
        if highest != self.highest_stamped {
            return Err(InvariantViolation::new(
                "InputHistory",
                "highest_stamped is out of date",
            )
            .with_details(format!("cached {}, actual {}", self.highest_stamped, highest)));
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

    fn p(n: usize) -> PlayerHandle {
        PlayerHandle::new(n)
    }

    fn f(n: i32) -> Frame {
        Frame::new(n)
    }

    // ==========================================
    // Completeness
    // ==========================================

    #[test]
    fn can_simulate_requires_every_player() {
        let mut history = InputHistory::new(2, f(0)).unwrap();
        history
            .on_input_confirmed(f(5), p(0), &[1], InputFlags::NONE)
            .unwrap();
        assert!(!history.can_simulate(f(5)));
        history
            .on_input_confirmed(f(5), p(1), &[2], InputFlags::NONE)
            .unwrap();
        assert!(history.can_simulate(f(5)));
        assert!(!history.can_simulate(f(4)));
    }

    #[test]
    fn tick_zero_is_stampable() {
        let mut history = InputHistory::new(1, f(0)).unwrap();
        assert!(!history.can_simulate(f(0)));
        history
            .on_input_confirmed(f(0), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert!(history.can_simulate(f(0)));
    }

    #[test]
    fn finished_requires_sent() {
        let mut history = InputHistory::new(1, f(0)).unwrap();
        history
            .on_input_confirmed(f(1), p(0), &[7], InputFlags::NONE)
            .unwrap();
        assert!(!history.is_finished(f(1)));
        history.mark_sent(f(1), p(0)).unwrap();
        assert!(history.is_finished(f(1)));
        assert!(history.mark_sent(f(2), p(0)).is_err());
    }

    // ==========================================
    // Validation
    // ==========================================

    #[test]
    fn rejects_bad_player_and_early_tick() {
        let mut history = InputHistory::new(2, f(10)).unwrap();
        assert!(matches!(
            history.on_input_confirmed(f(10), p(2), &[], InputFlags::NONE),
            Err(LockstepError::InvalidPlayerHandle { .. })
        ));
        assert!(matches!(
            history.on_input_confirmed(f(9), p(0), &[], InputFlags::NONE),
            Err(LockstepError::InvalidFrame {
                reason: InvalidFrameReason::BeforeStart { .. },
                ..
            })
        ));
    }

    #[test]
    fn far_future_tick_is_rejected_without_allocating() {
        let mut history = InputHistory::new(4, f(1)).unwrap();
        let capacity = history.capacity_ticks();
        let err = history
            .on_input_confirmed(f(20_000_000), p(0), &[1], InputFlags::NONE)
            .unwrap_err();
        assert!(matches!(
            err,
            LockstepError::InvalidFrame {
                reason: InvalidFrameReason::BeyondHorizon { .. },
                ..
            }
        ));
        assert_eq!(history.capacity_ticks(), capacity);
        assert!(history.highest_stamped().is_null());
        assert!(history
            .on_input_confirmed(f(i32::MAX), p(0), &[1], InputFlags::NONE)
            .is_err());
    }

    #[test]
    fn horizon_follows_the_last_complete_tick() {
        let mut history = InputHistory::new(2, f(1)).unwrap();
        history.set_max_lead(3);
        assert_eq!(history.horizon(), f(3));
        history
            .on_input_confirmed(f(3), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert!(history
            .on_input_confirmed(f(4), p(0), &[], InputFlags::NONE)
            .is_err());

        for tick in 1..=2 {
            for player in 0..2 {
                history
                    .on_input_confirmed(f(tick), p(player), &[], InputFlags::NONE)
                    .unwrap();
            }
        }
        assert_eq!(history.last_complete_tick(), f(2));
        assert_eq!(history.horizon(), f(5));
        history
            .on_input_confirmed(f(5), p(1), &[], InputFlags::NONE)
            .unwrap();
        assert!(history.check_invariants().is_ok());
    }

    #[test]
    fn conflicting_confirmation_keeps_first() {
        let mut history = InputHistory::new(1, f(0)).unwrap();
        history
            .on_input_confirmed(f(3), p(0), &[1], InputFlags::NONE)
            .unwrap();
        history
            .on_input_confirmed(f(3), p(0), &[2], InputFlags::NONE)
            .unwrap();
        assert_eq!(history.record(f(3), p(0)).unwrap().bytes.as_slice(), &[1]);

        history.inject_input(f(3), p(0), &[2], InputFlags::NONE).unwrap();
        assert_eq!(history.record(f(3), p(0)).unwrap().bytes.as_slice(), &[2]);
    }

    // ==========================================
    // Growth
    // ==========================================

    #[test]
    fn geometric_growth_doubles() {
        let mut history = InputHistory::with_growth(2, f(0), 4, GrowthPolicy::Geometric).unwrap();
        history
            .on_input_confirmed(f(4), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert_eq!(history.capacity_ticks(), 8);
        history
            .on_input_confirmed(f(40), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert_eq!(history.capacity_ticks(), 41);
        assert!(history.check_invariants().is_ok());
    }

    #[test]
    fn fixed_growth_is_exact() {
        let mut history = InputHistory::with_growth(1, f(0), 4, GrowthPolicy::Fixed(3)).unwrap();
        history
            .on_input_confirmed(f(4), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert_eq!(history.capacity_ticks(), 7);
        history
            .on_input_confirmed(f(12), p(0), &[], InputFlags::NONE)
            .unwrap();
        assert_eq!(history.capacity_ticks(), 13);
    }

    #[test]
    fn fixed_zero_growth_is_rejected() {
        assert!(InputHistory::with_growth(1, f(0), 1, GrowthPolicy::Fixed(0)).is_err());
    }

    // ==========================================
    // Prediction support
    // ==========================================

    #[test]
    fn last_confirmed_skips_commands_and_gaps() {
        let mut history = InputHistory::new(2, f(0)).unwrap();
        history.inject_input(f(1), p(0), &[1], InputFlags::NONE).unwrap();
        history.inject_input(f(3), p(0), &[9], InputFlags::COMMAND).unwrap();
        let found = history.last_confirmed(f(10), p(0)).unwrap();
        assert_eq!(found.tick, f(1));
        assert!(history.last_confirmed(f(10), p(1)).is_none());
        assert!(history.last_confirmed(f(0), p(0)).is_none());
    }

    // ==========================================
    // Export / import
    // ==========================================

    #[test]
    fn export_truncates_unstamped_and_unverified_ticks() {
        let mut history = InputHistory::new(2, f(1)).unwrap();
        for tick in 1..=5 {
            history.inject_input(f(tick), p(0), &[tick as u8], InputFlags::NONE).unwrap();
            if tick != 5 {
                history.inject_input(f(tick), p(1), &[0], InputFlags::NONE).unwrap();
            }
        }
        let export = history.export(f(10));
        assert_eq!(export.last_tick(), f(4));
        assert_eq!(export.records.len(), 8);

        let export = history.export(f(2));
        assert_eq!(export.last_tick(), f(2));

        let export = history.export(Frame::NULL);
        assert_eq!(export.tick_count(), 0);
    }

    #[test]
    fn import_restores_records() {
        let mut history = InputHistory::new(2, f(1)).unwrap();
        for tick in 1..=3 {
            history.inject_input(f(tick), p(0), &[tick as u8], InputFlags::NONE).unwrap();
            history.inject_input(f(tick), p(1), &[0xF0], InputFlags::NONE).unwrap();
        }
        history.mark_sent(f(2), p(1)).unwrap();
        let export = history.export(f(3));
        let restored = InputHistory::import(&export, GrowthPolicy::Geometric).unwrap();
        assert!(restored.can_simulate(f(3)));
        assert!(!restored.can_simulate(f(4)));
        assert_eq!(restored.record(f(2), p(0)).unwrap().bytes.as_slice(), &[2]);
        assert!(restored.record(f(2), p(1)).unwrap().sent);
        assert_eq!(restored.export(f(3)), export);
    }

    #[test]
    fn import_rejects_misplaced_stamp() {
        let mut export = InputExport {
            start_frame: f(0),
            player_count: 1,
            records: vec![InputRecord::empty()],
        };
        export.records[0].tick = f(4);
        assert!(matches!(
            InputHistory::import(&export, GrowthPolicy::Geometric),
            Err(LockstepError::Serialization { .. })
        ));
    }
}
