//! Configuration types for simulation sessions.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `SessionConfig` | Players, tick rate, seed, prediction window | `single_player()`, `competitive()` |
//! | `ChecksumConfig` | Checksum sampling and record/verify mode | `off()`, `record()`, `verify()` |
//! | `SnapshotConfig` | Instant-replay and checksum-history rings | `disabled()`, `diagnostics()` |
//! | `InputHistoryConfig` | Input table sizing and growth | `minimal()`, `long_match()` |
//!
//! # Example
//!
//! ```
//! use fortress_lockstep::{ChecksumConfig, SessionConfig, SnapshotConfig};
//!
//! let session = SessionConfig {
//!     player_count: 4,
//!     ..SessionConfig::default()
//! };
//! assert!(session.validate().is_ok());
//! assert!(ChecksumConfig::record(30).validate().is_ok());
//! assert!(SnapshotConfig::diagnostics().validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::checksum::ChecksumLog;
use crate::error::LockstepError;
use crate::input_history::{GrowthPolicy, DEFAULT_INITIAL_TICKS};
use crate::snapshot::SamplingConfig;

/// Largest accepted player count.
pub const MAX_PLAYERS: usize = 64;

/// Core parameters of a session.
///
/// Recorded into replay files, so a replay is simulated with exactly the
/// parameters of the session that produced it.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Construct
/// instances with the `..SessionConfig::default()` pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use = "SessionConfig has no effect unless passed to SessionBuilder::with_session_config()"]
pub struct SessionConfig {
    /// Number of player slots. Every slot must confirm input for a tick
    /// before that tick can be verified.
    ///
    /// Default: 2
    pub player_count: usize,

    /// Simulated ticks per second. Used to convert snapshot windows and
    /// instant-replay requests from time to ticks.
    ///
    /// Default: 60
    pub simulation_rate: u32,

    /// Seed of the initial frame's random stream.
    ///
    /// Default: 0
    pub seed: u64,

    /// How many ticks the predicted frame may run ahead of the verified frame.
    /// `0` disables prediction: the session only advances on verified ticks.
    ///
    /// Default: 8
    pub max_prediction: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_count: 2,
            simulation_rate: 60,
            seed: 0,
            max_prediction: 8,
        }
    }
}

impl SessionConfig {
    /// Creates a new `SessionConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// One local player, no prediction.
    pub fn single_player() -> Self {
        Self {
            player_count: 1,
            max_prediction: 0,
            ..Self::default()
        }
    }

    /// Short prediction window for low-latency competitive play.
    pub fn competitive() -> Self {
        Self {
            max_prediction: 4,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidRequest`] if `player_count` is 0 or above
    /// [`MAX_PLAYERS`], or if `simulation_rate` is 0.
    pub fn validate(&self) -> Result<(), LockstepError> {
        if self.player_count == 0 || self.player_count > MAX_PLAYERS {
            return Err(LockstepError::invalid_request(format!(
                "player_count must be within 1..={}, got {}",
                MAX_PLAYERS, self.player_count
            )));
        }
        if self.simulation_rate == 0 {
            return Err(LockstepError::invalid_request(
                "simulation_rate must be at least 1",
            ));
        }
        Ok(())
    }
}

/// What the session does with the checksums of sampled verified ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChecksumMode {
    /// No checksums are computed.
    Off,
    /// Checksums are appended to the session's own log.
    #[default]
    Record,
    /// Checksums are recorded and compared against a reference log, e.g. one
    /// embedded in a replay file.
    Verify(ChecksumLog),
}

/// Checksum sampling of verified ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ChecksumConfig has no effect unless passed to SessionBuilder::with_checksum_config()"]
pub struct ChecksumConfig {
    /// A verified tick is checksummed when `tick % interval == 0`.
    ///
    /// Default: 60
    pub interval: u32,

    /// Record or verify.
    ///
    /// Default: [`ChecksumMode::Record`]
    pub mode: ChecksumMode,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            interval: 60,
            mode: ChecksumMode::Record,
        }
    }
}

impl ChecksumConfig {
    /// Creates a new `ChecksumConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables checksumming.
    pub fn off() -> Self {
        Self {
            mode: ChecksumMode::Off,
            ..Self::default()
        }
    }

    /// Records every `interval` ticks.
    pub fn record(interval: u32) -> Self {
        Self {
            interval,
            mode: ChecksumMode::Record,
        }
    }

    /// Verifies against `reference`, sampling at the reference's interval.
    pub fn verify(reference: ChecksumLog) -> Self {
        Self {
            interval: reference.interval(),
            mode: ChecksumMode::Verify(reference),
        }
    }

    /// Whether checksums are computed at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, ChecksumMode::Off)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidRequest`] if `interval` is 0 or differs
    /// from the reference log's interval in verify mode.
    pub fn validate(&self) -> Result<(), LockstepError> {
        if self.interval == 0 {
            return Err(LockstepError::invalid_request(
                "checksum interval must be at least 1",
            ));
        }
        if let ChecksumMode::Verify(reference) = &self.mode {
            if reference.interval() != self.interval {
                return Err(LockstepError::invalid_request(format!(
                    "checksum interval {} does not match the reference log interval {}",
                    self.interval,
                    reference.interval()
                )));
            }
        }
        Ok(())
    }
}

/// Snapshot streams kept by the session.
///
/// When both streams are enabled and one interval divides the other, a single
/// ring may serve both; see [`plan_buffers`](crate::snapshot::plan_buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "SnapshotConfig has no effect unless passed to SessionBuilder::with_snapshot_config()"]
pub struct SnapshotConfig {
    /// Snapshots for [`SimulationSession::instant_replay`](crate::SimulationSession::instant_replay).
    ///
    /// Default: every 60 ticks, 10 seconds
    pub instant_replay: Option<SamplingConfig>,

    /// Snapshots attached to checksum mismatches as the last known-good state.
    ///
    /// Default: `None`
    pub checksum_history: Option<SamplingConfig>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            instant_replay: Some(SamplingConfig::new(60, Duration::from_secs(10))),
            checksum_history: None,
        }
    }
}

impl SnapshotConfig {
    /// Creates a new `SnapshotConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// No snapshots are kept.
    pub fn disabled() -> Self {
        Self {
            instant_replay: None,
            checksum_history: None,
        }
    }

    /// Instant replay plus a checksum-history ring sampled every 30 ticks
    /// over 5 seconds, for desync investigation.
    pub fn diagnostics() -> Self {
        Self {
            checksum_history: Some(SamplingConfig::new(30, Duration::from_secs(5))),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidRequest`] if a stream has a zero interval
    /// or a zero window.
    pub fn validate(&self) -> Result<(), LockstepError> {
        for (name, stream) in [
            ("instant_replay", self.instant_replay),
            ("checksum_history", self.checksum_history),
        ] {
            let Some(stream) = stream else { continue };
            if stream.interval == 0 {
                return Err(LockstepError::invalid_request(format!(
                    "{} sampling interval must be at least 1",
                    name
                )));
            }
            if stream.window.is_zero() {
                return Err(LockstepError::invalid_request(format!(
                    "{} window must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Sizing of the session's [`InputHistory`](crate::InputHistory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "InputHistoryConfig has no effect unless passed to SessionBuilder::with_input_history_config()"]
pub struct InputHistoryConfig {
    /// How the table grows past its capacity.
    ///
    /// Default: [`GrowthPolicy::Geometric`]
    pub growth: GrowthPolicy,

    /// Ticks allocated up front.
    ///
    /// Default: 3600 (one minute at 60 Hz)
    pub initial_capacity: usize,
}

impl Default for InputHistoryConfig {
    fn default() -> Self {
        Self {
            growth: GrowthPolicy::Geometric,
            initial_capacity: DEFAULT_INITIAL_TICKS,
        }
    }
}

impl InputHistoryConfig {
    /// Creates a new `InputHistoryConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small initial table, for tests and short sessions.
    pub fn minimal() -> Self {
        Self {
            growth: GrowthPolicy::Geometric,
            initial_capacity: 64,
        }
    }

    /// Ten minutes at 60 Hz up front, then fixed one-minute increments.
    pub fn long_match() -> Self {
        Self {
            growth: GrowthPolicy::Fixed(DEFAULT_INITIAL_TICKS),
            initial_capacity: DEFAULT_INITIAL_TICKS * 10,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidRequest`] if `initial_capacity` is 0 or
    /// the fixed growth increment is 0.
    pub fn validate(&self) -> Result<(), LockstepError> {
        if self.initial_capacity == 0 {
            return Err(LockstepError::invalid_request(
                "initial input history capacity must be at least 1",
            ));
        }
        if self.growth == GrowthPolicy::Fixed(0) {
            return Err(LockstepError::invalid_request(
                "fixed input history growth must be at least 1",
            ));
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

    // ==========================================
    // SessionConfig
    // ==========================================

    #[test]
    fn session_defaults_are_valid() {
        for config in [
            SessionConfig::new(),
            SessionConfig::single_player(),
            SessionConfig::competitive(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn session_rejects_bad_player_counts_and_rates() {
        let zero = SessionConfig {
            player_count: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(zero.validate(), Err(LockstepError::InvalidRequest { .. })));
        let many = SessionConfig {
            player_count: MAX_PLAYERS + 1,
            ..SessionConfig::default()
        };
        assert!(many.validate().is_err());
        let still = SessionConfig {
            simulation_rate: 0,
            ..SessionConfig::default()
        };
        assert!(still.validate().is_err());
    }

    // ==========================================
    // ChecksumConfig
    // ==========================================

    #[test]
    fn checksum_presets() {
        assert!(!ChecksumConfig::off().is_enabled());
        assert!(ChecksumConfig::record(10).is_enabled());
        let verify = ChecksumConfig::verify(ChecksumLog::new(25));
        assert_eq!(verify.interval, 25);
        assert!(verify.validate().is_ok());
    }

    #[test]
    fn checksum_verify_interval_must_match_reference() {
        let config = ChecksumConfig {
            interval: 10,
            mode: ChecksumMode::Verify(ChecksumLog::new(20)),
        };
        assert!(config.validate().is_err());
        assert!(ChecksumConfig::record(0).validate().is_err());
    }

    // ==========================================
    // SnapshotConfig / InputHistoryConfig
    // ==========================================

    #[test]
    fn snapshot_streams_need_interval_and_window() {
        assert!(SnapshotConfig::disabled().validate().is_ok());
        let zero_interval = SnapshotConfig {
            instant_replay: Some(SamplingConfig::new(0, Duration::from_secs(1))),
            checksum_history: None,
        };
        assert!(zero_interval.validate().is_err());
        let zero_window = SnapshotConfig {
            instant_replay: None,
            checksum_history: Some(SamplingConfig::new(5, Duration::ZERO)),
        };
        assert!(zero_window.validate().is_err());
    }

    #[test]
    fn input_history_presets() {
        assert!(InputHistoryConfig::minimal().validate().is_ok());
        assert!(InputHistoryConfig::long_match().validate().is_ok());
        let bad = InputHistoryConfig {
            growth: GrowthPolicy::Fixed(0),
            ..InputHistoryConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
