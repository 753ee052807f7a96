//! # Fortress Lockstep
//!
//! Fortress Lockstep is the deterministic core of a lockstep game simulation,
//! written in 100% safe Rust. It advances a shared simulation state tick by tick
//! so that every peer fed the same inputs produces bit-identical frames, and it
//! provides the machinery around that guarantee:
//!
//! - [`FrameState`]: the per-tick state container with deterministic
//!   serialization, checksums, and allocation-stable copies.
//! - [`SystemScheduler`]: a hierarchical, bitset-gated system graph turned
//!   into an ordered task graph every tick, with per-system fault isolation.
//! - [`InputHistory`]: confirmed per-tick, per-player input with completeness queries.
//! - [`SnapshotRingBuffer`]: fixed-capacity rings of serialized frames for
//!   instant replay and desync diagnostics.
//! - [`ChecksumLog`]: checksum recording and verification.
//! - [`EventReconciler`]: confirm/cancel reconciliation of events raised by predicted ticks.
//! - [`SimulationSession`]: the orchestrator composing all of the above.
//!
//! Transport, physics, and rendering are out of scope: the session consumes
//! confirmed input bytes and produces frames and events.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

pub use checksum::{ChecksumLog, ChecksumVerification};
pub use error::{InvalidFrameReason, LockstepError, SystemIndexReason};
pub use events::{EventNotification, EventReconciler, SimulationEvent};
pub use frame_state::{
    AssetGuid, Component, ComponentSchema, DynamicAssets, Entity, EntityArena, FrameState,
    RuntimePlayer, SerializeMode,
};
pub use input_history::{
    BlankPrediction, GrowthPolicy, InputFlags, InputHistory, InputRecord, PredictionStrategy,
    RepeatLastConfirmed,
};
pub use replay::ReplayFile;
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{
    ChecksumConfig, ChecksumMode, InputHistoryConfig, SessionConfig, SnapshotConfig,
};
pub use sessions::event_drain::EventDrain;
pub use sessions::simulation_session::{EventSubscriber, PlayerDataCommand, SimulationSession};
pub use snapshot::{FindMode, SamplingConfig, SnapshotEntry, SnapshotRingBuffer};
pub use systems::{
    SerialRunner, Signal, SignalKind, SignalSet, System, SystemError, SystemFault, SystemGraph,
    SystemId, SystemKind, SystemScheduler, Task, TaskGraph, TaskHandle, TaskRunner,
};

pub mod bitset;
pub mod checksum;
pub mod codec;
pub mod compression;
pub mod error;
pub mod events;
pub mod frame_state;
pub mod hash;
pub mod input_history;
pub mod replay;
pub mod rng;
pub mod snapshot;
pub mod systems;
pub mod telemetry;

#[cfg(test)]
mod test_config;

/// Session types: the orchestrator, its builder, configuration, and event drain.
pub mod sessions {
    pub mod builder;
    pub mod config;
    pub mod event_drain;
    pub mod simulation_session;
}

/// Internal module exposing implementation details for testing and benchmarking.
///
/// **This module is NOT part of the public API** and carries no semver guarantees.
#[doc(hidden)]
pub mod __internal {
    pub use crate::frame_state::visitor::{ByteReader, ByteWriter, ChecksumAccumulator, StateSink};
    pub use crate::frame_state::wire::{split_frame, FrameBlocks, FRAME_HEADER_LEN};
    pub use crate::snapshot::{minimal_size, plan_buffers, BufferPlan, RingSpec};
}

// #############
// # CONSTANTS #
// #############

/// Internally, -1 represents no frame / an unstamped slot.
pub const NULL_FRAME: i32 = -1;

/// A tick: one discrete step of simulation.
///
/// Ticks start at 0 and increase by one per simulated step. [`Frame::NULL`]
/// marks "no tick", e.g. an input slot that has not been confirmed yet.
///
/// ```
/// use fortress_lockstep::Frame;
///
/// let tick = Frame::new(0);
/// assert!(tick.is_valid());
/// assert!(Frame::NULL.is_null());
/// assert_eq!((tick + 1).as_i32(), 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame constant, equivalent to [`NULL_FRAME`].
    pub const NULL: Frame = Frame(NULL_FRAME);

    /// Creates a new `Frame` from an `i32` value. No validation is performed.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Frame(frame)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this frame is [`Frame::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_FRAME
    }

    /// Returns `true` if this frame is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Returns `Some(self)` if the frame is valid.
    #[inline]
    #[must_use]
    pub const fn to_option(self) -> Option<Frame> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Frame(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Frame(self.0 - rhs)
    }
}

impl std::ops::Sub<Frame> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Frame) -> Self::Output {
        self.0 - rhs.0
    }
}

impl std::ops::SubAssign<i32> for Frame {
    #[inline]
    fn sub_assign(&mut self, rhs: i32) {
        self.0 -= rhs;
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Frame(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl PartialEq<i32> for Frame {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Frame {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// Index of a player slot. Handles `0..player_count` are valid for a session.
///
/// ```
/// use fortress_lockstep::PlayerHandle;
///
/// let player = PlayerHandle::new(1);
/// assert!(player.is_valid_player_for(2));
/// assert!(!player.is_valid_player_for(1));
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PlayerHandle(usize);

impl PlayerHandle {
    /// Creates a new `PlayerHandle`. No validation is performed.
    #[inline]
    #[must_use]
    pub const fn new(handle: usize) -> Self {
        PlayerHandle(handle)
    }

    /// Returns the underlying `usize` value.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns `true` if this handle is a player slot in a session of `num_players`.
    #[inline]
    #[must_use]
    pub const fn is_valid_player_for(self, num_players: usize) -> bool {
        self.0 < num_players
    }
}

impl std::fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for PlayerHandle {
    #[inline]
    fn from(value: usize) -> Self {
        PlayerHandle(value)
    }
}

// #############
// #   ENUMS   #
// #############

/// Notifications produced by a [`SimulationSession`]. Handling them is up to the user.
///
/// This enum is marked `#[non_exhaustive]`; always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LockstepEvent<E> {
    /// A simulation event was raised, confirmed, or canceled.
    Simulation(EventNotification<E>),
    /// A verified frame's checksum differs from the reference log.
    ChecksumMismatch {
        /// Tick of the divergent frame.
        frame: Frame,
        /// Checksum recorded in the reference log.
        expected: u64,
        /// Checksum computed locally.
        actual: u64,
        /// The divergent local frame, serialized.
        local_snapshot: std::sync::Arc<[u8]>,
        /// The newest earlier snapshot from the checksum-history ring, for diffing.
        previous_snapshot: Option<SnapshotEntry>,
    },
    /// A system failed; the tick continued without it.
    SystemFault(SystemFault),
    /// A player's input could not be decoded and the default input was used instead.
    InputReplaced {
        /// Tick of the replaced input.
        frame: Frame,
        /// Player whose input was replaced.
        player: PlayerHandle,
        /// Why decoding failed.
        reason: String,
    },
    /// An instant-replay request found no snapshot at or before the requested tick.
    SnapshotMissing {
        /// The tick that was requested.
        requested: Frame,
    },
    /// A replay session simulated its terminal tick.
    ReplayFinished {
        /// The terminal tick.
        frame: Frame,
    },
}

// #############
// #  TRAITS   #
// #############

/// Compile time parameterization for sessions.
///
/// Bundles the generic types of a simulation. Implement it on a marker struct.
///
/// ```
/// use fortress_lockstep::{Config, SimulationEvent};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Copy, Clone, PartialEq, Default, Debug, Serialize, Deserialize)]
/// struct Buttons(u8);
///
/// #[derive(Clone, Default, Debug, Serialize, Deserialize)]
/// struct Score { red: u32, blue: u32 }
///
/// #[derive(Clone, Default, Debug, Serialize, Deserialize)]
/// struct Loadout { skin: u16 }
///
/// #[derive(Clone, Debug, PartialEq, Hash)]
/// enum GameEvent { Goal { team: u8 } }
///
/// impl SimulationEvent for GameEvent {
///     fn event_type(&self) -> u32 { 0 }
/// }
///
/// struct GameConfig;
///
/// impl Config for GameConfig {
///     type Input = Buttons;
///     type Globals = Score;
///     type PlayerData = Loadout;
///     type Event = GameEvent;
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait Config: 'static + Send + Sync {
    /// Per-player, per-tick input. [`Default`] stands in for missing or malformed input.
    type Input: Copy
        + Clone
        + PartialEq
        + Default
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync;

    /// Global simulation fields stored in every frame.
    type Globals: Clone + Default + Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Per-player runtime payload decoded from the player's config blob.
    type PlayerData: Clone + Default + Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Events raised by systems.
    type Event: SimulationEvent + Send + Sync;
}

/// Compile time parameterization for sessions.
#[cfg(not(feature = "sync-send"))]
pub trait Config: 'static {
    /// Per-player, per-tick input. [`Default`] stands in for missing or malformed input.
    type Input: Copy + Clone + PartialEq + Default + Debug + Serialize + DeserializeOwned;

    /// Global simulation fields stored in every frame.
    type Globals: Clone + Default + Debug + Serialize + DeserializeOwned;

    /// Per-player runtime payload decoded from the player's config blob.
    type PlayerData: Clone + Default + Debug + Serialize + DeserializeOwned;

    /// Events raised by systems.
    type Event: SimulationEvent;
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn frame_null_and_validity() {
        assert!(Frame::NULL.is_null());
        assert!(!Frame::NULL.is_valid());
        assert!(Frame::new(0).is_valid());
        assert_eq!(Frame::new(-5).to_option(), None);
        assert_eq!(Frame::new(3).to_option(), Some(Frame::new(3)));
    }

    #[test]
    fn frame_arithmetic() {
        let mut frame = Frame::new(10);
        frame += 5;
        assert_eq!(frame, 15);
        frame -= 3;
        assert_eq!(frame - Frame::new(2), 10);
        assert_eq!((frame - 2).as_i32(), 10);
        assert!(frame > 11);
    }

    #[test]
    fn frame_display() {
        assert_eq!(Frame::NULL.to_string(), "NULL_FRAME");
        assert_eq!(Frame::new(42).to_string(), "42");
    }

    #[test]
    fn player_handle_bounds() {
        let handle = PlayerHandle::from(3);
        assert_eq!(handle.as_usize(), 3);
        assert!(handle.is_valid_player_for(4));
        assert!(!handle.is_valid_player_for(3));
        assert_eq!(handle.to_string(), "3");
    }
}
