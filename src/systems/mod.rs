//! Simulation systems and their scheduling.
//!
//! Systems are registered into a [`SystemGraph`], a tree whose node indices
//! double as bit positions in each frame's enabled-systems bitset. Indices are
//! assigned at registration and frozen when the graph is sealed. Each tick the
//! [`SystemScheduler`] turns the enabled part of the tree into a [`TaskGraph`]
//! and runs it against the frame in the order a [`TaskRunner`] picks, containing
//! any failure to the system that caused it.

use std::error::Error;
use std::fmt;

use crate::frame_state::FrameState;
use crate::{Config, Frame, PlayerHandle};

pub mod graph;
pub mod runner;
pub mod scheduler;
pub mod task;

pub use graph::SystemGraph;
pub use runner::{SerialRunner, TaskRunner};
pub use scheduler::SystemScheduler;
pub use task::{Task, TaskGraph, TaskHandle};

/// Index of a system in its graph and bit position in the enabled-systems bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(usize);

impl SystemId {
    /// Wraps a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a system participates in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemKind {
    /// A system without children.
    #[default]
    Leaf,
    /// Owns children, which are scheduled after it in declaration order.
    Group,
    /// Runs on the main thread together with all of its enabled descendants.
    MainThread,
}

impl SystemKind {
    /// Whether systems of this kind may own children.
    #[must_use]
    pub const fn can_own_children(self) -> bool {
        matches!(self, Self::Group | Self::MainThread)
    }
}

/// Session-level notifications delivered to systems that registered for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The session started; delivered once against the initial frame.
    GameStarted,
    /// A player's runtime data was set on the verified frame.
    PlayerDataSet {
        /// The player.
        player: PlayerHandle,
    },
    /// A player was marked disconnected on the verified frame.
    PlayerDisconnected {
        /// The player.
        player: PlayerHandle,
    },
}

impl Signal {
    /// The capability a system must declare to receive this signal.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::GameStarted => SignalKind::GameStarted,
            Self::PlayerDataSet { .. } => SignalKind::PlayerDataSet,
            Self::PlayerDisconnected { .. } => SignalKind::PlayerDisconnected,
        }
    }
}

/// Signal capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// See [`Signal::GameStarted`].
    GameStarted,
    /// See [`Signal::PlayerDataSet`].
    PlayerDataSet,
    /// See [`Signal::PlayerDisconnected`].
    PlayerDisconnected,
}

impl SignalKind {
    /// Number of kinds.
    pub const COUNT: usize = 3;

    /// Every kind, in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::GameStarted, Self::PlayerDataSet, Self::PlayerDisconnected];

    /// Position of this kind's dispatch table.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::GameStarted => 0,
            Self::PlayerDataSet => 1,
            Self::PlayerDisconnected => 2,
        }
    }
}

/// The set of signals a system handles.
///
/// ```
/// use fortress_lockstep::{SignalKind, SignalSet};
///
/// let set = SignalSet::EMPTY.with(SignalKind::GameStarted);
/// assert!(set.contains(SignalKind::GameStarted));
/// assert!(!set.contains(SignalKind::PlayerDisconnected));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignalSet(u8);

impl SignalSet {
    /// No signals.
    pub const EMPTY: Self = Self(0);

    /// Adds `kind` to the set.
    #[must_use]
    pub const fn with(self, kind: SignalKind) -> Self {
        Self(self.0 | (1 << kind.index()))
    }

    /// Whether `kind` is in the set.
    #[must_use]
    pub const fn contains(self, kind: SignalKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Error returned by a system callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemError {
    message: String,
}

impl SystemError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for SystemError {}

/// Which callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPhase {
    /// [`System::update`].
    Update,
    /// [`System::on_enabled`].
    Enabled,
    /// [`System::on_disabled`].
    Disabled,
    /// [`System::on_signal`].
    Signal(SignalKind),
}

/// A contained system failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFault {
    /// The failing system.
    pub system: SystemId,
    /// Its registered name.
    pub name: String,
    /// Tick of the frame it ran against.
    pub tick: Frame,
    /// The callback that failed.
    pub phase: FaultPhase,
    /// Error message or panic payload.
    pub message: String,
    /// Whether the system panicked rather than returning an error.
    pub panicked: bool,
}

impl fmt::Display for SystemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "system '{}' ({}) failed in {:?} at tick {}{}: {}",
            self.name,
            self.system,
            self.phase,
            self.tick,
            if self.panicked { " (panic)" } else { "" },
            self.message
        )
    }
}

/// A unit of simulation logic.
///
/// Systems are stateless: everything that must survive a rollback lives in
/// the [`FrameState`]. Every callback has a no-op default.
#[cfg(feature = "sync-send")]
pub trait System<T: Config>: Send + Sync {
    /// Unique name within the graph.
    fn name(&self) -> &str;

    /// Scheduling role.
    fn kind(&self) -> SystemKind {
        SystemKind::Leaf
    }

    /// Whether the system's bit is set in the initial frame.
    fn start_enabled(&self) -> bool {
        true
    }

    /// Signals this system receives through [`Self::on_signal`].
    fn signals(&self) -> SignalSet {
        SignalSet::EMPTY
    }

    /// Advances the frame by one tick.
    fn update(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Called after a tick in which the system was enabled.
    fn on_enabled(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Called after a tick in which the system was disabled.
    fn on_disabled(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Handles a signal declared in [`Self::signals`].
    fn on_signal(&self, _signal: &Signal, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }
}

/// A unit of simulation logic.
///
/// Systems are stateless: everything that must survive a rollback lives in
/// the [`FrameState`]. Every callback has a no-op default.
#[cfg(not(feature = "sync-send"))]
pub trait System<T: Config> {
    /// Unique name within the graph.
    fn name(&self) -> &str;

    /// Scheduling role.
    fn kind(&self) -> SystemKind {
        SystemKind::Leaf
    }

    /// Whether the system's bit is set in the initial frame.
    fn start_enabled(&self) -> bool {
        true
    }

    /// Signals this system receives through [`Self::on_signal`].
    fn signals(&self) -> SignalSet {
        SignalSet::EMPTY
    }

    /// Advances the frame by one tick.
    fn update(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Called after a tick in which the system was enabled.
    fn on_enabled(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Called after a tick in which the system was disabled.
    fn on_disabled(&self, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
        Ok(())
    }

    /// Handles a signal declared in [`Self::signals`].
    fn on_signal(&self, _signal: &Signal, _frame: &mut FrameState<T>) -> Result<(), SystemError> {
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

    #[test]
    fn signal_kinds_map_to_distinct_tables() {
        let indices: Vec<usize> = SignalKind::ALL.iter().map(|k| k.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(
            Signal::PlayerDataSet {
                player: PlayerHandle::new(1)
            }
            .kind(),
            SignalKind::PlayerDataSet
        );
    }

    #[test]
    fn signal_set_membership() {
        let set = SignalSet::EMPTY
            .with(SignalKind::PlayerDataSet)
            .with(SignalKind::PlayerDisconnected);
        assert!(!set.contains(SignalKind::GameStarted));
        assert!(set.contains(SignalKind::PlayerDataSet));
        assert!(set.contains(SignalKind::PlayerDisconnected));
        assert!(SignalSet::EMPTY.is_empty());
    }

    #[test]
    fn fault_display_mentions_system_and_phase() {
        let fault = SystemFault {
            system: SystemId::new(3),
            name: "movement".into(),
            tick: Frame::new(9),
            phase: FaultPhase::Update,
            message: "boom".into(),
            panicked: true,
        };
        let text = fault.to_string();
        assert!(text.contains("movement"));
        assert!(text.contains("#3"));
        assert!(text.contains("panic"));
    }

    #[test]
    fn only_groups_own_children() {
        assert!(!SystemKind::Leaf.can_own_children());
        assert!(SystemKind::Group.can_own_children());
        assert!(SystemKind::MainThread.can_own_children());
    }
}
