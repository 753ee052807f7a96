//! [`SessionBuilder`] validates configuration and assembles sessions.

use std::sync::Arc;

use crate::error::LockstepError;
use crate::frame_state::ComponentSchema;
use crate::input_history::{InputHistory, PredictionStrategy, RepeatLastConfirmed};
use crate::replay::ReplayFile;
use crate::sessions::config::{ChecksumConfig, InputHistoryConfig, SessionConfig, SnapshotConfig};
use crate::sessions::simulation_session::{SessionParts, SimulationSession};
use crate::systems::{SystemGraph, SystemScheduler, TaskRunner};
use crate::telemetry::ViolationObserver;
use crate::{Config, Frame};

/// Default event queue size.
/// Events older than this threshold are dropped if not polled.
const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;
/// Smallest accepted event queue size.
const MIN_EVENT_QUEUE_SIZE: usize = 16;

/// The [`SessionBuilder`] builds [`SimulationSession`]s.
///
/// After setting all appropriate values, use [`Self::start_session`] or
/// [`Self::start_replay_session`] to consume the builder.
///
/// ```
/// use fortress_lockstep::{Config, SessionBuilder, SessionConfig, SimulationEvent, SystemGraph};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, PartialEq, Hash)]
/// struct NoEvent;
/// impl SimulationEvent for NoEvent {
///     fn event_type(&self) -> u32 { 0 }
/// }
///
/// struct Game;
/// impl Config for Game {
///     type Input = u8;
///     type Globals = u32;
///     type PlayerData = ();
///     type Event = NoEvent;
/// }
///
/// let session = SessionBuilder::<Game>::new()
///     .with_session_config(SessionConfig { player_count: 1, ..SessionConfig::default() })?
///     .with_systems(SystemGraph::new())
///     .start_session()?;
/// assert_eq!(session.verified_frame().as_i32(), 0);
/// # Ok::<(), fortress_lockstep::LockstepError>(())
/// ```
#[must_use = "SessionBuilder must be consumed by calling a start_*_session method"]
pub struct SessionBuilder<T>
where
    T: Config,
{
    session_config: SessionConfig,
    checksum_config: ChecksumConfig,
    snapshot_config: SnapshotConfig,
    input_history_config: InputHistoryConfig,
    event_queue_size: usize,
    prediction: Box<dyn PredictionStrategy<T::Input>>,
    systems: SystemGraph<T>,
    task_runner: Option<Box<dyn TaskRunner>>,
    schema: Arc<ComponentSchema>,
    runtime_config: Vec<u8>,
    /// Optional observer for contract violations and contained faults.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Config> std::fmt::Debug for SessionBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure so a new field cannot be forgotten here.
        let Self {
            session_config,
            checksum_config,
            snapshot_config,
            input_history_config,
            event_queue_size,
            prediction: _,
            systems,
            task_runner,
            schema,
            runtime_config,
            violation_observer,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("session_config", session_config)
            .field("checksum_config", checksum_config)
            .field("snapshot_config", snapshot_config)
            .field("input_history_config", input_history_config)
            .field("event_queue_size", event_queue_size)
            .field("systems", systems)
            .field("has_task_runner", &task_runner.is_some())
            .field("schema_version", &schema.version())
            .field("runtime_config_len", &runtime_config.len())
            .field("has_violation_observer", &violation_observer.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Config> Default for SessionBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Config> SessionBuilder<T> {
    /// Construct a new builder with all values set to their defaults.
    ///
    /// The default session has no systems, an empty component schema, and
    /// predicts with [`RepeatLastConfirmed`].
    pub fn new() -> Self {
        Self {
            session_config: SessionConfig::default(),
            checksum_config: ChecksumConfig::default(),
            snapshot_config: SnapshotConfig::default(),
            input_history_config: InputHistoryConfig::default(),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            prediction: Box::new(RepeatLastConfirmed),
            systems: SystemGraph::new(),
            task_runner: None,
            schema: ComponentSchema::empty(),
            runtime_config: Vec::new(),
            violation_observer: None,
        }
    }

    /// Sets the player count, tick rate, seed, and prediction window.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if the configuration fails [`SessionConfig::validate`].
    ///
    /// [`InvalidRequest`]: LockstepError::InvalidRequest
    pub fn with_session_config(mut self, config: SessionConfig) -> Result<Self, LockstepError> {
        config.validate()?;
        self.session_config = config;
        Ok(self)
    }

    /// Sets checksum sampling and the record/verify mode.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if the configuration fails [`ChecksumConfig::validate`].
    ///
    /// [`InvalidRequest`]: LockstepError::InvalidRequest
    pub fn with_checksum_config(mut self, config: ChecksumConfig) -> Result<Self, LockstepError> {
        config.validate()?;
        self.checksum_config = config;
        Ok(self)
    }

    /// Sets the instant-replay and checksum-history snapshot streams.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if the configuration fails [`SnapshotConfig::validate`].
    ///
    /// [`InvalidRequest`]: LockstepError::InvalidRequest
    pub fn with_snapshot_config(mut self, config: SnapshotConfig) -> Result<Self, LockstepError> {
        config.validate()?;
        self.snapshot_config = config;
        Ok(self)
    }

    /// Sets the initial size and growth policy of the input history.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if the configuration fails [`InputHistoryConfig::validate`].
    ///
    /// [`InvalidRequest`]: LockstepError::InvalidRequest
    pub fn with_input_history_config(mut self, config: InputHistoryConfig) -> Result<Self, LockstepError> {
        config.validate()?;
        self.input_history_config = config;
        Ok(self)
    }

    /// Sets how many undrained events the session keeps. Default is 256.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if `size` is below 16.
    ///
    /// [`InvalidRequest`]: LockstepError::InvalidRequest
    pub fn with_event_queue_size(mut self, size: usize) -> Result<Self, LockstepError> {
        if size < MIN_EVENT_QUEUE_SIZE {
            return Err(LockstepError::invalid_request(format!(
                "event queue size must be at least {}, got {}",
                MIN_EVENT_QUEUE_SIZE, size
            )));
        }
        self.event_queue_size = size;
        Ok(self)
    }

    /// Sets the strategy choosing inputs for predicted ticks.
    pub fn with_prediction_strategy(mut self, strategy: impl PredictionStrategy<T::Input> + 'static) -> Self {
        self.prediction = Box::new(strategy);
        self
    }

    /// Sets the system tree. The graph is sealed when the session starts.
    pub fn with_systems(mut self, systems: SystemGraph<T>) -> Self {
        self.systems = systems;
        self
    }

    /// Sets the runner that orders each tick's tasks. Defaults to [`SerialRunner`](crate::SerialRunner).
    pub fn with_task_runner(mut self, runner: impl TaskRunner + 'static) -> Self {
        self.task_runner = Some(Box::new(runner));
        self
    }

    /// Sets the component schema every frame of the session is built against.
    pub fn with_schema(mut self, schema: Arc<ComponentSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Attaches opaque game configuration (map, rules) that is recorded into replays.
    pub fn with_runtime_config(mut self, runtime_config: Vec<u8>) -> Self {
        self.runtime_config = runtime_config;
        self
    }

    /// Sets a custom observer for contract violations and contained faults.
    ///
    /// System faults, replaced inputs, checksum divergence, and snapshot misses
    /// are reported to this observer. If no observer is set, they are logged
    /// via the `tracing` crate.
    ///
    /// ```
    /// use fortress_lockstep::{SessionBuilder, telemetry::CollectingObserver};
    /// # use fortress_lockstep::{Config, SimulationEvent};
    /// # #[derive(Clone, Debug, PartialEq, Hash)]
    /// # struct NoEvent;
    /// # impl SimulationEvent for NoEvent { fn event_type(&self) -> u32 { 0 } }
    /// # struct Game;
    /// # impl Config for Game {
    /// #     type Input = u8;
    /// #     type Globals = ();
    /// #     type PlayerData = ();
    /// #     type Event = NoEvent;
    /// # }
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = SessionBuilder::<Game>::new().with_violation_observer(observer.clone());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Consumes the builder to start a live session at tick 0.
    ///
    /// # Errors
    /// - Returns an error if the initial frame cannot be built, e.g. when the
    ///   system graph has more systems than the enable bitset holds.
    pub fn start_session(self) -> Result<SimulationSession<T>, LockstepError> {
        let mut history = InputHistory::with_growth(
            self.session_config.player_count,
            Frame::new(1),
            self.input_history_config.initial_capacity,
            self.input_history_config.growth,
        )?;
        history.set_max_lead(
            self.session_config
                .max_prediction
                .saturating_add(self.session_config.simulation_rate as usize),
        );
        let config = self.session_config;
        let checksum = self.checksum_config.clone();
        self.into_session(config, checksum, history, None)
    }

    /// Consumes the builder to replay `replay` from its first tick.
    ///
    /// The session and runtime configuration are taken from the replay. If the
    /// replay embeds a checksum log, the session verifies against it;
    /// otherwise the builder's checksum configuration applies. Systems, schema,
    /// and prediction strategy come from the builder and must match the game
    /// that recorded the replay.
    ///
    /// # Errors
    /// - Returns [`Serialization`] if the replay is inconsistent or its
    ///   terminal frame cannot be decoded.
    ///
    /// [`Serialization`]: LockstepError::Serialization
    pub fn start_replay_session(mut self, replay: ReplayFile) -> Result<SimulationSession<T>, LockstepError> {
        replay.validate()?;
        let history = InputHistory::import(&replay.inputs, self.input_history_config.growth)?;
        if history.start_frame() != Frame::new(1) {
            return Err(LockstepError::serialization(format!(
                "replay input starts at tick {}, expected 1",
                history.start_frame()
            )));
        }
        let checksum = match &replay.checksums {
            Some(log) => ChecksumConfig::verify(log.clone()),
            None => self.checksum_config.clone(),
        };
        self.runtime_config.clone_from(&replay.runtime_config);
        let config = replay.session;
        self.into_session(config, checksum, history, Some(replay))
    }

    fn into_session(
        self,
        config: SessionConfig,
        checksum: ChecksumConfig,
        history: InputHistory,
        replay: Option<ReplayFile>,
    ) -> Result<SimulationSession<T>, LockstepError> {
        config.validate()?;
        checksum.validate()?;
        let mut scheduler = SystemScheduler::new(self.systems);
        if let Some(runner) = self.task_runner {
            scheduler.set_runner(runner);
        }
        SimulationSession::new(SessionParts {
            config,
            checksum,
            snapshots: self.snapshot_config,
            history,
            prediction: self.prediction,
            scheduler,
            schema: self.schema,
            runtime_config: self.runtime_config,
            observer: self.violation_observer,
            event_queue_size: self.event_queue_size,
            replay,
        })
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
    use crate::events::SimulationEvent;
    use crate::input_history::GrowthPolicy;

    #[derive(Clone, Debug, PartialEq, Hash)]
    struct Never;

    impl SimulationEvent for Never {
        fn event_type(&self) -> u32 {
            0
        }
    }

    struct Bare;

    impl Config for Bare {
        type Input = u8;
        type Globals = u32;
        type PlayerData = ();
        type Event = Never;
    }

    #[test]
    fn default_builder_starts_at_tick_zero() {
        let session = SessionBuilder::<Bare>::new().start_session().unwrap();
        assert_eq!(session.verified_frame(), Frame::new(0));
        assert_eq!(session.current_frame(), Frame::new(0));
        assert_eq!(session.config().player_count, 2);
        assert!(!session.is_replay());
    }

    #[test]
    fn rejects_invalid_configs() {
        let zero_players = SessionConfig {
            player_count: 0,
            ..SessionConfig::default()
        };
        assert!(SessionBuilder::<Bare>::new()
            .with_session_config(zero_players)
            .is_err());
        assert!(SessionBuilder::<Bare>::new()
            .with_checksum_config(ChecksumConfig::record(0))
            .is_err());
        assert!(SessionBuilder::<Bare>::new()
            .with_event_queue_size(MIN_EVENT_QUEUE_SIZE - 1)
            .is_err());
        assert!(SessionBuilder::<Bare>::new()
            .with_input_history_config(InputHistoryConfig {
                growth: GrowthPolicy::Fixed(0),
                initial_capacity: 8,
            })
            .is_err());
    }

    #[test]
    fn debug_lists_configuration() {
        let builder = SessionBuilder::<Bare>::new().with_runtime_config(vec![1, 2, 3]);
        let text = format!("{:?}", builder);
        assert!(text.contains("SessionBuilder"));
        assert!(text.contains("runtime_config_len: 3"));
    }
}
