//! The session that drives a lockstep simulation.
//!
//! A [`SimulationSession`] owns two frames. The *verified* frame only ever
//! advances over ticks whose input is confirmed for every player; it is
//! checksummed and sampled into the snapshot rings. The *current* frame is the
//! verified frame plus up to `max_prediction` predicted ticks and is what a
//! renderer should show. Each [`SimulationSession::advance_frame`] first moves
//! the verified frame as far as confirmed input allows, then rebuilds the
//! current frame from it, so late input corrects any earlier misprediction.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, trace};
use web_time::Duration;

use crate::checksum::{ChecksumLog, ChecksumVerification};
use crate::codec;
use crate::debug_check_invariants;
use crate::error::{InvalidFrameReason, LockstepError};
use crate::events::{EventNotification, EventReconciler};
use crate::frame_state::{ComponentSchema, FrameState, SerializeMode};
use crate::input_history::{InputFlags, InputHistory, InputRecord, PredictionStrategy};
use crate::replay::ReplayFile;
use crate::report_violation_to;
use crate::rng::{Pcg32, SeedableRng};
use crate::sessions::config::{ChecksumConfig, ChecksumMode, SessionConfig, SnapshotConfig};
use crate::sessions::event_drain::EventDrain;
use crate::snapshot::{plan_buffers, BufferPlan, FindMode, RingSpec, SnapshotEntry, SnapshotRingBuffer};
use crate::systems::scheduler::panic_message;
use crate::systems::{Signal, SystemFault, SystemScheduler};
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{Config, Frame, LockstepEvent, PlayerHandle};

/// Payload of an input record flagged [`InputFlags::COMMAND`]: binds a player
/// to a transport actor and sets its config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDataCommand {
    /// Transport actor id.
    pub actor_id: i32,
    /// Opaque config, decoded into [`Config::PlayerData`].
    pub config: Vec<u8>,
}

/// Callback receiving every reconciled simulation event as it is produced.
#[cfg(feature = "sync-send")]
pub type EventSubscriber<E> = Box<dyn FnMut(&EventNotification<E>) + Send>;

/// Callback receiving every reconciled simulation event as it is produced.
#[cfg(not(feature = "sync-send"))]
pub type EventSubscriber<E> = Box<dyn FnMut(&EventNotification<E>)>;

/// Everything the builder assembles for a session.
pub(crate) struct SessionParts<T: Config> {
    pub config: SessionConfig,
    pub checksum: ChecksumConfig,
    pub snapshots: SnapshotConfig,
    pub history: InputHistory,
    pub prediction: Box<dyn PredictionStrategy<T::Input>>,
    pub scheduler: SystemScheduler<T>,
    pub schema: Arc<ComponentSchema>,
    pub runtime_config: Vec<u8>,
    pub observer: Option<Arc<dyn ViolationObserver>>,
    pub event_queue_size: usize,
    pub replay: Option<ReplayFile>,
}

struct ReplayTarget {
    terminal_tick: Frame,
    terminal_checksum: Option<u64>,
    finished: bool,
}

// ==========================================
// Snapshot streams
// ==========================================

struct SampledRing {
    interval: u32,
    buffer: SnapshotRingBuffer,
}

impl SampledRing {
    fn new(spec: RingSpec) -> Result<Self, LockstepError> {
        Ok(Self {
            interval: spec.interval,
            buffer: SnapshotRingBuffer::new(spec.capacity)?,
        })
    }

    fn samples(&self, tick: Frame) -> bool {
        i64::from(tick.as_i32()) % i64::from(self.interval) == 0
    }
}

/// The rings chosen by [`plan_buffers`], with each stream pointing at its ring.
struct SnapshotStreams {
    plan: BufferPlan,
    rings: SmallVec<[SampledRing; 2]>,
    instant_replay: Option<usize>,
    checksum_history: Option<usize>,
}

impl SnapshotStreams {
    fn new(simulation_rate: u32, config: &SnapshotConfig) -> Result<Self, LockstepError> {
        let plan = plan_buffers(simulation_rate, config.checksum_history, config.instant_replay);
        let mut rings: SmallVec<[SampledRing; 2]> = SmallVec::new();
        let (checksum_history, instant_replay) = match plan {
            BufferPlan::Shared(spec) => {
                rings.push(SampledRing::new(spec)?);
                (Some(0), Some(0))
            },
            BufferPlan::Separate {
                checksum_history,
                instant_replay,
            } => {
                let mut index_of = |spec: Option<RingSpec>| -> Result<Option<usize>, LockstepError> {
                    spec.map(|spec| {
                        rings.push(SampledRing::new(spec)?);
                        Ok(rings.len() - 1)
                    })
                    .transpose()
                };
                (index_of(checksum_history)?, index_of(instant_replay)?)
            },
        };
        debug!(?plan, "planned snapshot rings");
        Ok(Self {
            plan,
            rings,
            instant_replay,
            checksum_history,
        })
    }

    fn wants(&self, tick: Frame) -> bool {
        self.rings.iter().any(|ring| ring.samples(tick))
    }

    fn push(&mut self, tick: Frame, bytes: &Arc<[u8]>) -> Result<(), LockstepError> {
        for ring in self.rings.iter_mut().filter(|ring| ring.samples(tick)) {
            ring.buffer.push_back(tick, Arc::clone(bytes))?;
        }
        Ok(())
    }

    fn ring(&self, index: Option<usize>) -> Option<&SnapshotRingBuffer> {
        index
            .and_then(|i| self.rings.get(i))
            .map(|ring| &ring.buffer)
    }
}

// ==========================================
// Tick simulation
// ==========================================

/// What simulating one tick produced besides the frame itself.
struct TickReport<E> {
    faults: Vec<SystemFault>,
    replaced: Vec<(PlayerHandle, String)>,
    events: Vec<E>,
}

impl<E> Default for TickReport<E> {
    fn default() -> Self {
        Self {
            faults: Vec::new(),
            replaced: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl<E> TickReport<E> {
    fn clear(&mut self) {
        self.faults.clear();
        self.replaced.clear();
        self.events.clear();
    }
}

struct Simulator<T: Config> {
    scheduler: SystemScheduler<T>,
    prediction: Box<dyn PredictionStrategy<T::Input>>,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Config> Simulator<T> {
    /// Advances `frame` (at `tick - 1`) to `tick`.
    ///
    /// Verified runs apply confirmed input, commands, and signals. Predicted
    /// runs use confirmed gameplay input where it exists and the prediction
    /// strategy everywhere else.
    fn step(
        &mut self,
        history: &InputHistory,
        frame: &mut FrameState<T>,
        tick: Frame,
        verified: bool,
        report: &mut TickReport<T::Event>,
    ) -> Result<(), LockstepError> {
        frame.set_tick(tick);
        frame.set_verified(verified);
        let mut signals: SmallVec<[Signal; 2]> = SmallVec::new();
        for index in 0..frame.player_count() {
            let player = PlayerHandle::new(index);
            if verified {
                let record = history.record(tick, player).ok_or_else(|| {
                    LockstepError::InternalError {
                        context: format!(
                            "verified tick {} has no confirmed input for player {}",
                            tick, player
                        ),
                    }
                })?;
                let input = self.apply_confirmed(record, player, frame, &mut signals, report);
                frame.set_input(player, input, false)?;
            } else {
                match history.record(tick, player).filter(|r| r.flags == InputFlags::NONE) {
                    Some(record) => {
                        let input: T::Input = match codec::decode_exact(&record.bytes) {
                            Ok(input) => input,
                            Err(err) => {
                                report_violation_to!(
                                    self.observer,
                                    ViolationSeverity::Warning,
                                    ViolationKind::InputFault,
                                    "input of player {} at predicted tick {} replaced with the default: {}",
                                    player,
                                    tick,
                                    err
                                );
                                T::Input::default()
                            },
                        };
                        frame.set_input(player, input, false)?;
                    },
                    None => {
                        let last: Option<T::Input> = history
                            .last_confirmed(tick, player)
                            .and_then(|r| codec::decode_exact(&r.bytes).ok());
                        let input = self.prediction.predict(tick, last, player);
                        frame.set_input(player, input, true)?;
                    },
                }
            }
        }
        for signal in &signals {
            report.faults.extend(self.scheduler.dispatch_signal(signal, frame));
        }
        report.faults.extend(self.scheduler.run_tick(frame));
        frame.drain_events_into(&mut report.events);
        Ok(())
    }

    fn apply_confirmed(
        &self,
        record: &InputRecord,
        player: PlayerHandle,
        frame: &mut FrameState<T>,
        signals: &mut SmallVec<[Signal; 2]>,
        report: &mut TickReport<T::Event>,
    ) -> T::Input {
        if record.flags.contains(InputFlags::DISCONNECTED) {
            signals.push(Signal::PlayerDisconnected { player });
            return T::Input::default();
        }
        if record.flags.contains(InputFlags::COMMAND) {
            let applied = codec::decode_exact::<PlayerDataCommand>(&record.bytes)
                .map_err(LockstepError::from)
                .and_then(|command| frame.set_player(player, command.actor_id, command.config));
            match applied {
                Ok(()) => signals.push(Signal::PlayerDataSet { player }),
                Err(err) => {
                    self.replace(record.tick, player, format!("invalid player data command: {}", err), report);
                },
            }
            return T::Input::default();
        }
        match codec::decode_exact(&record.bytes) {
            Ok(input) => input,
            Err(err) => {
                self.replace(record.tick, player, err.to_string(), report);
                T::Input::default()
            },
        }
    }

    fn replace(&self, tick: Frame, player: PlayerHandle, reason: String, report: &mut TickReport<T::Event>) {
        report_violation_to!(
            self.observer,
            ViolationSeverity::Warning,
            ViolationKind::InputFault,
            "input of player {} at tick {} replaced with the default: {}",
            player,
            tick,
            reason
        );
        report.replaced.push((player, reason));
    }
}

// ==========================================
// Session
// ==========================================

/// Drives a deterministic lockstep simulation.
///
/// Build one with [`SessionBuilder`](crate::SessionBuilder). Feed it confirmed
/// input from the transport with [`Self::confirm_input`], call
/// [`Self::advance_frame`] once per tick, render [`Self::frame`], and handle
/// [`Self::events`].
pub struct SimulationSession<T: Config> {
    config: SessionConfig,
    checksum_interval: u32,
    checksum_mode: ChecksumMode,
    checksums: ChecksumLog,
    sim: Simulator<T>,
    history: InputHistory,
    verified: FrameState<T>,
    current: FrameState<T>,
    snapshots: SnapshotStreams,
    reconciler: EventReconciler<T::Event>,
    report: TickReport<T::Event>,
    notifications: Vec<EventNotification<T::Event>>,
    event_queue: VecDeque<LockstepEvent<T::Event>>,
    event_queue_size: usize,
    subscribers: Vec<EventSubscriber<T::Event>>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    runtime_config: Vec<u8>,
    replay: Option<ReplayTarget>,
}

impl<T: Config> SimulationSession<T> {
    pub(crate) fn new(parts: SessionParts<T>) -> Result<Self, LockstepError> {
        let SessionParts {
            config,
            checksum,
            snapshots,
            history,
            prediction,
            mut scheduler,
            schema,
            runtime_config,
            observer,
            event_queue_size,
            replay,
        } = parts;
        scheduler.set_violation_observer(observer.clone());

        let mut verified = FrameState::new(schema, scheduler.graph().len(), config.player_count)?;
        verified.reseed(Pcg32::seed_from_u64(config.seed));
        scheduler.init_frame(&mut verified)?;
        verified.set_verified(true);

        let replay = match replay {
            Some(file) => {
                let terminal_checksum = match &file.terminal_frame {
                    Some(bytes) => {
                        let mut terminal = verified.blank_like();
                        terminal.deserialize(bytes)?;
                        if terminal.tick() != file.terminal_tick {
                            return Err(LockstepError::serialization(format!(
                                "replay terminal frame is tick {} but the replay ends at {}",
                                terminal.tick(),
                                file.terminal_tick
                            )));
                        }
                        Some(terminal.checksum()?)
                    },
                    None => None,
                };
                Some(ReplayTarget {
                    terminal_tick: file.terminal_tick,
                    terminal_checksum,
                    finished: false,
                })
            },
            None => None,
        };

        let current = verified.clone();
        let mut session = Self {
            checksum_interval: checksum.interval.max(1),
            checksum_mode: checksum.mode,
            checksums: ChecksumLog::new(checksum.interval),
            snapshots: SnapshotStreams::new(config.simulation_rate, &snapshots)?,
            sim: Simulator {
                scheduler,
                prediction,
                observer: observer.clone(),
            },
            history,
            verified,
            current,
            reconciler: EventReconciler::new(),
            report: TickReport::default(),
            notifications: Vec::new(),
            event_queue: VecDeque::new(),
            event_queue_size,
            subscribers: Vec::new(),
            violation_observer: observer,
            runtime_config,
            replay,
            config,
        };

        let faults = session
            .sim
            .scheduler
            .dispatch_signal(&Signal::GameStarted, &mut session.verified);
        session.report.faults.extend(faults);
        session.verified.drain_events_into(&mut session.report.events);
        session.settle_verified()?;
        session.current.copy_from(&session.verified)?;
        info!(
            players = session.config.player_count,
            systems = session.sim.scheduler.graph().len(),
            seed = session.config.seed,
            replay = session.replay.is_some(),
            "simulation session started"
        );
        Ok(session)
    }

    // ==========================================
    // Input
    // ==========================================

    /// Stores a confirmed, encoded input of `player` for `tick`.
    ///
    /// Ticks start at 1; tick 0 is the initial frame. The bytes are decoded
    /// when the tick is simulated; undecodable input is replaced with the
    /// default input and reported as [`LockstepEvent::InputReplaced`].
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::InvalidFrame`] if `tick` is past the input
    /// horizon (`max_prediction` plus one second of ticks beyond the last
    /// complete tick). Nothing is stored and an input fault is reported.
    pub fn confirm_input(&mut self, player: PlayerHandle, tick: Frame, bytes: &[u8]) -> Result<(), LockstepError> {
        self.ensure_live()?;
        self.store_confirmed(tick, player, bytes, InputFlags::NONE)
    }

    /// Encodes and stores a confirmed input of `player` for `tick`.
    pub fn confirm_input_value(
        &mut self,
        player: PlayerHandle,
        tick: Frame,
        input: &T::Input,
    ) -> Result<(), LockstepError> {
        let bytes = codec::encode(input)?;
        self.confirm_input(player, tick, &bytes)
    }

    /// Confirms a player-data command as `player`'s input for `tick`.
    ///
    /// When `tick` is verified the player is bound to `actor_id`, `config` is
    /// decoded into the frame's player data, and systems receive
    /// [`Signal::PlayerDataSet`]. The player's gameplay input for that tick is
    /// the default input.
    pub fn confirm_player_data(
        &mut self,
        player: PlayerHandle,
        tick: Frame,
        actor_id: i32,
        config: Vec<u8>,
    ) -> Result<(), LockstepError> {
        self.ensure_live()?;
        let bytes = codec::encode(&PlayerDataCommand { actor_id, config })?;
        self.store_confirmed(tick, player, &bytes, InputFlags::COMMAND)
    }

    /// Confirms that `player` disconnected at `tick`.
    ///
    /// Systems receive [`Signal::PlayerDisconnected`] when the tick is verified.
    /// The transport keeps confirming (empty) input for the slot afterwards.
    pub fn confirm_disconnect(&mut self, player: PlayerHandle, tick: Frame) -> Result<(), LockstepError> {
        self.ensure_live()?;
        self.store_confirmed(tick, player, &[], InputFlags::DISCONNECTED)
    }

    /// Records that the transport sent `player`'s input for `tick` to peers.
    pub fn mark_input_sent(&mut self, player: PlayerHandle, tick: Frame) -> Result<(), LockstepError> {
        self.history.mark_sent(tick, player)
    }

    fn store_confirmed(
        &mut self,
        tick: Frame,
        player: PlayerHandle,
        bytes: &[u8],
        flags: InputFlags,
    ) -> Result<(), LockstepError> {
        let result = self.history.on_input_confirmed(tick, player, bytes, flags);
        if let Err(LockstepError::InvalidFrame {
            reason: InvalidFrameReason::BeyondHorizon { horizon },
            ..
        }) = &result
        {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::InputFault,
                "input of player {} for tick {} rejected: horizon is {}",
                player,
                tick,
                horizon
            );
        }
        result
    }

    fn ensure_live(&self) -> Result<(), LockstepError> {
        if self.replay.is_some() {
            return Err(LockstepError::invalid_request(
                "replay sessions take their input from the replay file",
            ));
        }
        Ok(())
    }

    // ==========================================
    // Advancing
    // ==========================================

    /// Advances the current frame by one tick and returns its tick.
    ///
    /// Verified ticks are simulated first, as far as confirmed input reaches;
    /// the remaining ticks up to the new current tick are predicted.
    ///
    /// # Errors
    ///
    /// - [`LockstepError::PredictionThreshold`] if the new tick would be more
    ///   than `max_prediction` ticks past the last verifiable tick. Nothing
    ///   changes; confirm more input and call again.
    /// - [`LockstepError::InvalidRequest`] if a replay already reached its terminal tick.
    pub fn advance_frame(&mut self) -> Result<Frame, LockstepError> {
        if let Some(replay) = &self.replay {
            if self.verified.tick() >= replay.terminal_tick {
                return Err(LockstepError::invalid_request(format!(
                    "replay already reached its terminal tick {}",
                    replay.terminal_tick
                )));
            }
        }

        let target = self.current.tick() + 1;
        let mut reachable = self.verified.tick();
        while reachable < target && self.history.can_simulate(reachable + 1) {
            reachable += 1;
        }
        if (target - reachable) as usize > self.config.max_prediction {
            trace!(
                target = %target,
                verified = %self.verified.tick(),
                "prediction threshold reached"
            );
            return Err(LockstepError::PredictionThreshold);
        }

        while self.verified.tick() < reachable {
            let tick = self.verified.tick() + 1;
            self.sim
                .step(&self.history, &mut self.verified, tick, true, &mut self.report)?;
            self.settle_verified()?;
        }

        self.current.copy_from(&self.verified)?;
        let mut tick = reachable;
        while tick < target {
            tick += 1;
            self.sim
                .step(&self.history, &mut self.current, tick, false, &mut self.report)?;
            self.reconciler
                .on_predicted_tick(tick, &self.report.events, &mut self.notifications);
            self.report.clear();
            self.publish_notifications();
        }

        debug_check_invariants!(self);
        Ok(self.current.tick())
    }

    /// Turns the report of the verified tick just simulated into events,
    /// checksums, and snapshots.
    fn settle_verified(&mut self) -> Result<(), LockstepError> {
        let tick = self.verified.tick();
        let mut report = std::mem::take(&mut self.report);
        for (player, reason) in report.replaced.drain(..) {
            self.push_event(LockstepEvent::InputReplaced {
                frame: tick,
                player,
                reason,
            });
        }
        for fault in report.faults.drain(..) {
            self.push_event(LockstepEvent::SystemFault(fault));
        }
        self.reconciler
            .on_verified_tick(tick, &report.events, &mut self.notifications);
        report.clear();
        self.report = report;
        self.publish_notifications();

        self.sample_checksum(tick)?;
        if self.snapshots.wants(tick) {
            let bytes: Arc<[u8]> = self.verified.serialize(SerializeMode::Snapshot)?.into();
            self.snapshots.push(tick, &bytes)?;
        }
        self.finish_replay(tick)?;
        trace!(tick = %tick, "verified tick settled");
        Ok(())
    }

    fn sample_checksum(&mut self, tick: Frame) -> Result<(), LockstepError> {
        if matches!(self.checksum_mode, ChecksumMode::Off)
            || i64::from(tick.as_i32()) % i64::from(self.checksum_interval) != 0
        {
            return Ok(());
        }
        let checksum = self.verified.checksum()?;
        self.checksums.record(tick, checksum)?;
        let verdict = match &self.checksum_mode {
            ChecksumMode::Verify(reference) => reference.verify(tick, checksum),
            _ => ChecksumVerification::NotRecorded,
        };
        match verdict {
            ChecksumVerification::Mismatch {
                expected, actual, ..
            } => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Determinism,
                    "verified tick {} diverged from the reference checksum log",
                    tick
                );
                self.push_mismatch(tick, expected, actual)?;
            },
            ChecksumVerification::TickMismatch { recorded, .. } => {
                // The reference log is misaligned, so no checksum can be compared.
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Determinism,
                    "reference checksum log slot for tick {} holds tick {}",
                    tick,
                    recorded
                );
            },
            _ => {},
        }
        Ok(())
    }

    fn push_mismatch(&mut self, tick: Frame, expected: u64, actual: u64) -> Result<(), LockstepError> {
        let local_snapshot: Arc<[u8]> = self.verified.serialize(SerializeMode::Snapshot)?.into();
        let previous_snapshot = self
            .snapshots
            .ring(self.snapshots.checksum_history)
            .and_then(|ring| ring.find(tick - 1, FindMode::ClosestLessThanOrEqual))
            .cloned();
        self.push_event(LockstepEvent::ChecksumMismatch {
            frame: tick,
            expected,
            actual,
            local_snapshot,
            previous_snapshot,
        });
        Ok(())
    }

    fn finish_replay(&mut self, tick: Frame) -> Result<(), LockstepError> {
        let Some(replay) = self.replay.as_mut() else {
            return Ok(());
        };
        if replay.finished || tick != replay.terminal_tick {
            return Ok(());
        }
        replay.finished = true;
        let expected = replay.terminal_checksum;
        if let Some(expected) = expected {
            let actual = self.verified.checksum()?;
            if actual != expected {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Determinism,
                    "replayed terminal tick {} differs from the recorded terminal frame",
                    tick
                );
                self.push_mismatch(tick, expected, actual)?;
            }
        }
        info!(tick = %tick, "replay finished");
        self.push_event(LockstepEvent::ReplayFinished { frame: tick });
        Ok(())
    }

    // ==========================================
    // Events
    // ==========================================

    fn push_event(&mut self, event: LockstepEvent<T::Event>) {
        if self.event_queue.len() >= self.event_queue_size {
            self.event_queue.pop_front();
        }
        self.event_queue.push_back(event);
    }

    fn publish_notifications(&mut self) {
        let mut notifications = std::mem::take(&mut self.notifications);
        for notification in notifications.drain(..) {
            for subscriber in &mut self.subscribers {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(&notification))) {
                    report_violation_to!(
                        self.violation_observer,
                        ViolationSeverity::Error,
                        ViolationKind::EventDispatch,
                        "event subscriber panicked on tick {}: {}",
                        notification.tick(),
                        panic_message(payload.as_ref())
                    );
                }
            }
            self.push_event(LockstepEvent::Simulation(notification));
        }
        self.notifications = notifications;
    }

    /// Drains queued events. The queue holds at most the configured number of
    /// events; the oldest are dropped first.
    pub fn events(&mut self) -> EventDrain<'_, T::Event> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// Registers a callback for reconciled simulation events.
    ///
    /// Subscribers see notifications as they are produced, before they are
    /// queued for [`Self::events`]. A panicking subscriber is reported and
    /// does not affect the session or other subscribers.
    pub fn subscribe(&mut self, subscriber: EventSubscriber<T::Event>) {
        self.subscribers.push(subscriber);
    }

    /// Cancels every provisionally raised event that was not verified yet,
    /// e.g. when the match ends early.
    pub fn cancel_pending_events(&mut self) {
        self.reconciler.cancel_all(&mut self.notifications);
        self.publish_notifications();
    }

    // ==========================================
    // Snapshots and replays
    // ==========================================

    /// The newest instant-replay snapshot at least `back` before the verified tick,
    /// deserialized into a fresh frame.
    ///
    /// Returns `Ok(None)` and emits [`LockstepEvent::SnapshotMissing`] when no
    /// such snapshot is held.
    pub fn instant_replay(&mut self, back: Duration) -> Result<Option<FrameState<T>>, LockstepError> {
        let ticks_back = (u128::from(self.config.simulation_rate) * back.as_micros() / 1_000_000)
            .min(i32::MAX as u128) as i32;
        let requested = Frame::new(self.verified.tick().as_i32().saturating_sub(ticks_back).max(0));
        let (found, oldest) = match self.snapshots.ring(self.snapshots.instant_replay) {
            Some(ring) => (
                ring.find(requested, FindMode::ClosestLessThanOrEqual).cloned(),
                ring.peek_front().map_or(Frame::NULL, |e| e.tick),
            ),
            None => (None, Frame::NULL),
        };
        let Some(entry) = found else {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Capacity,
                "no instant-replay snapshot at or before tick {} (oldest held: {}); increase the instant-replay window or lower its interval",
                requested,
                oldest
            );
            self.push_event(LockstepEvent::SnapshotMissing { requested });
            return Ok(None);
        };
        let mut frame = self.verified.blank_like();
        frame.deserialize(&entry.bytes)?;
        Ok(Some(frame))
    }

    /// Records the session so far as a [`ReplayFile`].
    ///
    /// The replay ends at the verified tick. With `include_terminal_frame` the
    /// verified frame is embedded so a replay can check its final state.
    pub fn export_replay(&self, include_terminal_frame: bool) -> Result<ReplayFile, LockstepError> {
        let mut replay = ReplayFile::new(
            self.config,
            self.runtime_config.clone(),
            self.history.export(self.verified.tick()),
        );
        if replay.terminal_tick != self.verified.tick() {
            return Err(LockstepError::InternalError {
                context: format!(
                    "exported input ends at {} but the verified tick is {}",
                    replay.terminal_tick,
                    self.verified.tick()
                ),
            });
        }
        if include_terminal_frame {
            replay.terminal_frame = Some(self.verified.serialize(SerializeMode::Replay)?);
        }
        if !self.checksums.is_empty() {
            replay.checksums = Some(self.checksums.clone());
        }
        Ok(replay)
    }

    // ==========================================
    // Accessors
    // ==========================================

    /// The session parameters.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tick of the current (possibly predicted) frame.
    #[must_use]
    pub const fn current_frame(&self) -> Frame {
        self.current.tick()
    }

    /// Tick of the last verified frame.
    #[must_use]
    pub const fn verified_frame(&self) -> Frame {
        self.verified.tick()
    }

    /// Number of predicted ticks in the current frame.
    #[must_use]
    pub fn frames_ahead(&self) -> usize {
        (self.current.tick() - self.verified.tick()) as usize
    }

    /// The current frame, for presentation.
    #[must_use]
    pub const fn frame(&self) -> &FrameState<T> {
        &self.current
    }

    /// The last verified frame.
    #[must_use]
    pub const fn verified_state(&self) -> &FrameState<T> {
        &self.verified
    }

    /// Confirmed input received so far.
    #[must_use]
    pub const fn input_history(&self) -> &InputHistory {
        &self.history
    }

    /// Checksums recorded by this session.
    #[must_use]
    pub const fn checksum_log(&self) -> &ChecksumLog {
        &self.checksums
    }

    /// The system scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &SystemScheduler<T> {
        &self.sim.scheduler
    }

    /// How the snapshot rings were laid out.
    #[must_use]
    pub const fn buffer_plan(&self) -> BufferPlan {
        self.snapshots.plan
    }

    /// The ring serving instant replay.
    #[must_use]
    pub fn instant_replay_buffer(&self) -> Option<&SnapshotRingBuffer> {
        self.snapshots.ring(self.snapshots.instant_replay)
    }

    /// The ring serving checksum-history diagnostics.
    #[must_use]
    pub fn checksum_history_buffer(&self) -> Option<&SnapshotRingBuffer> {
        self.snapshots.ring(self.snapshots.checksum_history)
    }

    /// The newest checksum-history snapshot at or before `tick`.
    #[must_use]
    pub fn checksum_history_snapshot(&self, tick: Frame) -> Option<&SnapshotEntry> {
        self.checksum_history_buffer()
            .and_then(|ring| ring.find(tick, FindMode::ClosestLessThanOrEqual))
    }

    /// Opaque game configuration supplied to the builder or read from a replay.
    #[must_use]
    pub fn runtime_config(&self) -> &[u8] {
        &self.runtime_config
    }

    /// Number of provisionally raised events awaiting verification.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.reconciler.pending_len()
    }

    /// Whether this session replays a [`ReplayFile`].
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        self.replay.is_some()
    }

    /// Whether a replay session simulated its terminal tick.
    #[must_use]
    pub fn is_replay_finished(&self) -> bool {
        self.replay.as_ref().is_some_and(|r| r.finished)
    }

    /// The observer violations are reported to, if one was configured.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }
}

impl<T: Config> InvariantChecker for SimulationSession<T> {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.current.tick() < self.verified.tick() {
            return Err(InvariantViolation::new(
                "SimulationSession",
                "current frame is behind the verified frame",
            )
            .with_details(format!(
                "current={}, verified={}",
                self.current.tick(),
                self.verified.tick()
            )));
        }
        if self.frames_ahead() > self.config.max_prediction {
            return Err(InvariantViolation::new(
                "SimulationSession",
                "current frame exceeds the prediction window",
            )
            .with_details(format!(
                "ahead={}, max_prediction={}",
                self.frames_ahead(),
                self.config.max_prediction
            )));
        }
        self.history.check_invariants()?;
        self.checksums.check_invariants()?;
        self.reconciler.check_invariants()?;
        for ring in &self.snapshots.rings {
            ring.buffer.check_invariants()?;
        }
        Ok(())
    }
}

impl<T: Config> std::fmt::Debug for SimulationSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationSession")
            .field("config", &self.config)
            .field("verified", &self.verified.tick())
            .field("current", &self.current.tick())
            .field("checksum_mode", &self.checksum_mode)
            .field("checksums", &self.checksums.len())
            .field("buffer_plan", &self.snapshots.plan)
            .field("pending_events", &self.reconciler.pending_len())
            .field("queued_events", &self.event_queue.len())
            .field("subscribers", &self.subscribers.len())
            .field("has_violation_observer", &self.violation_observer.is_some())
            .field("replay", &self.replay.is_some())
            .finish_non_exhaustive()
    }
}
