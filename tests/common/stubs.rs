//! A tiny deterministic game used by the integration tests.
//!
//! Every player owns one entity with a [`Position`]. Systems move the
//! entities by the players' inputs, roll the frame RNG, raise events, and
//! track the roster through signals.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    dead_code
)]

use std::sync::Arc;

use fortress_lockstep::{
    ComponentSchema, Config, Entity, FrameState, PlayerHandle, Signal, SignalKind, SignalSet,
    SimulationEvent, System, SystemError, SystemGraph, SystemKind,
};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubInput {
    pub dx: i8,
    pub fire: bool,
}

impl StubInput {
    #[must_use]
    pub const fn moving(dx: i8) -> Self {
        Self { dx, fire: false }
    }

    #[must_use]
    pub const fn firing(dx: i8) -> Self {
        Self { dx, fire: true }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubGlobals {
    pub ticks: u32,
    pub position_sum: i64,
    pub rolls: u64,
    pub joined: Vec<usize>,
    pub left: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubPlayerData {
    pub team: u8,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StubEvent {
    Shot { player: usize },
    Milestone { ticks: u32 },
}

pub const SHOT_EVENT: u32 = 1;
pub const MILESTONE_EVENT: u32 = 2;
pub const MILESTONE_EVERY: u32 = 10;

impl SimulationEvent for StubEvent {
    fn event_type(&self) -> u32 {
        match self {
            Self::Shot { .. } => SHOT_EVENT,
            Self::Milestone { .. } => MILESTONE_EVENT,
        }
    }

    fn is_synced(&self) -> bool {
        matches!(self, Self::Milestone { .. })
    }
}

#[derive(Debug)]
pub struct StubConfig;

impl Config for StubConfig {
    type Input = StubInput;
    type Globals = StubGlobals;
    type PlayerData = StubPlayerData;
    type Event = StubEvent;
}

fn system_error(err: impl std::fmt::Display) -> SystemError {
    SystemError::new(err.to_string())
}

fn player_entities(frame: &FrameState<StubConfig>) -> Vec<Entity> {
    frame.entities().entities_with::<Position>().collect()
}

/// Creates one entity per player when the game starts.
pub struct SpawnSystem;

impl System<StubConfig> for SpawnSystem {
    fn name(&self) -> &str {
        "spawn"
    }

    fn signals(&self) -> SignalSet {
        SignalSet::EMPTY.with(SignalKind::GameStarted)
    }

    fn on_signal(&self, _signal: &Signal, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        for _ in 0..frame.player_count() {
            let entity = frame.entities_mut().create().map_err(system_error)?;
            frame
                .entities_mut()
                .set(entity, &Position::default())
                .map_err(system_error)?;
        }
        Ok(())
    }
}

pub struct GameplayGroup;

impl System<StubConfig> for GameplayGroup {
    fn name(&self) -> &str {
        "gameplay"
    }

    fn kind(&self) -> SystemKind {
        SystemKind::Group
    }
}

/// Moves each player's entity by its input.
pub struct MovementSystem;

impl System<StubConfig> for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn update(&self, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        let inputs = frame.inputs().to_vec();
        let mut moved = 0_i64;
        for (entity, input) in player_entities(frame).into_iter().zip(inputs) {
            let mut position: Position = frame
                .entities()
                .get(entity)
                .map_err(system_error)?
                .unwrap_or_default();
            position.x += i32::from(input.dx);
            moved += i64::from(input.dx);
            frame.entities_mut().set(entity, &position).map_err(system_error)?;
        }
        frame.globals_mut().position_sum += moved;
        Ok(())
    }
}

/// Rolls the frame RNG every tick and raises a synced milestone event.
pub struct DiceSystem;

impl System<StubConfig> for DiceSystem {
    fn name(&self) -> &str {
        "dice"
    }

    fn update(&self, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        let roll = frame.rng_mut().next_u32();
        let globals = frame.globals_mut();
        globals.ticks += 1;
        globals.rolls = globals.rolls.wrapping_mul(31).wrapping_add(u64::from(roll));
        let ticks = globals.ticks;
        if ticks % MILESTONE_EVERY == 0 {
            frame.raise_event(StubEvent::Milestone { ticks });
        }
        Ok(())
    }
}

/// Raises a shot event for every player holding fire.
pub struct ShooterSystem;

impl System<StubConfig> for ShooterSystem {
    fn name(&self) -> &str {
        "shooter"
    }

    fn update(&self, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        let shooters: Vec<usize> = frame
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, input)| input.fire)
            .map(|(player, _)| player)
            .collect();
        for player in shooters {
            frame.raise_event(StubEvent::Shot { player });
        }
        Ok(())
    }
}

/// Tracks joins and disconnects in the globals.
pub struct RosterSystem;

impl System<StubConfig> for RosterSystem {
    fn name(&self) -> &str {
        "roster"
    }

    fn signals(&self) -> SignalSet {
        SignalSet::EMPTY
            .with(SignalKind::PlayerDataSet)
            .with(SignalKind::PlayerDisconnected)
    }

    fn on_signal(&self, signal: &Signal, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        match *signal {
            Signal::PlayerDataSet { player } => frame.globals_mut().joined.push(player.as_usize()),
            Signal::PlayerDisconnected { player } => frame.globals_mut().left.push(player.as_usize()),
            Signal::GameStarted => {},
        }
        Ok(())
    }
}

/// Fails (or panics) when it runs against `fail_at`.
pub struct FaultySystem {
    pub fail_at: i32,
    pub panic: bool,
}

impl System<StubConfig> for FaultySystem {
    fn name(&self) -> &str {
        "faulty"
    }

    fn update(&self, frame: &mut FrameState<StubConfig>) -> Result<(), SystemError> {
        if frame.tick().as_i32() != self.fail_at {
            return Ok(());
        }
        if self.panic {
            panic!("faulty system exploded at tick {}", self.fail_at);
        }
        Err(SystemError::new("faulty system refused to run"))
    }
}

/// Schema registering [`Position`].
#[must_use]
pub fn stub_schema() -> Arc<ComponentSchema> {
    ComponentSchema::builder(1)
        .register::<Position>("position")
        .unwrap()
        .build()
}

/// `spawn`, `roster`, and a `gameplay` group of `movement`, `dice`, `shooter`.
#[must_use]
pub fn stub_systems() -> SystemGraph<StubConfig> {
    let mut graph = SystemGraph::new();
    graph.add_root(SpawnSystem).unwrap();
    graph.add_root(RosterSystem).unwrap();
    let gameplay = graph.add_root(GameplayGroup).unwrap();
    graph.add_child(gameplay, MovementSystem).unwrap();
    graph.add_child(gameplay, DiceSystem).unwrap();
    graph.add_child(gameplay, ShooterSystem).unwrap();
    graph
}

/// Positions of every player's entity, in player order.
#[must_use]
pub fn positions(frame: &FrameState<StubConfig>) -> Vec<i32> {
    player_entities(frame)
        .into_iter()
        .map(|entity| frame.entities().get::<Position>(entity).unwrap().unwrap().x)
        .collect()
}

/// Runtime data of `player`, if set.
#[must_use]
pub fn player_data(frame: &FrameState<StubConfig>, player: usize) -> Option<StubPlayerData> {
    frame
        .player(PlayerHandle::new(player))
        .map(|runtime| runtime.data().clone())
}
