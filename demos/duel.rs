//! # Duel
//!
//! Two fighters trade blows in a headless lockstep session. Player 0 is local
//! and confirms its input immediately; player 1's input arrives a few ticks
//! late, so the session predicts it and re-simulates once it lands.
//!
//! After the match the session is exported as a replay, re-simulated from
//! scratch, and the replay's terminal checksum is compared with the live one.
//!
//! Run with: `cargo run --example duel`

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use fortress_lockstep::{
    ChecksumConfig, Config, EventNotification, FrameState, LockstepError, LockstepEvent,
    PlayerHandle, ReplayFile, SessionBuilder, SessionConfig, Signal, SignalKind, SignalSet,
    SimulationEvent, SimulationSession, System, SystemError, SystemGraph,
};
use serde::{Deserialize, Serialize};

const MATCH_TICKS: i32 = 240;
const REMOTE_DELAY: i32 = 3;
const START_HEALTH: i32 = 100;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct DuelInput {
    attack: bool,
    block: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Arena {
    health: [i32; 2],
    winner: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum DuelEvent {
    Hit { attacker: usize, damage: u32 },
    Knockout { winner: usize },
}

impl SimulationEvent for DuelEvent {
    fn event_type(&self) -> u32 {
        match self {
            Self::Hit { .. } => 1,
            Self::Knockout { .. } => 2,
        }
    }

    fn is_synced(&self) -> bool {
        matches!(self, Self::Knockout { .. })
    }
}

#[derive(Debug)]
struct DuelConfig;

impl Config for DuelConfig {
    type Input = DuelInput;
    type Globals = Arena;
    type PlayerData = ();
    type Event = DuelEvent;
}

/// Resolves both fighters' attacks against the other's block.
struct CombatSystem;

impl System<DuelConfig> for CombatSystem {
    fn name(&self) -> &str {
        "combat"
    }

    fn signals(&self) -> SignalSet {
        SignalSet::EMPTY.with(SignalKind::GameStarted)
    }

    fn on_signal(&self, _signal: &Signal, frame: &mut FrameState<DuelConfig>) -> Result<(), SystemError> {
        frame.globals_mut().health = [START_HEALTH; 2];
        Ok(())
    }

    fn update(&self, frame: &mut FrameState<DuelConfig>) -> Result<(), SystemError> {
        if frame.globals().winner.is_some() {
            return Ok(());
        }
        let inputs: Vec<DuelInput> = frame.inputs().to_vec();
        for attacker in 0..2 {
            let defender = 1 - attacker;
            if !inputs[attacker].attack || inputs[defender].block {
                continue;
            }
            let damage = 1 + frame.rng_mut().next_u32() % 6;
            frame.globals_mut().health[defender] -= damage as i32;
            frame.raise_event(DuelEvent::Hit { attacker, damage });
        }
        let arena = frame.globals();
        let standing: Vec<usize> = (0..2).filter(|&p| arena.health[p] > 0).collect();
        if let [winner] = standing[..] {
            frame.globals_mut().winner = Some(winner);
            frame.raise_event(DuelEvent::Knockout { winner });
        }
        Ok(())
    }
}

/// Deterministic stand-in for a fighter's controller.
fn input_for(player: usize, tick: i32) -> DuelInput {
    let phase = tick + player as i32 * 7;
    DuelInput {
        attack: phase % 3 == 0,
        block: phase % 5 == 0,
    }
}

fn builder() -> Result<SessionBuilder<DuelConfig>, LockstepError> {
    let mut systems = SystemGraph::new();
    systems.add_root(CombatSystem)?;
    Ok(SessionBuilder::<DuelConfig>::new()
        .with_session_config(SessionConfig {
            player_count: 2,
            simulation_rate: 60,
            seed: 0xd0e1,
            max_prediction: 8,
        })?
        .with_checksum_config(ChecksumConfig::record(10))?
        .with_systems(systems)
        .with_runtime_config(b"duel-arena".to_vec()))
}

fn report(session: &mut SimulationSession<DuelConfig>) {
    for event in session.events() {
        match event {
            LockstepEvent::Simulation(EventNotification::Confirmed { tick, event }) => {
                tracing::debug!(%tick, ?event, "confirmed");
            },
            LockstepEvent::Simulation(EventNotification::Raised { tick, event }) => {
                if let DuelEvent::Knockout { winner } = event {
                    tracing::info!(%tick, winner, "knockout");
                }
            },
            LockstepEvent::Simulation(EventNotification::Canceled { tick, event }) => {
                tracing::info!(%tick, ?event, "mispredicted event canceled");
            },
            other => tracing::warn!(?other, "session event"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::INFO)
            .finish(),
    )
    .expect("setting up tracing subscriber failed");

    let local = PlayerHandle::new(0);
    let remote = PlayerHandle::new(1);
    let mut session = builder()?.start_session()?;

    for tick in 1..=MATCH_TICKS {
        session.confirm_input_value(local, tick.into(), &input_for(0, tick))?;
        let late = tick - REMOTE_DELAY;
        if late >= 1 {
            session.confirm_input_value(remote, late.into(), &input_for(1, late))?;
        }
        session.advance_frame()?;
        report(&mut session);
    }
    for late in (MATCH_TICKS - REMOTE_DELAY + 1)..=MATCH_TICKS {
        session.confirm_input_value(remote, late.into(), &input_for(1, late))?;
    }
    session.advance_frame()?;
    report(&mut session);

    let arena = session.verified_state().globals();
    tracing::info!(
        verified = %session.verified_frame(),
        health = ?arena.health,
        winner = ?arena.winner,
        "match over"
    );
    let live_checksum = session.verified_state().checksum()?;

    let replay = session.export_replay(true)?;
    let bytes = replay.to_bytes()?;
    tracing::info!(bytes = bytes.len(), "replay exported");

    let mut replay_session = builder()?.start_replay_session(ReplayFile::from_bytes(&bytes)?)?;
    while !replay_session.is_replay_finished() {
        replay_session.advance_frame()?;
        report(&mut replay_session);
    }
    let replay_checksum = replay_session.verified_state().checksum()?;
    if replay_checksum != live_checksum {
        return Err(format!("replay diverged: {replay_checksum:#x} != {live_checksum:#x}").into());
    }
    println!("replay reproduced checksum {live_checksum:#x}");
    Ok(())
}
