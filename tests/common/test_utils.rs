//! Session builders and input helpers shared by the integration tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    dead_code
)]

use fortress_lockstep::{
    ChecksumConfig, Frame, LockstepEvent, PlayerHandle, SessionBuilder, SessionConfig,
    SimulationSession,
};

use super::stubs::{stub_schema, stub_systems, StubConfig, StubEvent, StubInput};

pub const PLAYERS: usize = 2;

/// A two-player builder with the stub systems, checksums every 5 ticks, and
/// a prediction window of 4.
#[must_use]
pub fn stub_builder() -> SessionBuilder<StubConfig> {
    SessionBuilder::<StubConfig>::new()
        .with_session_config(SessionConfig {
            player_count: PLAYERS,
            simulation_rate: 60,
            seed: 0x5eed,
            max_prediction: 4,
        })
        .unwrap()
        .with_checksum_config(ChecksumConfig::record(5))
        .unwrap()
        .with_schema(stub_schema())
        .with_systems(stub_systems())
        .with_runtime_config(b"arena".to_vec())
}

#[must_use]
pub fn stub_session() -> SimulationSession<StubConfig> {
    stub_builder().start_session().unwrap()
}

/// Confirms `inputs[player]` for every player at `tick`.
pub fn confirm_tick(session: &mut SimulationSession<StubConfig>, tick: i32, inputs: &[StubInput]) {
    for (player, input) in inputs.iter().enumerate() {
        session
            .confirm_input_value(PlayerHandle::new(player), Frame::new(tick), input)
            .unwrap();
    }
}

/// Confirms the same input for every player at `tick`.
pub fn confirm_all(session: &mut SimulationSession<StubConfig>, tick: i32, input: StubInput) {
    let inputs = vec![input; session.config().player_count];
    confirm_tick(session, tick, &inputs);
}

/// Confirms `input_at(tick, player)` for ticks `1..=ticks` and advances after each.
pub fn run_confirmed(
    session: &mut SimulationSession<StubConfig>,
    ticks: i32,
    input_at: impl Fn(i32, usize) -> StubInput,
) {
    for tick in 1..=ticks {
        let inputs: Vec<StubInput> = (0..session.config().player_count)
            .map(|player| input_at(tick, player))
            .collect();
        confirm_tick(session, tick, &inputs);
        assert_eq!(session.advance_frame().unwrap(), Frame::new(tick));
    }
}

/// Drains the session's event queue.
#[must_use]
pub fn collect_events(session: &mut SimulationSession<StubConfig>) -> Vec<LockstepEvent<StubEvent>> {
    session.events().collect()
}
