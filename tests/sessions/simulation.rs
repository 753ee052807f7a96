//! Advancing a live session: verification, prediction, and correction.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fortress_lockstep::telemetry::InvariantChecker;
use fortress_lockstep::{
    BlankPrediction, Frame, LockstepError, PlayerHandle, SerialRunner, SessionConfig, TaskGraph,
    TaskHandle, TaskRunner,
};

use crate::common::stubs::{player_data, positions, StubInput, StubPlayerData};
use crate::common::{confirm_all, confirm_tick, run_confirmed, stub_builder, stub_session};

// ==========================================
// Start
// ==========================================

#[test]
fn session_starts_at_tick_zero_with_spawned_players() {
    let session = stub_session();
    assert_eq!(session.verified_frame(), Frame::new(0));
    assert_eq!(session.current_frame(), Frame::new(0));
    assert_eq!(session.frames_ahead(), 0);
    assert_eq!(positions(session.frame()), vec![0, 0]);
    assert_eq!(session.frame().globals().ticks, 0);
    assert_eq!(session.runtime_config(), b"arena");
    assert!(session.verified_state().is_verified());
}

#[test]
fn identical_seeds_start_identical_frames() {
    let a = stub_session();
    let b = stub_session();
    assert_eq!(
        a.verified_state().checksum().unwrap(),
        b.verified_state().checksum().unwrap()
    );
}

// ==========================================
// Confirmed input
// ==========================================

#[test]
fn confirmed_input_is_simulated_on_verified_ticks() {
    let mut session = stub_session();
    run_confirmed(&mut session, 5, |_, player| {
        StubInput::moving(if player == 0 { 1 } else { -1 })
    });

    assert_eq!(session.verified_frame(), Frame::new(5));
    assert_eq!(session.current_frame(), Frame::new(5));
    assert_eq!(positions(session.frame()), vec![5, -5]);
    assert_eq!(session.frame().globals().ticks, 5);
    assert_eq!(session.frame().globals().position_sum, 0);
    assert!(!session.frame().is_input_predicted(PlayerHandle::new(0)));
    session.check_invariants().unwrap();
}

#[test]
fn input_for_one_player_does_not_complete_the_tick() {
    let mut session = stub_session();
    session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(1), &StubInput::moving(3))
        .unwrap();
    assert!(!session.input_history().can_simulate(Frame::new(1)));

    assert_eq!(session.advance_frame().unwrap(), Frame::new(1));
    assert_eq!(session.verified_frame(), Frame::new(0));
    assert!(!session.frame().is_input_predicted(PlayerHandle::new(0)));
    assert!(session.frame().is_input_predicted(PlayerHandle::new(1)));
    assert_eq!(positions(session.frame()), vec![3, 0]);

    session
        .confirm_input_value(PlayerHandle::new(1), Frame::new(1), &StubInput::moving(2))
        .unwrap();
    assert!(session.input_history().can_simulate(Frame::new(1)));
    assert_eq!(session.advance_frame().unwrap(), Frame::new(2));
    assert_eq!(session.verified_frame(), Frame::new(1));
}

#[test]
fn confirming_tick_zero_is_rejected() {
    let mut session = stub_session();
    let err = session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(0), &StubInput::default())
        .unwrap_err();
    assert!(matches!(err, LockstepError::InvalidFrame { .. }));
}

#[test]
fn unknown_player_is_rejected() {
    let mut session = stub_session();
    let err = session
        .confirm_input_value(PlayerHandle::new(9), Frame::new(1), &StubInput::default())
        .unwrap_err();
    assert!(matches!(err, LockstepError::InvalidPlayerHandle { .. }));
}

// ==========================================
// Prediction
// ==========================================

#[test]
fn prediction_stops_at_the_threshold_without_changing_state() {
    let mut session = stub_session();
    for expected in 1..=4 {
        assert_eq!(session.advance_frame().unwrap(), Frame::new(expected));
    }
    assert_eq!(session.frames_ahead(), 4);
    let before = session.frame().checksum().unwrap();

    let err = session.advance_frame().unwrap_err();
    assert!(matches!(err, LockstepError::PredictionThreshold));
    assert_eq!(session.current_frame(), Frame::new(4));
    assert_eq!(session.verified_frame(), Frame::new(0));
    assert_eq!(session.frame().checksum().unwrap(), before);

    confirm_all(&mut session, 1, StubInput::default());
    assert_eq!(session.advance_frame().unwrap(), Frame::new(5));
    assert_eq!(session.verified_frame(), Frame::new(1));
}

#[test]
fn single_player_sessions_never_predict() {
    let mut session = stub_builder()
        .with_session_config(SessionConfig::single_player())
        .unwrap()
        .start_session()
        .unwrap();
    assert!(matches!(
        session.advance_frame(),
        Err(LockstepError::PredictionThreshold)
    ));
    confirm_all(&mut session, 1, StubInput::moving(2));
    assert_eq!(session.advance_frame().unwrap(), Frame::new(1));
    assert_eq!(positions(session.frame()), vec![2]);
}

#[test]
fn late_input_corrects_a_misprediction() {
    let mut session = stub_session();
    run_confirmed(&mut session, 1, |_, _| StubInput::moving(1));

    // Repeat-last prediction keeps both players moving right.
    session.advance_frame().unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.current_frame(), Frame::new(3));
    assert_eq!(positions(session.frame()), vec![3, 3]);

    // Player 1 actually turned around at tick 2.
    for tick in 2..=3 {
        confirm_tick(&mut session, tick, &[StubInput::moving(1), StubInput::moving(-1)]);
    }
    assert_eq!(session.advance_frame().unwrap(), Frame::new(4));
    assert_eq!(session.verified_frame(), Frame::new(3));
    assert_eq!(positions(session.verified_state()), vec![3, -1]);
    assert_eq!(positions(session.frame()), vec![4, -2]);
}

#[test]
fn blank_prediction_strategy_predicts_idle_input() {
    let mut session = stub_builder()
        .with_prediction_strategy(BlankPrediction)
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 1, |_, _| StubInput::moving(5));
    session.advance_frame().unwrap();
    assert_eq!(positions(session.verified_state()), vec![5, 5]);
    assert_eq!(positions(session.frame()), vec![5, 5]);
}

#[test]
fn predicted_frames_do_not_touch_the_verified_frame() {
    let mut session = stub_session();
    run_confirmed(&mut session, 2, |_, _| StubInput::moving(1));
    let verified = session.verified_state().checksum().unwrap();
    session.advance_frame().unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.verified_state().checksum().unwrap(), verified);
    assert!(!session.frame().is_verified());
}

// ==========================================
// Commands and signals
// ==========================================

#[test]
fn player_data_command_binds_player_and_signals_systems() {
    let mut session = stub_session();
    let data = StubPlayerData {
        team: 2,
        name: "ada".to_owned(),
    };
    session
        .confirm_player_data(
            PlayerHandle::new(0),
            Frame::new(1),
            7,
            fortress_lockstep::codec::encode(&data).unwrap(),
        )
        .unwrap();
    session
        .confirm_input_value(PlayerHandle::new(1), Frame::new(1), &StubInput::moving(1))
        .unwrap();
    session.advance_frame().unwrap();

    let frame = session.verified_state();
    let runtime = frame.player(PlayerHandle::new(0)).unwrap();
    assert_eq!(runtime.actor_id(), 7);
    assert_eq!(player_data(frame, 0), Some(data));
    assert_eq!(player_data(frame, 1), None);
    assert_eq!(frame.globals().joined, vec![0]);
    // The command tick carries no gameplay input for its player.
    assert_eq!(positions(frame), vec![0, 1]);
}

#[test]
fn disconnect_signals_systems_once_verified() {
    let mut session = stub_session();
    confirm_all(&mut session, 1, StubInput::default());
    session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(2), &StubInput::default())
        .unwrap();
    session
        .confirm_disconnect(PlayerHandle::new(1), Frame::new(2))
        .unwrap();

    session.advance_frame().unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.verified_frame(), Frame::new(2));
    assert_eq!(session.verified_state().globals().left, vec![1]);
}

#[test]
fn session_is_deterministic_across_instances() {
    let mut a = stub_session();
    let mut b = stub_session();
    let script = |tick: i32, player: usize| {
        if (tick + player as i32) % 3 == 0 {
            StubInput::firing(-1)
        } else {
            StubInput::moving(2)
        }
    };
    run_confirmed(&mut a, 30, script);
    run_confirmed(&mut b, 30, script);
    assert_eq!(a.checksum_log(), b.checksum_log());
    assert_eq!(
        a.verified_state().checksum().unwrap(),
        b.verified_state().checksum().unwrap()
    );
    assert_eq!(a.frame().globals(), b.frame().globals());
}

/// Serial order, counting how many task graphs it was handed.
struct CountingRunner {
    inner: SerialRunner,
    graphs: Arc<AtomicUsize>,
}

impl TaskRunner for CountingRunner {
    fn schedule(&mut self, tasks: &TaskGraph) {
        self.graphs.fetch_add(1, Ordering::Relaxed);
        self.inner.schedule(tasks);
    }

    fn poll(&mut self) -> Option<TaskHandle> {
        self.inner.poll()
    }
}

#[test]
fn builder_task_runner_drives_every_tick() {
    let graphs = Arc::new(AtomicUsize::new(0));
    let mut custom = stub_builder()
        .with_task_runner(CountingRunner {
            inner: SerialRunner::new(),
            graphs: graphs.clone(),
        })
        .start_session()
        .unwrap();
    let mut serial = stub_session();
    run_confirmed(&mut custom, 12, |tick, _| StubInput::moving((tick % 4) as i8));
    run_confirmed(&mut serial, 12, |tick, _| StubInput::moving((tick % 4) as i8));

    assert!(graphs.load(Ordering::Relaxed) >= 12);
    assert_eq!(
        custom.verified_state().checksum().unwrap(),
        serial.verified_state().checksum().unwrap()
    );
}
