//! Recording a session and replaying it.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use fortress_lockstep::{
    Frame, LockstepError, LockstepEvent, PlayerHandle, ReplayFile, SimulationSession,
};

use crate::common::stubs::{positions, StubConfig, StubInput};
use crate::common::{collect_events, run_confirmed, stub_builder, stub_session};

fn script(tick: i32, player: usize) -> StubInput {
    if (tick + player as i32) % 4 == 0 {
        StubInput::firing(-1)
    } else {
        StubInput::moving(1)
    }
}

fn recorded(ticks: i32, input_at: fn(i32, usize) -> StubInput) -> SimulationSession<StubConfig> {
    let mut session = stub_session();
    run_confirmed(&mut session, ticks, input_at);
    session
}

fn replay_to_end(session: &mut SimulationSession<StubConfig>) -> i32 {
    let mut advanced = 0;
    while !session.is_replay_finished() {
        session.advance_frame().unwrap();
        advanced += 1;
    }
    advanced
}

#[test]
fn exported_replay_reproduces_the_session() {
    let live = recorded(12, script);
    let file = live.export_replay(true).unwrap();
    assert_eq!(file.terminal_tick, Frame::new(12));
    assert!(file.terminal_frame.is_some());
    assert_eq!(file.checksums.as_ref(), Some(live.checksum_log()));

    let file = ReplayFile::from_bytes(&file.to_bytes().unwrap()).unwrap();
    let mut replay = stub_builder().start_replay_session(file).unwrap();
    assert!(replay.is_replay());
    assert_eq!(replay.runtime_config(), b"arena");
    assert_eq!(replay_to_end(&mut replay), 12);

    assert_eq!(replay.verified_frame(), Frame::new(12));
    assert_eq!(
        replay.verified_state().checksum().unwrap(),
        live.verified_state().checksum().unwrap()
    );
    assert_eq!(positions(replay.frame()), positions(live.frame()));
    assert_eq!(replay.checksum_log(), live.checksum_log());

    let events = collect_events(&mut replay);
    assert!(events.contains(&LockstepEvent::ReplayFinished {
        frame: Frame::new(12),
    }));
    assert!(events
        .iter()
        .all(|event| !matches!(event, LockstepEvent::ChecksumMismatch { .. })));

    let err = replay.advance_frame().unwrap_err();
    assert!(matches!(err, LockstepError::InvalidRequest { .. }));
}

#[test]
fn replay_sessions_reject_live_input() {
    let file = recorded(3, script).export_replay(false).unwrap();
    let mut replay = stub_builder().start_replay_session(file).unwrap();
    for result in [
        replay.confirm_input(PlayerHandle::new(0), Frame::new(4), &[0, 0]),
        replay.confirm_disconnect(PlayerHandle::new(1), Frame::new(4)),
        replay.confirm_player_data(PlayerHandle::new(0), Frame::new(4), 1, Vec::new()),
    ] {
        assert!(matches!(result, Err(LockstepError::InvalidRequest { .. })));
    }
}

#[test]
fn diverging_terminal_frame_is_reported_when_the_replay_ends() {
    fn diverging(tick: i32, player: usize) -> StubInput {
        if tick == 9 {
            StubInput::moving(5)
        } else {
            script(tick, player)
        }
    }

    let mut file = recorded(12, script).export_replay(false).unwrap();
    let other = recorded(12, diverging).export_replay(true).unwrap();
    file.terminal_frame = other.terminal_frame;
    file.checksums = None;

    let mut replay = stub_builder().start_replay_session(file).unwrap();
    replay_to_end(&mut replay);

    let events = collect_events(&mut replay);
    let mismatch_ticks: Vec<Frame> = events
        .iter()
        .filter_map(|event| match event {
            LockstepEvent::ChecksumMismatch { frame, .. } => Some(*frame),
            _ => None,
        })
        .collect();
    assert_eq!(mismatch_ticks, vec![Frame::new(12)]);
    assert_eq!(
        events.last(),
        Some(&LockstepEvent::ReplayFinished {
            frame: Frame::new(12),
        })
    );
}

#[test]
fn terminal_frame_of_another_tick_is_rejected() {
    let mut file = recorded(12, script).export_replay(false).unwrap();
    file.terminal_frame = recorded(5, script).export_replay(true).unwrap().terminal_frame;
    let err = stub_builder().start_replay_session(file).unwrap_err();
    assert!(matches!(err, LockstepError::Serialization { .. }));
}

#[test]
fn export_ends_at_the_verified_tick() {
    let mut session = stub_session();
    run_confirmed(&mut session, 2, script);
    session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(3), &StubInput::moving(1))
        .unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.current_frame(), Frame::new(3));

    let file = session.export_replay(false).unwrap();
    assert_eq!(file.terminal_tick, Frame::new(2));
    assert_eq!(file.inputs.tick_count(), 2);
}

#[test]
fn empty_replay_finishes_immediately() {
    let file = stub_session().export_replay(true).unwrap();
    assert_eq!(file.terminal_tick, Frame::new(0));

    let mut replay = stub_builder().start_replay_session(file).unwrap();
    assert!(replay.is_replay_finished());
    assert!(collect_events(&mut replay).contains(&LockstepEvent::ReplayFinished {
        frame: Frame::new(0),
    }));
    assert!(matches!(
        replay.advance_frame(),
        Err(LockstepError::InvalidRequest { .. })
    ));
}
