//! Contained faults: failing systems and undecodable input.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use fortress_lockstep::telemetry::{CollectingObserver, ViolationKind};
use fortress_lockstep::{Frame, InvalidFrameReason, LockstepError, LockstepEvent, PlayerHandle};

use crate::common::stubs::{positions, stub_systems, FaultySystem, StubInput};
use crate::common::{
    collect_events, confirm_all, confirm_tick, run_confirmed, stub_builder, stub_session,
};

#[test]
fn failing_system_is_reported_and_the_tick_continues() {
    for panic in [false, true] {
        let observer = Arc::new(CollectingObserver::new());
        let mut systems = stub_systems();
        systems
            .add_root(FaultySystem { fail_at: 2, panic })
            .unwrap();
        let mut session = stub_builder()
            .with_systems(systems)
            .with_violation_observer(observer.clone())
            .start_session()
            .unwrap();

        run_confirmed(&mut session, 3, |_, _| StubInput::moving(1));

        assert_eq!(positions(session.frame()), vec![3, 3]);
        assert_eq!(session.frame().globals().ticks, 3);
        let faults: Vec<_> = collect_events(&mut session)
            .into_iter()
            .filter_map(|event| match event {
                LockstepEvent::SystemFault(fault) => Some(fault),
                _ => None,
            })
            .collect();
        assert_eq!(faults.len(), 1, "panic={panic}");
        assert_eq!(faults[0].name, "faulty");
        assert_eq!(faults[0].tick, Frame::new(2));
        assert_eq!(faults[0].panicked, panic);
        let reported = observer.violations_of_kind(ViolationKind::SystemFault);
        assert!(!reported.is_empty());
        assert_eq!(reported[0].frame, Some(Frame::new(2)));
        assert_eq!(reported[0].context["system"], "faulty");
        assert_eq!(reported[0].context["panicked"], panic.to_string());
    }
}

#[test]
fn faults_on_predicted_ticks_are_not_queued_as_events() {
    let observer = Arc::new(CollectingObserver::new());
    let mut systems = stub_systems();
    systems
        .add_root(FaultySystem {
            fail_at: 1,
            panic: false,
        })
        .unwrap();
    let mut session = stub_builder()
        .with_systems(systems)
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();

    session.advance_frame().unwrap();
    assert!(observer.has_violation(ViolationKind::SystemFault));
    assert!(collect_events(&mut session)
        .iter()
        .all(|event| !matches!(event, LockstepEvent::SystemFault(_))));

    // Once tick 1 is verified the fault becomes an event.
    confirm_all(&mut session, 1, StubInput::default());
    assert_eq!(session.advance_frame().unwrap(), Frame::new(2));
    assert_eq!(session.verified_frame(), Frame::new(1));
    let faults = collect_events(&mut session)
        .into_iter()
        .filter(|event| matches!(event, LockstepEvent::SystemFault(_)))
        .count();
    assert_eq!(faults, 1);
}

#[test]
fn undecodable_input_is_replaced_with_the_default() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();

    session
        .confirm_input(PlayerHandle::new(0), Frame::new(1), &[0x01])
        .unwrap();
    session
        .confirm_input_value(PlayerHandle::new(1), Frame::new(1), &StubInput::moving(4))
        .unwrap();
    assert_eq!(session.advance_frame().unwrap(), Frame::new(1));

    assert_eq!(positions(session.verified_state()), vec![0, 4]);
    let replaced: Vec<_> = collect_events(&mut session)
        .into_iter()
        .filter_map(|event| match event {
            LockstepEvent::InputReplaced { frame, player, .. } => Some((frame, player)),
            _ => None,
        })
        .collect();
    assert_eq!(replaced, vec![(Frame::new(1), PlayerHandle::new(0))]);
    assert!(observer.has_violation(ViolationKind::InputFault));
}

#[test]
fn malformed_player_data_command_is_replaced() {
    let mut session = stub_session();
    session
        .confirm_player_data(PlayerHandle::new(1), Frame::new(1), 3, vec![0xff, 0xff, 0xff])
        .unwrap();
    session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(1), &StubInput::default())
        .unwrap();
    session.advance_frame().unwrap();

    assert!(session.verified_state().player(PlayerHandle::new(1)).is_none());
    assert!(session.verified_state().globals().joined.is_empty());
    let reasons: Vec<String> = collect_events(&mut session)
        .into_iter()
        .filter_map(|event| match event {
            LockstepEvent::InputReplaced { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("player data"), "{}", reasons[0]);
}

#[test]
fn conflicting_reconfirmation_keeps_the_first_input() {
    let mut session = stub_session();
    confirm_tick(&mut session, 1, &[StubInput::moving(1), StubInput::moving(1)]);
    session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(1), &StubInput::moving(9))
        .unwrap();
    session.advance_frame().unwrap();
    assert_eq!(positions(session.verified_state()), vec![1, 1]);
}

#[test]
fn far_future_input_is_rejected_and_reported() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    let capacity = session.input_history().capacity_ticks();

    let err = session
        .confirm_input_value(PlayerHandle::new(0), Frame::new(20_000_000), &StubInput::moving(1))
        .unwrap_err();
    assert!(matches!(
        err,
        LockstepError::InvalidFrame {
            reason: InvalidFrameReason::BeyondHorizon { .. },
            ..
        }
    ));
    assert_eq!(session.input_history().capacity_ticks(), capacity);
    assert!(observer.has_violation(ViolationKind::InputFault));

    // The session keeps running on ordinary input.
    run_confirmed(&mut session, 2, |_, _| StubInput::moving(1));
    assert_eq!(session.verified_frame(), Frame::new(2));
}

#[test]
fn undecodable_input_on_a_predicted_tick_is_reported() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();

    session
        .confirm_input(PlayerHandle::new(0), Frame::new(1), &[0x01])
        .unwrap();
    assert_eq!(session.advance_frame().unwrap(), Frame::new(1));
    assert_eq!(session.verified_frame(), Frame::new(0));

    let faults = observer.violations_of_kind(ViolationKind::InputFault);
    assert!(faults.iter().any(|v| v.message.contains("predicted tick 1")));
    assert!(collect_events(&mut session)
        .iter()
        .all(|event| !matches!(event, LockstepEvent::InputReplaced { .. })));
}
