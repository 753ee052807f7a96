//! Checksum recording and verification of verified ticks.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use fortress_lockstep::telemetry::{CollectingObserver, ViolationKind};
use fortress_lockstep::{
    ChecksumConfig, ChecksumLog, ChecksumMode, ChecksumVerification, Frame, LockstepError,
    LockstepEvent, SamplingConfig, SerializeMode, SnapshotConfig,
};

use crate::common::stubs::StubInput;
use crate::common::{collect_events, run_confirmed, stub_builder, stub_session};

fn script(tick: i32, player: usize) -> StubInput {
    let direction: i8 = if player == 0 { 1 } else { -2 };
    StubInput::moving(direction * (tick % 3) as i8)
}

fn diverging(tick: i32, player: usize) -> StubInput {
    if tick == 7 && player == 0 {
        StubInput::moving(3)
    } else {
        script(tick, player)
    }
}

fn recorded_log(ticks: i32) -> ChecksumLog {
    let mut session = stub_session();
    run_confirmed(&mut session, ticks, script);
    session.checksum_log().clone()
}

#[test]
fn record_mode_samples_every_interval_from_tick_zero() {
    let log = recorded_log(12);
    assert_eq!(log.interval(), 5);
    let ticks: Vec<Frame> = log.entries().iter().map(|e| e.tick).collect();
    assert_eq!(ticks, vec![Frame::new(0), Frame::new(5), Frame::new(10)]);
}

#[test]
fn off_mode_records_nothing() {
    let mut session = stub_builder()
        .with_checksum_config(ChecksumConfig::off())
        .unwrap()
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 12, script);
    assert!(session.checksum_log().is_empty());
}

#[test]
fn verify_mode_accepts_an_identical_run() {
    let reference = recorded_log(20);
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_checksum_config(ChecksumConfig::verify(reference.clone()))
        .unwrap()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 20, script);

    assert_eq!(session.checksum_log(), &reference);
    assert!(!observer.has_violation(ViolationKind::Determinism));
    assert!(collect_events(&mut session)
        .iter()
        .all(|event| !matches!(event, LockstepEvent::ChecksumMismatch { .. })));
}

#[test]
fn verify_mode_reports_divergence_with_both_snapshots() {
    let reference = recorded_log(20);
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_checksum_config(ChecksumConfig::verify(reference.clone()))
        .unwrap()
        .with_snapshot_config(SnapshotConfig {
            instant_replay: None,
            checksum_history: Some(SamplingConfig::new(5, Duration::from_secs(1))),
        })
        .unwrap()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 20, diverging);

    let mismatches: Vec<_> = collect_events(&mut session)
        .into_iter()
        .filter_map(|event| match event {
            LockstepEvent::ChecksumMismatch {
                frame,
                expected,
                actual,
                local_snapshot,
                previous_snapshot,
            } => Some((frame, expected, actual, local_snapshot, previous_snapshot)),
            _ => None,
        })
        .collect();
    let ticks: Vec<Frame> = mismatches.iter().map(|m| m.0).collect();
    assert_eq!(ticks, vec![Frame::new(10), Frame::new(15), Frame::new(20)]);

    let (frame, expected, actual, local, previous) = mismatches[0].clone();
    assert_eq!(expected, reference.recorded(frame).unwrap().checksum);
    assert_ne!(expected, actual);

    let mut decoded = session.verified_state().clone();
    assert_eq!(decoded.deserialize(&local).unwrap(), SerializeMode::Snapshot);
    assert_eq!(decoded.tick(), Frame::new(10));
    assert_eq!(decoded.checksum().unwrap(), actual);

    let previous = previous.expect("last known-good snapshot");
    assert_eq!(previous.tick, Frame::new(5));
    decoded.deserialize(&previous.bytes).unwrap();
    assert!(matches!(
        reference.verify(Frame::new(5), decoded.checksum().unwrap()),
        ChecksumVerification::Match
    ));

    assert_eq!(observer.violations_of_kind(ViolationKind::Determinism).len(), 3);
}

#[test]
fn verify_mode_requires_the_reference_interval() {
    let config = ChecksumConfig {
        interval: 3,
        mode: ChecksumMode::Verify(recorded_log(5)),
    };
    let err = stub_builder().with_checksum_config(config).unwrap_err();
    assert!(matches!(err, LockstepError::InvalidRequest { .. }));
}

#[test]
fn misaligned_reference_log_is_reported_as_divergence() {
    // Index 1 should hold tick 5 but holds tick 6.
    let mut json = serde_json::to_value(recorded_log(12)).unwrap();
    json["entries"][1]["tick"] = serde_json::json!(6);
    let reference: ChecksumLog = serde_json::from_value(json).unwrap();
    assert!(matches!(
        reference.verify(Frame::new(5), 0),
        ChecksumVerification::TickMismatch { recorded, .. } if recorded == Frame::new(6)
    ));

    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_checksum_config(ChecksumConfig::verify(reference))
        .unwrap()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 6, script);

    let divergences = observer.violations_of_kind(ViolationKind::Determinism);
    assert!(divergences
        .iter()
        .any(|v| v.message.contains("tick 5 holds tick 6")));
    // Nothing was compared, so no mismatch event carries snapshots.
    assert!(collect_events(&mut session)
        .iter()
        .all(|event| !matches!(event, LockstepEvent::ChecksumMismatch { .. })));
}
