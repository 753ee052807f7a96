//! Snapshot rings: layout, instant replay, and checksum history.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use fortress_lockstep::snapshot::{BufferPlan, RingSpec};
use fortress_lockstep::telemetry::{CollectingObserver, ViolationKind};
use fortress_lockstep::{Frame, LockstepEvent, SamplingConfig, SnapshotConfig};

use crate::common::stubs::{positions, StubInput};
use crate::common::{collect_events, run_confirmed, stub_builder, stub_session};

fn every_ten_for_two_seconds() -> SnapshotConfig {
    SnapshotConfig {
        instant_replay: Some(SamplingConfig::new(10, Duration::from_secs(2))),
        checksum_history: None,
    }
}

#[test]
fn default_config_keeps_only_an_instant_replay_ring() {
    let session = stub_session();
    assert_eq!(
        session.buffer_plan(),
        BufferPlan::Separate {
            checksum_history: None,
            instant_replay: Some(RingSpec {
                interval: 60,
                capacity: 11,
            }),
        }
    );
    assert!(session.instant_replay_buffer().is_some());
    assert!(session.checksum_history_buffer().is_none());
}

#[test]
fn diagnostics_config_shares_one_ring() {
    let session = stub_builder()
        .with_snapshot_config(SnapshotConfig::diagnostics())
        .unwrap()
        .start_session()
        .unwrap();
    assert_eq!(
        session.buffer_plan(),
        BufferPlan::Shared(RingSpec {
            interval: 30,
            capacity: 21,
        })
    );
    let replay = session.instant_replay_buffer().unwrap();
    let history = session.checksum_history_buffer().unwrap();
    assert!(std::ptr::eq(replay, history));
    // Tick 0 is sampled as soon as the session starts.
    assert_eq!(replay.peek_back().unwrap().tick, Frame::new(0));
}

#[test]
fn instant_replay_returns_the_newest_snapshot_far_enough_back() {
    let mut session = stub_builder()
        .with_snapshot_config(every_ten_for_two_seconds())
        .unwrap()
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 35, |_, _| StubInput::moving(1));

    let frame = session
        .instant_replay(Duration::from_millis(250))
        .unwrap()
        .expect("snapshot at tick 20");
    assert_eq!(frame.tick(), Frame::new(20));
    assert_eq!(positions(&frame), vec![20, 20]);
    assert!(frame.is_verified());

    let latest = session.instant_replay(Duration::ZERO).unwrap().unwrap();
    assert_eq!(latest.tick(), Frame::new(30));
    assert!(collect_events(&mut session)
        .iter()
        .all(|event| !matches!(event, LockstepEvent::SnapshotMissing { .. })));
}

#[test]
fn instant_replay_miss_is_reported_not_fatal() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_snapshot_config(SnapshotConfig {
            instant_replay: Some(SamplingConfig::new(10, Duration::from_millis(200))),
            checksum_history: None,
        })
        .unwrap()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 60, |_, _| StubInput::default());
    let held: Vec<Frame> = session
        .instant_replay_buffer()
        .unwrap()
        .iter()
        .map(|entry| entry.tick)
        .collect();
    assert_eq!(held, vec![Frame::new(40), Frame::new(50), Frame::new(60)]);

    assert!(session.instant_replay(Duration::from_secs(1)).unwrap().is_none());
    assert!(collect_events(&mut session).contains(&LockstepEvent::SnapshotMissing {
        requested: Frame::new(0),
    }));
    assert!(observer.has_violation(ViolationKind::Capacity));
}

#[test]
fn disabled_snapshots_always_miss() {
    let mut session = stub_builder()
        .with_snapshot_config(SnapshotConfig::disabled())
        .unwrap()
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 3, |_, _| StubInput::default());
    assert!(session.instant_replay(Duration::ZERO).unwrap().is_none());
    assert_eq!(
        collect_events(&mut session).last(),
        Some(&LockstepEvent::SnapshotMissing {
            requested: Frame::new(3),
        })
    );
}

#[test]
fn checksum_history_snapshot_looks_back_to_the_closest_sample() {
    let mut session = stub_builder()
        .with_snapshot_config(SnapshotConfig {
            instant_replay: None,
            checksum_history: Some(SamplingConfig::new(4, Duration::from_secs(1))),
        })
        .unwrap()
        .start_session()
        .unwrap();
    run_confirmed(&mut session, 10, |_, _| StubInput::default());
    assert_eq!(
        session.checksum_history_snapshot(Frame::new(7)).unwrap().tick,
        Frame::new(4)
    );
    assert_eq!(
        session.checksum_history_snapshot(Frame::new(8)).unwrap().tick,
        Frame::new(8)
    );
    assert!(session.instant_replay_buffer().is_none());
}
