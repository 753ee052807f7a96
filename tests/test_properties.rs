//! Property-based tests for the kernel data structures.
//!
//! # Properties Tested
//!
//! - Snapshot ring lookups agree with a linear scan of the retained entries
//! - A shared snapshot ring satisfies both streams and never outgrows two rings
//! - The checksum log indexes by `(tick - first) / interval`
//! - A tick is simulable exactly when every player's input is confirmed
//! - Every provisionally raised event ends confirmed or canceled, once
//! - Frame serialization preserves the checksum

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use fortress_lockstep::snapshot::{minimal_size, plan_buffers, BufferPlan};
use fortress_lockstep::{
    ChecksumLog, ChecksumVerification, ComponentSchema, Config, EventNotification, EventReconciler,
    FindMode, Frame, FrameState, InputFlags, InputHistory, PlayerHandle, SamplingConfig,
    SerializeMode, SimulationEvent, SnapshotRingBuffer,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// Test Configuration
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TestEvent {
    kind: u8,
    payload: u8,
    synced: bool,
}

impl SimulationEvent for TestEvent {
    fn event_type(&self) -> u32 {
        u32::from(self.kind)
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TestInput {
    buttons: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TestGlobals {
    score: i64,
    history: Vec<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Health(u32);

struct TestConfig;

impl Config for TestConfig {
    type Input = TestInput;
    type Globals = TestGlobals;
    type PlayerData = u8;
    type Event = TestEvent;
}

/// Case count for this file, reduced under Miri.
const fn case_count() -> u32 {
    if cfg!(miri) {
        5
    } else {
        256
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Strictly increasing snapshot ticks.
fn tick_set_strategy() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::btree_set(0i32..1000, 1..40).prop_map(|set| set.into_iter().collect())
}

fn sampling_strategy() -> impl Strategy<Value = SamplingConfig> {
    (1u32..=120, 1u64..=30_000)
        .prop_map(|(interval, millis)| SamplingConfig::new(interval, Duration::from_millis(millis)))
}

fn event_strategy() -> impl Strategy<Value = TestEvent> {
    (0u8..3, 0u8..4, prop::bool::weighted(0.2)).prop_map(|(kind, payload, synced)| TestEvent {
        kind,
        payload,
        synced,
    })
}

// ============================================================================
// Snapshot ring
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig {
        cases: case_count(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_ring_find_matches_linear_scan(
        ticks in tick_set_strategy(),
        capacity in 1usize..20,
        query in 0i32..1100,
    ) {
        let mut ring = SnapshotRingBuffer::new(capacity).unwrap();
        for &tick in &ticks {
            ring.push_back(Frame::new(tick), Arc::from(tick.to_le_bytes().as_slice())).unwrap();
        }
        let retained: Vec<i32> = ticks.iter().rev().take(capacity).rev().copied().collect();
        prop_assert_eq!(ring.len(), retained.len());

        let below = retained.iter().copied().filter(|&t| t <= query).max();
        prop_assert_eq!(
            ring.find(Frame::new(query), FindMode::ClosestLessThanOrEqual).map(|e| e.tick.as_i32()),
            below
        );

        let exact = retained.contains(&query).then_some(query);
        prop_assert_eq!(
            ring.find(Frame::new(query), FindMode::Equal).map(|e| e.tick.as_i32()),
            exact
        );

        let closest = retained.iter().copied().min_by_key(|&t| ((t - query).abs(), t));
        prop_assert_eq!(
            ring.find(Frame::new(query), FindMode::Closest).map(|e| e.tick.as_i32()),
            closest
        );
    }

    #[test]
    fn prop_shared_ring_covers_both_streams(
        rate in 1u32..=240,
        checksum_history in sampling_strategy(),
        instant_replay in sampling_strategy(),
    ) {
        let separate = checksum_history.minimal_size(rate) + instant_replay.minimal_size(rate);
        match plan_buffers(rate, Some(checksum_history), Some(instant_replay)) {
            BufferPlan::Shared(ring) => {
                prop_assert_eq!(checksum_history.interval % ring.interval, 0);
                prop_assert_eq!(instant_replay.interval % ring.interval, 0);
                prop_assert!(ring.capacity >= minimal_size(rate, checksum_history.window, ring.interval));
                prop_assert!(ring.capacity >= minimal_size(rate, instant_replay.window, ring.interval));
                prop_assert!(ring.capacity <= separate);
            },
            BufferPlan::Separate { checksum_history: a, instant_replay: b } => {
                prop_assert_eq!(a.map(|r| r.capacity), Some(checksum_history.minimal_size(rate)));
                prop_assert_eq!(b.map(|r| r.capacity), Some(instant_replay.minimal_size(rate)));
            },
        }
    }

    #[test]
    fn prop_single_stream_is_never_shared(rate in 1u32..=240, stream in sampling_strategy()) {
        let plan = plan_buffers(rate, None, Some(stream));
        prop_assert_eq!(plan.total_capacity(), stream.minimal_size(rate));
        let separate_without_history = matches!(plan, BufferPlan::Separate { checksum_history: None, .. });
        prop_assert!(separate_without_history);
    }
}

// ============================================================================
// Checksum log
// ============================================================================

#[test]
fn checksum_log_scenario_interval_ten_from_tick_hundred() {
    let mut log = ChecksumLog::new(10);
    for (tick, checksum) in [(100, 0xa), (110, 0xb), (120, 0xc)] {
        log.record(Frame::new(tick), checksum).unwrap();
    }
    assert_eq!(log.recorded(Frame::new(120)).unwrap().checksum, 0xc);
    assert_eq!(log.verify(Frame::new(120), 0xc), ChecksumVerification::Match);
    assert_eq!(
        log.verify(Frame::new(120), 0xd),
        ChecksumVerification::Mismatch {
            tick: Frame::new(120),
            expected: 0xc,
            actual: 0xd,
        }
    );
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: case_count(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_checksum_log_indexes_by_interval(
        first in 0i32..500,
        interval in 1u32..30,
        checksums in proptest::collection::vec(any::<u64>(), 1..40),
        pick in 0usize..40,
        offset in 1i32..30,
    ) {
        let mut log = ChecksumLog::new(interval);
        for (i, &checksum) in checksums.iter().enumerate() {
            log.record(Frame::new(first + i as i32 * interval as i32), checksum).unwrap();
        }
        let index = pick % checksums.len();
        let tick = Frame::new(first + index as i32 * interval as i32);
        prop_assert_eq!(log.verify(tick, checksums[index]), ChecksumVerification::Match);
        let is_mismatch = matches!(
            log.verify(tick, checksums[index].wrapping_add(1)),
            ChecksumVerification::Mismatch { .. }
        );
        prop_assert!(is_mismatch);

        if interval > 1 && offset % interval as i32 != 0 {
            prop_assert_eq!(log.verify(tick + offset, 0), ChecksumVerification::NotRecorded);
        }
        prop_assert!(log.record(tick, 0).is_err());
    }
}

// ============================================================================
// Input history
// ============================================================================

#[test]
fn input_history_scenario_two_players_tick_five() {
    let mut history = InputHistory::new(2, Frame::new(0)).unwrap();
    history
        .on_input_confirmed(Frame::new(5), PlayerHandle::new(0), &[1], InputFlags::NONE)
        .unwrap();
    assert!(!history.can_simulate(Frame::new(5)));
    history
        .on_input_confirmed(Frame::new(5), PlayerHandle::new(1), &[2], InputFlags::NONE)
        .unwrap();
    assert!(history.can_simulate(Frame::new(5)));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: case_count(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_tick_is_complete_iff_every_player_confirmed(
        players in 1usize..5,
        confirmations in proptest::collection::vec((0i32..64, 0usize..5), 0..200),
    ) {
        let mut history = InputHistory::new(players, Frame::new(0)).unwrap();
        let mut confirmed: HashMap<i32, BTreeSet<usize>> = HashMap::new();
        for (tick, player) in confirmations {
            let player = player % players;
            history
                .on_input_confirmed(Frame::new(tick), PlayerHandle::new(player), &[tick as u8], InputFlags::NONE)
                .unwrap();
            confirmed.entry(tick).or_default().insert(player);
        }
        for tick in 0..64 {
            let complete = confirmed.get(&tick).is_some_and(|set| set.len() == players);
            prop_assert_eq!(history.can_simulate(Frame::new(tick)), complete, "tick {}", tick);
        }
    }
}

// ============================================================================
// Event reconciliation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig {
        cases: case_count(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_every_raised_event_settles_exactly_once(
        predicted_runs in proptest::collection::vec(proptest::collection::vec(event_strategy(), 0..6), 1..4),
        verified in proptest::collection::vec(event_strategy(), 0..6),
    ) {
        let tick = Frame::new(7);
        let mut reconciler = EventReconciler::new();
        let mut out = Vec::new();
        for run in &predicted_runs {
            reconciler.on_predicted_tick(tick, run, &mut out);
        }
        let raised_before = out.len();
        // Re-simulating the same tick raises nothing new.
        reconciler.on_predicted_tick(tick, &predicted_runs[0], &mut out);
        prop_assert_eq!(out.len(), raised_before);

        reconciler.on_verified_tick(tick, &verified, &mut out);
        prop_assert_eq!(reconciler.pending_len(), 0);

        let mut raised: Vec<&TestEvent> = Vec::new();
        let mut settled: Vec<&TestEvent> = Vec::new();
        for notification in &out {
            prop_assert_eq!(notification.tick(), tick);
            match notification {
                EventNotification::Raised { event, .. } => {
                    prop_assert!(!raised.contains(&event), "raised twice: {:?}", event);
                    raised.push(event);
                },
                EventNotification::Confirmed { event, .. } | EventNotification::Canceled { event, .. } => {
                    prop_assert!(!event.synced);
                    prop_assert!(!settled.contains(&event), "settled twice: {:?}", event);
                    settled.push(event);
                },
            }
        }
        let unsynced_raised: Vec<&TestEvent> = raised.iter().copied().filter(|e| !e.synced).collect();
        prop_assert_eq!(unsynced_raised.len(), settled.len());
        for event in unsynced_raised {
            prop_assert!(settled.contains(&event));
            let reproduced = verified.contains(event);
            let was_confirmed = out.iter().any(|n| matches!(n, EventNotification::Confirmed { event: e, .. } if e == event));
            prop_assert_eq!(was_confirmed, reproduced);
        }
        for event in raised.iter().filter(|e| e.synced) {
            prop_assert!(verified.contains(event));
        }
    }
}

// ============================================================================
// Frame serialization
// ============================================================================

fn frame_with(
    score: i64,
    history: &[u32],
    healths: &[u32],
    rolls: usize,
) -> FrameState<TestConfig> {
    let schema = ComponentSchema::builder(3)
        .register::<Health>("health")
        .unwrap()
        .build();
    let mut frame = FrameState::<TestConfig>::new(schema, 0, 2).unwrap();
    frame.globals_mut().score = score;
    frame.globals_mut().history = history.to_vec();
    for &health in healths {
        let entity = frame.entities_mut().create().unwrap();
        frame.entities_mut().set(entity, &Health(health)).unwrap();
    }
    for _ in 0..rolls {
        let _ = frame.rng_mut().next_u32();
    }
    frame.set_player(PlayerHandle::new(1), 4, vec![9]).unwrap();
    frame
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: case_count(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_serialize_round_trip_preserves_checksum(
        score in any::<i64>(),
        history in proptest::collection::vec(any::<u32>(), 0..16),
        healths in proptest::collection::vec(any::<u32>(), 0..24),
        rolls in 0usize..8,
    ) {
        let frame = frame_with(score, &history, &healths, rolls);
        let bytes = frame.serialize(SerializeMode::Snapshot).unwrap();
        let mut restored = frame_with(0, &[], &[], 0);
        restored.deserialize(&bytes).unwrap();
        prop_assert_eq!(restored.checksum().unwrap(), frame.checksum().unwrap());
        prop_assert_eq!(restored.globals(), frame.globals());
        prop_assert_eq!(restored.entities().len(), healths.len());
    }

    #[test]
    fn prop_checksum_tracks_state_changes(score in any::<i64>(), delta in 1i64..1000) {
        let a = frame_with(score, &[], &[], 0);
        let b = frame_with(score.wrapping_add(delta), &[], &[], 0);
        prop_assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
    }
}
