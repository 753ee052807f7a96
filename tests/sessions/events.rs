//! Event reconciliation as seen through a session.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use fortress_lockstep::telemetry::{CollectingObserver, ViolationKind};
use fortress_lockstep::{EventNotification, Frame, LockstepEvent, SimulationSession};
use parking_lot::Mutex;

use crate::common::stubs::{StubConfig, StubEvent, StubInput};
use crate::common::{collect_events, confirm_all, confirm_tick, run_confirmed, stub_builder, stub_session};

type Log = Arc<Mutex<Vec<EventNotification<StubEvent>>>>;

fn subscribe_log(session: &mut SimulationSession<StubConfig>) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    session.subscribe(Box::new(move |notification| {
        sink.lock().push(notification.clone());
    }));
    log
}

fn shot(player: usize) -> StubEvent {
    StubEvent::Shot { player }
}

fn raised(tick: i32, event: StubEvent) -> EventNotification<StubEvent> {
    EventNotification::Raised {
        tick: Frame::new(tick),
        event,
    }
}

fn confirmed(tick: i32, event: StubEvent) -> EventNotification<StubEvent> {
    EventNotification::Confirmed {
        tick: Frame::new(tick),
        event,
    }
}

fn canceled(tick: i32, event: StubEvent) -> EventNotification<StubEvent> {
    EventNotification::Canceled {
        tick: Frame::new(tick),
        event,
    }
}

#[test]
fn predicted_events_are_confirmed_or_canceled_on_verification() {
    let mut session = stub_session();
    let log = subscribe_log(&mut session);

    confirm_tick(&mut session, 1, &[StubInput::firing(0), StubInput::default()]);
    session.advance_frame().unwrap();
    // Repeat-last prediction keeps player 0 firing on ticks 2 and 3.
    session.advance_frame().unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.pending_event_count(), 2);

    confirm_tick(&mut session, 2, &[StubInput::firing(0), StubInput::default()]);
    confirm_tick(&mut session, 3, &[StubInput::default(), StubInput::default()]);
    session.advance_frame().unwrap();
    assert_eq!(session.verified_frame(), Frame::new(3));
    assert_eq!(session.pending_event_count(), 0);

    let expected = vec![
        raised(1, shot(0)),
        confirmed(1, shot(0)),
        raised(2, shot(0)),
        raised(3, shot(0)),
        confirmed(2, shot(0)),
        canceled(3, shot(0)),
    ];
    assert_eq!(*log.lock(), expected);

    let queued: Vec<_> = collect_events(&mut session)
        .into_iter()
        .filter_map(|event| match event {
            LockstepEvent::Simulation(notification) => Some(notification),
            _ => None,
        })
        .collect();
    assert_eq!(queued, expected);
}

#[test]
fn synced_events_are_raised_once_from_verified_ticks() {
    let mut session = stub_session();
    run_confirmed(&mut session, 8, |_, _| StubInput::default());
    let log = subscribe_log(&mut session);

    // Tick 10 is predicted first; the synced milestone waits for verification.
    session.advance_frame().unwrap();
    session.advance_frame().unwrap();
    assert_eq!(session.frame().globals().ticks, 10);
    assert!(log.lock().is_empty());

    confirm_all(&mut session, 9, StubInput::default());
    confirm_all(&mut session, 10, StubInput::default());
    session.advance_frame().unwrap();

    assert_eq!(*log.lock(), vec![raised(10, StubEvent::Milestone { ticks: 10 })]);
}

#[test]
fn cancel_pending_events_settles_every_provisional_event() {
    let mut session = stub_session();
    run_confirmed(&mut session, 1, |_, _| StubInput::firing(1));
    let log = subscribe_log(&mut session);
    session.advance_frame().unwrap();
    assert_eq!(session.pending_event_count(), 2);

    session.cancel_pending_events();
    assert_eq!(session.pending_event_count(), 0);
    let log = log.lock();
    let canceled_count = log
        .iter()
        .filter(|n| matches!(n, EventNotification::Canceled { .. }))
        .count();
    assert_eq!(canceled_count, 2);
}

#[test]
fn panicking_subscriber_is_contained() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = stub_builder()
        .with_violation_observer(observer.clone())
        .start_session()
        .unwrap();
    session.subscribe(Box::new(|_| panic!("subscriber bug")));
    let log = subscribe_log(&mut session);

    run_confirmed(&mut session, 2, |_, player| {
        if player == 0 {
            StubInput::firing(0)
        } else {
            StubInput::default()
        }
    });

    assert_eq!(log.lock().len(), 4);
    assert!(observer.has_violation(ViolationKind::EventDispatch));
    let queued = collect_events(&mut session)
        .into_iter()
        .filter(|event| matches!(event, LockstepEvent::Simulation(_)))
        .count();
    assert_eq!(queued, 4);
}

#[test]
fn event_queue_drops_the_oldest_events() {
    let mut session = stub_builder().with_event_queue_size(16).unwrap().start_session().unwrap();
    run_confirmed(&mut session, 20, |_, _| StubInput::firing(0));

    let events = collect_events(&mut session);
    assert_eq!(events.len(), 16);
    assert_eq!(
        events.last(),
        Some(&LockstepEvent::Simulation(confirmed(20, shot(1))))
    );
    assert!(session.events().next().is_none());
}
