//! Reconciliation of events raised by predicted and verified ticks.
//!
//! Systems raise events while simulating. Predicted ticks may be simulated
//! many times before their input is confirmed, so an event is identified by
//! `(tick, event type, payload hash)` and moves through:
//!
//! ```text
//! Unseen --predicted run--> ProvisionallyRaised --verified run reproduces it--> Confirmed
//!                                               --verified run does not-------> Canceled
//! ```
//!
//! An event first seen in the verified run is raised and confirmed together.
//! Synced events skip the provisional stage and are raised once, from the
//! verified run only.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::hash::fnv1a_hash;
use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::Frame;

/// Buffers kept for reuse once their tick is reconciled.
const MAX_POOLED_BUFFERS: usize = 16;

/// An event raised by a system.
///
/// `Hash` must be deterministic across platforms: derive it, and avoid
/// fields such as `HashMap` whose hash depends on process state.
pub trait SimulationEvent: Clone + Debug + Hash {
    /// Numeric type id. Events of different types never deduplicate against each other.
    fn event_type(&self) -> u32;

    /// Synced events are authoritative and only raised from verified ticks.
    fn is_synced(&self) -> bool {
        false
    }
}

/// Outcome delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventNotification<E> {
    /// First sighting of the event.
    Raised {
        /// Tick that raised it.
        tick: Frame,
        /// The event.
        event: E,
    },
    /// The verified run reproduced the event.
    Confirmed {
        /// Tick that raised it.
        tick: Frame,
        /// The event.
        event: E,
    },
    /// A provisionally raised event that the verified run did not reproduce.
    Canceled {
        /// Tick that raised it.
        tick: Frame,
        /// The event.
        event: E,
    },
}

impl<E> EventNotification<E> {
    /// Tick the event belongs to.
    #[must_use]
    pub const fn tick(&self) -> Frame {
        match self {
            Self::Raised { tick, .. } | Self::Confirmed { tick, .. } | Self::Canceled { tick, .. } => {
                *tick
            },
        }
    }

    /// The event itself.
    #[must_use]
    pub const fn event(&self) -> &E {
        match self {
            Self::Raised { event, .. }
            | Self::Confirmed { event, .. }
            | Self::Canceled { event, .. } => event,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEvent<E> {
    event_type: u32,
    payload_hash: u64,
    event: E,
    reproduced: bool,
}

impl<E> PendingEvent<E> {
    fn key(&self) -> (u32, u64) {
        (self.event_type, self.payload_hash)
    }
}

fn key_of<E: SimulationEvent>(event: &E) -> (u32, u64) {
    (event.event_type(), fnv1a_hash(event))
}

/// Tracks provisionally raised events per tick and settles them on verification.
#[derive(Debug)]
pub struct EventReconciler<E> {
    pending: BTreeMap<Frame, Vec<PendingEvent<E>>>,
    pool: Vec<Vec<PendingEvent<E>>>,
    seen: Vec<(u32, u64)>,
    last_verified: Frame,
}

impl<E> Default for EventReconciler<E> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            pool: Vec::new(),
            seen: Vec::new(),
            last_verified: Frame::NULL,
        }
    }
}

impl<E: SimulationEvent> EventReconciler<E> {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last tick passed to [`Self::on_verified_tick`], or [`Frame::NULL`].
    #[must_use]
    pub const fn last_verified(&self) -> Frame {
        self.last_verified
    }

    /// Number of provisionally raised events not yet settled.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Ticks holding unsettled events, ascending.
    pub fn pending_ticks(&self) -> impl Iterator<Item = Frame> + '_ {
        self.pending.keys().copied()
    }

    /// Buffers waiting in the pool.
    #[must_use]
    pub fn pooled_buffers(&self) -> usize {
        self.pool.len()
    }

    fn recycle(&mut self, mut buffer: Vec<PendingEvent<E>>) {
        buffer.clear();
        if self.pool.len() < MAX_POOLED_BUFFERS {
            self.pool.push(buffer);
        }
    }

    /// Handles the events raised by a predicted simulation of `tick`.
    ///
    /// Each unique non-synced event is raised the first time any run of the
    /// tick produces it.
    pub fn on_predicted_tick(&mut self, tick: Frame, events: &[E], out: &mut Vec<EventNotification<E>>) {
        if self.last_verified.is_valid() && tick <= self.last_verified {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::EventDispatch,
                "predicted events for tick {} arrived after it was verified at {}; dropping {} events",
                tick,
                self.last_verified,
                events.len()
            );
            return;
        }
        if events.iter().all(SimulationEvent::is_synced) {
            return;
        }
        let mut bucket = match self.pending.remove(&tick) {
            Some(bucket) => bucket,
            None => self.pool.pop().unwrap_or_default(),
        };
        for event in events.iter().filter(|e| !e.is_synced()) {
            let (event_type, payload_hash) = key_of(event);
            if bucket.iter().any(|p| p.key() == (event_type, payload_hash)) {
                continue;
            }
            bucket.push(PendingEvent {
                event_type,
                payload_hash,
                event: event.clone(),
                reproduced: false,
            });
            out.push(EventNotification::Raised {
                tick,
                event: event.clone(),
            });
        }
        if bucket.is_empty() {
            self.recycle(bucket);
        } else {
            self.pending.insert(tick, bucket);
        }
    }

    /// Settles `tick` against the events of its verified run.
    ///
    /// Older ticks that were never verified are canceled first. Every unique
    /// event ends in exactly one terminal notification.
    pub fn on_verified_tick(&mut self, tick: Frame, events: &[E], out: &mut Vec<EventNotification<E>>) {
        if self.last_verified.is_valid() && tick <= self.last_verified {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::EventDispatch,
                "tick {} was already verified (last verified {})",
                tick,
                self.last_verified
            );
            return;
        }

        let stale: Vec<Frame> = self.pending.range(..tick).map(|(t, _)| *t).collect();
        for stale_tick in stale {
            if let Some(bucket) = self.pending.remove(&stale_tick) {
                self.cancel_bucket(stale_tick, bucket, out);
            }
        }

        let mut bucket = self.pending.remove(&tick).unwrap_or_default();
        self.seen.clear();
        for event in events {
            let key = key_of(event);
            if self.seen.contains(&key) {
                continue;
            }
            self.seen.push(key);
            if event.is_synced() {
                out.push(EventNotification::Raised {
                    tick,
                    event: event.clone(),
                });
                continue;
            }
            if let Some(pending) = bucket.iter_mut().find(|p| p.key() == key) {
                pending.reproduced = true;
                out.push(EventNotification::Confirmed {
                    tick,
                    event: pending.event.clone(),
                });
            } else {
                out.push(EventNotification::Raised {
                    tick,
                    event: event.clone(),
                });
                out.push(EventNotification::Confirmed {
                    tick,
                    event: event.clone(),
                });
            }
        }
        for pending in bucket.drain(..).filter(|p| !p.reproduced) {
            out.push(EventNotification::Canceled {
                tick,
                event: pending.event,
            });
        }
        self.recycle(bucket);
        self.last_verified = tick;
    }

    fn cancel_bucket(
        &mut self,
        tick: Frame,
        mut bucket: Vec<PendingEvent<E>>,
        out: &mut Vec<EventNotification<E>>,
    ) {
        out.extend(
            bucket
                .drain(..)
                .map(|pending| EventNotification::Canceled {
                    tick,
                    event: pending.event,
                }),
        );
        self.recycle(bucket);
    }

    /// Cancels every unsettled event, e.g. when a session ends.
    pub fn cancel_all(&mut self, out: &mut Vec<EventNotification<E>>) {
        while let Some((tick, bucket)) = self.pending.pop_first() {
            self.cancel_bucket(tick, bucket, out);
        }
    }
}

impl<E: SimulationEvent> InvariantChecker for EventReconciler<E> {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if let Some(first) = self.pending.keys().next() {
            if self.last_verified.is_valid() && *first <= self.last_verified {
                return Err(InvariantViolation::new(
                    "EventReconciler",
                    "pending events exist for an already verified tick",
                )
                .with_details(format!(
                    "tick={}, last_verified={}",
                    first, self.last_verified
                )));
            }
        }
        for (tick, bucket) in &self.pending {
            for (i, pending) in bucket.iter().enumerate() {
                if bucket[..i].iter().any(|p| p.key() == pending.key()) {
                    return Err(InvariantViolation::new(
                        "EventReconciler",
                        "an event key is pending twice within one tick",
                    )
                    .with_details(format!("tick={}, type={}", tick, pending.event_type)));
                }
            }
        }
        if self.pool.len() > MAX_POOLED_BUFFERS {
            return Err(InvariantViolation::new(
                "EventReconciler",
                "buffer pool exceeds its bound",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Ev {
        Hit { target: u32 },
        Goal,
        ServerNotice(u8),
    }

    impl SimulationEvent for Ev {
        fn event_type(&self) -> u32 {
            match self {
                Self::Hit { .. } => 0,
                Self::Goal => 1,
                Self::ServerNotice(_) => 2,
            }
        }

        fn is_synced(&self) -> bool {
            matches!(self, Self::ServerNotice(_))
        }
    }

    fn f(tick: i32) -> Frame {
        Frame::new(tick)
    }

    // ==========================================
    // Provisional dispatch
    // ==========================================

    #[test]
    fn repeated_predictions_raise_once() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(3), &[Ev::Goal, Ev::Goal], &mut out);
        r.on_predicted_tick(f(3), &[Ev::Goal], &mut out);
        assert_eq!(
            out,
            vec![EventNotification::Raised {
                tick: f(3),
                event: Ev::Goal
            }]
        );
        assert_eq!(r.pending_len(), 1);
    }

    #[test]
    fn payload_distinguishes_events() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(
            f(1),
            &[Ev::Hit { target: 1 }, Ev::Hit { target: 2 }],
            &mut out,
        );
        assert_eq!(out.len(), 2);
    }

    // ==========================================
    // Verification
    // ==========================================

    #[test]
    fn reproduced_event_is_confirmed_once() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(5), &[Ev::Goal], &mut out);
        r.on_predicted_tick(f(5), &[Ev::Goal], &mut out);
        out.clear();
        r.on_verified_tick(f(5), &[Ev::Goal, Ev::Goal], &mut out);
        assert_eq!(
            out,
            vec![EventNotification::Confirmed {
                tick: f(5),
                event: Ev::Goal
            }]
        );
        assert_eq!(r.pending_len(), 0);
        assert_eq!(r.last_verified(), f(5));
    }

    #[test]
    fn missing_event_is_canceled() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(2), &[Ev::Hit { target: 9 }], &mut out);
        out.clear();
        r.on_verified_tick(f(2), &[], &mut out);
        assert_eq!(
            out,
            vec![EventNotification::Canceled {
                tick: f(2),
                event: Ev::Hit { target: 9 }
            }]
        );
    }

    #[test]
    fn new_event_in_verified_run_is_raised_and_confirmed() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_verified_tick(f(0), &[Ev::Goal], &mut out);
        assert_eq!(
            out,
            vec![
                EventNotification::Raised {
                    tick: f(0),
                    event: Ev::Goal
                },
                EventNotification::Confirmed {
                    tick: f(0),
                    event: Ev::Goal
                },
            ]
        );
    }

    #[test]
    fn synced_events_wait_for_verification() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(4), &[Ev::ServerNotice(1)], &mut out);
        assert!(out.is_empty());
        r.on_verified_tick(f(4), &[Ev::ServerNotice(1), Ev::ServerNotice(1)], &mut out);
        assert_eq!(
            out,
            vec![EventNotification::Raised {
                tick: f(4),
                event: Ev::ServerNotice(1)
            }]
        );
    }

    #[test]
    fn skipped_ticks_are_canceled_before_verification() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(6), &[Ev::Goal], &mut out);
        r.on_predicted_tick(f(7), &[Ev::Goal], &mut out);
        out.clear();
        r.on_verified_tick(f(7), &[Ev::Goal], &mut out);
        assert_eq!(
            out,
            vec![
                EventNotification::Canceled {
                    tick: f(6),
                    event: Ev::Goal
                },
                EventNotification::Confirmed {
                    tick: f(7),
                    event: Ev::Goal
                },
            ]
        );
    }

    #[test]
    fn late_predictions_and_repeat_verification_are_ignored() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_verified_tick(f(3), &[], &mut out);
        r.on_predicted_tick(f(3), &[Ev::Goal], &mut out);
        r.on_verified_tick(f(3), &[Ev::Goal], &mut out);
        assert!(out.is_empty());
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn buffers_return_to_pool() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(1), &[Ev::Goal], &mut out);
        assert_eq!(r.pooled_buffers(), 0);
        r.on_verified_tick(f(1), &[Ev::Goal], &mut out);
        assert_eq!(r.pooled_buffers(), 1);
        r.on_predicted_tick(f(2), &[Ev::Goal], &mut out);
        assert_eq!(r.pooled_buffers(), 0);
    }

    #[test]
    fn cancel_all_settles_everything() {
        let mut r = EventReconciler::new();
        let mut out = Vec::new();
        r.on_predicted_tick(f(8), &[Ev::Goal], &mut out);
        r.on_predicted_tick(f(9), &[Ev::Hit { target: 1 }], &mut out);
        out.clear();
        r.cancel_all(&mut out);
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|n| matches!(n, EventNotification::Canceled { .. })));
        assert_eq!(r.pending_ticks().count(), 0);
    }

    #[test]
    fn notification_accessors() {
        let n = EventNotification::Canceled {
            tick: f(2),
            event: Ev::Goal,
        };
        assert_eq!(n.tick(), f(2));
        assert_eq!(n.event(), &Ev::Goal);
    }
}
