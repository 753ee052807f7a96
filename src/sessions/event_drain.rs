//! Draining iterator over a session's queued events.

use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use crate::LockstepEvent;

/// An opaque iterator that drains queued events from a session.
///
/// Wraps the session's event queue drain without exposing
/// `std::collections::vec_deque::Drain`. Events not consumed before the
/// drain is dropped are discarded.
///
/// Obtain an `EventDrain` by calling [`SimulationSession::events()`].
///
/// # Examples
///
/// ```ignore
/// for event in session.events() {
///     match event {
///         LockstepEvent::Simulation(notification) => apply(notification),
///         LockstepEvent::ChecksumMismatch { frame, .. } => report_desync(frame),
///         _ => {}
///     }
/// }
/// ```
///
/// [`SimulationSession::events()`]: crate::SimulationSession::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a, E> {
    inner: Drain<'a, LockstepEvent<E>>,
}

impl<'a, E> EventDrain<'a, E> {
    pub(crate) fn from_drain(drain: Drain<'a, LockstepEvent<E>>) -> Self {
        Self { inner: drain }
    }
}

impl<E> Iterator for EventDrain<'_, E> {
    type Item = LockstepEvent<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<E> DoubleEndedIterator for EventDrain<'_, E> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<E> ExactSizeIterator for EventDrain<'_, E> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<E> FusedIterator for EventDrain<'_, E> {}

impl<E> std::fmt::Debug for EventDrain<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::iter_with_drain
)]
mod tests {
    use super::*;
    use crate::Frame;
    use std::collections::VecDeque;

    fn make_event(tick: i32) -> LockstepEvent<u8> {
        LockstepEvent::ReplayFinished {
            frame: Frame::new(tick),
        }
    }

    fn queue_of(ticks: &[i32]) -> VecDeque<LockstepEvent<u8>> {
        ticks.iter().copied().map(make_event).collect()
    }

    #[test]
    fn drain_from_queue_yields_all_events_in_order() {
        let mut queue = queue_of(&[1, 2, 3]);
        let events: Vec<_> = EventDrain::from_drain(queue.drain(..)).collect();
        assert_eq!(events, vec![make_event(1), make_event(2), make_event(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_is_fused() {
        let mut queue = queue_of(&[1]);
        let mut drain = EventDrain::from_drain(queue.drain(..));
        assert!(drain.next().is_some());
        assert!(drain.next().is_none());
        assert!(drain.next().is_none());
    }

    #[test]
    fn double_ended_iteration() {
        let mut queue = queue_of(&[1, 2, 3]);
        let mut drain = EventDrain::from_drain(queue.drain(..));
        assert_eq!(drain.next_back(), Some(make_event(3)));
        assert_eq!(drain.next(), Some(make_event(1)));
        assert_eq!(drain.next_back(), Some(make_event(2)));
        assert!(drain.next().is_none());
    }

    #[test]
    fn exact_size_tracks_consumption() {
        let mut queue = queue_of(&[1, 2]);
        let mut drain = EventDrain::from_drain(queue.drain(..));
        assert_eq!(drain.size_hint(), (2, Some(2)));
        let _ = drain.next();
        assert_eq!(drain.len(), 1);
        let _ = drain.next();
        assert_eq!(drain.len(), 0);
    }

    #[test]
    fn debug_format_shows_remaining_count() {
        let mut queue = queue_of(&[1, 2]);
        let drain = EventDrain::from_drain(queue.drain(..));
        assert_eq!(format!("{drain:?}"), "EventDrain { remaining: 2 }");
    }
}
