use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use crate::ChessEvent;

/// Drains the session's event queue without allocating.
///
/// Obtain one from [`LockstepSession::events`]. Events not consumed before the drain is
/// dropped are discarded.
///
/// ```ignore
/// for event in session.events() {
///     if let ChessEvent::Message { text } = event {
///         log.push(text);
///     }
/// }
/// ```
///
/// [`LockstepSession::events`]: crate::LockstepSession::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a, A> {
    inner: Drain<'a, ChessEvent<A>>,
}

impl<'a, A> EventDrain<'a, A> {
    pub(crate) fn from_drain(drain: Drain<'a, ChessEvent<A>>) -> Self {
        Self { inner: drain }
    }
}

impl<A> Iterator for EventDrain<'_, A> {
    type Item = ChessEvent<A>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<A> DoubleEndedIterator for EventDrain<'_, A> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<A> ExactSizeIterator for EventDrain<'_, A> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<A> FusedIterator for EventDrain<'_, A> {}

impl<A> std::fmt::Debug for EventDrain<'_, A> {
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
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::Tick;
    use std::collections::VecDeque;

    fn queue() -> VecDeque<ChessEvent<u8>> {
        VecDeque::from(vec![
            ChessEvent::Message {
                text: "hi".to_owned(),
            },
            ChessEvent::ReplayFinished { tick: Tick::new(4) },
            ChessEvent::PeerJoined { addr: 7 },
        ])
    }

    #[test]
    fn drains_in_order_and_empties_queue() {
        let mut events = queue();
        let drained: Vec<_> = EventDrain::from_drain(events.drain(..)).collect();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[2], ChessEvent::PeerJoined { addr: 7 }));
        assert!(events.is_empty());
    }

    #[test]
    fn exact_size_and_reverse() {
        let mut events = queue();
        let mut drain = EventDrain::from_drain(events.drain(..));
        assert_eq!(drain.len(), 3);
        assert!(matches!(drain.next_back(), Some(ChessEvent::PeerJoined { .. })));
        assert_eq!(drain.len(), 2);
        assert!(format!("{:?}", drain).contains("remaining: 2"));
    }

    #[test]
    fn dropping_discards_rest() {
        let mut events = queue();
        {
            let mut drain = EventDrain::from_drain(events.drain(..));
            let _ = drain.next();
        }
        assert!(events.is_empty());
    }
}
