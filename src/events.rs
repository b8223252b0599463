//! The per-request event surface (`spec.md` §4.F, `SPEC_FULL.md` §9).
//!
//! Modeled as an explicit observer set: one listener list per event name,
//! invoked synchronously and in registration order on the dispatch thread.
//! There is no wildcard listener and no event buffering: a listener
//! registered after an event fired simply never sees it.

use crate::error::SocketError;
use crate::message::Message;

/// The terminal request state an `Event::Timeout` or `Event::Reset` leaves
/// behind, useful for logging and for tests asserting exact scenarios.
pub use crate::error::TerminalReason;

/// One occurrence on a request's event stream, matching the event names of
/// `spec.md` §4.D/§4.F.
#[derive(Debug, Clone)]
pub enum Event {
    /// An ACK was received (piggybacked or empty), carrying the ACK
    /// message itself.
    Acknowledged(Message),
    /// A Block1 exchange completed successfully and the driver advanced to
    /// (or renegotiated onto) the next block; carries the ack that caused
    /// the advance.
    BlockSent(Message),
    /// The final, non-blockwise-pending response was received.
    Response(Message),
    /// The request's exchange or transaction budget ran out; carries which
    /// of the two (or `Reset`/`Cancelled`) caused it.
    Timeout(TerminalReason),
    /// The peer reset the confirmable message.
    Reset,
    /// The socket collaborator reported a failure.
    Error(SocketError),
}

type Listener = Box<dyn FnMut(&Event)>;

/// A request's observable event surface.
///
/// Listeners are stored in one combined registration-ordered list rather
/// than per-event-name buckets internally, but the public API only ever
/// hands callers a single dispatch point (`on`) plus typed accessors,
/// matching the "mapping from event name to listeners" model of
/// `spec.md` §4.F: each listener decides which `Event` variants it cares
/// about.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Vec<Listener>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener invoked for every event on this request, in
    /// the order listeners were added.
    pub fn on(&mut self, listener: impl FnMut(&Event) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Invokes every listener, in registration order, with `event`.
    pub fn emit(&mut self, event: Event) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Code, MessageType};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_fire_synchronously_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();

        let order_a = order.clone();
        emitter.on(move |_| order_a.borrow_mut().push("a"));
        let order_b = order.clone();
        emitter.on(move |_| order_b.borrow_mut().push("b"));

        emitter.emit(Event::Reset);
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn late_subscriber_misses_past_events() {
        let seen = Rc::new(RefCell::new(0));
        let mut emitter = EventEmitter::new();
        emitter.emit(Event::Response(Message::new(
            MessageType::Ack,
            Code::CHANGED_2_04,
            1,
            Vec::new(),
        )));

        let seen_clone = seen.clone();
        emitter.on(move |_| *seen_clone.borrow_mut() += 1);
        assert_eq!(*seen.borrow(), 0);
    }
}
