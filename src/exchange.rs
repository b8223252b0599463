//! One logical request/response pairing (`spec.md` §3, §4.D).

use crate::clock::Millis;
use crate::error::SocketError;
use crate::message::Message;
use tracing::debug;

/// What an [`ExchangeOwner`] decided after inspecting a piggybacked ack.
///
/// A piggybacked ack is legitimate at the transport level (it is still
/// acknowledged, and its transaction is done), but whether it counts as the
/// exchange's *final* response is an application-level decision: e.g. a
/// Block1 driver mid-transfer sees a per-block ack, not the whole
/// request's response, and an ack whose options are unexpected or whose
/// size renegotiation is rejected must NOT close the exchange at all
/// (`spec.md` §4.D, §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The owner is done with this exchange; no further events follow on
    /// it.
    Complete,
    /// The owner could not make progress on this ack (unexpected option,
    /// rejected renegotiation, stale duplicate); the exchange stays open
    /// until `exchange_deadline` elapses.
    KeepOpen,
}

/// Callbacks an [`Exchange`] delivers to whatever owns it: either a plain
/// single-exchange request or a [`crate::block1::BlockwiseRequest`]. This
/// is the "lookup relation, never ownership" back-reference `SPEC_FULL.md`
/// §9 describes: the exchange does not know or care which kind of owner it
/// has, only that it implements this trait.
pub trait ExchangeOwner {
    /// An ack was received for the current transaction, piggybacked or
    /// empty. The owner decides whether this closes the exchange; see
    /// [`AckOutcome`].
    fn on_acknowledged(&mut self, ack: Message) -> AckOutcome;
    /// A final response was received: either a later, independently
    /// addressed separate response, or, for a non-blockwise owner, the
    /// piggybacked ack itself, forwarded here after `on_acknowledged`
    /// returned [`AckOutcome::Complete`].
    fn on_response(&mut self, response: Message);
    /// The retransmission budget was exhausted.
    fn on_transaction_timeout(&mut self);
    /// The exchange lifetime elapsed without a final response.
    fn on_exchange_timeout(&mut self);
    /// The peer reset the confirmable message.
    fn on_reset(&mut self);
    /// The socket collaborator reported a failure sending a datagram for
    /// this exchange.
    fn on_socket_error(&mut self, err: SocketError);
}

/// Exchange lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// Waiting on the current transaction's ack.
    AwaitingAck,
    /// The transaction's ack was consumed but the owner has not produced a
    /// final response yet: either because the ack was empty (a separate
    /// response is expected) or because the owner returned
    /// [`AckOutcome::KeepOpen`] (application-level rejection). Either way,
    /// `exchange_deadline` governs when this closes.
    Open,
    Closed,
}

/// One request/response pairing, per `spec.md` §3's `Exchange` data model.
///
/// Owns exactly one transaction's worth of in-flight state at a time (the
/// transaction itself lives in the `Endpoint`'s dispatch table, looked up
/// by `(peer, mid)`; this type only needs the `mid`/`token` to recognize
/// which inbound datagrams are its own).
pub struct Exchange {
    pub token: Vec<u8>,
    pub mid: u16,
    pub exchange_deadline: Millis,
    pub status: ExchangeStatus,
}

impl Exchange {
    pub fn new(token: Vec<u8>, mid: u16, exchange_deadline: Millis) -> Self {
        Self {
            token,
            mid,
            exchange_deadline,
            status: ExchangeStatus::AwaitingAck,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == ExchangeStatus::Closed
    }

    /// Handles an ack delivered by the `Endpoint` for this exchange's
    /// transaction.
    pub fn on_ack(&mut self, ack: Message, owner: &mut dyn ExchangeOwner) {
        debug!(mid = self.mid, "exchange received ack");
        let empty = ack.code.is_empty();
        let outcome = owner.on_acknowledged(ack.clone());
        if empty {
            self.status = ExchangeStatus::Open;
            return;
        }
        match outcome {
            AckOutcome::Complete => {
                self.status = ExchangeStatus::Closed;
                owner.on_response(ack);
            }
            AckOutcome::KeepOpen => {
                self.status = ExchangeStatus::Open;
            }
        }
    }

    /// Handles a later, independently-addressed CON/NON response for this
    /// exchange's token (the "separate response" case of `spec.md` §4.D).
    pub fn on_separate_response(&mut self, response: Message, owner: &mut dyn ExchangeOwner) {
        debug!(mid = self.mid, "exchange received separate response");
        self.status = ExchangeStatus::Closed;
        owner.on_response(response);
    }

    pub fn on_reset(&mut self, owner: &mut dyn ExchangeOwner) {
        debug!(mid = self.mid, "exchange received reset");
        self.status = ExchangeStatus::Closed;
        owner.on_reset();
    }

    pub fn on_transaction_timeout(&mut self, owner: &mut dyn ExchangeOwner) {
        debug!(mid = self.mid, "exchange transaction timed out");
        self.status = ExchangeStatus::Closed;
        owner.on_transaction_timeout();
    }

    pub fn on_exchange_timeout(&mut self, owner: &mut dyn ExchangeOwner) {
        debug!(mid = self.mid, "exchange lifetime elapsed");
        self.status = ExchangeStatus::Closed;
        owner.on_exchange_timeout();
    }

    pub fn cancel(&mut self) {
        self.status = ExchangeStatus::Closed;
    }
}
