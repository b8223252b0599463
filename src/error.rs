//! The error taxonomy of `SPEC_FULL.md` §7 / §11.
//!
//! Only [`MalformedMessage`](crate::codec::MalformedMessage) and
//! [`SocketError`] ever surface as an `Err` from a public function. The
//! remaining reasons below are attached to the internal event stream
//! (`acknowledged` / `timeout` / `reset`) and are never returned to a
//! caller directly; see [`crate::events`].

use thiserror::Error as ThisError;

pub use crate::codec::MalformedMessage;

/// A failure reported by the socket collaborator (`SPEC_FULL.md` §10.B,
/// §6). The core never attempts to interpret the underlying cause; it just
/// surfaces it as an `error` event on the owning request.
#[derive(Debug, Clone, ThisError)]
#[error("socket error: {message}")]
pub struct SocketError {
    pub message: String,
}

impl SocketError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a request's owning [`crate::exchange::Exchange`] closed, surfaced to
/// the event listener as the terminal reason behind a `timeout`/`reset`
/// event (`SPEC_FULL.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum TerminalReason {
    #[error("retransmission budget exhausted without an ack")]
    TransactionTimeout,
    #[error("exchange lifetime elapsed without a final response")]
    ExchangeTimeout,
    #[error("peer sent RST")]
    Reset,
    #[error("request was cancelled")]
    Cancelled,
}
