//! The UDP socket collaborator (`SPEC_FULL.md` §6, §9).
//!
//! The core never opens a socket itself. It is handed a capability that can
//! send opaque datagrams to a peer; the caller's dispatch loop is
//! responsible for pulling datagrams off the real socket and handing them
//! to [`crate::endpoint::Endpoint::receive`].

use crate::error::SocketError;

/// A destination address. The core is generic over this type so it never
/// has to parse or validate addresses itself; a real deployment would use
/// `std::net::SocketAddr`, but nothing here depends on that.
pub trait Peer: Clone + Eq + std::hash::Hash + std::fmt::Debug {}
impl<T: Clone + Eq + std::hash::Hash + std::fmt::Debug> Peer for T {}

/// The send half of the socket capability (`SPEC_FULL.md` §9 "socket
/// abstraction -> trait-like capability set").
///
/// `send` is synchronous from the core's perspective: failures become a
/// [`SocketError`] attached to an `error` event on the owning request
/// rather than a `Result` the caller must thread through every call site.
pub trait Socket<P: Peer> {
    fn send(&mut self, bytes: &[u8], peer: &P) -> Result<(), SocketError>;
}
