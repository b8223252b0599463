//! A client-side CoAP (RFC 7252) protocol engine: message codec,
//! confirmable-message reliability, and a Block1 (RFC 7959) request driver,
//! driven by a single-threaded, cooperative dispatch loop (`spec.md` §2).
//!
//! Nothing in this crate opens a socket, reads the system clock or spawns a
//! thread. [`socket::Socket`] and [`clock::Clock`] are capabilities the
//! caller supplies; [`endpoint::Endpoint`] is the one type that ties them
//! together with the codec, the reliability state machine and the Block1
//! driver into something a caller can submit requests to.
//!
//! ```text
//! caller's event loop
//!   -> Endpoint::receive(datagram, peer)   // inbound
//!   -> Endpoint::poll(now)                 // timers
//!   -> Endpoint::request(message, peer, config, listener)  // outbound
//! ```

pub mod block1;
pub mod clock;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod exchange;
pub mod message;
pub mod socket;
pub mod transaction;

pub use config::{BlockSize, BlockSizePolicy, Config, EndpointConfig};
pub use endpoint::{Endpoint, RequestId};
pub use error::SocketError;
pub use events::{Event, TerminalReason};
pub use message::{Code, Message, MessageType};
