//! The Block1 request driver (`spec.md` §3 `BlockwiseRequest`, §4.E).
//!
//! Segments an oversized request payload across a sequence of Block1
//! exchanges. Each block is carried by its own transport-level
//! [`crate::exchange::Exchange`] (same token, reused across blocks; see
//! `DESIGN.md`); this module only decides *what* goes out next and *when*
//! the whole request is done. [`crate::endpoint::Endpoint`] owns the actual
//! sending.

use crate::config::BlockSizePolicy;
use crate::events::{Event, EventEmitter, TerminalReason};
use crate::exchange::{AckOutcome, ExchangeOwner};
use crate::message::{option_number, BlockValue, Code, CoapOption, Message, MessageType};
use tracing::{debug, warn};

/// Whether a request needs to be segmented at all (`spec.md` §4.E rule 1).
pub fn needs_segmentation(payload_len: usize, block_size_bytes: usize) -> bool {
    payload_len > block_size_bytes
}

/// The fixed parts of a blockwise request: everything that does not change
/// from one block to the next.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Code,
    pub uri_path: String,
    pub content_format: Option<u16>,
}

/// The mutable Block1 driver state (`spec.md` §3 `BlockwiseRequest`).
pub struct BlockState {
    payload: Vec<u8>,
    template: RequestTemplate,
    policy: BlockSizePolicy,
    /// `szx` used for the block currently awaiting an ack. Doubles as the
    /// client's growth cap under [`BlockSizePolicy::Strict`] (`spec.md`
    /// §4.E, §9 open question).
    current_szx: u8,
    /// The `num` of the block currently awaiting an ack.
    in_flight_num: u32,
    /// How many payload bytes the server has confirmed persisting so far;
    /// always the start offset of the in-flight block.
    bytes_acked: usize,
    /// The next message the owning [`Endpoint`](crate::endpoint::Endpoint)
    /// should send, if the last ack caused an advance.
    pending_send: Option<Message>,
}

impl BlockState {
    pub fn new(payload: Vec<u8>, initial_szx: u8, template: RequestTemplate, policy: BlockSizePolicy) -> Self {
        Self {
            payload,
            template,
            policy,
            current_szx: initial_szx,
            in_flight_num: 0,
            bytes_acked: 0,
            pending_send: None,
        }
    }

    fn block_size(&self) -> usize {
        1usize << (self.current_szx as u32 + 4)
    }

    fn is_final_block(&self, end: usize) -> bool {
        end >= self.payload.len()
    }

    /// Builds the message for the block currently at `bytes_acked`, with
    /// `szx = current_szx`. The caller (`Endpoint`) fills in the token and
    /// message ID before sending.
    pub fn build_in_flight_message(&self) -> Message {
        self.build_message(self.in_flight_num, self.current_szx, self.bytes_acked)
    }

    fn build_message(&self, num: u32, szx: u8, start: usize) -> Message {
        let size = 1usize << (szx as u32 + 4);
        let end = (start + size).min(self.payload.len());
        let mut message = Message::new(MessageType::Con, self.template.method, 0, Vec::new());
        message.set_uri_path(&self.template.uri_path);
        if let Some(format) = self.template.content_format {
            message.set_content_format(format);
        }
        message.push_option(CoapOption::new(
            option_number::BLOCK1,
            BlockValue::new(num, !self.is_final_block(end), szx).encode(),
        ));
        message.options.sort_by_key(|o| o.number);
        message.payload = self.payload[start..end].to_vec();
        message
    }

    /// Takes the pending next-block message queued by the last
    /// [`ExchangeOwner::on_acknowledged`] call, if any.
    pub fn take_pending_send(&mut self) -> Option<Message> {
        self.pending_send.take()
    }
}

/// Adapts [`BlockState`] to the transport-level [`ExchangeOwner`] seam, and
/// forwards the events a request listener sees.
pub struct BlockwiseOwner {
    pub state: BlockState,
    pub events: EventEmitter,
}

impl BlockwiseOwner {
    pub fn new(state: BlockState, events: EventEmitter) -> Self {
        Self { state, events }
    }
}

impl ExchangeOwner for BlockwiseOwner {
    /// The core of `spec.md` §4.E step 4: decide whether this ack advances
    /// the block sequence, renegotiates it, rejects it, or finishes the
    /// request.
    fn on_acknowledged(&mut self, ack: Message) -> AckOutcome {
        self.events.emit(Event::Acknowledged(ack.clone()));

        if ack.code.is_empty() {
            // A separate response is expected; nothing to advance yet.
            return AckOutcome::KeepOpen;
        }

        let block = match ack.block1() {
            Some(block) => block,
            None => {
                warn!("block1 ack carried no Block1 option; request had one");
                return AckOutcome::KeepOpen;
            }
        };

        if block.num != self.state.in_flight_num {
            debug!(
                expected = self.state.in_flight_num,
                got = block.num,
                "stale block1 ack, discarding without advancing"
            );
            return AckOutcome::KeepOpen;
        }

        // The size the in-flight block was actually sent at; the bytes it
        // carried are now acknowledged regardless of what the server asks
        // for next.
        let sent_szx = self.state.current_szx;
        let sent_size = 1usize << (sent_szx as u32 + 4);

        let new_szx = if block.szx > sent_szx {
            match self.state.policy {
                BlockSizePolicy::Strict => {
                    warn!(
                        requested = block.szx,
                        cap = sent_szx,
                        "server requested a larger block size than the client cap; ignoring"
                    );
                    return AckOutcome::KeepOpen;
                }
                BlockSizePolicy::RfcCompliant => block.szx,
            }
        } else {
            block.szx
        };

        let bytes_acked = (self.state.bytes_acked + sent_size).min(self.state.payload.len());
        let is_final = self.state.is_final_block(bytes_acked);

        self.events.emit(Event::BlockSent(ack.clone()));

        if is_final && !block.m {
            self.state.bytes_acked = bytes_acked;
            self.state.pending_send = None;
            return AckOutcome::Complete;
        }

        // `num` is always `offset / block_size`; since every size in play
        // is a power of two, this divides evenly whether the size just
        // shrank, grew, or stayed put (`spec.md` §4.E "advance num for the
        // new geometry").
        let new_block_size = 1usize << (new_szx as u32 + 4);
        self.state.current_szx = new_szx;
        self.state.bytes_acked = bytes_acked;
        self.state.in_flight_num = (bytes_acked / new_block_size) as u32;
        let next = self
            .state
            .build_message(self.state.in_flight_num, new_szx, bytes_acked);
        self.state.pending_send = Some(next);
        AckOutcome::KeepOpen
    }

    fn on_response(&mut self, response: Message) {
        self.events.emit(Event::Response(response));
    }

    fn on_transaction_timeout(&mut self) {
        self.events.emit(Event::Timeout(TerminalReason::TransactionTimeout));
    }

    fn on_exchange_timeout(&mut self) {
        self.events.emit(Event::Timeout(TerminalReason::ExchangeTimeout));
    }

    fn on_reset(&mut self) {
        self.events.emit(Event::Reset);
    }

    fn on_socket_error(&mut self, err: crate::error::SocketError) {
        self.events.emit(Event::Error(err));
    }
}
