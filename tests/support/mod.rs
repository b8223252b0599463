//! Shared test scaffolding for the scenario suite: a peer address type and an
//! in-memory socket that records every outbound datagram, decoded, so
//! scenarios can assert on wire content without hand-parsing bytes.

use coap_core::codec;
use coap_core::message::Message;
use coap_core::{Endpoint, SocketError};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestPeer(pub u8);

#[derive(Clone, Default)]
pub struct MockSocket {
    sent: Rc<RefCell<Vec<Message>>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.borrow().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl coap_core::socket::Socket<TestPeer> for MockSocket {
    fn send(&mut self, bytes: &[u8], _peer: &TestPeer) -> Result<(), SocketError> {
        let message = codec::decode(bytes).expect("endpoint must only send well-formed datagrams");
        self.sent.borrow_mut().push(message);
        Ok(())
    }
}

pub type TestEndpoint = Endpoint<TestPeer, MockSocket, coap_core::clock::VirtualClockHandle>;

/// A payload built from repeated 128-byte separator lines, matching
/// `spec.md` §8's fixture description, truncated to an exact length.
pub fn separator_payload(len: usize) -> Vec<u8> {
    let line = {
        let mut line = vec![b'-'; 127];
        line.push(b'\n');
        line
    };
    line.iter().copied().cycle().take(len).collect()
}

/// Builds an ACK carrying a Block1 option, addressed to `request`'s message
/// ID and token.
pub fn block1_ack(request: &Message, code: coap_core::Code, num: u32, more: bool, szx: u8) -> Message {
    let mut ack = Message::new(
        coap_core::MessageType::Ack,
        code,
        request.message_id,
        request.token.clone(),
    );
    ack.set_block1(coap_core::message::BlockValue::new(num, more, szx));
    ack
}

/// Builds a plain piggybacked ACK with no options, addressed to `request`.
pub fn plain_ack(request: &Message, code: coap_core::Code) -> Message {
    Message::new(coap_core::MessageType::Ack, code, request.message_id, request.token.clone())
}

/// An event log a scenario test can hand to `Endpoint::request` as its
/// listener and inspect afterward.
pub fn event_log() -> (Rc<RefCell<Vec<String>>>, impl FnMut(&coap_core::Event) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = log.clone();
    let listener = move |event: &coap_core::Event| log_clone.borrow_mut().push(format!("{event:?}"));
    (log, listener)
}
