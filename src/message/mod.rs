//! The CoAP [`Message`] type and the pieces used to build and inspect one.
//!
//! A message is the in-memory representation of a single CoAP PDU (RFC 7252
//! §3): a type, a code, a 16-bit message ID, a token, an ordered option list
//! and an optional payload. [`crate::codec`] is responsible for the
//! bit-exact translation between this type and wire bytes.

mod block;
mod code;
mod option;

pub use block::BlockValue;
pub use code::Code;
pub use option::{option_number, Option as CoapOption};

/// The four CoAP message types (RFC 7252 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Confirmable: retransmitted until acknowledged or reset.
    Con,
    /// Non-confirmable: sent once, no retransmission.
    Non,
    /// Acknowledgement of a Confirmable message.
    Ack,
    /// Rejection of a Confirmable or Non-confirmable message.
    Rst,
}

/// The maximum length of a CoAP token (RFC 7252 §3).
pub const MAX_TOKEN_LEN: usize = 8;

/// A CoAP message: header fields, options and payload.
///
/// Options are kept in the order they were built or decoded, which for a
/// well-formed message is ascending option-number order (ties broken by
/// insertion order, as required for repeatable options like Uri-Path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub mtype: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new message with no options and no payload.
    pub fn new(mtype: MessageType, code: Code, message_id: u16, token: Vec<u8>) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Creates an empty ACK (no code, no token, no payload) for the given
    /// message ID. Used by the Transaction layer for tests and by Endpoint
    /// when it needs to fabricate a bare acknowledgement.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Ack, Code::EMPTY, message_id, Vec::new())
    }

    /// Appends an option, preserving the order it is given in. Callers are
    /// responsible for adding options in ascending numeric order when the
    /// message will be encoded; [`crate::codec::encode`] validates this.
    pub fn push_option(&mut self, option: CoapOption) {
        self.options.push(option);
    }

    /// Returns the first option with the given option number, if any.
    pub fn first_option(&self, number: u16) -> Option<&CoapOption> {
        self.options.iter().find(|o| o.number == number)
    }

    /// Returns all options with the given option number, in order.
    pub fn options_with(&self, number: u16) -> impl Iterator<Item = &CoapOption> {
        self.options.iter().filter(move |o| o.number == number)
    }

    /// Returns the decoded Block1 option, if present and well-formed.
    pub fn block1(&self) -> Option<BlockValue> {
        self.first_option(option_number::BLOCK1)
            .and_then(|o| BlockValue::decode(&o.value).ok())
    }

    /// Sets (replacing any existing) Block1 option.
    pub fn set_block1(&mut self, block: BlockValue) {
        self.replace_option(option_number::BLOCK1, block.encode());
    }

    /// Returns the decoded Block2 option, if present and well-formed.
    pub fn block2(&self) -> Option<BlockValue> {
        self.first_option(option_number::BLOCK2)
            .and_then(|o| BlockValue::decode(&o.value).ok())
    }

    /// Appends a Uri-Path option for each non-empty segment of `path`,
    /// splitting on `/`. Mirrors how a URI's path component maps onto a
    /// repeated CoAP option (RFC 7252 §6.4).
    pub fn set_uri_path(&mut self, path: &str) {
        self.options.retain(|o| o.number != option_number::URI_PATH);
        let insert_at = self
            .options
            .iter()
            .position(|o| o.number > option_number::URI_PATH)
            .unwrap_or(self.options.len());
        let segments: Vec<CoapOption> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| CoapOption::new(option_number::URI_PATH, segment.as_bytes().to_vec()))
            .collect();
        self.options.splice(insert_at..insert_at, segments);
    }

    /// Sets the Content-Format option to the given numeric identifier.
    pub fn set_content_format(&mut self, format: u16) {
        let bytes = if format == 0 {
            Vec::new()
        } else {
            format.to_be_bytes().to_vec()
        };
        self.replace_option(option_number::CONTENT_FORMAT, bytes);
    }

    fn replace_option(&mut self, number: u16, value: Vec<u8>) {
        if let Some(existing) = self.options.iter_mut().find(|o| o.number == number) {
            existing.value = value;
            return;
        }
        let insert_at = self
            .options
            .iter()
            .position(|o| o.number > number)
            .unwrap_or(self.options.len());
        self.options.insert(insert_at, CoapOption::new(number, value));
    }

    /// Returns the options in strictly ascending numeric order, as required
    /// by the wire format. A well-formed message already satisfies this.
    pub fn is_option_order_valid(&self) -> bool {
        self.options.windows(2).all(|pair| pair[0].number <= pair[1].number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_uri_path_splits_on_slash_and_skips_empty_segments() {
        let mut message = Message::new(MessageType::Con, Code::GET, 1, vec![1]);
        message.set_uri_path("/blocks/put");
        let paths: Vec<_> = message
            .options_with(option_number::URI_PATH)
            .map(|o| String::from_utf8(o.value.clone()).unwrap())
            .collect();
        assert_eq!(paths, vec!["blocks", "put"]);
    }

    #[test]
    fn set_content_format_keeps_options_sorted() {
        let mut message = Message::new(MessageType::Con, Code::PUT, 1, vec![1]);
        message.set_uri_path("/a");
        message.set_content_format(0); // text/plain
        assert!(message.is_option_order_valid());
        message.set_block1(BlockValue::new(0, true, 3));
        assert!(message.is_option_order_valid());
    }

    #[test]
    fn block1_round_trips_through_typed_accessor() {
        let mut message = Message::new(MessageType::Con, Code::PUT, 1, vec![1]);
        message.set_block1(BlockValue::new(5, false, 2));
        assert_eq!(message.block1(), Some(BlockValue::new(5, false, 2)));
        assert_eq!(message.block2(), None);
    }
}
