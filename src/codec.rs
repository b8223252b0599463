//! Bit-exact encode/decode of CoAP datagrams (RFC 7252 §3).
//!
//! This module is the leaf of the dependency graph described in
//! `SPEC_FULL.md` §2: every other component works with [`Message`] values
//! and never touches wire bytes directly.

use crate::message::{CoapOption, Code, Message, MessageType};
use thiserror::Error as ThisError;
use tracing::trace;

/// The only CoAP protocol version this codec speaks.
const VERSION: u8 = 1;

/// Marks the start of the payload in an encoded message.
const PAYLOAD_MARKER: u8 = 0xff;

/// The library default MTU (bytes), used by [`encode`] when the caller does
/// not have a more specific value from the transport layer. 1152 is the
/// size RFC 7252's block-wise examples and the CoAP implementations in this
/// retrieval pack converge on.
pub const DEFAULT_MTU: usize = 1152;

/// Why [`encode`] or [`decode`] rejected a message.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum MalformedMessage {
    #[error("CoAP version {0} is not supported, only version 1")]
    UnsupportedVersion(u8),
    #[error("token length {0} is out of the 0-8 range")]
    BadTokenLength(u8),
    #[error("datagram is shorter than its header requires")]
    Truncated,
    #[error("option delta/length nibble 15 is reserved outside the payload marker")]
    ReservedOptionNibble,
    #[error("payload marker present with no payload bytes following it")]
    EmptyPayloadAfterMarker,
    #[error("option {number} length {length} cannot be represented (max 65804)")]
    OptionTooLong { number: u16, length: usize },
    #[error("encoded message would exceed the {mtu} byte MTU")]
    ExceedsMtu { mtu: usize },
}

/// Encodes `message` to wire bytes, rejecting anything that would not
/// round-trip or that would not fit in `mtu` bytes.
///
/// Per `spec.md` §4.A: header, then Message-ID, then token, then options in
/// strictly ascending option-number order, then (if non-empty) a single
/// `0xFF` marker and the payload.
pub fn encode(message: &Message, mtu: usize) -> Result<Vec<u8>, MalformedMessage> {
    if message.token.len() > 8 {
        return Err(MalformedMessage::BadTokenLength(message.token.len() as u8));
    }

    let mut out = Vec::with_capacity(mtu.min(256));
    let first_byte = (VERSION << 6) | (type_bits(message.mtype) << 4) | message.token.len() as u8;
    out.push(first_byte);
    out.push(message.code.raw());
    out.extend_from_slice(&message.message_id.to_be_bytes());
    out.extend_from_slice(&message.token);

    let mut sorted_options: Vec<&CoapOption> = message.options.iter().collect();
    sorted_options.sort_by_key(|o| o.number);
    let mut previous_number = 0u16;
    for option in sorted_options {
        let delta = option.number.checked_sub(previous_number).ok_or_else(|| {
            MalformedMessage::OptionTooLong {
                number: option.number,
                length: option.value.len(),
            }
        })?;
        encode_option(&mut out, delta, &option.value)?;
        previous_number = option.number;
    }

    if !message.payload.is_empty() {
        out.push(PAYLOAD_MARKER);
        out.extend_from_slice(&message.payload);
    }

    if out.len() > mtu {
        return Err(MalformedMessage::ExceedsMtu { mtu });
    }

    trace!(bytes = out.len(), mid = message.message_id, "encoded message");
    Ok(out)
}

/// Decodes `bytes` into a [`Message`], rejecting malformed input per
/// `spec.md` §4.A.
pub fn decode(bytes: &[u8]) -> Result<Message, MalformedMessage> {
    if bytes.len() < 4 {
        return Err(MalformedMessage::Truncated);
    }
    let first_byte = bytes[0];
    let version = first_byte >> 6;
    if version != VERSION {
        return Err(MalformedMessage::UnsupportedVersion(version));
    }
    let mtype = type_from_bits((first_byte >> 4) & 0b11);
    let token_len = first_byte & 0b1111;
    if token_len > 8 {
        return Err(MalformedMessage::BadTokenLength(token_len));
    }
    let code = Code::from_raw(bytes[1]);
    let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);

    let mut cursor = 4usize;
    let token_len = token_len as usize;
    if bytes.len() < cursor + token_len {
        return Err(MalformedMessage::Truncated);
    }
    let token = bytes[cursor..cursor + token_len].to_vec();
    cursor += token_len;

    let mut options = Vec::new();
    let mut option_number = 0u16;
    while cursor < bytes.len() {
        if bytes[cursor] == PAYLOAD_MARKER {
            cursor += 1;
            if cursor == bytes.len() {
                return Err(MalformedMessage::EmptyPayloadAfterMarker);
            }
            let payload = bytes[cursor..].to_vec();
            trace!(bytes = bytes.len(), mid = message_id, "decoded message");
            return Ok(Message {
                mtype,
                code,
                message_id,
                token,
                options,
                payload,
            });
        }
        let (option, consumed, next_number) =
            decode_option(&bytes[cursor..], option_number)?;
        options.push(option);
        option_number = next_number;
        cursor += consumed;
    }

    trace!(bytes = bytes.len(), mid = message_id, "decoded message");
    Ok(Message {
        mtype,
        code,
        message_id,
        token,
        options,
        payload: Vec::new(),
    })
}

fn type_bits(mtype: MessageType) -> u8 {
    match mtype {
        MessageType::Con => 0,
        MessageType::Non => 1,
        MessageType::Ack => 2,
        MessageType::Rst => 3,
    }
}

fn type_from_bits(bits: u8) -> MessageType {
    match bits {
        0 => MessageType::Con,
        1 => MessageType::Non,
        2 => MessageType::Ack,
        _ => MessageType::Rst,
    }
}

/// Encodes one option's delta/length nibbles, extension bytes and value,
/// per RFC 7252 §3.1.
fn encode_option(out: &mut Vec<u8>, delta: u16, value: &[u8]) -> Result<(), MalformedMessage> {
    let (delta_nibble, delta_ext) = split_nibble(delta)?;
    let (length_nibble, length_ext) = split_nibble(value.len() as u16)?;
    out.push((delta_nibble << 4) | length_nibble);
    out.extend(delta_ext);
    out.extend(length_ext);
    out.extend_from_slice(value);
    Ok(())
}

/// Splits a delta or length into its 4-bit nibble plus any extension bytes,
/// per the 13/14 extended-encoding rule. Values `>= 65805` (14 + 0xffff +
/// 269) cannot be represented and are rejected.
fn split_nibble(value: u16) -> Result<(u8, Vec<u8>), MalformedMessage> {
    if value < 13 {
        Ok((value as u8, Vec::new()))
    } else if value < 13 + 255 {
        Ok((13, vec![(value - 13) as u8]))
    } else if (value as u32) < 13 + 255 + 65535 {
        let extended = value as u32 - (13 + 255);
        Ok((14, (extended as u16).to_be_bytes().to_vec()))
    } else {
        Err(MalformedMessage::OptionTooLong {
            number: 0,
            length: value as usize,
        })
    }
}

/// Decodes one option starting at `bytes[0]`, given the running option
/// number from the previous option. Returns the option, the number of bytes
/// consumed, and the new running option number.
fn decode_option(
    bytes: &[u8],
    previous_number: u16,
) -> Result<(CoapOption, usize, u16), MalformedMessage> {
    if bytes.is_empty() {
        return Err(MalformedMessage::Truncated);
    }
    let delta_nibble = bytes[0] >> 4;
    let length_nibble = bytes[0] & 0b1111;
    if delta_nibble == 15 || length_nibble == 15 {
        return Err(MalformedMessage::ReservedOptionNibble);
    }
    let mut cursor = 1usize;
    let delta = read_extended(bytes, &mut cursor, delta_nibble)?;
    let length = read_extended(bytes, &mut cursor, length_nibble)? as usize;
    if bytes.len() < cursor + length {
        return Err(MalformedMessage::Truncated);
    }
    let number = previous_number
        .checked_add(delta)
        .ok_or(MalformedMessage::Truncated)?;
    let value = bytes[cursor..cursor + length].to_vec();
    cursor += length;
    Ok((
        CoapOption {
            number,
            value,
        },
        cursor,
        number,
    ))
}

fn read_extended(bytes: &[u8], cursor: &mut usize, nibble: u8) -> Result<u16, MalformedMessage> {
    match nibble {
        13 => {
            let byte = *bytes.get(*cursor).ok_or(MalformedMessage::Truncated)?;
            *cursor += 1;
            Ok(byte as u16 + 13)
        }
        14 => {
            let hi = *bytes.get(*cursor).ok_or(MalformedMessage::Truncated)?;
            let lo = *bytes.get(*cursor + 1).ok_or(MalformedMessage::Truncated)?;
            *cursor += 2;
            Ok(u16::from_be_bytes([hi, lo]).wrapping_add(13 + 255))
        }
        n => Ok(n as u16),
    }
}

#[cfg(test)]
mod tests;
