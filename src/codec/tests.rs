use super::*;
use crate::message::BlockValue;

fn sample_message() -> Message {
    let mut message = Message::new(MessageType::Con, Code::PUT, 0x1234, vec![0xaa, 0xbb]);
    message.set_uri_path("/blocks/put");
    message.set_content_format(0);
    message.set_block1(BlockValue::new(0, true, 3));
    message.payload = b"hello block".to_vec();
    message
}

#[test]
fn round_trips_a_typical_request() {
    let message = sample_message();
    let bytes = encode(&message, DEFAULT_MTU).unwrap();
    assert_eq!(decode(&bytes).unwrap(), message);
}

#[test]
fn round_trips_zero_length_token() {
    let message = Message::new(MessageType::Non, Code::GET, 7, Vec::new());
    let bytes = encode(&message, DEFAULT_MTU).unwrap();
    assert_eq!(decode(&bytes).unwrap(), message);
}

#[test]
fn round_trips_empty_payload_with_no_marker() {
    let message = Message::new(MessageType::Ack, Code::CHANGED_2_04, 1, vec![1]);
    let bytes = encode(&message, DEFAULT_MTU).unwrap();
    assert!(!bytes.contains(&PAYLOAD_MARKER));
    assert_eq!(decode(&bytes).unwrap(), message);
}

#[test]
fn round_trips_option_requiring_14_bit_extension() {
    let mut message = Message::new(MessageType::Con, Code::POST, 2, vec![1, 2, 3, 4]);
    // Option number 300 needs a 13-bit extended delta; push it past 269 to
    // exercise the 14-bit path as well.
    message.push_option(CoapOption::new(300, vec![0u8; 10]));
    message.push_option(CoapOption::new(900, vec![1u8; 20]));
    let bytes = encode(&message, DEFAULT_MTU).unwrap();
    assert_eq!(decode(&bytes).unwrap(), message);
}

#[test]
fn round_trips_long_value_requiring_14_bit_length() {
    let mut message = Message::new(MessageType::Con, Code::PUT, 3, vec![9]);
    message.push_option(CoapOption::new(11, vec![b'x'; 500]));
    let bytes = encode(&message, 2048).unwrap();
    assert_eq!(decode(&bytes).unwrap(), message);
}

#[test]
fn rejects_unsupported_version() {
    let mut bytes = encode(&sample_message(), DEFAULT_MTU).unwrap();
    bytes[0] = (2 << 6) | (bytes[0] & 0b0011_1111);
    assert_eq!(decode(&bytes), Err(MalformedMessage::UnsupportedVersion(2)));
}

#[test]
fn rejects_token_length_in_reserved_range() {
    let mut bytes = encode(&sample_message(), DEFAULT_MTU).unwrap();
    bytes[0] = (bytes[0] & 0b1111_0000) | 9;
    assert_eq!(decode(&bytes), Err(MalformedMessage::BadTokenLength(9)));
}

#[test]
fn rejects_reserved_option_nibble() {
    let mut message = Message::new(MessageType::Con, Code::GET, 1, Vec::new());
    message.push_option(CoapOption::new(1, Vec::new()));
    let mut bytes = encode(&message, DEFAULT_MTU).unwrap();
    let option_byte_index = bytes.len() - 1;
    bytes[option_byte_index] = 0b1111_0000;
    assert_eq!(decode(&bytes), Err(MalformedMessage::ReservedOptionNibble));
}

#[test]
fn rejects_payload_marker_with_no_payload() {
    let mut bytes = encode(&Message::new(MessageType::Con, Code::GET, 1, Vec::new()), DEFAULT_MTU).unwrap();
    bytes.push(PAYLOAD_MARKER);
    assert_eq!(decode(&bytes), Err(MalformedMessage::EmptyPayloadAfterMarker));
}

#[test]
fn rejects_a_stray_byte_as_a_truncated_option() {
    // A single trailing byte is read as the start of one more option (delta
    // nibble 0, length nibble 1), whose 1-byte value is then missing: the
    // option walk has no separate "trailing data" concept, so this surfaces
    // as `Truncated` rather than a dedicated trailing-bytes error.
    let mut bytes = encode(&Message::new(MessageType::Con, Code::GET, 1, Vec::new()), DEFAULT_MTU).unwrap();
    bytes.push(0x01);
    assert_eq!(decode(&bytes), Err(MalformedMessage::Truncated));
}

#[test]
fn rejects_token_longer_than_eight_on_encode() {
    let message = Message::new(MessageType::Con, Code::GET, 1, vec![0; 9]);
    assert_eq!(encode(&message, DEFAULT_MTU), Err(MalformedMessage::BadTokenLength(9)));
}

#[test]
fn rejects_messages_that_would_exceed_the_mtu() {
    let mut message = Message::new(MessageType::Con, Code::PUT, 1, vec![1]);
    message.payload = vec![0u8; 64];
    assert_eq!(encode(&message, 16), Err(MalformedMessage::ExceedsMtu { mtu: 16 }));
}

#[test]
fn options_are_reordered_to_ascending_number_on_encode() {
    let mut message = Message::new(MessageType::Con, Code::PUT, 1, vec![1]);
    message.push_option(CoapOption::new(60, vec![1]));
    message.push_option(CoapOption::new(11, vec![2]));
    let bytes = encode(&message, DEFAULT_MTU).unwrap();
    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded.options[0].number, 11);
    assert_eq!(decoded.options[1].number, 60);
}
