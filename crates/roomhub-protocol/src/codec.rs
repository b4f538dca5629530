//! Codec for encoding and decoding roomhub messages.
//!
//! Messages are JSON objects. Outbound frames may carry several messages
//! separated by a newline so that a burst of queued messages costs a single
//! transport write.

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Borrow;
use thiserror::Error;

use crate::frames::WireMessage;

/// Maximum inbound message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 10_000;

/// Separator between messages in a coalesced frame.
pub const BATCH_SEPARATOR: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &WireMessage) -> Result<Bytes, ProtocolError> {
    let data = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    Ok(Bytes::from(data))
}

/// Encode a message into an existing buffer, separating it from any
/// message already in the buffer.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_into(message: &WireMessage, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    if !buf.is_empty() {
        buf.put_u8(BATCH_SEPARATOR);
    }
    let mut writer = buf.writer();
    serde_json::to_writer(&mut writer, message).map_err(ProtocolError::Encode)?;
    Ok(())
}

/// Encode several messages into one newline-separated frame.
///
/// # Errors
///
/// Returns an error if any message fails to serialize.
pub fn encode_batch<M>(messages: &[M]) -> Result<Bytes, ProtocolError>
where
    M: Borrow<WireMessage>,
{
    let mut buf = BytesMut::with_capacity(messages.len() * 128);
    for message in messages {
        encode_into(message.borrow(), &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode a single inbound message, enforcing [`MAX_MESSAGE_SIZE`].
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid message.
pub fn decode(data: &[u8]) -> Result<WireMessage, ProtocolError> {
    decode_with_limit(data, MAX_MESSAGE_SIZE)
}

/// Decode a single inbound message with a custom size limit.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid message.
pub fn decode_with_limit(data: &[u8], max: usize) -> Result<WireMessage, ProtocolError> {
    if data.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max,
        });
    }
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Split a coalesced frame back into its messages.
///
/// # Errors
///
/// Returns an error if any line is not a valid message.
pub fn decode_batch(data: &[u8]) -> Result<Vec<WireMessage>, ProtocolError> {
    data.split(|b| *b == BATCH_SEPARATOR)
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| serde_json::from_slice(line).map_err(ProtocolError::Decode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::MessageType;

    #[test]
    fn test_decode_rejects_oversized() {
        let content = "a".repeat(MAX_MESSAGE_SIZE);
        let msg = WireMessage::chat("room", "alice", content);
        let encoded = encode(&msg).unwrap();
        assert!(encoded.len() > MAX_MESSAGE_SIZE);

        match decode(&encoded) {
            Err(ProtocolError::MessageTooLarge { size, max }) => {
                assert_eq!(size, encoded.len());
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            decode(b"{not json"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            decode(br#"{"room_id":"r1"}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_batch_preserves_order() {
        let messages = vec![
            WireMessage::chat("room", "alice", "one"),
            WireMessage::chat("room", "bob", "two"),
            WireMessage::system("room", "carol", "carol joined the room"),
        ];

        let frame = encode_batch(&messages).unwrap();
        assert_eq!(
            frame.iter().filter(|b| **b == BATCH_SEPARATOR).count(),
            messages.len() - 1
        );

        let decoded = decode_batch(&frame).unwrap();
        assert_eq!(decoded, messages);
        assert_eq!(decoded[2].kind, MessageType::System);
    }

    #[test]
    fn test_single_message_frame_has_no_separator() {
        let msg = WireMessage::chat("room", "alice", "solo");
        let frame = encode_batch(&[&msg]).unwrap();
        assert!(!frame.contains(&BATCH_SEPARATOR));
        assert_eq!(decode(&frame).unwrap(), msg);
    }
}
