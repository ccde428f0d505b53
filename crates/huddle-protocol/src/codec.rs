//! Codecs for encoding and decoding Huddle frames.
//!
//! Two encodings are supported:
//!
//! - **Binary**: 4-byte big-endian length prefix followed by a MessagePack body.
//!   Several frames may be concatenated in one transport message.
//! - **Text**: one JSON object per transport message, for browser clients.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Limit that was applied.
        limit: usize,
    },

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire encoding negotiated implicitly by the kind of transport message a
/// client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Length-prefixed MessagePack.
    #[default]
    Binary,
    /// JSON text.
    Text,
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            limit: MAX_FRAME_SIZE,
        });
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    decode_from_limited(buf, MAX_FRAME_SIZE)
}

/// Like [`decode_from`], rejecting frames whose declared length exceeds `limit`.
///
/// The limit is checked against the length prefix, before the body has
/// arrived, so an oversized frame is refused without buffering it.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from_limited(
    buf: &mut BytesMut,
    limit: usize,
) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let limit = limit.min(MAX_FRAME_SIZE);

    if length > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            limit,
        });
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid frame.
pub fn decode_json(text: &str, limit: usize) -> Result<Frame, ProtocolError> {
    if text.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            limit,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MessageId, RoomId, UserId};

    #[test]
    fn test_encode_decode_chat_frames() {
        let room = RoomId::generate();
        let user = UserId::generate();
        let frames = vec![
            Frame::register(1, user),
            Frame::send_message(2, room, user, "Hello, world!"),
            Frame::ReceiveMessage {
                id: MessageId::generate(),
                room_id: room,
                sender_id: user,
                content: "Hello".to_string(),
                sent_at: 42,
                display_name: Some("Alice".to_string()),
            },
            Frame::UserJoinedRoom {
                room_id: room,
                user_id: None,
            },
            Frame::error(3, crate::codes::ROOM_NOT_FOUND, "Room not found"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::join_room(1, RoomId::generate());
        let encoded = encode(&frame).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::join_room(1, RoomId::generate());
        let frame2 = Frame::leave_room(2, RoomId::generate());

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        // Only part of the first frame has arrived.
        let mut partial = buf.split_to(3);
        assert!(decode_from(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let decoded1 = decode_from(&mut partial).unwrap().unwrap();
        let decoded2 = decode_from(&mut partial).unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_limited_decode_rejects_on_prefix() {
        let frame = Frame::send_message(1, RoomId::generate(), UserId::generate(), "x".repeat(64));
        let mut buf = BytesMut::from(&encode(&frame).unwrap()[..LENGTH_PREFIX_SIZE]);

        match decode_from_limited(&mut buf, 16) {
            Err(ProtocolError::FrameTooLarge { limit: 16, .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_codec() {
        let frame = Frame::typing(RoomId::generate(), UserId::generate(), true);
        let text = encode_json(&frame).unwrap();
        assert!(text.contains("\"type\":\"typing\""));
        assert_eq!(decode_json(&text, 1024).unwrap(), frame);

        assert!(matches!(
            decode_json(&text, 8),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            decode_json("{\"type\":\"nope\"}", 1024),
            Err(ProtocolError::Json(_))
        ));
    }
}
