//! Chat message types.
//!
//! A [`NewMessage`] is what a sender submits; a [`Message`] is what the store
//! hands back once it has assigned an id and a timestamp. Persisted messages
//! are never mutated.

use huddle_protocol::{Frame, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// A message accepted for persistence but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Target room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
}

impl NewMessage {
    /// Create a new unsaved message.
    #[must_use]
    pub fn new(room_id: RoomId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            room_id,
            sender_id,
            content: content.into(),
        }
    }

    /// Attach the identity and timestamp assigned at persistence time.
    #[must_use]
    pub fn into_persisted(self, id: MessageId, sent_at: u64) -> Message {
        Message {
            id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            sent_at,
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Persistence timestamp, milliseconds since the Unix epoch.
    pub sent_at: u64,
}

impl Message {
    /// Build the `ReceiveMessage` event for this message.
    #[must_use]
    pub fn to_frame(&self, display_name: Option<String>) -> Frame {
        Frame::ReceiveMessage {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content.clone(),
            sent_at: self.sent_at,
            display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_persisted() {
        let room = RoomId::generate();
        let sender = UserId::generate();
        let id = MessageId::generate();

        let msg = NewMessage::new(room, sender, "hello").into_persisted(id, 1234);
        assert_eq!(msg.id, id);
        assert_eq!(msg.room_id, room);
        assert_eq!(msg.sender_id, sender);
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.sent_at, 1234);
    }

    #[test]
    fn test_message_frame_carries_display_name() {
        let msg = NewMessage::new(RoomId::generate(), UserId::generate(), "hi")
            .into_persisted(MessageId::generate(), 1);

        match msg.to_frame(Some("Alice".to_string())) {
            Frame::ReceiveMessage {
                content,
                display_name,
                ..
            } => {
                assert_eq!(content, "hi");
                assert_eq!(display_name.as_deref(), Some("Alice"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_now_millis_advances() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
