//! Frame types for the Huddle protocol.
//!
//! Frames are the fundamental unit of communication in Huddle. Client frames
//! carry requests (register, join, send, typing); server frames carry replies
//! and the events fanned out to connections.

use crate::ids::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version, sent in the `connected` handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded or was not valid in this direction.
    pub const INVALID_FRAME: u16 = 4000;
    /// The operation requires a registered connection.
    pub const NOT_REGISTERED: u16 = 4001;
    /// The target room does not exist.
    pub const ROOM_NOT_FOUND: u16 = 4004;
    /// The sender does not exist.
    pub const SENDER_NOT_FOUND: u16 = 4005;
    /// The connection already subscribes to the maximum number of rooms.
    pub const TOO_MANY_ROOMS: u16 = 4009;
    /// Message content exceeds the configured limit.
    pub const CONTENT_TOO_LONG: u16 = 4013;
    /// Server-side failure, e.g. persistence.
    pub const INTERNAL: u16 = 5000;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Register = 0x01,
    JoinRoom = 0x02,
    LeaveRoom = 0x03,
    SendMessage = 0x04,
    Typing = 0x05,
    Ping = 0x06,
    Pong = 0x07,
    Connected = 0x10,
    Ack = 0x11,
    Error = 0x12,
    UserOnline = 0x20,
    UserOffline = 0x21,
    InitialOnlineUsers = 0x22,
    ReceiveMessage = 0x23,
    UserTyping = 0x24,
    UserJoinedRoom = 0x25,
    UserLeftRoom = 0x26,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Register),
            0x02 => Ok(FrameType::JoinRoom),
            0x03 => Ok(FrameType::LeaveRoom),
            0x04 => Ok(FrameType::SendMessage),
            0x05 => Ok(FrameType::Typing),
            0x06 => Ok(FrameType::Ping),
            0x07 => Ok(FrameType::Pong),
            0x10 => Ok(FrameType::Connected),
            0x11 => Ok(FrameType::Ack),
            0x12 => Ok(FrameType::Error),
            0x20 => Ok(FrameType::UserOnline),
            0x21 => Ok(FrameType::UserOffline),
            0x22 => Ok(FrameType::InitialOnlineUsers),
            0x23 => Ok(FrameType::ReceiveMessage),
            0x24 => Ok(FrameType::UserTyping),
            0x25 => Ok(FrameType::UserJoinedRoom),
            0x26 => Ok(FrameType::UserLeftRoom),
            _ => Err("Invalid frame type"),
        }
    }
}

impl FrameType {
    /// Whether clients are allowed to send this frame type.
    #[must_use]
    pub fn is_client_frame(self) -> bool {
        (self as u8) < 0x10
    }
}

/// A protocol frame.
///
/// Serialized with an internal `type` tag and camelCase field names, so the
/// JSON form of a chat message event reads
/// `{"type":"ReceiveMessage","id":..,"roomId":..,"senderId":..,..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Frame {
    /// Bind the connection to a user.
    #[serde(rename = "register")]
    Register {
        /// Request ID for acknowledgment.
        id: u64,
        /// User owning this connection.
        user_id: UserId,
    },

    /// Subscribe the connection to a room.
    #[serde(rename = "joinRoom")]
    JoinRoom {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to subscribe to.
        room_id: RoomId,
    },

    /// Unsubscribe the connection from a room.
    #[serde(rename = "leaveRoom")]
    LeaveRoom {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to unsubscribe from.
        room_id: RoomId,
    },

    /// Persist and broadcast a chat message.
    #[serde(rename = "sendMessage")]
    SendMessage {
        /// Request ID for acknowledgment.
        id: u64,
        /// Target room.
        room_id: RoomId,
        /// Author of the message.
        sender_id: UserId,
        /// Message text.
        content: String,
    },

    /// Typing indicator change. Never acknowledged.
    #[serde(rename = "typing")]
    Typing {
        /// Room the user is typing in.
        room_id: RoomId,
        /// Typing user.
        user_id: UserId,
        /// Whether the user started or stopped typing.
        is_typing: bool,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response, sent to the originating connection only.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// A user's first connection came up.
    UserOnline {
        /// User that came online.
        user_id: UserId,
    },

    /// A user's last connection went away.
    UserOffline {
        /// User that went offline.
        user_id: UserId,
    },

    /// Users online at registration time, sent to the registering connection.
    InitialOnlineUsers {
        /// Online user IDs.
        user_ids: Vec<UserId>,
    },

    /// A persisted chat message.
    ReceiveMessage {
        /// Message ID.
        id: MessageId,
        /// Room the message belongs to.
        room_id: RoomId,
        /// Author.
        sender_id: UserId,
        /// Message text.
        content: String,
        /// Persistence timestamp, milliseconds since the Unix epoch.
        sent_at: u64,
        /// Author display name, `null` if it could not be resolved.
        display_name: Option<String>,
    },

    /// A user started or stopped typing.
    UserTyping {
        /// Room the signal is scoped to.
        room_id: RoomId,
        /// Typing user.
        user_id: UserId,
        /// Present only when `is_typing` is set and the name resolved.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        /// Typing state.
        is_typing: bool,
    },

    /// A connection subscribed to a room.
    UserJoinedRoom {
        /// Room joined.
        room_id: RoomId,
        /// Acting user, `null` for an unregistered connection.
        user_id: Option<UserId>,
    },

    /// A connection unsubscribed from a room.
    UserLeftRoom {
        /// Room left.
        room_id: RoomId,
        /// Acting user, `null` for an unregistered connection.
        user_id: Option<UserId>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Register { .. } => FrameType::Register,
            Frame::JoinRoom { .. } => FrameType::JoinRoom,
            Frame::LeaveRoom { .. } => FrameType::LeaveRoom,
            Frame::SendMessage { .. } => FrameType::SendMessage,
            Frame::Typing { .. } => FrameType::Typing,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::UserOnline { .. } => FrameType::UserOnline,
            Frame::UserOffline { .. } => FrameType::UserOffline,
            Frame::InitialOnlineUsers { .. } => FrameType::InitialOnlineUsers,
            Frame::ReceiveMessage { .. } => FrameType::ReceiveMessage,
            Frame::UserTyping { .. } => FrameType::UserTyping,
            Frame::UserJoinedRoom { .. } => FrameType::UserJoinedRoom,
            Frame::UserLeftRoom { .. } => FrameType::UserLeftRoom,
        }
    }

    /// Room this frame is scoped to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Frame::JoinRoom { room_id, .. }
            | Frame::LeaveRoom { room_id, .. }
            | Frame::SendMessage { room_id, .. }
            | Frame::Typing { room_id, .. }
            | Frame::ReceiveMessage { room_id, .. }
            | Frame::UserTyping { room_id, .. }
            | Frame::UserJoinedRoom { room_id, .. }
            | Frame::UserLeftRoom { room_id, .. } => Some(*room_id),
            _ => None,
        }
    }

    /// Create a new Register frame.
    #[must_use]
    pub fn register(id: u64, user_id: UserId) -> Self {
        Frame::Register { id, user_id }
    }

    /// Create a new JoinRoom frame.
    #[must_use]
    pub fn join_room(id: u64, room_id: RoomId) -> Self {
        Frame::JoinRoom { id, room_id }
    }

    /// Create a new LeaveRoom frame.
    #[must_use]
    pub fn leave_room(id: u64, room_id: RoomId) -> Self {
        Frame::LeaveRoom { id, room_id }
    }

    /// Create a new SendMessage frame.
    #[must_use]
    pub fn send_message(
        id: u64,
        room_id: RoomId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> Self {
        Frame::SendMessage {
            id,
            room_id,
            sender_id,
            content: content.into(),
        }
    }

    /// Create a new Typing frame.
    #[must_use]
    pub fn typing(room_id: RoomId, user_id: UserId, is_typing: bool) -> Self {
        Frame::Typing {
            room_id,
            user_id,
            is_typing,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let register = Frame::register(1, UserId::generate());
        assert_eq!(register.frame_type(), FrameType::Register);
        assert!(register.frame_type().is_client_frame());

        let online = Frame::UserOnline {
            user_id: UserId::generate(),
        };
        assert_eq!(online.frame_type(), FrameType::UserOnline);
        assert!(!online.frame_type().is_client_frame());
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x04), Ok(FrameType::SendMessage));
        assert_eq!(FrameType::try_from(0x23), Ok(FrameType::ReceiveMessage));
        assert!(FrameType::try_from(0x99).is_err());
    }

    #[test]
    fn test_receive_message_json_shape() {
        let frame = Frame::ReceiveMessage {
            id: MessageId::generate(),
            room_id: RoomId::generate(),
            sender_id: UserId::generate(),
            content: "hi".to_string(),
            sent_at: 1_700_000_000_000,
            display_name: None,
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "ReceiveMessage");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["sentAt"], 1_700_000_000_000_u64);
        // Display name is always present on messages, even when unresolved.
        assert!(value.as_object().unwrap().contains_key("displayName"));
        assert!(value["displayName"].is_null());
    }

    #[test]
    fn test_typing_off_omits_display_name() {
        let frame = Frame::UserTyping {
            room_id: RoomId::generate(),
            user_id: UserId::generate(),
            display_name: None,
            is_typing: false,
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert!(!value.as_object().unwrap().contains_key("displayName"));
        assert_eq!(value["isTyping"], false);
    }

    #[test]
    fn test_client_frame_from_json() {
        let room = RoomId::generate();
        let user = UserId::generate();
        let raw = json!({
            "type": "sendMessage",
            "id": 7,
            "roomId": room.to_string(),
            "senderId": user.to_string(),
            "content": "hello"
        });

        let frame: Frame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame, Frame::send_message(7, room, user, "hello"));
        assert_eq!(frame.room_id(), Some(room));
    }

    #[test]
    fn test_ping_without_timestamp() {
        let frame: Frame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, Frame::ping());
    }
}
