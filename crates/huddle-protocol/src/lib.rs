//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle chat engine.
//!
//! This crate defines the frames exchanged between Huddle clients and the
//! server, the identifier types they carry, and the binary (MessagePack) and
//! text (JSON) codecs.
//!
//! ## Frame Types
//!
//! - `register` - Bind a connection to a user
//! - `joinRoom` / `leaveRoom` - Room subscription
//! - `sendMessage` / `typing` - Room traffic
//! - `UserOnline`, `ReceiveMessage`, `UserTyping`, ... - Server events
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Frame, RoomId};
//!
//! let frame = Frame::join_room(1, RoomId::generate());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod ids;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{codes, Frame, FrameType, PROTOCOL_VERSION};
pub use ids::{ConnectionId, MessageId, RoomId, UserId};
