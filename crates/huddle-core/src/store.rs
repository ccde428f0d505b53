//! Collaborator interfaces consumed by the engine, plus an in-memory backend.
//!
//! The engine never owns users, rooms or message storage. It reaches them
//! through three narrow traits:
//!
//! - [`RoomDirectory`] answers "does this room exist"
//! - [`UserDirectory`] resolves a user and its display name
//! - [`MessageStore`] persists messages and serves history
//!
//! [`MemoryStore`] implements all three and is what tests and single-process
//! deployments without a database use.

use crate::message::{now_millis, Message, NewMessage};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised by collaborator backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request was malformed for this backend.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Read-only view of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User ID.
    pub id: UserId,
    /// Unique handle.
    pub user_name: String,
    /// Human-readable name shown next to messages.
    pub display_name: String,
}

/// A chat room as stored by the administration side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room ID.
    pub id: RoomId,
    /// Display name of the room.
    pub name: String,
    /// Private rooms are scoped to their participant list.
    pub is_private: bool,
    /// The two users of a direct-message room.
    pub direct_pair: Option<[UserId; 2]>,
    /// Participants of a private room.
    pub participant_ids: Vec<UserId>,
}

/// Request to create a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    /// Display name of the room.
    pub name: String,
    /// Whether the room is private.
    #[serde(default)]
    pub is_private: bool,
    /// Participants of a private room. Ignored for public rooms.
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
    /// Mark a private two-participant room as a direct-message room.
    #[serde(default)]
    pub direct: bool,
}

impl NewRoom {
    /// Validate the request and build the stored room.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for an empty name or a direct room
    /// without exactly two distinct participants.
    pub fn into_room(self, id: RoomId) -> Result<Room, StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Invalid("room name cannot be empty".into()));
        }

        let mut participant_ids = if self.is_private {
            self.participant_ids
        } else {
            Vec::new()
        };
        participant_ids.sort();
        participant_ids.dedup();

        let direct_pair = if self.direct {
            match participant_ids.as_slice() {
                [a, b] if self.is_private => Some([*a, *b]),
                _ => {
                    return Err(StoreError::Invalid(
                        "direct rooms need exactly two participants".into(),
                    ))
                }
            }
        } else {
            None
        };

        Ok(Room {
            id,
            name: self.name,
            is_private: self.is_private,
            direct_pair,
            participant_ids,
        })
    }
}

/// Room existence check.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Whether a room with this ID exists.
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError>;
}

/// User lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user, `Ok(None)` if it does not exist.
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError>;
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its ID and timestamp.
    ///
    /// Timestamps assigned to one room never decrease, so persisted order and
    /// timestamp order agree.
    async fn persist(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Fetch a page of a room's history.
    ///
    /// Skips the `skip` newest messages, takes the next `take`, and returns
    /// them oldest first.
    async fn fetch_history(
        &self,
        room_id: RoomId,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

/// In-memory implementation of every collaborator trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<UserId, UserProfile>,
    user_names: DashMap<String, UserId>,
    rooms: DashMap<RoomId, Room>,
    /// Per-room message logs in persistence order.
    messages: RwLock<HashMap<RoomId, Vec<Message>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the user name is taken.
    pub fn create_user(
        &self,
        user_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<UserProfile, StoreError> {
        let user_name = user_name.into();
        match self.user_names.entry(user_name.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "user name '{user_name}' is taken"
            ))),
            Entry::Vacant(slot) => {
                let profile = UserProfile {
                    id: UserId::generate(),
                    user_name,
                    display_name: display_name.into(),
                };
                self.users.insert(profile.id, profile.clone());
                slot.insert(profile.id);
                debug!(user = %profile.id, "Created user");
                Ok(profile)
            }
        }
    }

    /// Create a room.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the request is malformed.
    pub fn create_room(&self, request: NewRoom) -> Result<Room, StoreError> {
        let room = request.into_room(RoomId::generate())?;
        self.rooms.insert(room.id, room.clone());
        debug!(room = %room.id, "Created room");
        Ok(room)
    }

    /// Total number of persisted messages in a room.
    pub async fn message_count(&self, room_id: RoomId) -> usize {
        self.messages
            .read()
            .await
            .get(&room_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl RoomDirectory for MemoryStore {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        Ok(self.rooms.contains_key(&room_id))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut messages = self.messages.write().await;
        let log = messages.entry(message.room_id).or_default();

        // Clock steps backwards must not reorder the log.
        let floor = log.last().map_or(0, |m| m.sent_at);
        let sent_at = now_millis().max(floor);

        let stored = message.into_persisted(MessageId::generate(), sent_at);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_history(
        &self,
        room_id: RoomId,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let Some(log) = messages.get(&room_id) else {
            return Ok(Vec::new());
        };

        let end = log.len().saturating_sub(skip);
        let start = end.saturating_sub(take);
        Ok(log[start..end].to_vec())
    }
}
