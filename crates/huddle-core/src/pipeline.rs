//! The chat message pipeline: validate, persist, then broadcast.
//!
//! A message that fails validation is neither stored nor sent. A message that
//! fails to persist is never sent. Once persisted, delivery is best effort;
//! a subscriber that misses the broadcast sees the message in history.
//!
//! Persist and broadcast run under a per-room lock, so every subscriber of a
//! room observes messages in the order the store assigned their timestamps.

use crate::broadcast::RoomBroadcaster;
use crate::message::{Message, NewMessage};
use crate::store::{MessageStore, RoomDirectory, StoreError, UserDirectory};
use dashmap::DashMap;
use huddle_protocol::{codes, RoomId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Reasons a message was not sent.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Content exceeds the configured limit.
    #[error("Message content is {len} characters, limit is {limit}")]
    ContentTooLong {
        /// Content length in characters.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The target room does not exist.
    #[error("Room does not exist: {0}")]
    RoomNotFound(RoomId),

    /// The sender does not exist.
    #[error("Sender user does not exist: {0}")]
    SenderNotFound(UserId),

    /// A room or user lookup failed.
    #[error("Lookup failed: {0}")]
    Lookup(#[source] StoreError),

    /// The message could not be persisted.
    #[error("Failed to persist message: {0}")]
    Persistence(#[source] StoreError),
}

impl PipelineError {
    /// Wire error code reported to the sender.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::ContentTooLong { .. } => codes::CONTENT_TOO_LONG,
            Self::RoomNotFound(_) => codes::ROOM_NOT_FOUND,
            Self::SenderNotFound(_) => codes::SENDER_NOT_FOUND,
            Self::Lookup(_) | Self::Persistence(_) => codes::INTERNAL,
        }
    }

    /// Whether the error was caused by the request rather than the server.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ContentTooLong { .. } | Self::RoomNotFound(_) | Self::SenderNotFound(_)
        )
    }
}

/// Validates, persists and broadcasts chat messages.
pub struct MessagePipeline {
    rooms: Arc<dyn RoomDirectory>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<RoomBroadcaster>,
    /// Serializes persist+broadcast per room.
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    max_content_length: usize,
}

impl MessagePipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        rooms: Arc<dyn RoomDirectory>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<RoomBroadcaster>,
        max_content_length: usize,
    ) -> Self {
        Self {
            rooms,
            users,
            store,
            broadcaster,
            room_locks: DashMap::new(),
            max_content_length,
        }
    }

    /// Validate, persist and broadcast a message.
    ///
    /// # Errors
    ///
    /// Returns a rejection (`ContentTooLong`, `RoomNotFound`,
    /// `SenderNotFound`) before anything is stored, or a lookup/persistence
    /// failure. No broadcast happens on any error.
    pub async fn send_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: String,
    ) -> Result<Message, PipelineError> {
        let len = content.chars().count();
        if len > self.max_content_length {
            return Err(PipelineError::ContentTooLong {
                len,
                limit: self.max_content_length,
            });
        }

        if !self
            .rooms
            .room_exists(room_id)
            .await
            .map_err(PipelineError::Lookup)?
        {
            return Err(PipelineError::RoomNotFound(room_id));
        }

        if self
            .users
            .get_user(sender_id)
            .await
            .map_err(PipelineError::Lookup)?
            .is_none()
        {
            return Err(PipelineError::SenderNotFound(sender_id));
        }

        let lock = self.room_lock(room_id);
        let result = {
            let _guard = lock.lock().await;
            self.persist_and_broadcast(NewMessage::new(room_id, sender_id, content))
                .await
        };
        drop(lock);
        self.room_locks
            .remove_if(&room_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Number of rooms with a send in progress.
    #[must_use]
    pub fn active_rooms(&self) -> usize {
        self.room_locks.len()
    }

    async fn persist_and_broadcast(&self, message: NewMessage) -> Result<Message, PipelineError> {
        let room_id = message.room_id;
        let message = self.store.persist(message).await.map_err(|e| {
            warn!(room = %room_id, error = %e, "Message persistence failed");
            PipelineError::Persistence(e)
        })?;

        let display_name = match self.users.get_user(message.sender_id).await {
            Ok(user) => user.map(|u| u.display_name),
            Err(e) => {
                debug!(user = %message.sender_id, error = %e, "Display name lookup failed");
                None
            }
        };

        let report = self
            .broadcaster
            .broadcast_to_room(message.room_id, message.to_frame(display_name));

        debug!(
            room = %message.room_id,
            message = %message.id,
            recipients = report.delivered,
            "Message sent"
        );

        Ok(message)
    }

    fn room_lock(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        Arc::clone(&self.room_locks.entry(room_id).or_default())
    }
}
