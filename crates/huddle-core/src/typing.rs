//! Typing indicator relay.
//!
//! Typing signals are never persisted and never validated: a stale or bogus
//! signal is harmless noise that clients clear on their own after a short
//! debounce. The signal goes to every subscriber of the room, including the
//! typing user's other connections.

use crate::broadcast::{BroadcastReport, RoomBroadcaster};
use crate::store::UserDirectory;
use huddle_protocol::{Frame, RoomId, UserId};
use std::sync::Arc;
use tracing::{debug, trace};

/// A transient typing state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    /// Room the signal is scoped to.
    pub room_id: RoomId,
    /// Typing user.
    pub user_id: UserId,
    /// Display name, only resolved when typing starts.
    pub display_name: Option<String>,
    /// Typing state.
    pub is_typing: bool,
}

impl TypingSignal {
    /// Build the `UserTyping` event.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::UserTyping {
            room_id: self.room_id,
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            is_typing: self.is_typing,
        }
    }
}

/// Relays typing signals to room subscribers.
pub struct TypingRelay {
    users: Arc<dyn UserDirectory>,
    broadcaster: Arc<RoomBroadcaster>,
}

impl TypingRelay {
    /// Create a relay.
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, broadcaster: Arc<RoomBroadcaster>) -> Self {
        Self { users, broadcaster }
    }

    /// Broadcast a typing state change to the room.
    pub async fn set_typing(
        &self,
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    ) -> BroadcastReport {
        let display_name = if is_typing {
            self.display_name(user_id).await
        } else {
            None
        };

        let signal = TypingSignal {
            room_id,
            user_id,
            display_name,
            is_typing,
        };

        trace!(room = %room_id, user = %user_id, is_typing, "Typing signal");
        self.broadcaster.broadcast_to_room(room_id, signal.to_frame())
    }

    async fn display_name(&self, user_id: UserId) -> Option<String> {
        match self.users.get_user(user_id).await {
            Ok(user) => user.map(|u| u.display_name),
            Err(e) => {
                debug!(user = %user_id, error = %e, "Display name lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::RoomMembership;
    use crate::store::MemoryStore;
    use huddle_protocol::ConnectionId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_typing_display_name_only_when_typing() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user("alice", "Alice").unwrap();
        let membership = Arc::new(RoomMembership::default());
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::clone(&membership)));
        let relay = TypingRelay::new(store, Arc::clone(&broadcaster));

        let room = RoomId::generate();
        let (tx, mut rx) = mpsc::channel(8);
        broadcaster.attach(ConnectionId::new("c1"), tx);
        membership.join(&ConnectionId::new("c1"), room).unwrap();

        relay.set_typing(room, alice.id, true).await;
        relay.set_typing(room, alice.id, false).await;

        let on = rx.recv().await.unwrap();
        assert_eq!(
            *on,
            Frame::UserTyping {
                room_id: room,
                user_id: alice.id,
                display_name: Some("Alice".to_string()),
                is_typing: true,
            }
        );

        let off = rx.recv().await.unwrap();
        assert_eq!(
            *off,
            Frame::UserTyping {
                room_id: room,
                user_id: alice.id,
                display_name: None,
                is_typing: false,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_user_still_relayed() {
        let store = Arc::new(MemoryStore::new());
        let membership = Arc::new(RoomMembership::default());
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::clone(&membership)));
        let relay = TypingRelay::new(store, Arc::clone(&broadcaster));

        let room = RoomId::generate();
        let (tx, mut rx) = mpsc::channel(8);
        broadcaster.attach(ConnectionId::new("c1"), tx);
        membership.join(&ConnectionId::new("c1"), room).unwrap();

        let report = relay.set_typing(room, UserId::generate(), true).await;
        assert_eq!(report.delivered, 1);
        match &*rx.recv().await.unwrap() {
            Frame::UserTyping { display_name, .. } => assert!(display_name.is_none()),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
