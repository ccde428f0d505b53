//! The chat hub: one entry point per client action.
//!
//! [`ChatHub`] wires the registry, presence tracker, membership, broadcaster,
//! message pipeline and typing relay together. A transport calls
//! [`connect`](ChatHub::connect) when a session opens, forwards each client
//! request to the matching method, and calls
//! [`disconnect`](ChatHub::disconnect) exactly once when the session ends.

use crate::broadcast::{ConnectionStream, RoomBroadcaster, REPLY_RESERVE};
use crate::membership::{MembershipError, RoomMembership};
use crate::message::Message;
use crate::pipeline::{MessagePipeline, PipelineError};
use crate::presence::{PresenceChange, PresenceTracker};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, RoomDirectory, StoreError, UserDirectory};
use crate::typing::TypingRelay;
use huddle_protocol::{codes, ConnectionId, Frame, RoomId, UserId};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Hub errors, reported to the calling connection only.
#[derive(Debug, Error)]
pub enum HubError {
    /// The connection is not attached to the hub.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Room subscription was refused.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// The room does not exist.
    #[error("Room does not exist: {0}")]
    RoomNotFound(RoomId),

    /// A collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HubError {
    /// Wire error code reported to the caller.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::UnknownConnection(_) => codes::NOT_REGISTERED,
            Self::Membership(MembershipError::TooManyRooms(_)) => codes::TOO_MANY_ROOMS,
            Self::RoomNotFound(_) => codes::ROOM_NOT_FOUND,
            Self::Store(_) => codes::INTERNAL,
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
    /// Maximum message length in characters.
    pub max_content_length: usize,
    /// Outbound queue capacity per connection for broadcasts. Direct replies
    /// get [`REPLY_RESERVE`] extra slots.
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_connection: 100,
            max_content_length: 4000,
            outbound_buffer: 1024,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Attached connections.
    pub connections: usize,
    /// Connections bound to a user.
    pub registered: usize,
    /// Users with at least one connection.
    pub online_users: usize,
    /// Rooms with at least one subscriber.
    pub rooms: usize,
    /// Total room subscriptions.
    pub subscriptions: usize,
    /// Frames queued to connections since start.
    pub delivered_total: u64,
    /// Frames dropped on full queues since start.
    pub dropped_total: u64,
}

/// The presence and room-broadcast engine.
pub struct ChatHub {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    /// Presence transitions hold this shared, online snapshots hold it
    /// exclusively, so a snapshot never races an announcement.
    presence_gate: RwLock<()>,
    membership: Arc<RoomMembership>,
    broadcaster: Arc<RoomBroadcaster>,
    pipeline: MessagePipeline,
    typing: TypingRelay,
    rooms: Arc<dyn RoomDirectory>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
}

impl ChatHub {
    /// Create a hub over separate collaborators.
    #[must_use]
    pub fn new(
        config: HubConfig,
        rooms: Arc<dyn RoomDirectory>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        info!("Creating chat hub with config: {:?}", config);

        let membership = Arc::new(RoomMembership::new(config.max_rooms_per_connection));
        let broadcaster = Arc::new(RoomBroadcaster::with_reply_reserve(
            Arc::clone(&membership),
            REPLY_RESERVE,
        ));
        let pipeline = MessagePipeline::new(
            Arc::clone(&rooms),
            Arc::clone(&users),
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            config.max_content_length,
        );
        let typing = TypingRelay::new(users, Arc::clone(&broadcaster));

        Self {
            registry: ConnectionRegistry::new(),
            presence: PresenceTracker::new(),
            presence_gate: RwLock::new(()),
            membership,
            broadcaster,
            pipeline,
            typing,
            rooms,
            store,
            config,
        }
    }

    /// Create a hub over one backend implementing every collaborator.
    #[must_use]
    pub fn with_backend<B>(config: HubConfig, backend: Arc<B>) -> Self
    where
        B: RoomDirectory + UserDirectory + MessageStore + 'static,
    {
        Self::new(config, backend.clone(), backend.clone(), backend)
    }

    /// Open a connection, returning its ID and outbound frame stream.
    pub fn connect(&self) -> (ConnectionId, ConnectionStream) {
        let connection_id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer + REPLY_RESERVE);
        self.broadcaster.attach(connection_id.clone(), tx);
        debug!(connection = %connection_id, "Connection opened");
        (connection_id, rx)
    }

    /// Bind a connection to a user.
    ///
    /// Broadcasts `UserOnline` if this is the user's first connection, then
    /// sends `InitialOnlineUsers` to the caller and returns the same snapshot.
    /// Every presence change queued to the caller before the snapshot is
    /// reflected in it, and every later one is queued after it.
    /// Re-binding a connection to another user takes the old user through the
    /// offline path first.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownConnection`] if the connection is not attached.
    pub fn register(
        &self,
        connection_id: &ConnectionId,
        user_id: UserId,
    ) -> Result<Vec<UserId>, HubError> {
        if !self.broadcaster.is_attached(connection_id) {
            return Err(HubError::UnknownConnection(connection_id.clone()));
        }

        {
            let _gate = self.presence_gate.read();
            match self.registry.register(connection_id, user_id) {
                Some(previous) if previous == user_id => {
                    debug!(connection = %connection_id, user = %user_id, "Repeated registration");
                }
                Some(previous) => {
                    self.presence
                        .on_disconnect(previous, |change| self.announce(change));
                    self.presence.on_connect(user_id, |change| self.announce(change));
                }
                None => {
                    self.presence.on_connect(user_id, |change| self.announce(change));
                }
            }
        }

        let _gate = self.presence_gate.write();
        let online = self.presence.snapshot_online_users();
        self.broadcaster.send_to(
            connection_id,
            Frame::InitialOnlineUsers {
                user_ids: online.clone(),
            },
        );
        Ok(online)
    }

    /// Subscribe a connection to a room.
    ///
    /// The room's subscribers, including the joining connection, receive
    /// `UserJoinedRoom` when the subscription is new.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Membership`] if the subscription limit is reached.
    pub fn join_room(&self, connection_id: &ConnectionId, room_id: RoomId) -> Result<(), HubError> {
        if self.membership.join(connection_id, room_id)? {
            let user_id = self.registry.lookup_user(connection_id);
            self.broadcaster
                .broadcast_to_room(room_id, Frame::UserJoinedRoom { room_id, user_id });
        }
        Ok(())
    }

    /// Unsubscribe a connection from a room.
    ///
    /// The remaining subscribers receive `UserLeftRoom` if the connection was
    /// subscribed. Leaving a room that was never joined is a no-op.
    pub fn leave_room(&self, connection_id: &ConnectionId, room_id: RoomId) {
        if self.membership.leave(connection_id, room_id) {
            let user_id = self.registry.lookup_user(connection_id);
            self.broadcaster
                .broadcast_to_room(room_id, Frame::UserLeftRoom { room_id, user_id });
        }
    }

    /// Persist a message and broadcast it to the room.
    ///
    /// # Errors
    ///
    /// See [`MessagePipeline::send_message`].
    pub async fn send_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> Result<Message, PipelineError> {
        self.pipeline
            .send_message(room_id, sender_id, content.into())
            .await
    }

    /// Relay a typing signal. Returns the number of connections reached.
    pub async fn set_typing(&self, room_id: RoomId, user_id: UserId, is_typing: bool) -> usize {
        self.typing
            .set_typing(room_id, user_id, is_typing)
            .await
            .delivered
    }

    /// Tear down a connection.
    ///
    /// Releases every room subscription first, so no room broadcast can reach
    /// the connection afterwards, then detaches it and finally runs the
    /// presence offline path. Returns the user the connection was bound to.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.membership.release_all(connection_id);
        self.broadcaster.detach(connection_id);

        let user_id = {
            let _gate = self.presence_gate.read();
            let user_id = self.registry.unregister(connection_id)?;
            self.presence
                .on_disconnect(user_id, |change| self.announce(change));
            user_id
        };

        debug!(connection = %connection_id, user = %user_id, "Connection closed");
        Some(user_id)
    }

    /// Users that are online right now.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.snapshot_online_users()
    }

    /// Whether a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.presence.is_online(user_id)
    }

    /// Rooms a connection subscribes to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.membership.rooms_of(connection_id)
    }

    /// Current subscribers of a room.
    #[must_use]
    pub fn subscribers_of(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.membership.subscribers_of(room_id)
    }

    /// Send a frame to a single connection, e.g. a reply.
    pub fn send_to(&self, connection_id: &ConnectionId, frame: Frame) {
        self.broadcaster.send_to(connection_id, frame);
    }

    /// Fetch a page of a room's history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`] for an unknown room.
    pub async fn history(
        &self,
        room_id: RoomId,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, HubError> {
        if !self.rooms.room_exists(room_id).await? {
            return Err(HubError::RoomNotFound(room_id));
        }
        Ok(self.store.fetch_history(room_id, skip, take).await?)
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.broadcaster.stats().attached
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let delivery = self.broadcaster.stats();
        HubStats {
            connections: delivery.attached,
            registered: self.registry.len(),
            online_users: self.presence.online_count(),
            rooms: self.membership.room_count(),
            subscriptions: self.membership.subscription_count(),
            delivered_total: delivery.delivered_total,
            dropped_total: delivery.dropped_total,
        }
    }

    fn announce(&self, change: PresenceChange) {
        let report = self.broadcaster.broadcast_all(change.to_frame());
        debug!(
            user = %change.user_id(),
            change = ?change,
            recipients = report.delivered,
            "Presence change"
        );
    }
}
