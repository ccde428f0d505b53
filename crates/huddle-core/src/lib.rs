//! # huddle-core
//!
//! Presence tracking, room membership and message fan-out for the Huddle
//! chat server.
//!
//! This crate provides the building blocks behind [`ChatHub`]:
//!
//! - **Registry** - Connection-to-user bindings
//! - **Presence** - Reference-counted online/offline tracking
//! - **Membership** - Room subscriptions per connection
//! - **Broadcast** - Bounded per-connection outbound queues and fan-out
//! - **Pipeline** - Validate, persist, then broadcast chat messages
//! - **Typing** - Transient typing indicators
//! - **Store** - Collaborator traits and an in-memory backend
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   ChatHub   │────▶│  Pipeline   │──▶ MessageStore
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        └────────────│ Broadcaster │◀────│ Membership  │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod broadcast;
pub mod hub;
pub mod membership;
pub mod message;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod store;
pub mod typing;

pub use broadcast::{BroadcastReport, ConnectionSink, ConnectionStream, Delivery, RoomBroadcaster};
pub use hub::{ChatHub, HubConfig, HubError, HubStats};
pub use membership::{MembershipError, RoomMembership};
pub use message::{Message, NewMessage};
pub use pipeline::{MessagePipeline, PipelineError};
pub use presence::{PresenceChange, PresenceTracker};
pub use registry::ConnectionRegistry;
pub use store::{
    MemoryStore, MessageStore, NewRoom, Room, RoomDirectory, StoreError, UserDirectory,
    UserProfile,
};
pub use typing::{TypingRelay, TypingSignal};
