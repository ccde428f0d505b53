//! Room subscription membership.
//!
//! Tracks which connections receive each room's traffic. Two indexes are kept
//! in step: room -> subscribers for fan-out, and connection -> rooms so that
//! teardown can release every subscription without scanning all rooms.

use dashmap::DashMap;
use huddle_protocol::{ConnectionId, RoomId};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, trace};

/// Membership errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    /// The connection already subscribes to the maximum number of rooms.
    #[error("Maximum of {0} room subscriptions reached")]
    TooManyRooms(usize),
}

/// Room subscription registry.
#[derive(Debug)]
pub struct RoomMembership {
    /// Subscribers per room. Empty rooms are removed.
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    /// Rooms per connection.
    subscriptions: DashMap<ConnectionId, HashSet<RoomId>>,
    /// Maximum rooms a single connection may join.
    max_rooms_per_connection: usize,
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RoomMembership {
    /// Create a registry with a per-connection subscription limit.
    #[must_use]
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            max_rooms_per_connection,
        }
    }

    /// Subscribe a connection to a room.
    ///
    /// Returns `Ok(true)` if the subscription is new and `Ok(false)` if the
    /// connection was already subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::TooManyRooms`] if the connection is at its
    /// subscription limit.
    pub fn join(
        &self,
        connection_id: &ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, MembershipError> {
        let mut conn_rooms = self.subscriptions.entry(connection_id.clone()).or_default();

        if conn_rooms.contains(&room_id) {
            trace!(room = %room_id, connection = %connection_id, "Already subscribed");
            return Ok(false);
        }

        if conn_rooms.len() >= self.max_rooms_per_connection {
            return Err(MembershipError::TooManyRooms(self.max_rooms_per_connection));
        }

        let mut subscribers = self.rooms.entry(room_id).or_default();
        subscribers.insert(connection_id.clone());
        conn_rooms.insert(room_id);

        debug!(
            room = %room_id,
            connection = %connection_id,
            subscribers = subscribers.len(),
            "Subscribed"
        );

        Ok(true)
    }

    /// Unsubscribe a connection from a room.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn leave(&self, connection_id: &ConnectionId, room_id: RoomId) -> bool {
        let removed = self
            .subscriptions
            .get_mut(connection_id)
            .is_some_and(|mut rooms| rooms.remove(&room_id));

        if !removed {
            trace!(room = %room_id, connection = %connection_id, "Leave without subscription");
            return false;
        }

        self.subscriptions
            .remove_if(connection_id, |_, rooms| rooms.is_empty());
        self.remove_subscriber(room_id, connection_id);

        debug!(room = %room_id, connection = %connection_id, "Unsubscribed");
        true
    }

    /// Remove a connection from every room it subscribes to.
    ///
    /// Once this returns, no fan-out through
    /// [`for_each_subscriber`](Self::for_each_subscriber) can reach the
    /// connection. Returns the rooms that were released.
    pub fn release_all(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let Some((_, rooms)) = self.subscriptions.remove(connection_id) else {
            return Vec::new();
        };

        for room_id in &rooms {
            self.remove_subscriber(*room_id, connection_id);
        }

        debug!(connection = %connection_id, rooms = rooms.len(), "Released all subscriptions");
        rooms.into_iter().collect()
    }

    /// Current subscribers of a room.
    #[must_use]
    pub fn subscribers_of(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Visit every subscriber of a room while its subscriber set is locked.
    ///
    /// Joins, leaves and releases touching this room wait until the visit
    /// finishes, so `visit` must not block or call back into membership.
    /// Returns the number of subscribers visited.
    pub fn for_each_subscriber<F>(&self, room_id: RoomId, mut visit: F) -> usize
    where
        F: FnMut(&ConnectionId),
    {
        match self.rooms.get(&room_id) {
            Some(subscribers) => {
                subscribers.iter().for_each(&mut visit);
                subscribers.len()
            }
            None => 0,
        }
    }

    /// Whether a connection subscribes to a room.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &ConnectionId, room_id: RoomId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|s| s.contains(connection_id))
    }

    /// Rooms a connection subscribes to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.subscriptions
            .get(connection_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of subscribers of a room.
    #[must_use]
    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map_or(0, |s| s.len())
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total number of subscriptions across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|s| s.len()).sum()
    }

    fn remove_subscriber(&self, room_id: RoomId, connection_id: &ConnectionId) {
        if let Some(mut subscribers) = self.rooms.get_mut(&room_id) {
            subscribers.remove(connection_id);
        }
        if self
            .rooms
            .remove_if(&room_id, |_, subscribers| subscribers.is_empty())
            .is_some()
        {
            trace!(room = %room_id, "Dropped empty room");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_join_leave() {
        let membership = RoomMembership::default();
        let room = RoomId::generate();

        assert_eq!(membership.join(&conn("c1"), room), Ok(true));
        assert_eq!(membership.join(&conn("c2"), room), Ok(true));
        assert_eq!(membership.subscriber_count(room), 2);
        assert!(membership.is_subscribed(&conn("c1"), room));

        assert!(membership.leave(&conn("c1"), room));
        assert!(!membership.is_subscribed(&conn("c1"), room));
        assert_eq!(membership.subscribers_of(room), vec![conn("c2")]);
    }

    #[test]
    fn test_join_and_leave_are_idempotent() {
        let membership = RoomMembership::default();
        let room = RoomId::generate();

        assert_eq!(membership.join(&conn("c1"), room), Ok(true));
        assert_eq!(membership.join(&conn("c1"), room), Ok(false));
        assert_eq!(membership.subscriber_count(room), 1);
        assert_eq!(membership.subscription_count(), 1);

        assert!(membership.leave(&conn("c1"), room));
        assert!(!membership.leave(&conn("c1"), room));
        assert!(!membership.leave(&conn("never"), room));
        assert_eq!(membership.room_count(), 0);
    }

    #[test]
    fn test_release_all() {
        let membership = RoomMembership::default();
        let a = RoomId::generate();
        let b = RoomId::generate();

        membership.join(&conn("c1"), a).unwrap();
        membership.join(&conn("c1"), b).unwrap();
        membership.join(&conn("c2"), a).unwrap();

        let mut released = membership.release_all(&conn("c1"));
        released.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(released, expected);

        assert!(membership.rooms_of(&conn("c1")).is_empty());
        assert_eq!(membership.subscribers_of(a), vec![conn("c2")]);
        assert_eq!(membership.subscriber_count(b), 0);
        assert_eq!(membership.room_count(), 1);

        // Releasing again is harmless.
        assert!(membership.release_all(&conn("c1")).is_empty());
    }

    #[test]
    fn test_subscription_limit() {
        let membership = RoomMembership::new(2);
        membership.join(&conn("c1"), RoomId::generate()).unwrap();
        membership.join(&conn("c1"), RoomId::generate()).unwrap();

        assert_eq!(
            membership.join(&conn("c1"), RoomId::generate()),
            Err(MembershipError::TooManyRooms(2))
        );
    }

    #[test]
    fn test_for_each_subscriber() {
        let membership = RoomMembership::default();
        let room = RoomId::generate();
        membership.join(&conn("c1"), room).unwrap();
        membership.join(&conn("c2"), room).unwrap();

        let mut seen = Vec::new();
        let count = membership.for_each_subscriber(room, |c| seen.push(c.clone()));
        seen.sort();

        assert_eq!(count, 2);
        assert_eq!(seen, vec![conn("c1"), conn("c2")]);
        assert_eq!(membership.for_each_subscriber(RoomId::generate(), |_| {}), 0);
    }
}
