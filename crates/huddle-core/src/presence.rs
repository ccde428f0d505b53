//! Presence tracking for Huddle.
//!
//! Presence is derived from connection counts: a user is online while at
//! least one of its connections is alive. Only the 0 -> 1 and 1 -> 0
//! transitions produce a [`PresenceChange`]; opening a second tab or closing
//! one of several is silent.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::{Frame, UserId};
use tracing::{debug, trace};

/// A presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The user's first connection came up.
    Online(UserId),
    /// The user's last connection went away.
    Offline(UserId),
}

impl PresenceChange {
    /// The user whose presence changed.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Online(user_id) | Self::Offline(user_id) => *user_id,
        }
    }

    /// Build the event broadcast to every connection.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match *self {
            Self::Online(user_id) => Frame::UserOnline { user_id },
            Self::Offline(user_id) => Frame::UserOffline { user_id },
        }
    }
}

/// Reference-counted presence tracker.
///
/// Transitions are reported through an `emit` callback that runs while the
/// user's counter is still locked, so the events of one user reach the
/// callback in the same order as the counter changes.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Live connection count per online user. Offline users have no entry.
    counts: DashMap<UserId, usize>,
}

impl PresenceTracker {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection for a user.
    ///
    /// Calls `emit` with [`PresenceChange::Online`] and returns `true` if this
    /// is the user's first connection.
    pub fn on_connect<F>(&self, user_id: UserId, emit: F) -> bool
    where
        F: FnOnce(PresenceChange),
    {
        let mut count = self.counts.entry(user_id).or_insert(0);
        *count += 1;

        if *count == 1 {
            debug!(user = %user_id, "Presence: user online");
            emit(PresenceChange::Online(user_id));
            true
        } else {
            trace!(user = %user_id, connections = *count, "Presence: additional connection");
            false
        }
    }

    /// Record a closed connection for a user.
    ///
    /// Calls `emit` with [`PresenceChange::Offline`] and returns `true` if this
    /// was the user's last connection. Unknown users are ignored.
    pub fn on_disconnect<F>(&self, user_id: UserId, emit: F) -> bool
    where
        F: FnOnce(PresenceChange),
    {
        match self.counts.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);

                if *count == 0 {
                    debug!(user = %user_id, "Presence: user offline");
                    emit(PresenceChange::Offline(user_id));
                    entry.remove();
                    true
                } else {
                    trace!(user = %user_id, connections = *count, "Presence: connection closed");
                    false
                }
            }
            Entry::Vacant(_) => {
                trace!(user = %user_id, "Presence: disconnect for untracked user ignored");
                false
            }
        }
    }

    /// Whether a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connection_count(user_id) > 0
    }

    /// Number of live connections of a user.
    #[must_use]
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.counts.get(&user_id).map_or(0, |c| *c)
    }

    /// All users that are currently online.
    #[must_use]
    pub fn snapshot_online_users(&self) -> Vec<UserId> {
        self.counts
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connect_emits_online() {
        let presence = PresenceTracker::new();
        let user = UserId::generate();
        let mut events = Vec::new();

        assert!(presence.on_connect(user, |c| events.push(c)));
        assert!(!presence.on_connect(user, |c| events.push(c)));

        assert_eq!(events, vec![PresenceChange::Online(user)]);
        assert_eq!(presence.connection_count(user), 2);
        assert!(presence.is_online(user));
    }

    #[test]
    fn test_last_disconnect_emits_offline() {
        let presence = PresenceTracker::new();
        let user = UserId::generate();
        let mut events = Vec::new();

        for _ in 0..3 {
            presence.on_connect(user, |c| events.push(c));
        }
        for _ in 0..3 {
            presence.on_disconnect(user, |c| events.push(c));
        }

        assert_eq!(
            events,
            vec![PresenceChange::Online(user), PresenceChange::Offline(user)]
        );
        assert!(!presence.is_online(user));
        assert_eq!(presence.online_count(), 0);
    }

    #[test]
    fn test_disconnect_untracked_user_is_noop() {
        let presence = PresenceTracker::new();
        let user = UserId::generate();

        assert!(!presence.on_disconnect(user, |_| panic!("no event expected")));
        assert_eq!(presence.connection_count(user), 0);

        // A late duplicate disconnect after going offline is also silent.
        presence.on_connect(user, |_| {});
        presence.on_disconnect(user, |_| {});
        assert!(!presence.on_disconnect(user, |_| panic!("no event expected")));
    }

    #[test]
    fn test_snapshot_online_users() {
        let presence = PresenceTracker::new();
        let alice = UserId::generate();
        let bob = UserId::generate();

        presence.on_connect(alice, |_| {});
        presence.on_connect(bob, |_| {});
        presence.on_connect(bob, |_| {});
        presence.on_disconnect(alice, |_| {});

        assert_eq!(presence.snapshot_online_users(), vec![bob]);
    }

    #[test]
    fn test_change_frames() {
        let user = UserId::generate();
        assert_eq!(
            PresenceChange::Online(user).to_frame(),
            Frame::UserOnline { user_id: user }
        );
        assert_eq!(PresenceChange::Offline(user).user_id(), user);
    }
}
