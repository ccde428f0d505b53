//! Connection-to-user bindings.

use dashmap::DashMap;
use huddle_protocol::{ConnectionId, UserId};
use tracing::debug;

/// Maps live connections to the user that registered them.
///
/// A user may own any number of connections; a connection belongs to at most
/// one user. Registering a connection again replaces its binding.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a user.
    ///
    /// Returns the previous binding, if the connection was already registered.
    pub fn register(&self, connection_id: &ConnectionId, user_id: UserId) -> Option<UserId> {
        let previous = self.bindings.insert(connection_id.clone(), user_id);
        debug!(connection = %connection_id, user = %user_id, "Registered connection");
        previous
    }

    /// Remove a connection's binding.
    ///
    /// Returns `None` for a connection that never registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.bindings
            .remove(connection_id)
            .map(|(_, user_id)| user_id)
    }

    /// Look up the user bound to a connection.
    #[must_use]
    pub fn lookup_user(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.bindings.get(connection_id).map(|u| *u)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new("conn-1");
        let user = UserId::generate();

        assert!(registry.register(&conn, user).is_none());
        assert_eq!(registry.lookup_user(&conn), Some(user));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.unregister(&conn), Some(user));
        assert!(registry.lookup_user(&conn).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_twice_last_write_wins() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new("conn-1");
        let first = UserId::generate();
        let second = UserId::generate();

        registry.register(&conn, first);
        assert_eq!(registry.register(&conn, second), Some(first));
        assert_eq!(registry.lookup_user(&conn), Some(second));
    }

    #[test]
    fn test_unregister_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister(&ConnectionId::new("never")).is_none());
    }

    #[test]
    fn test_many_connections_per_user() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        for i in 0..3 {
            registry.register(&ConnectionId::new(format!("conn-{i}")), user);
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.lookup_user(&ConnectionId::new("conn-2")), Some(user));
    }
}
