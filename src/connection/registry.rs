//! Registry of live connections.
//!
//! `ConnectionRegistry` stores non-owning weak references to
//! [`Connection`]s so that listeners can enumerate and close live
//! connections without keeping closed ones alive. Dead entries are pruned
//! lazily at lookup time or explicitly with [`ConnectionRegistry::prune`].

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::{CloseReason, Connection, ConnectionId};

/// Concurrent map of [`ConnectionId`] to live connections.
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, Weak<Connection>>);

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Retrieve the connection for `id` if it is still alive.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let guard = self.0.get(id);
        let conn = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if conn.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        conn
    }

    /// Track a newly established connection.
    pub fn insert(&self, connection: &Arc<Connection>) {
        self.0.insert(connection.id(), Arc::downgrade(connection));
    }

    /// Stop tracking `id`, typically on connection teardown.
    pub fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// Remove all stale weak references.
    ///
    /// `DashMap::retain` takes per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Prune stale entries, then collect the remaining live connections.
    #[must_use]
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        let mut live = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            if let Some(conn) = weak.upgrade() {
                live.push(conn);
                true
            } else {
                false
            }
        });
        live
    }

    /// Identifiers of live connections.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.active_connections().iter().map(|c| c.id()).collect()
    }

    /// Close every live connection with `reason` and return how many this
    /// call closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.active_connections()
            .iter()
            .filter(|conn| conn.close(reason))
            .count()
    }

    /// Number of tracked entries, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the registry tracks no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("entries", &self.0.len())
            .finish()
    }
}
