//! Directory of live connections.
//!
//! Lookups never fail: a missing connection is reported as `None` or left
//! out of the returned snapshot, since a peer can disconnect between the
//! moment a message is queued and the moment it is routed.

use crate::connection::Connection;
use crate::model::{ConnectionId, PersonaSessionId};
use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live connections keyed by id, shared by the accept loop and every lobby
/// operation that routes to a peer.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// Next available connection ID
    next_connection_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Empty registry. Ids start at 1.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Allocates a connection id at accept time.
    pub fn next_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a connection. Re-registering an id replaces the previous
    /// entry, which is returned.
    pub fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        info!("Connection {} registered from {}", connection.id(), connection.addr());
        self.connections.insert(connection.id(), connection)
    }

    /// Drops a connection, returning it if it was still registered.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            info!("Connection {} unregistered", id);
        }
        removed
    }

    /// Live handle for `id`, if still registered.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Lookup by peer address, for cleanup paths that only know the socket.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().addr() == addr)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Holder of persona session `id`. Used when a newer login replaces
    /// the session and its previous holder must be disconnected.
    pub fn find_by_persona_session(&self, id: PersonaSessionId) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .with_state(|s| s.persona_session.as_ref().is_some_and(|ps| ps.id == id))
            })
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Every connection holding a persona session for `vers`.
    pub fn by_title(&self, vers: &str) -> Vec<Arc<Connection>> {
        self.sweep_closed();
        let mut found: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .with_state(|s| s.persona_session.as_ref().is_some_and(|ps| ps.vers == vers))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by_key(|conn| conn.id());
        found
    }

    /// Like [`ConnectionRegistry::by_title`] for several versions at once.
    pub fn by_titles(&self, family: &[String]) -> Vec<Arc<Connection>> {
        let mut found = Vec::new();
        for vers in family {
            found.extend(self.by_title(vers));
        }
        found.sort_by_key(|conn| conn.id());
        found
    }

    /// Removes entries whose transport is gone. Returns the evicted ids.
    pub fn sweep_closed(&self) -> Vec<ConnectionId> {
        let closed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_open())
            .map(|entry| *entry.key())
            .collect();

        for id in &closed {
            self.connections.remove(id);
            debug!("Evicted closed connection {}", id);
        }

        closed
    }

    /// Snapshot of registered ids, for the leftover-session sweep.
    pub fn active_ids(&self) -> HashSet<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// First spawn service that is available and not already hosting.
    pub fn find_available_spawn_service(&self, family: &[String]) -> Option<Arc<Connection>> {
        let mut candidates: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .filter(|entry| {
                entry.value().with_state(|s| {
                    s.spawn_service
                        && !s.hosting
                        && s.vers().is_some_and(|v| family.iter().any(|f| f == v))
                })
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        candidates.sort_by_key(|conn| conn.id());
        candidates.into_iter().next()
    }

    /// Number of registered connections, closed ones included until swept.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
