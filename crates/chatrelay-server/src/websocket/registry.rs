//! Set of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use chatrelay_core::ConnectionId;
use parking_lot::RwLock;
use tracing::debug;

use super::connection::ClientConnection;

/// Live connections keyed by id.
///
/// Reads (snapshots for fan-out) take the shared lock; register and
/// unregister take the exclusive one. Sockets are never touched while the
/// lock is held.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and mark it open.
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = connection.mark_open();
        let id = connection.id.clone();
        let _ = self.connections.write().insert(id.clone(), connection);
        debug!(conn_id = %id, "connection registered");
    }

    /// Remove a connection and close it.
    ///
    /// Idempotent: returns `true` only for the call that removed it.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(connection) => {
                let _ = connection.close();
                debug!(conn_id = %id, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Unregister every connection. Returns how many were removed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.write().drain().collect();
        for (_, connection) in &drained {
            let _ = connection.close();
        }
        drained.len()
    }

    /// Connections registered at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
