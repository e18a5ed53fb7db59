//! Connection tracking module
//!
//! Keeps a process-wide table of live transport connections:
//! - Connection id allocation
//! - Peer address and connect time for diagnostics
//! - Server-initiated disconnects (used on shutdown)
//!
//! Network membership lives in [`crate::relay::NetworkRegistry`], not here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::relay::ConnectionId;

/// A live transport connection
pub struct ConnectionInfo {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time the connection was registered
    pub connected_at: DateTime<Utc>,
    /// Signalled when the server wants this connection closed
    close_signal: Notify,
}

impl ConnectionInfo {
    fn new(id: ConnectionId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            connected_at: Utc::now(),
            close_signal: Notify::new(),
        }
    }

    /// Ask the connection's event loop to close
    ///
    /// The request is remembered if the loop is not waiting yet.
    pub fn request_close(&self) {
        self.close_signal.notify_one();
    }

    /// Wait until a close has been requested
    pub async fn closed(&self) {
        self.close_signal.notified().await;
    }

    /// Time since the connection was registered
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Thread-safe connection manager
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionInfo>>,
    next_id: AtomicU64,
    /// Set once `disconnect_all` has run; later registrations close at once
    closing: AtomicBool,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
        }
    }

    /// Allocate an id and register a connection
    pub fn register(&self, address: SocketAddr) -> Arc<ConnectionInfo> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(ConnectionInfo::new(id, address));
        self.connections.insert(id, info.clone());

        debug!(connection_id = id, address = %address, "Connection registered");

        // Checked after the insert so a concurrent `disconnect_all` either
        // sees this entry or this check sees the flag
        if self.closing.load(Ordering::SeqCst) {
            debug!(connection_id = id, "Registered while closing, requesting close");
            info.request_close();
        }

        info
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Remove a connection
    pub fn remove(&self, id: ConnectionId) {
        if let Some((_, info)) = self.connections.remove(&id) {
            info!(
                connection_id = id,
                address = %info.address,
                duration_secs = info.age().num_seconds(),
                "Connection removed"
            );
        }
    }

    /// Ask one connection to close
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        match self.get(id) {
            Some(info) => {
                info.request_close();
                true
            }
            None => false,
        }
    }

    /// Ask every connection to close, including any registered afterwards
    pub fn disconnect_all(&self) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let ids = self.connection_ids();
        ids.iter().filter(|&&id| self.disconnect(id)).count()
    }

    /// Get the count of live connections
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Get list of all connection IDs
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|r| *r.key()).collect()
    }

    /// Whether `disconnect_all` has been called
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let manager = ConnectionManager::new();
        let a = manager.register(test_address());
        let b = manager.register(test_address());

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn test_get_and_remove() {
        let manager = ConnectionManager::new();
        let info = manager.register(test_address());
        let id = info.id;

        assert_eq!(manager.get(id).unwrap().address, test_address());

        manager.remove(id);
        assert!(manager.get(id).is_none());
        assert_eq!(manager.count(), 0);

        // Removing twice is harmless
        manager.remove(id);
        assert!(!manager.disconnect(id));
    }

    #[test]
    fn test_closed_waits_for_request() {
        let manager = ConnectionManager::new();
        let info = manager.register(test_address());

        let mut closed = task::spawn(info.closed());
        assert_pending!(closed.poll());

        assert!(manager.disconnect(info.id));
        assert!(closed.is_woken());
        assert_ready!(closed.poll());
    }

    #[test]
    fn test_close_request_is_remembered() {
        let manager = ConnectionManager::new();
        let info = manager.register(test_address());

        assert!(manager.disconnect(info.id));

        // The permit was stored before anyone waited
        let mut closed = task::spawn(info.closed());
        assert_ready!(closed.poll());
    }

    #[test]
    fn test_disconnect_all() {
        let manager = ConnectionManager::new();
        let a = manager.register(test_address());
        let b = manager.register("127.0.0.1:2".parse().unwrap());

        assert!(!manager.is_closing());
        assert_eq!(manager.disconnect_all(), 2);
        assert!(manager.is_closing());

        for info in [a, b] {
            let mut closed = task::spawn(info.closed());
            assert_ready!(closed.poll());
        }
    }

    #[test]
    fn test_register_after_disconnect_all_is_closed() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.disconnect_all(), 0);

        let late = manager.register(test_address());
        assert_eq!(manager.count(), 1);

        let mut closed = task::spawn(late.closed());
        assert_ready!(closed.poll());
    }
}
