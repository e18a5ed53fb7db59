//! Network registry module
//!
//! Authoritative store of network id -> (username -> connection). All state
//! sits behind one lock, so a membership change and the member snapshot
//! derived from it are always taken together. Callers fan out to the
//! returned snapshots after the lock is released.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::{NetworkError, RendezvousError, Result};

/// Unique connection identifier
pub type ConnectionId = u64;

/// Sending half of one client connection
///
/// Cheap to clone; every clone feeds the same outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a payload without waiting
    pub fn send(&self, payload: String) -> Result<()> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => RendezvousError::Network(NetworkError::WriteBufferFull),
            TrySendError::Closed(_) => RendezvousError::Network(NetworkError::ReceiverGone),
        })
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

/// Result of [`NetworkRegistry::join`]
#[derive(Debug)]
pub struct JoinOutcome {
    /// Member count right after the join
    pub member_count: usize,
    /// Every member after the join, joiner included
    pub members: Vec<Connection>,
    /// A different connection that held the username before
    pub displaced: Option<Connection>,
    /// Whether this join created the network
    pub created: bool,
}

impl JoinOutcome {
    /// Members other than `id`
    pub fn others(&self, id: ConnectionId) -> Vec<Connection> {
        self.members
            .iter()
            .filter(|c| c.id() != id)
            .cloned()
            .collect()
    }
}

/// Result of [`NetworkRegistry::leave`] and [`NetworkRegistry::release`]
#[derive(Debug, Default)]
pub struct LeaveOutcome {
    /// Whether a mapping was removed
    pub removed: bool,
    /// Members still in the network after the removal
    pub remaining: Vec<Connection>,
}

impl LeaveOutcome {
    /// True if this removal deleted the network
    pub fn network_removed(&self) -> bool {
        self.removed && self.remaining.is_empty()
    }
}

type MemberMap = HashMap<String, Connection>;

/// Thread-safe network registry
///
/// Invariant: a network is present iff it has at least one member.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: RwLock<HashMap<String, MemberMap>>,
}

impl NetworkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a network's member map, creating it if absent
    ///
    /// Only used under the write lock, immediately followed by an insert.
    fn ensure_network<'a>(
        networks: &'a mut HashMap<String, MemberMap>,
        id: &str,
    ) -> (&'a mut MemberMap, bool) {
        let created = !networks.contains_key(id);
        (networks.entry(id.to_string()).or_default(), created)
    }

    /// Insert or replace `username -> connection` in a network
    pub fn join(&self, id: &str, username: &str, connection: Connection) -> JoinOutcome {
        let mut networks = self.networks.write();
        let (members, created) = Self::ensure_network(&mut networks, id);
        let joiner = connection.id();

        let displaced = members
            .insert(username.to_string(), connection)
            .filter(|previous| previous.id() != joiner);

        let outcome = JoinOutcome {
            member_count: members.len(),
            members: members.values().cloned().collect(),
            displaced,
            created,
        };
        drop(networks);

        if outcome.created {
            info!(network_id = %id, "Network created");
        }
        debug!(
            network_id = %id,
            username = %username,
            connection_id = joiner,
            member_count = outcome.member_count,
            "Member joined network"
        );

        outcome
    }

    /// Remove `username` from a network, whoever holds it
    pub fn leave(&self, id: &str, username: &str) -> LeaveOutcome {
        self.remove_where(id, username, |_| true)
    }

    /// Remove `username` only if it is still bound to `connection_id`
    ///
    /// A connection displaced by a later join of the same username must not
    /// evict the new holder when it goes away.
    pub fn release(
        &self,
        id: &str,
        username: &str,
        connection_id: ConnectionId,
    ) -> LeaveOutcome {
        self.remove_where(id, username, |c| c.id() == connection_id)
    }

    fn remove_where<F>(&self, id: &str, username: &str, matches: F) -> LeaveOutcome
    where
        F: Fn(&Connection) -> bool,
    {
        let mut networks = self.networks.write();

        let Some(members) = networks.get_mut(id) else {
            return LeaveOutcome::default();
        };

        if !members.get(username).is_some_and(&matches) {
            return LeaveOutcome {
                removed: false,
                remaining: members.values().cloned().collect(),
            };
        }

        members.remove(username);
        let remaining: Vec<Connection> = members.values().cloned().collect();
        if remaining.is_empty() {
            networks.remove(id);
        }
        drop(networks);

        debug!(
            network_id = %id,
            username = %username,
            remaining = remaining.len(),
            "Member left network"
        );
        if remaining.is_empty() {
            info!(network_id = %id, "Network removed");
        }

        LeaveOutcome {
            removed: true,
            remaining,
        }
    }

    /// Current member count, 0 if the network does not exist
    pub fn member_count(&self, id: &str) -> usize {
        self.networks.read().get(id).map(|m| m.len()).unwrap_or(0)
    }

    /// Snapshot of a network's connections
    pub fn members(&self, id: &str) -> Vec<Connection> {
        self.networks
            .read()
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Find the connection bound to a username in a network
    pub fn lookup(&self, id: &str, username: &str) -> Option<Connection> {
        self.networks
            .read()
            .get(id)
            .and_then(|m| m.get(username))
            .cloned()
    }

    /// Number of live networks
    pub fn network_count(&self) -> usize {
        self.networks.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn connection(id: ConnectionId) -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(id, tx), rx)
    }

    #[test]
    fn test_join_creates_network() {
        let registry = NetworkRegistry::new();
        let (a, _rx) = connection(1);

        let outcome = registry.join("room1", "alice", a);
        assert!(outcome.created);
        assert_eq!(outcome.member_count, 1);
        assert!(outcome.displaced.is_none());
        assert_eq!(registry.network_count(), 1);
        assert_eq!(registry.member_count("room1"), 1);
    }

    #[test]
    fn test_join_snapshot_and_others() {
        let registry = NetworkRegistry::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);

        registry.join("room1", "alice", a);
        let outcome = registry.join("room1", "bob", b);

        assert!(!outcome.created);
        assert_eq!(outcome.member_count, 2);
        assert_eq!(outcome.members.len(), 2);
        let others = outcome.others(2);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), 1);
    }

    #[test]
    fn test_duplicate_username_replaces() {
        let registry = NetworkRegistry::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);

        registry.join("room1", "alice", a);
        let outcome = registry.join("room1", "alice", b);

        assert_eq!(outcome.member_count, 1);
        assert_eq!(outcome.displaced.map(|c| c.id()), Some(1));
        assert_eq!(registry.lookup("room1", "alice").map(|c| c.id()), Some(2));
    }

    #[test]
    fn test_rejoin_same_connection_is_not_displacement() {
        let registry = NetworkRegistry::new();
        let (a, _ra) = connection(1);

        registry.join("room1", "alice", a.clone());
        let outcome = registry.join("room1", "alice", a);
        assert!(outcome.displaced.is_none());
        assert_eq!(outcome.member_count, 1);
    }

    #[test]
    fn test_leave_removes_empty_network() {
        let registry = NetworkRegistry::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);
        registry.join("room1", "alice", a);
        registry.join("room1", "bob", b);

        let outcome = registry.leave("room1", "alice");
        assert!(outcome.removed);
        assert!(!outcome.network_removed());
        assert_eq!(outcome.remaining.len(), 1);
        assert_eq!(registry.member_count("room1"), 1);

        let outcome = registry.leave("room1", "bob");
        assert!(outcome.network_removed());
        assert_eq!(registry.member_count("room1"), 0);
        assert_eq!(registry.network_count(), 0);
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let registry = NetworkRegistry::new();
        let outcome = registry.leave("nowhere", "ghost");
        assert!(!outcome.removed);
        assert!(outcome.remaining.is_empty());
        assert!(!outcome.network_removed());

        let (a, _ra) = connection(1);
        registry.join("room1", "alice", a);
        let outcome = registry.leave("room1", "ghost");
        assert!(!outcome.removed);
        assert_eq!(registry.member_count("room1"), 1);
    }

    #[test]
    fn test_release_ignores_superseded_connection() {
        let registry = NetworkRegistry::new();
        let (old, _ro) = connection(1);
        let (new, _rn) = connection(2);
        registry.join("room1", "alice", old);
        registry.join("room1", "alice", new);

        let outcome = registry.release("room1", "alice", 1);
        assert!(!outcome.removed);
        assert_eq!(registry.lookup("room1", "alice").map(|c| c.id()), Some(2));

        let outcome = registry.release("room1", "alice", 2);
        assert!(outcome.network_removed());
    }

    #[test]
    fn test_members_and_lookup() {
        let registry = NetworkRegistry::new();
        assert!(registry.members("room1").is_empty());
        assert!(registry.lookup("room1", "alice").is_none());

        let (a, _ra) = connection(1);
        registry.join("room1", "alice", a);
        assert_eq!(registry.members("room1").len(), 1);
        assert!(registry.lookup("room1", "alice").is_some());
        assert!(registry.lookup("room1", "bob").is_none());
        assert!(registry.lookup("room2", "alice").is_none());
    }

    #[test]
    fn test_connection_send_failures() {
        let (tx, rx) = mpsc::channel(1);
        let conn = Connection::new(1, tx);

        conn.send("first".to_string()).unwrap();
        assert!(matches!(
            conn.send("second".to_string()),
            Err(RendezvousError::Network(NetworkError::WriteBufferFull))
        ));

        drop(rx);
        assert!(matches!(
            conn.send("third".to_string()),
            Err(RendezvousError::Network(NetworkError::ReceiverGone))
        ));
    }

    #[test]
    fn test_concurrent_joins_and_leaves() {
        let registry = Arc::new(NetworkRegistry::new());
        let mut receivers = Vec::new();
        let mut handles = Vec::new();

        for t in 0..8u64 {
            let (tx, rx) = mpsc::channel(1);
            receivers.push(rx);
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let conn = Connection::new(t, tx);
                let username = format!("user{t}");
                for _ in 0..200 {
                    registry.join("shared", &username, conn.clone());
                    registry.leave("shared", &username);
                }
                registry.join("shared", &username, conn);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.member_count("shared"), 8);
        assert_eq!(registry.network_count(), 1);
    }
}
