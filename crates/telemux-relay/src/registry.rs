//! In-memory registry of attached consumers.
//!
//! Membership changes and full-set iteration share one mutex, so an
//! iteration never observes a half-removed connection and of two racing
//! removals of the same id exactly one succeeds. The lock is never held
//! across I/O: broadcasting takes a [`snapshot`](ConnectionRegistry::snapshot),
//! writes without the lock, then evicts failures with
//! [`remove_all`](ConnectionRegistry::remove_all).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionId, ConsumerConnection};

/// Thread-safe set of live consumer connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, Arc<ConsumerConnection>>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate an id for a connection about to be added.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a live connection.
    ///
    /// Returns `false` without touching the set when the id is already
    /// present or the connection has already been closed.
    pub async fn add(&self, conn: Arc<ConsumerConnection>) -> bool {
        let id = conn.id();
        if conn.is_closed() {
            warn!(connection_id = %id, "Refusing to register a closed connection");
            return false;
        }
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&id) {
            drop(connections);
            warn!(connection_id = %id, "Connection already registered");
            return false;
        }
        connections.insert(id, conn);
        let live = connections.len();
        drop(connections);
        info!(connection_id = %id, live, "Consumer registered");
        true
    }

    /// Remove a connection, handing it back to the caller.
    ///
    /// `None` means another path already removed it and owns its teardown.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<ConsumerConnection>> {
        let mut connections = self.connections.lock().await;
        let conn = connections.remove(&id);
        let live = connections.len();
        drop(connections);
        if conn.is_some() {
            info!(connection_id = %id, live, "Consumer unregistered");
        } else {
            debug!(connection_id = %id, "Consumer already unregistered");
        }
        conn
    }

    /// Remove a batch of connections in one locked pass.
    ///
    /// Only the connections this call actually removed are returned.
    pub async fn remove_all(&self, ids: &[ConnectionId]) -> Vec<Arc<ConsumerConnection>> {
        if ids.is_empty() {
            return Vec::new();
        }
        let mut connections = self.connections.lock().await;
        let removed: Vec<_> = ids.iter().filter_map(|id| connections.remove(id)).collect();
        let live = connections.len();
        drop(connections);
        for conn in &removed {
            info!(connection_id = %conn.id(), live, "Consumer evicted");
        }
        removed
    }

    /// Visit every live connection once while holding the lock.
    ///
    /// `action` is synchronous so it cannot perform I/O under the lock;
    /// collect what you need and act on it afterwards.
    pub async fn for_each<F>(&self, mut action: F)
    where
        F: FnMut(&Arc<ConsumerConnection>),
    {
        let connections = self.connections.lock().await;
        for conn in connections.values() {
            action(conn);
        }
    }

    /// Clone the live set.
    pub async fn snapshot(&self) -> Vec<Arc<ConsumerConnection>> {
        let mut live = Vec::new();
        self.for_each(|conn| live.push(Arc::clone(conn))).await;
        live
    }

    /// Remove every connection, e.g. at shutdown.
    pub async fn drain(&self) -> Vec<Arc<ConsumerConnection>> {
        let mut connections = self.connections.lock().await;
        connections.drain().map(|(_, conn)| conn).collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    /// Count of live connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_helpers::MockSink;

    use super::*;

    fn connection(registry: &ConnectionRegistry) -> Arc<ConsumerConnection> {
        Arc::new(ConsumerConnection::new(registry.next_id(), None, MockSink::new()))
    }

    #[tokio::test]
    async fn add_and_remove_connection() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);
        let id = conn.id();

        assert!(registry.add(conn).await);
        assert!(registry.contains(id).await);
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove(id).await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);

        assert!(registry.add(Arc::clone(&conn)).await);
        assert!(!registry.add(conn).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_connection_is_not_registered() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);
        conn.close(Duration::from_secs(1)).await;

        assert!(!registry.add(conn).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn second_remove_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);
        let id = conn.id();
        registry.add(conn).await;

        assert!(registry.remove(id).await.is_some());
        assert!(registry.remove(id).await.is_none());
    }

    #[tokio::test]
    async fn racing_removals_have_one_winner() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);
        let id = conn.id();
        registry.add(conn).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.remove(id).await.is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn remove_all_returns_only_present_connections() {
        let registry = ConnectionRegistry::new();
        let a = connection(&registry);
        let b = connection(&registry);
        let (a_id, b_id) = (a.id(), b.id());
        registry.add(a).await;
        registry.add(b).await;
        registry.remove(a_id).await;

        let removed = registry.remove_all(&[a_id, b_id]).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), b_id);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn for_each_visits_every_connection_once() {
        let registry = ConnectionRegistry::new();
        let mut expected = Vec::new();
        for _ in 0..3 {
            let conn = connection(&registry);
            expected.push(conn.id());
            registry.add(conn).await;
        }

        let mut seen = Vec::new();
        registry.for_each(|conn| seen.push(conn.id())).await;
        seen.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_later_changes() {
        let registry = ConnectionRegistry::new();
        let conn = connection(&registry);
        let id = conn.id();
        registry.add(conn).await;

        let snapshot = registry.snapshot().await;
        registry.remove(id).await;

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        registry.add(connection(&registry)).await;
        registry.add(connection(&registry)).await;

        assert_eq!(registry.drain().await.len(), 2);
        assert!(registry.is_empty().await);
    }
}
