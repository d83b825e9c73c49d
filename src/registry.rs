//! Connection registry
//!
//! The synchronized set of live connection handles. The lock guards the
//! map only; it is never held across a read, a write, or any `.await`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::Connection;
use crate::types::ConnectionId;

/// Set of currently active connections, keyed by handle identity.
///
/// A handle is present exactly while its worker is running or about to
/// start. Removal always closes the handle, and only the caller that
/// actually removed it performs the close.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Returns false if it was already present.
    pub fn add(&self, conn: Arc<Connection>) -> bool {
        let mut connections = self.connections.lock();
        match connections.entry(conn.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
        }
    }

    /// Unregister a handle and close it.
    ///
    /// Returns false if the handle was not registered, in which case
    /// nothing is closed.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().remove(&id);
        match removed {
            Some(conn) => {
                conn.close().await;
                debug!(conn = %id, "removed from registry");
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of the registered handles, for iteration
    /// outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Number of registered connections right now
    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    /// Raise the closed signal on every registered handle without waiting.
    ///
    /// Used where `.await` is not available; workers notice the signal and
    /// remove themselves.
    pub(crate) fn signal_close_all(&self) {
        for conn in self.snapshot() {
            conn.signal_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connection() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (conn, _reader) = Connection::new(accepted.unwrap().0, None).unwrap();
        (conn, peer.unwrap())
    }

    #[tokio::test]
    async fn test_add_is_noop_when_present() {
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = connection().await;

        assert!(registry.add(conn.clone()));
        assert!(!registry.add(conn.clone()));
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(conn.id()));
    }

    #[tokio::test]
    async fn test_remove_closes_exactly_once() {
        let registry = ConnectionRegistry::new();
        let (conn, mut peer) = connection().await;
        registry.add(conn.clone());

        assert!(registry.remove(conn.id()).await);
        assert!(conn.is_closed());
        assert!(registry.is_empty());

        // Second remove finds nothing and closes nothing
        assert!(!registry.remove(conn.id()).await);

        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_unregistered_leaves_handle_open() {
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = connection().await;

        assert!(!registry.remove(conn.id()).await);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_later_changes() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = connection().await;
        let (b, _pb) = connection().await;
        registry.add(a.clone());
        registry.add(b.clone());

        let snapshot = registry.snapshot();
        registry.remove(a.id()).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_and_remove() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut conns = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..16 {
            let (conn, peer) = connection().await;
            conns.push(conn);
            peers.push(peer);
        }

        let mut tasks = Vec::new();
        for conn in conns.iter().cloned() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.add(conn.clone());
                registry.remove(conn.id()).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(registry.count(), 0);
        assert!(conns.iter().all(|c| c.is_closed()));
    }
}
