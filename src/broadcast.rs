//! Broadcaster
//!
//! Fans one received message out to every registered connection except
//! its sender, then records it in the audit log.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionId, Message};

/// Result of a single relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Targets that received the full message
    pub delivered: usize,
    /// Targets whose write failed
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    audit: Arc<AuditLog>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, audit: Arc<AuditLog>) -> Self {
        Self { registry, audit }
    }

    /// Write `message` to every registered connection other than `sender`.
    ///
    /// Writes run against a snapshot, outside the registry lock. A failed
    /// target is skipped and left registered: only its own worker removes it.
    pub async fn relay(&self, message: Message, sender: ConnectionId) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();

        for target in self.registry.snapshot() {
            if target.id() == sender {
                continue;
            }
            match target.send(&message).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(conn = %target.id(), from = %sender, "broadcast write failed: {}", e);
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            from = %sender,
            bytes = message.len(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            "relayed"
        );

        self.audit.append(message, sender);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connection() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (conn, _reader) = Connection::new(accepted.unwrap().0, None).unwrap();
        (conn, peer.unwrap())
    }

    fn setup() -> (Arc<ConnectionRegistry>, Arc<AuditLog>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new());
        let audit = Arc::new(AuditLog::new());
        let broadcaster = Broadcaster::new(registry.clone(), audit.clone());
        (registry, audit, broadcaster)
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let (registry, audit, broadcaster) = setup();
        let (bob, mut bob_peer) = connection().await;
        let (carol, mut carol_peer) = connection().await;
        registry.add(bob.clone());
        registry.add(carol.clone());

        let outcome = broadcaster
            .relay(Bytes::from_static(b"Bob: hello"), bob.id())
            .await;
        assert_eq!(outcome, RelayOutcome { delivered: 1, failed: 0 });

        let mut buf = [0u8; 64];
        let n = carol_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Bob: hello");

        let own = tokio::time::timeout(Duration::from_millis(200), bob_peer.read(&mut buf)).await;
        assert!(own.is_err(), "sender received its own message");

        assert_eq!(audit.len(), 1);
        assert_eq!(audit.entries()[0].sender, bob.id());
    }

    #[tokio::test]
    async fn test_failed_target_does_not_abort_or_unregister() {
        let (registry, audit, broadcaster) = setup();
        let (sender, _sp) = connection().await;
        let (dead, _dp) = connection().await;
        let (live, mut live_peer) = connection().await;
        registry.add(sender.clone());
        registry.add(dead.clone());
        registry.add(live.clone());

        // Closed without going through the registry: writes to it fail
        dead.close().await;

        let outcome = broadcaster.relay(Bytes::from_static(b"ping"), sender.id()).await;
        assert_eq!(outcome, RelayOutcome { delivered: 1, failed: 1 });
        assert!(registry.contains(dead.id()));

        let mut buf = [0u8; 16];
        let n = live_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn test_relay_with_no_targets_still_audits() {
        let (registry, audit, broadcaster) = setup();
        let (alone, _peer) = connection().await;
        registry.add(alone.clone());

        let outcome = broadcaster.relay(Bytes::from_static(b"echo?"), alone.id()).await;
        assert_eq!(outcome, RelayOutcome::default());
        assert_eq!(audit.len(), 1);
    }
}
