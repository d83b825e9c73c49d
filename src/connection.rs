//! Connection handle
//!
//! One open TCP stream as seen by everyone except its reader: an identity,
//! the write half, and a closed signal. The read half is handed to exactly
//! one worker, which selects on the closed signal so that closing the
//! handle unblocks its pending read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::error::SendError;
use crate::types::ConnectionId;

/// An open bidirectional byte stream, shareable across tasks.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    /// Serializes writers so concurrent relays never interleave bytes
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
    write_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap a connected stream, returning the shared handle and the read half.
    pub fn new(
        stream: TcpStream,
        write_timeout: Option<Duration>,
    ) -> std::io::Result<(Arc<Self>, OwnedReadHalf)> {
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);

        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer_addr,
            writer: Mutex::new(writer),
            closed,
            write_timeout,
        });
        Ok((conn, reader))
    }

    /// Identity used by the registry and the audit log
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address captured when the handle was created
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the handle has been closed (immediately if it already is).
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Write every byte of `data`, retrying partial writes.
    ///
    /// Returns `SendError::Closed` if the handle is closed before or while
    /// the write is pending.
    pub async fn send(&self, data: &[u8]) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(data).await?;
            Ok::<(), SendError>(())
        };
        let write = async {
            match self.write_timeout {
                Some(limit) => match tokio::time::timeout(limit, write).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::TimedOut),
                },
                None => write.await,
            }
        };

        tokio::select! {
            result = write => result,
            _ = self.closed() => Err(SendError::Closed),
        }
    }

    /// Raise the closed signal without touching the socket.
    ///
    /// Returns true for the call that actually flipped the signal.
    pub fn signal_close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Close the handle: raise the closed signal, then shut down the write
    /// half so the peer sees end-of-stream. Only the first call does work.
    pub async fn close(&self) -> bool {
        if !self.signal_close() {
            return false;
        }

        // Pending writers observe the signal and release the lock
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(conn = %self.id, "shutdown after close: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_send_writes_exact_bytes() {
        let (mut peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, None).unwrap();

        conn.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_peer_sees_eof() {
        let (mut peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, None).unwrap();

        assert!(conn.close().await);
        assert!(!conn.close().await);
        assert!(conn.is_closed());

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (_peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, None).unwrap();

        conn.close().await;
        assert!(matches!(conn.send(b"late").await, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_resolves_after_signal() {
        let (_peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, None).unwrap();

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        assert!(conn.signal_close());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() did not resolve")
            .unwrap();
    }

    // Known gap: with no write deadline a peer that never reads blocks the
    // writer forever once the socket buffers fill. Only closing the handle
    // releases it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_unblocks_stalled_write() {
        let (_stalled_peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, None).unwrap();

        let writer = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let chunk = vec![b'x'; 64 * 1024];
                loop {
                    if let Err(e) = conn.send(&chunk).await {
                        return e;
                    }
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!writer.is_finished());

        conn.close().await;
        let err = tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("stalled write was not released by close")
            .unwrap();
        assert!(matches!(err, SendError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_timeout_bounds_stalled_write() {
        let (_stalled_peer, local) = pair().await;
        let (conn, _reader) = Connection::new(local, Some(Duration::from_millis(50))).unwrap();

        let chunk = vec![b'x'; 64 * 1024];
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            for _ in 0..16 * 1024 {
                if let Err(e) = conn.send(&chunk).await {
                    return Some(e);
                }
            }
            None
        })
        .await
        .expect("write deadline never fired");

        assert!(matches!(result, Some(SendError::TimedOut)));
    }
}
