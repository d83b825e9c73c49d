//! Connection handler
//!
//! The worker behind each accepted connection: reads raw chunks from the
//! socket, hands every chunk to the broadcaster, and removes its own
//! handle from the registry when the connection ends.

use std::io::ErrorKind;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// Why a connection handler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// Peer performed an orderly close
    ClosedByPeer,
    /// Read failed with a non-retryable error
    ClosedByError,
    /// The handle was closed locally (server shutdown)
    ClosedByShutdown,
}

/// Run the receive loop for one connection until it ends.
///
/// Every exit path goes through `registry.remove`, so the handle is never
/// left registered after its worker is gone.
pub async fn handle_connection(
    conn: Arc<Connection>,
    mut reader: OwnedReadHalf,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    buffer_size: usize,
) -> HandlerExit {
    let id = conn.id();
    let mut buf = vec![0u8; buffer_size];
    debug!(conn = %id, peer = %conn.peer_addr(), "handler started");

    let exit = loop {
        let read = tokio::select! {
            biased;
            _ = conn.closed() => break HandlerExit::ClosedByShutdown,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(conn = %id, "client disconnected");
                break HandlerExit::ClosedByPeer;
            }
            Ok(n) => {
                // One read is one relay unit; no reassembly
                let message = Bytes::copy_from_slice(&buf[..n]);
                debug!(conn = %id, "received: {}", String::from_utf8_lossy(&message));
                broadcaster.relay(message, id).await;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(conn = %id, "read error: {}", e);
                break HandlerExit::ClosedByError;
            }
        }
    };

    registry.remove(id).await;
    debug!(conn = %id, ?exit, "handler ended");
    exit
}
