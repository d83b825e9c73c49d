//! Acceptor
//!
//! Owns the listening socket. Registers every accepted connection and
//! spawns its handler into a `JoinSet` so shutdown can wait for all of them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::connection::Connection;
use crate::handler::{handle_connection, HandlerExit};
use crate::registry::ConnectionRegistry;

pub(crate) struct Acceptor {
    pub(crate) listener: TcpListener,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) read_buffer_size: usize,
    pub(crate) accept_backoff: Duration,
    pub(crate) write_timeout: Option<Duration>,
}

impl Acceptor {
    /// Accept until shutdown is signalled.
    ///
    /// The listener is dropped (closed) on return. Handlers still running
    /// are handed back to the caller to be joined.
    pub(crate) async fn run(mut self) -> JoinSet<HandlerExit> {
        let mut handlers = JoinSet::new();
        info!("acceptor started");

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut self.shutdown) => break,

                res = self.listener.accept() => match res {
                    Ok((stream, addr)) => self.register(stream, addr, &mut handlers),
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::select! {
                            _ = stopped(&mut self.shutdown) => break,
                            _ = tokio::time::sleep(self.accept_backoff) => {}
                        }
                    }
                },

                Some(res) = handlers.join_next() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("A connection handler panicked: {e:?}");
                        }
                    }
                },
            }
        }

        info!("acceptor stopped");
        handlers
    }

    fn register(&self, stream: TcpStream, addr: SocketAddr, handlers: &mut JoinSet<HandlerExit>) {
        let (conn, reader) = match Connection::new(stream, self.write_timeout) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(peer = %addr, "dropping connection: {}", e);
                return;
            }
        };

        self.registry.add(conn.clone());
        info!(conn = %conn.id(), peer = %addr, "New client connected");

        handlers.spawn(handle_connection(
            conn,
            reader,
            self.registry.clone(),
            self.broadcaster.clone(),
            self.read_buffer_size,
        ));
    }
}

/// Resolves once shutdown has been signalled.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
