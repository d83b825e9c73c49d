//! ChatServer lifecycle
//!
//! Starts the acceptor on a bound listener and tears everything down in a
//! fixed order on stop: running flag, listener, connections, handlers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::acceptor::Acceptor;
use crate::audit::AuditLog;
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::HandlerExit;
use crate::registry::ConnectionRegistry;

/// Resources that exist only while the server is running
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<JoinSet<HandlerExit>>,
}

/// The relay server
///
/// Owns the connection registry and the audit log. Both outlive individual
/// start/stop cycles; the audit log is never cleared.
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    audit: Arc<AuditLog>,
    broadcaster: Broadcaster,
    running: AtomicBool,
    /// Readable without waiting on `lifecycle`
    bound_addr: parking_lot::Mutex<Option<SocketAddr>>,
    /// Held for the whole of start/stop so they never interleave
    lifecycle: Mutex<Option<Running>>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let audit = Arc::new(AuditLog::new());
        let broadcaster = Broadcaster::new(registry.clone(), audit.clone());
        Self {
            config,
            registry,
            audit,
            broadcaster,
            running: AtomicBool::new(false),
            bound_addr: parking_lot::Mutex::new(None),
            lifecycle: Mutex::new(None),
        }
    }

    /// Bind, listen and spawn the acceptor.
    ///
    /// Port 0 picks an ephemeral port; the bound address is returned.
    /// If the server is already running this is a no-op returning the
    /// current address. A bind failure leaves the server stopped.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, AppError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            return Ok(running.local_addr);
        }

        let addr = format!("{}:{}", self.config.bind_host, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!("Can't bind to {}: {}", addr, source);
                return Err(AppError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = Acceptor {
            listener,
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
            shutdown: shutdown_rx,
            read_buffer_size: self.config.read_buffer_size,
            accept_backoff: self.config.accept_backoff,
            write_timeout: self.config.write_timeout,
        };

        self.running.store(true, Ordering::SeqCst);
        *self.bound_addr.lock() = Some(local_addr);
        let acceptor = tokio::spawn(acceptor.run());
        *lifecycle = Some(Running {
            local_addr,
            shutdown_tx,
            acceptor,
        });

        info!("Server started on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop the server and wait until every handler has exited.
    ///
    /// Idempotent: a second call (even a concurrent one) waits for the
    /// first to finish and then returns without doing anything.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.lock() = None;

        // Acceptor drops the listener as it returns
        running.shutdown_tx.send_replace(true);
        let mut handlers = match running.acceptor.await {
            Ok(handlers) => handlers,
            Err(e) => {
                error!("acceptor task failed: {e:?}");
                JoinSet::new()
            }
        };

        let connections = self.registry.snapshot();
        debug!("closing {} connection(s)", connections.len());
        for conn in connections {
            self.registry.remove(conn.id()).await;
        }

        while let Some(res) = handlers.join_next().await {
            if let Err(e) = res {
                error!("connection handler failed: {e:?}");
            }
        }

        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address of the listener while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    /// Number of registered connections, valid at any time including mid-shutdown
    pub fn get_connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Dump the audit log to standard output
    pub fn print_message_queue(&self) -> std::io::Result<()> {
        self.audit.print()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }
}

impl Drop for ChatServer {
    /// Best-effort shutdown when dropped without `stop()`: signal the
    /// acceptor and every connection, without waiting for them.
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            self.running.store(false, Ordering::SeqCst);
            *self.bound_addr.get_mut() = None;
            running.shutdown_tx.send_replace(true);
            self.registry.signal_close_all();
        }
    }
}
