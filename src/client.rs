//! Chat client
//!
//! Owns one outbound connection and a single receive worker. The client
//! can cycle through connect/disconnect any number of times, and
//! `disconnect` is safe to call from the receive worker itself: in that
//! case the worker is detached instead of joined.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::AppError;

/// Connection state of a client instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Where the receive worker delivers inbound bytes
#[derive(Debug, Clone)]
pub enum ClientOutput {
    /// Print each chunk on its own line
    Stdout,
    /// Forward each chunk, unmodified, to a channel
    Channel(mpsc::UnboundedSender<Bytes>),
}

impl ClientOutput {
    fn emit(&self, chunk: Bytes) {
        match self {
            ClientOutput::Stdout => println!("{}", String::from_utf8_lossy(&chunk)),
            ClientOutput::Channel(tx) => {
                if tx.send(chunk).is_err() {
                    debug!("output channel closed, dropping inbound message");
                }
            }
        }
    }
}

/// One live connection and the worker reading from it
struct Session {
    conn: Arc<Connection>,
    receiver: JoinHandle<()>,
}

struct ClientInner {
    state: parking_lot::Mutex<ClientState>,
    running: AtomicBool,
    session: Mutex<Option<Session>>,
    output: ClientOutput,
    read_buffer_size: usize,
}

/// Resets the client to `Disconnected` if dropped while armed.
///
/// Covers a `connect` or `disconnect` future that is dropped mid-await, so
/// the instance never stays stuck in a transitional state.
struct StateReset<'a> {
    inner: &'a ClientInner,
    /// Closed on reset so an orphaned receive worker exits on its own
    conn: Option<Arc<Connection>>,
    armed: bool,
}

impl<'a> StateReset<'a> {
    fn new(inner: &'a ClientInner, conn: Option<Arc<Connection>>) -> Self {
        Self {
            inner,
            conn,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(conn) = self.conn.take() {
            conn.signal_close();
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.set_state(ClientState::Disconnected);
        debug!("client state reset after an interrupted transition");
    }
}

impl ClientInner {
    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    /// Called by the receive worker when the server goes away: flips
    /// `running` and the state together so no caller sees a connected
    /// state without a live connection.
    fn mark_lost(&self) {
        let mut state = self.state.lock();
        self.running.store(false, Ordering::SeqCst);
        if *state == ClientState::Connected {
            *state = ClientState::Disconnecting;
        }
    }

    /// Tear down the current session, if any.
    ///
    /// The session lock is released before waiting on the receive worker,
    /// so a worker racing into this same method never blocks on it.
    async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);

        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return;
        };
        self.set_state(ClientState::Disconnecting);
        let reset = StateReset::new(self, Some(session.conn.clone()));

        session.conn.close().await;

        if tokio::task::try_id() == Some(session.receiver.id()) {
            // Waiting on ourselves would never return
            debug!("disconnect called from the receive worker; detaching it");
            drop(session.receiver);
        } else if let Err(e) = session.receiver.await {
            warn!("receive worker failed: {e:?}");
        }

        reset.disarm();
        self.set_state(ClientState::Disconnected);
        info!("Disconnected");
    }
}

/// A chat client bound to one server address and display name
pub struct ChatClient {
    config: ClientConfig,
    inner: Arc<ClientInner>,
}

impl ChatClient {
    /// Create a client that prints inbound messages to stdout
    pub fn new(config: ClientConfig) -> Self {
        Self::with_output(config, ClientOutput::Stdout)
    }

    /// Create a client that delivers inbound messages to `output`
    pub fn with_output(config: ClientConfig, output: ClientOutput) -> Self {
        let inner = Arc::new(ClientInner {
            state: parking_lot::Mutex::new(ClientState::Disconnected),
            running: AtomicBool::new(false),
            session: Mutex::new(None),
            output,
            read_buffer_size: config.read_buffer_size,
        });
        Self { config, inner }
    }

    /// Settings this client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    /// Connect and start the receive worker.
    ///
    /// Succeeds immediately if already connected. Fails with
    /// `InvalidState` while another connect or a disconnect is in progress.
    /// Dropping the returned future before it completes leaves the client
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<(), AppError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ClientState::Connected if self.inner.running.load(Ordering::SeqCst) => {
                    return Ok(())
                }
                // Connection lost, teardown not finished yet
                ClientState::Connected => {
                    return Err(AppError::InvalidState(ClientState::Disconnecting))
                }
                ClientState::Disconnected => *state = ClientState::Connecting,
                other => return Err(AppError::InvalidState(other)),
            }
        }

        let reset = StateReset::new(&self.inner, None);
        match self.establish().await {
            Ok(()) => {
                reset.disarm();
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), AppError> {
        let host = self.config.host.as_str();
        let port = self.config.port;

        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|source| AppError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(AppError::NoAddress {
                host: host.to_string(),
                port,
            });
        }

        let mut stream = None;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        let Some(stream) = stream else {
            return Err(AppError::Connect {
                target: format!("{}:{}", host, port),
                source: last_error
                    .unwrap_or_else(|| std::io::Error::from(ErrorKind::NotConnected)),
            });
        };

        let (conn, reader) = Connection::new(stream, None)?;
        let peer = conn.peer_addr();

        // Hold the session lock until the session is stored, so a worker
        // that exits immediately cannot tear down a half-built session.
        let mut session = self.inner.session.lock().await;
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.set_state(ClientState::Connected);
        let receiver = tokio::spawn(receive_loop(self.inner.clone(), conn.clone(), reader));
        *session = Some(Session { conn, receiver });

        info!("Connected to {}", peer);
        Ok(())
    }

    /// Disconnect and wait for the receive worker. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Send `text`, prefixed with the display name.
    ///
    /// Partial writes are retried until every byte is sent; any write error
    /// is returned without retrying.
    pub async fn send_message(&self, text: &str) -> Result<(), AppError> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }

        let conn = self
            .inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.conn.clone())
            .ok_or(AppError::NotConnected)?;

        let payload = format_outbound(&self.config.name, text);
        conn.send(payload.as_bytes()).await?;
        Ok(())
    }

    /// True while connected; turns false as soon as the receive worker sees
    /// the server go away.
    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && self.state() == ClientState::Connected
    }
}

impl Drop for ChatClient {
    /// Signal the receive worker to stop without waiting for it.
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Ok(session) = self.inner.session.try_lock() {
            if let Some(session) = session.as_ref() {
                session.conn.signal_close();
            }
        }
    }
}

/// Outbound wire payload: `"<name>: <text>"`, or the bare text when no
/// name is configured. No terminator is added.
pub fn format_outbound(name: &str, text: &str) -> String {
    if name.is_empty() {
        text.to_string()
    } else {
        format!("{}: {}", name, text)
    }
}

async fn receive_loop(inner: Arc<ClientInner>, conn: Arc<Connection>, mut reader: OwnedReadHalf) {
    let mut buf = vec![0u8; inner.read_buffer_size];

    loop {
        let read = tokio::select! {
            biased;
            // Someone else is tearing the session down
            _ = conn.closed() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!("Server closed connection");
                break;
            }
            Ok(n) => inner.output.emit(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Receive failed: {}", e);
                break;
            }
        }
    }

    inner.mark_lost();
    inner.disconnect().await;
}
