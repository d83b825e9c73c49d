//! Server and client configuration
//!
//! Plain structs with defaults; the binaries fill them from command line
//! arguments and environment variables.

use std::time::Duration;

/// Default address the server binds to
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Largest relay unit: one read never returns more than this
pub const READ_BUFFER_SIZE: usize = 4096;

/// Pause after a failed accept before trying again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or IP to bind the listener on
    pub bind_host: String,
    /// Size of each worker's read buffer
    pub read_buffer_size: usize,
    /// Sleep after a transient accept failure
    pub accept_backoff: Duration,
    /// Deadline for a single broadcast write. `None` lets a stalled peer
    /// block the relaying worker indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            read_buffer_size: READ_BUFFER_SIZE,
            accept_backoff: ACCEPT_BACKOFF,
            write_timeout: None,
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Display name prepended to every outgoing message (empty = no prefix)
    pub name: String,
    /// Size of the receive worker's read buffer
    pub read_buffer_size: usize,
}

impl ClientConfig {
    /// Client settings with the default read buffer size
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            name: name.into(),
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}
