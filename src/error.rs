//! Error types for the chat relay
//!
//! Defines application-level errors and per-connection write errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::client::ClientState;

/// Application-level errors
///
/// Only `Bind` is fatal to a server. Everything else concerns a single
/// client or connection and is isolated from the rest.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server could not bind or listen on the requested address
    #[error("Can't bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Host name resolution failed
    #[error("Can't resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Host name resolved to an empty address list
    #[error("No addresses found for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    /// Every resolved address refused or was unreachable
    #[error("Unable to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Client is mid-transition and cannot accept the request
    #[error("Client is {0:?}")]
    InvalidState(ClientState),

    /// Writing to the connection failed
    #[error("Send failed: {0}")]
    Send(#[from] SendError),
}

/// Write errors on a single connection handle
#[derive(Debug, Error)]
pub enum SendError {
    /// The handle was closed before or during the write
    #[error("Connection closed")]
    Closed,

    /// The configured write deadline elapsed
    #[error("Write timed out")]
    TimedOut,

    /// The underlying stream reported an error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
