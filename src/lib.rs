//! Minimal TCP Chat Relay Library
//!
//! A server accepts any number of TCP clients and rebroadcasts every chunk
//! of bytes it reads from one client to all the others. A client connects,
//! sends typed lines prefixed with its display name, and prints whatever
//! the server forwards.
//!
//! # Wire format
//! There is none. Each read on the server is one relay unit and is
//! forwarded unmodified; a line may be split or coalesced across reads.
//!
//! # Architecture
//! One tokio task per accepted connection, plus one acceptor per server:
//! - `ConnectionRegistry` is the locked set of live connections
//! - `Acceptor` registers new connections and spawns their handlers
//! - `handle_connection` reads chunks and passes them to the `Broadcaster`
//! - `Broadcaster` writes to a registry snapshot, outside the lock, and
//!   appends to the `AuditLog`
//! - `ChatServer::stop` closes the listener, closes every connection and
//!   joins every handler before returning
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::new(ServerConfig::default());
//!     let addr = server.start(54000).await.unwrap();
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await;
//! }
//! ```

mod acceptor;
pub mod audit;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditLog};
pub use broadcast::{Broadcaster, RelayOutcome};
pub use client::{format_outbound, ChatClient, ClientOutput, ClientState};
pub use config::{ClientConfig, ServerConfig};
pub use connection::Connection;
pub use error::{AppError, SendError};
pub use handler::{handle_connection, HandlerExit};
pub use registry::ConnectionRegistry;
pub use server::ChatServer;
pub use types::{ConnectionId, Message};
