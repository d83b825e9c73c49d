//! Chat relay server - Entry Point
//!
//! Starts the relay on the given port and runs until Ctrl-C.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::config::DEFAULT_BIND_HOST;
use chat_relay::{ChatServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "chat_relay", about = "TCP chat relay server")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_BIND_HOST)]
    host: String,

    /// Give up on a broadcast write after this many milliseconds
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Print every relayed message when shutting down
    #[arg(long)]
    dump_audit: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_host: args.host,
        write_timeout: args.write_timeout_ms.map(Duration::from_millis),
        ..ServerConfig::default()
    };

    let server = ChatServer::new(config);
    let addr = server.start(args.port).await?;
    info!("Chat relay listening on {}", addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutting down with {} connection(s)", server.get_connection_count());

    server.stop().await;
    if args.dump_audit {
        server.print_message_queue()?;
    }
    Ok(())
}
