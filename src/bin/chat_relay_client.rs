//! Chat relay client - Entry Point
//!
//! Connects to the server named by `SERVER_HOST`/`SERVER_PORT` (or the
//! matching flags) and sends every typed line. `quit` exits.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatClient, ClientConfig};

#[derive(Debug, Parser)]
#[command(name = "chat_relay_client", about = "TCP chat relay client")]
struct Args {
    /// Server host name or IP
    #[arg(long, env = "SERVER_HOST")]
    host: String,

    /// Server port
    #[arg(long, env = "SERVER_PORT")]
    port: u16,

    /// Display name; prompted for when omitted
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=warn")),
        )
        .init();

    let args = Args::parse();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let name = match args.name.filter(|n| !n.trim().is_empty()) {
        Some(name) => name,
        None => loop {
            prompt("Enter your name: ").await?;
            match lines.next_line().await? {
                Some(line) if !line.trim().is_empty() => break line.trim().to_string(),
                Some(_) => println!("Name cannot be empty"),
                None => return Ok(()),
            }
        },
    };

    let client = ChatClient::new(ClientConfig::new(&args.host, args.port, &name));
    if let Err(e) = client.connect().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    println!("Connected as '{}'. Type messages and press Enter to send", name);
    println!("Hint: Type 'quit' + Enter to disconnect and exit.");

    while client.is_connected() {
        let Some(line) = lines.next_line().await? else {
            println!("Disconnecting...");
            break;
        };

        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            println!("Exiting...");
            break;
        }

        if let Err(e) = client.send_message(&line).await {
            warn!("send failed: {}", e);
            eprintln!("Failed to send (connection may be closed)");
            break;
        }
        println!("You: {}", line);
    }

    client.disconnect().await;
    Ok(())
}

async fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}
