//! wsbridge - WebSocket echo server
//!
//! Upgrades incoming HTTP connections to WebSocket, prints every message it
//! receives and writes it back to the sender.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wsbridge_server::{Config, EchoHandler, Server, ServerConfig};

#[derive(Parser)]
#[command(name = "wsbridge")]
#[command(about = "WebSocket echo server")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "WSBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration)
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (file if given, then env overrides)
    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Some(bind) = cli.bind {
        config.network.bind_addr = bind;
    }

    tracing::info!("Starting wsbridge server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    match config.network.handshake_timeout() {
        Some(timeout) => tracing::info!("  Handshake timeout: {:?}", timeout),
        None => tracing::info!("  Handshake timeout: disabled"),
    }
    tracing::info!(
        "  Frame limit: {} bytes, message limit: {} bytes",
        config.websocket.max_frame_bytes,
        config.websocket.max_message_bytes
    );
    if config.websocket.require_masked {
        tracing::info!("  Unmasked client frames: rejected");
    }

    let server = Arc::new(Server::new(
        ServerConfig::from_config(&config),
        Arc::new(EchoHandler),
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
