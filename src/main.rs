//! Git upload-pack proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                 UPLOAD-PACK PROXY                  │
//!                      │                                                    │
//!   POST .../git-      │  ┌────────┐   ┌─────────┐   ┌───────────────────┐  │
//!   upload-pack  ──────┼─▶│  http  │──▶│ locator │──▶│  git::upload_pack │  │
//!                      │  │ server │   └─────────┘   │      bridge       │  │
//!                      │  └────────┘                 └───┬──────────┬────┘  │
//!                      │      ▲                           │          │       │
//!                      │      │ response adapter          │ rpc      │ side- │   ┌─────────┐
//!   streamed     ◀─────┼──────┘ (headers on first byte)   │ call     │ channel├──▶│ backend │
//!   pack data          │                                  └──────────┴───────┼──▶│   RPC   │
//!                      │                                                    │   └─────────┘
//!                      │  ┌──────────────────────────────────────────────┐  │
//!                      │  │ resilience::deadline  one ExchangeContext     │  │
//!                      │  │ per request, cancels every suspension point  │  │
//!                      │  └──────────────────────────────────────────────┘  │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use git_upload_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use git_upload_proxy::lifecycle::{signals, Shutdown};
use git_upload_proxy::observability::{logging, metrics};
use git_upload_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "git-upload-proxy")]
#[command(about = "Smart HTTP upload-pack proxy with sidechannel transport", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "git-upload-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.address,
        upload_pack_timeout_secs = config.timeouts.upload_pack_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must outlive the server to keep delivering reloads.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
