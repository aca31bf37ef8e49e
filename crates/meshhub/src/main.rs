//! # meshhub
//!
//! Hub server binary — loads configuration, initializes logging, and runs
//! the hub until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use meshhub_server::config::HubConfig;
use meshhub_server::server::HubServer;

/// Coordination hub for mesh test networks.
#[derive(Parser, Debug)]
#[command(name = "meshhub", about = "Coordination hub for mesh test networks")]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> Result<HubConfig> {
        let mut config = match self.config {
            Some(ref path) => HubConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => HubConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    meshhub_core::logging::init_subscriber(&args.log_level);

    let config = args.into_config()?;
    let server = HubServer::new(config);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!(%addr, "meshhub up");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    server.shutdown().shutdown();
    let _ = handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}
