//! # brew
//!
//! Kettle server binary: loads settings, sets up logging and metrics, and
//! serves tea rounds until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use brew_server::{BrewServer, LogNotifier};
use brew_settings::BrewSettings;
use brew_store::MemoryKettleStore;
use brew_telemetry::TelemetryConfig;

/// Tea-round coordination server.
#[derive(Parser, Debug)]
#[command(name = "brew", about = "Tea-round coordination server")]
struct Cli {
    /// Settings file (defaults to `~/.brew/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

fn load_settings(cli: &Cli) -> Result<BrewSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(brew_settings::settings_path);
    let mut settings = brew_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    brew_telemetry::init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    let metrics = match brew_telemetry::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let store = Arc::new(MemoryKettleStore::new());
    let server = BrewServer::new(settings, store, Arc::new(LogNotifier), metrics);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    info!(%addr, "brew ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    info!("shutting down");
    if !server.graceful_shutdown(handle).await {
        warn!("shutdown timed out with connections still open");
    }
    Ok(())
}
