//! Halcyon Server - standalone headless server for the Halcyon media hub.
//!
//! This binary hosts the full hub: the virtual file system with its network
//! backends, UPnP and tuner discovery, the add-on subsystem and the
//! HTTP/WebSocket API. It's designed for server deployments where the hub
//! runs as a background daemon.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use halcyon_core::{bootstrap_services, start_server};
use tokio::signal;

use crate::config::ServerConfig;

/// Halcyon Server - headless media hub daemon.
#[derive(Parser, Debug)]
#[command(name = "halcyon-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "HALCYON_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "HALCYON_PORT")]
    port: Option<u16>,

    /// Data directory for persistent state (add-on catalog database).
    #[arg(short = 'd', long, env = "HALCYON_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Halcyon Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    if let Some(ref dir) = config.data_dir {
        log::info!("Using data directory: {}", dir.display());
    } else {
        log::info!("No data directory configured - add-on catalog will not persist");
    }

    // Bootstrap services
    let services =
        bootstrap_services(config.to_core_config()).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Start background tasks (discovery sweeps, repository refresh)
    services.start_background_tasks();

    log::info!("Background tasks started");

    // Spawn the HTTP server. It shares the services' cancellation token,
    // so the graceful-shutdown path below also drains the server.
    let app_state = services.app_state();
    let server_token = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, server_token).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: cancel background tasks and drain the server
    services.shutdown();

    if let Err(e) = server_handle.await {
        log::warn!("Server task did not exit cleanly: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
