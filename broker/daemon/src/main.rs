//! Broker Daemon
//!
//! Standalone HTTP server for the generation session broker.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default address (127.0.0.1:8000) against a local Ollama
//! broker-daemon
//!
//! # Use the cloud backend
//! OPENAI_API_KEY=sk-... broker-daemon --bind 0.0.0.0:8000
//!
//! # With verbose logging
//! RUST_LOG=debug broker-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `BROKER_CONFIG`: Path to a TOML config file
//! - `OPENAI_API_KEY`: Selects the cloud backend when set
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Local model server address
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use broker_core::{BackendSelector, BrokerConfig, Generator, SessionBroker};
use broker_daemon::{serve, AppState};

/// Generation session broker daemon
#[derive(Debug, Parser)]
#[command(name = "broker-daemon", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "BROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config and BROKER_BIND)
    #[arg(long)]
    bind: Option<String>,
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("broker_daemon=info".parse()?)
                .add_directive("broker_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Starting Broker Daemon");

    let mut config = BrokerConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    let selector = BackendSelector::new(&config).context("Failed to set up backend")?;
    let state = AppState::new(Generator::new(selector), SessionBroker::new());

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;

    serve(listener, state, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Broker daemon stopped cleanly");
    Ok(())
}
