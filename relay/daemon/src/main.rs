//! Relay Daemon - Question relay server for a local LLM
//!
//! Serves `/api/ask` and `/api/ask-stream` in front of an Ollama-compatible
//! backend and records every exchange in SQLite.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:5000, backend on localhost:11434)
//! relay-daemon
//!
//! # Another backend and model
//! relay-daemon --backend-url http://gpu-box:11434 --model llama3.2
//!
//! # With config file
//! relay-daemon --config ~/.config/ask-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use relay_core::{default_config_path, load_config_from_path, ConfigOverrides};
use relay_daemon::{app_router, build_state};

/// Relay Daemon - Question relay server for a local LLM
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(short = 'b', long, value_name = "URL")]
    backend_url: Option<String>,

    /// Model used when a request names none
    #[arg(short = 'm', long, value_name = "NAME")]
    model: Option<String>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// SQLite database path
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Keep history in memory instead of SQLite
    #[arg(long)]
    in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend_url: self.backend_url.clone(),
            default_model: self.model.clone(),
            listen_addr: self.listen,
            database_path: self.database.clone(),
            in_memory_history: self.in_memory,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "relay_daemon={level},relay_core={level},tower_http={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Resolve when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    if let Some(ref path) = config_path {
        info!(config_path = ?path, "Config file");
    }

    let mut config = load_config_from_path(config_path).context("Failed to load config")?;
    config.apply_overrides(&args.overrides());
    config.validate().context("Invalid configuration")?;
    info!(source = %config.source(), "Configuration loaded");

    let state = build_state(&config)?;
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server stopped with error");
            Err(e.into())
        }
    }
}
