//! Tether relay — entry point.
//!
//! This binary accepts WebSocket connections from editor extensions and
//! mobile companion clients, classifies each by its declared role, and
//! relays file-change notifications and liveness traffic between the two
//! sides.  It holds no durable state: a message with no connected peer of
//! the opposite role is dropped.
//!
//! # Usage
//!
//! ```text
//! tether-relay [OPTIONS]
//!
//! Options:
//!   --port <PORT>              WebSocket listener port [default: 9170]
//!   --bind <ADDR>              IP address to bind [default: 0.0.0.0]
//!   --config <PATH>            Optional TOML config file
//!   --liveness-timeout <SECS>  Evict connections silent this long [default: 30]
//!   --idle-after <SECS>        Mark connections idle after this [default: 10]
//!   --sweep-interval <SECS>    Liveness sweep period [default: 5]
//! ```
//!
//! CLI arguments override values from the config file; both can be set via
//! environment variables (`TETHER_RELAY_PORT` and friends).  Precedence is
//! CLI > environment > config file > built-in defaults.
//!
//! # Architecture overview
//!
//! ```text
//! editor extension ──┐                       ┌── mobile companion
//!                    ├── tether-relay ───────┤
//! editor extension ──┘   domain/   RelayConfig
//!                         application/  registry + router
//!                         infrastructure/  WebSocket accept loop
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_relay::domain::RelayConfig;
use tether_relay::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tether relay server.
///
/// Routes debounced file-change notifications from editor extensions to
/// mobile companion clients over WebSocket.
#[derive(Debug, Parser)]
#[command(
    name = "tether-relay",
    about = "Role-based WebSocket relay for editor-to-companion file-change notifications",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server to listen on.
    #[arg(long, env = "TETHER_RELAY_PORT")]
    port: Option<u16>,

    /// IP address to bind the listener to.
    ///
    /// Use `0.0.0.0` to accept connections from any interface, or
    /// `127.0.0.1` for local connections only.
    #[arg(long, env = "TETHER_RELAY_BIND")]
    bind: Option<String>,

    /// Optional TOML configuration file.
    #[arg(long, env = "TETHER_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Evict connections that stay silent for this many seconds.
    #[arg(long, env = "TETHER_RELAY_LIVENESS_TIMEOUT")]
    liveness_timeout: Option<u64>,

    /// Mark connections idle after this many silent seconds.
    #[arg(long, env = "TETHER_RELAY_IDLE_AFTER")]
    idle_after: Option<u64>,

    /// Run the liveness sweep every this many seconds.
    #[arg(long, env = "TETHER_RELAY_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,
}

impl Cli {
    /// Resolves the final [`RelayConfig`]: config file (when given) under
    /// CLI/env overrides, defaults filling the gaps.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// `--bind`/`--port` do not form a valid socket address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if self.bind.is_some() || self.port.is_some() {
            let bind = self.bind.as_deref().unwrap_or("0.0.0.0");
            let port = self.port.unwrap_or_else(|| config.bind_addr.port());
            config.bind_addr = format!("{bind}:{port}")
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid bind address: '{bind}:{port}'"))?;
        }
        if let Some(secs) = self.liveness_timeout {
            config.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.idle_after {
            config.idle_after = Duration::from_secs(secs);
        }
        if let Some(secs) = self.sweep_interval {
            config.sweep_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log level comes from RUST_LOG, falling back to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_relay_config()?;

    info!(
        "tether relay starting — bind={}, liveness_timeout={:?}",
        config.bind_addr, config.liveness_timeout
    );

    // Graceful shutdown flag. The accept loop checks it every 200 ms and
    // exits cleanly once Ctrl+C flips it.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("tether relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
