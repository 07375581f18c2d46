//! Tether agent — entry point.
//!
//! Runs next to the editor: watches a workspace directory, collapses save
//! bursts into single debounced notifications, and pushes them to the relay
//! over WebSocket under the `extension` role.
//!
//! # Usage
//!
//! ```text
//! tether-agent [OPTIONS]
//!
//! Options:
//!   --relay-url <URL>        Relay WebSocket URL [default: ws://127.0.0.1:9170]
//!   --watch <PATH>           Workspace directory to watch [default: .]
//!   --ping-interval <SECS>   Keepalive ping interval in seconds [default: 5]
//! ```
//!
//! Each option also reads an environment variable (`TETHER_RELAY_URL`,
//! `TETHER_WATCH_PATH`, `TETHER_PING_INTERVAL`); CLI arguments win.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_agent::domain::AgentConfig;
use tether_agent::infrastructure::run_agent;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tether workspace agent.
///
/// Watches a directory and relays debounced file-change notifications to
/// companion clients through a tether relay.
#[derive(Debug, Parser)]
#[command(
    name = "tether-agent",
    about = "Editor-side agent: debounced file watching with relay push",
    version
)]
struct Cli {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:9170", env = "TETHER_RELAY_URL")]
    relay_url: String,

    /// Workspace directory to watch, recursively.
    #[arg(long, default_value = ".", env = "TETHER_WATCH_PATH")]
    watch: PathBuf,

    /// Keepalive ping interval in seconds.
    #[arg(long, default_value_t = 5, env = "TETHER_PING_INTERVAL")]
    ping_interval: u64,
}

impl Cli {
    fn into_agent_config(self) -> AgentConfig {
        AgentConfig {
            relay_url: self.relay_url,
            watch_path: self.watch,
            ping_interval: Duration::from_secs(self.ping_interval),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_agent_config();

    info!(
        "tether agent starting — relay={}, watch={}",
        config.relay_url,
        config.watch_path.display()
    );

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

    run_agent(config, running).await?;

    info!("tether agent stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["tether-agent"]);
        assert_eq!(cli.relay_url, "ws://127.0.0.1:9170");
        assert_eq!(cli.watch, PathBuf::from("."));
        assert_eq!(cli.ping_interval, 5);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "tether-agent",
            "--relay-url",
            "ws://10.0.0.5:9170",
            "--watch",
            "/home/dev/project",
            "--ping-interval",
            "10",
        ]);
        let config = cli.into_agent_config();

        assert_eq!(config.relay_url, "ws://10.0.0.5:9170");
        assert_eq!(config.watch_path, PathBuf::from("/home/dev/project"));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
    }
}
