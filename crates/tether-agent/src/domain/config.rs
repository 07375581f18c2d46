//! Agent configuration types.
//!
//! [`AgentConfig`] is the single source of truth for the agent's runtime
//! settings.  It is constructed from CLI arguments in `main.rs`; keeping it
//! a plain struct (no global state, no environment reads inside the domain)
//! makes the agent easy to drive from tests.

use std::path::PathBuf;
use std::time::Duration;

/// All runtime configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket URL of the relay, e.g. `ws://127.0.0.1:9170`.
    pub relay_url: String,

    /// Root of the workspace directory to watch, recursively.
    pub watch_path: PathBuf,

    /// How often to send an application-level ping to the relay.
    ///
    /// This is separate from the WebSocket protocol-level ping/pong (which
    /// tokio-tungstenite handles automatically).  The application ping keeps
    /// the agent's registry entry fresh so the relay's liveness sweep never
    /// evicts a healthy connection.
    pub ping_interval: Duration,
}

impl Default for AgentConfig {
    /// Returns an `AgentConfig` suitable for local development: relay on
    /// localhost, watching the current directory, pinging every 5 seconds.
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9170".to_string(),
            watch_path: PathBuf::from("."),
            ping_interval: Duration::from_secs(5),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
