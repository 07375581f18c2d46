//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from CLI arguments, loaded from a TOML file, or
//! taken from defaults (useful for local development and tests).
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the relay easy to embed in tests.
//! The binary entry point is responsible for populating the struct.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address {addr:?}: {source}")]
    BadBindAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// All runtime configuration for the relay.
///
/// Build this once at startup and share it behind an `Arc` across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address and port the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Connections silent for longer than this are evicted by the liveness
    /// sweeper. Deployment configuration, not a protocol constant.
    pub liveness_timeout: Duration,

    /// Silence window after which a registered connection is considered idle
    /// (still alive, just quiet).
    pub idle_after: Duration,

    /// How often the liveness sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    /// Returns a `RelayConfig` suitable for local development:
    /// bind `0.0.0.0:9170`, 30 s liveness timeout, 10 s idle window,
    /// 5 s sweep cadence.
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address string.
            bind_addr: "0.0.0.0:9170".parse().unwrap(),
            liveness_timeout: Duration::from_secs(30),
            idle_after: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

// ── TOML schema ───────────────────────────────────────────────────────────────

/// On-disk schema. Every field is optional so a partial file (or one written
/// by an older release) still loads; absent fields take the defaults above.
#[derive(Debug, Deserialize)]
struct RelayConfigFile {
    #[serde(default = "default_bind_addr")]
    bind_addr: String,
    #[serde(default = "default_liveness_timeout_secs")]
    liveness_timeout_secs: u64,
    #[serde(default = "default_idle_after_secs")]
    idle_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9170".to_string()
}
fn default_liveness_timeout_secs() -> u64 {
    30
}
fn default_idle_after_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    5
}

impl RelayConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML and
    /// [`ConfigError::BadBindAddr`] when `bind_addr` is not a socket address.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: RelayConfigFile = toml::from_str(text)?;
        let bind_addr = file
            .bind_addr
            .parse()
            .map_err(|source| ConfigError::BadBindAddr {
                addr: file.bind_addr.clone(),
                source,
            })?;
        Ok(Self {
            bind_addr,
            liveness_timeout: Duration::from_secs(file.liveness_timeout_secs),
            idle_after: Duration::from_secs(file.idle_after_secs),
            sweep_interval: Duration::from_secs(file.sweep_interval_secs),
        })
    }

    /// Loads a configuration from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, plus the
    /// errors documented on [`RelayConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_port() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bind_addr.port(), 9170);
    }

    #[test]
    fn test_default_liveness_timeout_is_30s() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_default_sweep_interval_is_5s() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_from_toml_full_file() {
        let text = r#"
            bind_addr = "127.0.0.1:9999"
            liveness_timeout_secs = 60
            idle_after_secs = 20
            sweep_interval_secs = 10
        "#;
        let cfg = RelayConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9999");
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(60));
        assert_eq!(cfg.idle_after, Duration::from_secs(20));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_from_toml_partial_file_uses_defaults() {
        let cfg = RelayConfig::from_toml_str("liveness_timeout_secs = 120").unwrap();
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(120));
        assert_eq!(cfg, RelayConfig {
            liveness_timeout: Duration::from_secs(120),
            ..RelayConfig::default()
        });
    }

    #[test]
    fn test_from_toml_empty_file_equals_default() {
        let cfg = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn test_from_toml_invalid_bind_addr_is_rejected() {
        let result = RelayConfig::from_toml_str(r#"bind_addr = "not-an-addr""#);
        assert!(matches!(result, Err(ConfigError::BadBindAddr { .. })));
    }

    #[test]
    fn test_from_toml_invalid_syntax_is_rejected() {
        let result = RelayConfig::from_toml_str("bind_addr = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
