//! Domain types for the relay: configuration.

pub mod config;

pub use config::RelayConfig;
