//! Domain layer: agent configuration.

pub mod config;

pub use config::AgentConfig;
