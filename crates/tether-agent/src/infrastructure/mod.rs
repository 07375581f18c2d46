//! Infrastructure layer: the WebSocket connection to the relay.

pub mod relay_conn;

pub use relay_conn::run_agent;
