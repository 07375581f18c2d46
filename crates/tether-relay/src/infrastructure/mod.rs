//! Infrastructure layer: the WebSocket transport that feeds the router.

pub mod ws_server;

pub use ws_server::run_server;
