//! Tether agent library.
//!
//! The agent runs next to the editor: it watches a workspace directory,
//! collapses save bursts into single debounced notifications, and pushes
//! them to the relay over WebSocket under the `extension` role.
//!
//! Layered the same way as the relay:
//!
//! - `domain` — agent configuration.
//! - `application` — the debounced watcher.
//! - `infrastructure` — the WebSocket connection to the relay.

pub mod application;
pub mod domain;
pub mod infrastructure;
