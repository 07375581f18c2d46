//! # tether-core
//!
//! Shared library for Tether containing the wire protocol: the closed set of
//! message variants exchanged between the editor-side agent, the relay, and
//! companion clients, plus the JSON codec that validates them.
//!
//! This crate is used by both the relay and the agent. It has zero
//! dependencies on sockets, the filesystem, or any runtime — every function
//! here is a pure transformation over typed data.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::ProtocolMessage` instead of spelling out the module path.
pub use protocol::codec::{parse, serialize, ProtocolError};
pub use protocol::messages::{make_pong, MessageKind, ProtocolMessage, Role};
