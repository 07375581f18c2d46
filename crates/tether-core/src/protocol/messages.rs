//! All Tether wire message types.
//!
//! Every message travels as one JSON object per WebSocket text frame, with a
//! `"type"` field discriminating the variant and a common envelope of
//! `"id"` (opaque, globally unique per message instance) and `"timestamp"`
//! (integer epoch-millis at creation; not monotonic across producers).
//!
//! ```json
//! {"type":"ping","id":"4f1c...","timestamp":1712345678901,"source":"extension"}
//! {"type":"pong","id":"9a2e...","timestamp":1712345678920,"originalId":"4f1c..."}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant, so
//! adding a variant here is a compile-time-checked extension point: every
//! `match` over [`ProtocolMessage`] must be updated.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Roles ─────────────────────────────────────────────────────────────────────

/// A client's declared identity class, used for routing decisions.
///
/// The relay forwards traffic between complementary roles: what an
/// `extension` sends is delivered to every connected `mobile`, and vice
/// versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The editor-side sender (publishes file-change notifications).
    Extension,
    /// A remote companion receiver.
    Mobile,
}

impl Role {
    /// Returns the role traffic from this role is delivered to.
    pub fn complement(self) -> Role {
        match self {
            Role::Extension => Role::Mobile,
            Role::Mobile => Role::Extension,
        }
    }

    /// The wire spelling of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Extension => "extension",
            Role::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Message kinds ─────────────────────────────────────────────────────────────

/// Discriminant-only view of a [`ProtocolMessage`], for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Ping,
    Pong,
    FileChanged,
}

impl MessageKind {
    /// The wire spelling of the `"type"` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Hello => "hello",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::FileChanged => "fileChanged",
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid Tether messages, discriminated by the JSON `"type"` field.
///
/// Consumers must match on the variant and never assume fields outside the
/// matched variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtocolMessage {
    /// Role-declaring first message of every connection.
    ///
    /// The declared role is immutable for the connection's lifetime.
    Hello {
        id: String,
        timestamp: u64,
        role: Role,
    },

    /// Liveness probe. Either side may issue one; the relay always answers
    /// the sender with a [`ProtocolMessage::Pong`].
    Ping {
        id: String,
        timestamp: u64,
        /// The role that originated the probe.
        source: Role,
    },

    /// Answer to a ping, correlated by the original message id.
    #[serde(rename_all = "camelCase")]
    Pong {
        id: String,
        timestamp: u64,
        /// The `id` of the ping this pong answers.
        original_id: String,
    },

    /// A coalesced file-change notification from the debounced watcher.
    FileChanged {
        id: String,
        timestamp: u64,
        /// Path of the watched tree that changed.
        path: String,
    },
}

impl ProtocolMessage {
    /// Builds a role-declaring hello with a fresh envelope.
    pub fn hello(role: Role) -> Self {
        ProtocolMessage::Hello {
            id: fresh_id(),
            timestamp: now_millis(),
            role,
        }
    }

    /// Builds a liveness ping with a fresh envelope.
    pub fn ping(source: Role) -> Self {
        ProtocolMessage::Ping {
            id: fresh_id(),
            timestamp: now_millis(),
            source,
        }
    }

    /// Builds a file-change notification with a fresh envelope.
    pub fn file_changed(path: impl Into<String>) -> Self {
        ProtocolMessage::FileChanged {
            id: fresh_id(),
            timestamp: now_millis(),
            path: path.into(),
        }
    }

    /// Returns the envelope `id` of this message.
    pub fn id(&self) -> &str {
        match self {
            ProtocolMessage::Hello { id, .. }
            | ProtocolMessage::Ping { id, .. }
            | ProtocolMessage::Pong { id, .. }
            | ProtocolMessage::FileChanged { id, .. } => id,
        }
    }

    /// Returns the envelope creation timestamp (epoch-millis).
    pub fn timestamp(&self) -> u64 {
        match self {
            ProtocolMessage::Hello { timestamp, .. }
            | ProtocolMessage::Ping { timestamp, .. }
            | ProtocolMessage::Pong { timestamp, .. }
            | ProtocolMessage::FileChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the [`MessageKind`] discriminant for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Hello { .. } => MessageKind::Hello,
            ProtocolMessage::Ping { .. } => MessageKind::Ping,
            ProtocolMessage::Pong { .. } => MessageKind::Pong,
            ProtocolMessage::FileChanged { .. } => MessageKind::FileChanged,
        }
    }
}

/// Builds the pong answering `ping`: fresh envelope, `original_id` set to the
/// ping's `id`. Returns `None` when the input is not a ping.
pub fn make_pong(ping: &ProtocolMessage) -> Option<ProtocolMessage> {
    match ping {
        ProtocolMessage::Ping { id, .. } => Some(ProtocolMessage::Pong {
            id: fresh_id(),
            timestamp: now_millis(),
            original_id: id.clone(),
        }),
        _ => None,
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch at the time of the call.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Tests ─────────────────────────────────────────────────────────────────────
