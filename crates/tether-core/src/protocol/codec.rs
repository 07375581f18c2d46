//! JSON codec for validating and discriminating Tether wire payloads.
//!
//! Wire format: one JSON object per frame.
//! ```text
//! { "id": string, "timestamp": number, "type": string, ...variant fields }
//! ```
//!
//! Parsing is strict about the envelope: a payload missing `id`, `timestamp`,
//! or `type`, carrying a wrong-shaped field, or missing a variant-required
//! field is rejected. The `"type"` discriminant is checked before the full
//! deserialization so callers can distinguish "unknown variant" from
//! "recognized variant with a malformed body".

use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{MessageKind, ProtocolMessage};

/// Errors that can occur while parsing a wire payload.
///
/// Both variants are connection-fatal: the relay closes the offending
/// connection the same way for either. The split exists for diagnostics,
/// so logs distinguish a payload nobody could decode from one that merely
/// comes from a newer (or foreign) protocol revision.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload is not valid JSON, the envelope is incomplete, or a
    /// variant-required field is missing or of the wrong shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The `"type"` discriminant is present but not a recognized variant.
    #[error("unknown message type: {0:?}")]
    UnknownMessageType(String),
}

/// The closed set of recognized `"type"` discriminants.
const KNOWN_KINDS: [MessageKind; 4] = [
    MessageKind::Hello,
    MessageKind::Ping,
    MessageKind::Pong,
    MessageKind::FileChanged,
];

/// Parses one wire payload into a typed [`ProtocolMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] when the payload is not a
/// JSON object, the envelope (`id`, `timestamp`, `type`) is missing or of
/// the wrong shape, or a variant-required field (`role`, `source`,
/// `originalId`, `path`) is absent. Returns
/// [`ProtocolError::UnknownMessageType`] when `type` is not in the closed
/// variant set.
///
/// # Examples
///
/// ```rust
/// use tether_core::{parse, serialize, ProtocolMessage, Role};
///
/// let ping = ProtocolMessage::ping(Role::Extension);
/// let decoded = parse(&serialize(&ping)).unwrap();
/// assert_eq!(decoded, ping);
/// ```
pub fn parse(raw: &str) -> Result<ProtocolMessage, ProtocolError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid JSON: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::MalformedMessage("payload is not a JSON object".into()))?;

    // Check the discriminant first so an unrecognized variant is reported as
    // such rather than as a generic deserialization failure.
    let kind = obj
        .get("type")
        .ok_or_else(|| ProtocolError::MalformedMessage("missing field `type`".into()))?
        .as_str()
        .ok_or_else(|| ProtocolError::MalformedMessage("field `type` must be a string".into()))?;

    if !KNOWN_KINDS.iter().any(|k| k.as_str() == kind) {
        return Err(ProtocolError::UnknownMessageType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
}

/// Serializes a [`ProtocolMessage`] to its JSON wire form.
///
/// Total function: the input is already well-typed and the variant set maps
/// onto plain string-keyed JSON objects, so there is no failure path.
pub fn serialize(msg: &ProtocolMessage) -> String {
    // Infallible for this closed, string-keyed variant set.
    serde_json::to_string(msg).expect("ProtocolMessage serializes without error")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
