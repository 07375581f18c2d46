//! ConnectionRegistry: the single source of truth for which roles are
//! currently connected.
//!
//! Each live connection is tracked as a [`Connection`] with its declared
//! role and last-seen time. The registry owns every entry exclusively from
//! accept to disconnect or liveness eviction.
//!
//! The role index (`role -> set of ids`) is derived from the primary
//! id-keyed map. Both are updated inside the same `&mut self` call, so they
//! can never diverge; callers that share the registry across tasks serialize
//! all mutation behind one mutex.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use thiserror::Error;
use tether_core::Role;
use uuid::Uuid;

/// Identifier assigned to a connection on accept.
pub type ConnectionId = Uuid;

/// Error type for registry operations. These are programming-contract
/// violations in callers, not expected runtime conditions, and are surfaced
/// rather than swallowed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// A live connection's identity, declared role, and last-seen time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub role: Role,
    /// Updated on every inbound message; drives liveness eviction.
    pub last_seen_at: Instant,
}

/// In-memory registry of all live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_id: HashMap<ConnectionId, Connection>,
    by_role: HashMap<Role, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its declared role.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateConnection`] if `connection_id` is
    /// already present.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        role: Role,
        now: Instant,
    ) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }
        self.by_id.insert(
            connection_id,
            Connection {
                connection_id,
                role,
                last_seen_at: now,
            },
        );
        self.by_role.entry(role).or_default().insert(connection_id);
        Ok(())
    }

    /// Updates `last_seen_at` for a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if not registered.
    pub fn touch(&mut self, connection_id: ConnectionId, now: Instant) -> Result<(), RegistryError> {
        let conn = self
            .by_id
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;
        conn.last_seen_at = now;
        Ok(())
    }

    /// Removes a connection. Idempotent: unregistering an absent id is a
    /// no-op.
    pub fn unregister(&mut self, connection_id: ConnectionId) {
        if let Some(conn) = self.by_id.remove(&connection_id) {
            if let Some(ids) = self.by_role.get_mut(&conn.role) {
                ids.remove(&connection_id);
                if ids.is_empty() {
                    self.by_role.remove(&conn.role);
                }
            }
        }
    }

    /// Returns a snapshot of every connection of the given role.
    ///
    /// An empty result is not an error: delivery to a missing role is a
    /// no-op at the routing layer.
    pub fn find_by_role(&self, role: Role) -> Vec<Connection> {
        self.by_role
            .get(&role)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes and returns every connection whose `last_seen_at` is older
    /// than `timeout` relative to `now`.
    pub fn sweep_stale(&mut self, now: Instant, timeout: Duration) -> Vec<Connection> {
        let stale: Vec<ConnectionId> = self
            .by_id
            .values()
            .filter(|c| now.saturating_duration_since(c.last_seen_at) > timeout)
            .map(|c| c.connection_id)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(conn) = self.by_id.remove(&id) {
                if let Some(ids) = self.by_role.get_mut(&conn.role) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_role.remove(&conn.role);
                    }
                }
                evicted.push(conn);
            }
        }
        evicted
    }

    /// Returns the connection entry, if registered.
    pub fn get(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.by_id.get(&connection_id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
