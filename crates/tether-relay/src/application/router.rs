//! RelayRouter: accepts connections, classifies them by role, routes
//! protocol messages between complementary roles, and answers liveness
//! pings.
//!
//! Per-connection state machine:
//!
//! ```text
//! Connecting ──► Registered ──► (Active ⇄ Idle) ──► Closed
//! ```
//!
//! - `Connecting`: transport established, role not yet declared.
//! - `Registered`: the role-declaring `hello` was validated and the
//!   connection entered the registry.
//! - `Active`: inbound traffic seen recently.
//! - `Idle`: silent beyond the configured window, but still alive.
//! - `Closed`: terminal — disconnect, protocol violation, or liveness
//!   timeout. The connection is unregistered.
//!
//! Routing never blocks: delivery is a fire-and-forget enqueue onto each
//! target connection's outbound channel, which preserves FIFO per
//! connection. There is no durable queue; a message with no target of the
//! complementary role is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tether_core::{make_pong, parse, serialize, ProtocolError, ProtocolMessage, Role};

use crate::application::registry::{ConnectionId, ConnectionRegistry, RegistryError};

/// Error type for inbound message handling.
///
/// All variants are connection-local: the router closes the offending
/// connection and the caller tears down its transport. Other connections
/// are unaffected.
#[derive(Debug, Error, PartialEq)]
pub enum RouterError {
    /// The payload failed validation; closes the sending connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Registry contract violation (duplicate or unknown connection).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A well-formed message that is illegal in the connection's current
    /// state (e.g. traffic before `hello`, or a second `hello`).
    #[error("protocol violation: {0}")]
    Violation(&'static str),
}

/// Lifecycle state of a connection as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Active,
    Idle,
    Closed,
}

/// Router-side handle for one connection: its state plus the outbound
/// channel the transport task drains.
struct Session {
    state: SessionState,
    /// When the transport was admitted. Liveness for `Connecting` sessions
    /// is aged from this, since they have no registry entry to touch yet.
    accepted_at: Instant,
    outbound: mpsc::UnboundedSender<String>,
}

/// The relay router. All mutation happens through `&mut self`; callers
/// that drive it from multiple tasks serialize access behind a single
/// `tokio::sync::Mutex`.
pub struct RelayRouter {
    registry: ConnectionRegistry,
    sessions: HashMap<ConnectionId, Session>,
    idle_after: Duration,
}

impl RelayRouter {
    /// Creates a router with the given idle silence window.
    pub fn new(idle_after: Duration) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            sessions: HashMap::new(),
            idle_after,
        }
    }

    /// Admits a freshly accepted transport in the `Connecting` state.
    ///
    /// The connection joins the registry only once it declares a role via
    /// `hello`; until then it cannot send or receive relayed traffic, and
    /// the sweep evicts it by `now` if the hello never arrives.
    pub fn accept(
        &mut self,
        connection_id: ConnectionId,
        outbound: mpsc::UnboundedSender<String>,
        now: Instant,
    ) {
        self.sessions.insert(
            connection_id,
            Session {
                state: SessionState::Connecting,
                accepted_at: now,
                outbound,
            },
        );
    }

    /// Handles one inbound frame from `connection_id`.
    ///
    /// # Errors
    ///
    /// Any returned error means the sending connection was transitioned to
    /// `Closed` and unregistered; the transport layer should drop it. Other
    /// connections are never affected by one sender's error.
    pub fn handle_inbound(
        &mut self,
        connection_id: ConnectionId,
        raw: &str,
        now: Instant,
    ) -> Result<(), RouterError> {
        let state = match self.sessions.get(&connection_id) {
            Some(session) => session.state,
            None => {
                // Transport raced with a close; nothing to route.
                debug!("inbound frame from unknown connection {connection_id}, ignored");
                return Ok(());
            }
        };

        let msg = match parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("connection {connection_id}: malformed inbound message: {e}");
                self.close(connection_id);
                return Err(e.into());
            }
        };

        match state {
            SessionState::Connecting => self.handle_hello(connection_id, msg, now),
            SessionState::Registered | SessionState::Active | SessionState::Idle => {
                self.handle_registered(connection_id, msg, raw, now)
            }
            SessionState::Closed => {
                debug!("inbound frame on closed connection {connection_id}, ignored");
                Ok(())
            }
        }
    }

    /// First-message handling: only `hello` is legal before registration.
    fn handle_hello(
        &mut self,
        connection_id: ConnectionId,
        msg: ProtocolMessage,
        now: Instant,
    ) -> Result<(), RouterError> {
        let role = match msg {
            ProtocolMessage::Hello { role, .. } => role,
            other => {
                warn!(
                    "connection {connection_id}: {:?} before role declaration",
                    other.kind()
                );
                self.close(connection_id);
                return Err(RouterError::Violation("first message must declare a role"));
            }
        };

        if let Err(e) = self.registry.register(connection_id, role, now) {
            self.close(connection_id);
            return Err(e.into());
        }
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.state = SessionState::Registered;
        }
        debug!("connection {connection_id} registered as {role}");
        Ok(())
    }

    /// Post-registration handling: touch liveness, answer pings, forward
    /// everything else to the complementary role.
    fn handle_registered(
        &mut self,
        connection_id: ConnectionId,
        msg: ProtocolMessage,
        raw: &str,
        now: Instant,
    ) -> Result<(), RouterError> {
        self.registry.touch(connection_id, now)?;
        let sender_role = match self.registry.get(connection_id) {
            Some(conn) => conn.role,
            // touch() just succeeded, so the entry exists; treat a miss as
            // a recoverable inconsistency rather than poisoning the router.
            None => {
                warn!("connection {connection_id} touched but absent from registry");
                return Ok(());
            }
        };
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.state = SessionState::Active;
        }

        match &msg {
            ProtocolMessage::Hello { .. } => {
                // Role is immutable for the connection's lifetime.
                warn!("connection {connection_id}: repeated hello");
                self.close(connection_id);
                return Err(RouterError::Violation("role already declared"));
            }
            ProtocolMessage::Ping { .. } => {
                // The sender always gets a pong for its own ping, whether or
                // not a peer of the opposite role exists.
                if let Some(pong) = make_pong(&msg) {
                    self.enqueue(connection_id, &serialize(&pong));
                }
                self.forward(connection_id, sender_role, raw);
            }
            // Pongs and change notifications travel verbatim to every
            // connection of the complementary role.
            ProtocolMessage::Pong { .. } | ProtocolMessage::FileChanged { .. } => {
                self.forward(connection_id, sender_role, raw);
            }
        }
        Ok(())
    }

    /// Fire-and-forget delivery of `raw` to every connection of the role
    /// complementary to `sender_role`, excluding the sender itself.
    ///
    /// No target is not an error: the message is dropped. A target present
    /// in the registry but missing a session handle is a recoverable
    /// inconsistency, logged and skipped.
    fn forward(&mut self, sender_id: ConnectionId, sender_role: Role, raw: &str) {
        let targets = self.registry.find_by_role(sender_role.complement());
        if targets.is_empty() {
            debug!(
                "no {} connected; message from {sender_id} dropped",
                sender_role.complement()
            );
            return;
        }

        for target in targets {
            if target.connection_id == sender_id {
                continue;
            }
            self.enqueue(target.connection_id, raw);
        }
    }

    /// Enqueues one frame onto a connection's outbound channel.
    fn enqueue(&mut self, connection_id: ConnectionId, frame: &str) {
        match self.sessions.get(&connection_id) {
            Some(session) => {
                // A send error means the transport task already exited; the
                // disconnect path will clean the session up.
                if session.outbound.send(frame.to_string()).is_err() {
                    debug!("outbound channel for {connection_id} closed; frame dropped");
                }
            }
            None => warn!("registry lists {connection_id} but no session handle exists"),
        }
    }

    /// Transport-level disconnect. Idempotent; terminal.
    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        self.close(connection_id);
    }

    /// Runs one liveness pass: evicts connections silent beyond `timeout`
    /// and demotes connections silent beyond the idle window to `Idle`.
    /// Returns the evicted connection ids.
    ///
    /// A session still in `Connecting` has no registry entry, so it is aged
    /// from its accept time instead. One that never declares a role is
    /// evicted on the same timeout as a silent registered connection.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let expired: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.state == SessionState::Connecting
                    && now.saturating_duration_since(s.accepted_at) > timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            debug!("connection {id} evicted before role declaration");
            self.sessions.remove(id);
        }

        let evicted = self.registry.sweep_stale(now, timeout);
        for conn in &evicted {
            debug!(
                "connection {} ({}) evicted after liveness timeout",
                conn.connection_id, conn.role
            );
            if let Some(session) = self.sessions.get_mut(&conn.connection_id) {
                session.state = SessionState::Closed;
            }
            self.sessions.remove(&conn.connection_id);
        }

        // Demote surviving-but-silent connections to Idle.
        let idle_after = self.idle_after;
        for id in self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Active || s.state == SessionState::Registered)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>()
        {
            if let Some(conn) = self.registry.get(id) {
                if now.saturating_duration_since(conn.last_seen_at) > idle_after {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.state = SessionState::Idle;
                    }
                }
            }
        }

        expired
            .into_iter()
            .chain(evicted.into_iter().map(|c| c.connection_id))
            .collect()
    }

    fn close(&mut self, connection_id: ConnectionId) {
        self.registry.unregister(connection_id);
        // Dropping the session drops the outbound sender, which ends the
        // transport's writer task.
        if self.sessions.remove(&connection_id).is_some() {
            debug!("connection {connection_id} closed");
        }
    }

    /// Current state of a connection, if the router still tracks it.
    pub fn state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.sessions.get(&connection_id).map(|s| s.state)
    }

    /// Number of registered (role-declared) connections.
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn router() -> RelayRouter {
        RelayRouter::new(Duration::from_secs(10))
    }

    /// Admits a connection and returns its id plus the receiving end of its
    /// outbound channel.
    fn connect(router: &mut RelayRouter) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        router.accept(id, tx, Instant::now());
        (id, rx)
    }

    /// Admits and registers a connection under `role`.
    fn register(router: &mut RelayRouter, role: Role) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (id, rx) = connect(router);
        let hello = serialize(&ProtocolMessage::hello(role));
        router.handle_inbound(id, &hello, Instant::now()).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<ProtocolMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(parse(&frame).expect("router only emits valid frames"));
        }
        out
    }

    #[test]
    fn test_hello_registers_connection() {
        let mut router = router();
        let (id, _rx) = register(&mut router, Role::Extension);

        assert_eq!(router.state(id), Some(SessionState::Registered));
        assert_eq!(router.registered_count(), 1);
    }

    #[test]
    fn test_traffic_before_hello_closes_connection() {
        let mut router = router();
        let (id, _rx) = connect(&mut router);

        let ping = serialize(&ProtocolMessage::ping(Role::Extension));
        let result = router.handle_inbound(id, &ping, Instant::now());

        assert!(matches!(result, Err(RouterError::Violation(_))));
        assert_eq!(router.state(id), None);
        assert_eq!(router.registered_count(), 0);
    }

    #[test]
    fn test_second_hello_is_a_violation() {
        let mut router = router();
        let (id, _rx) = register(&mut router, Role::Mobile);

        let hello = serialize(&ProtocolMessage::hello(Role::Mobile));
        let result = router.handle_inbound(id, &hello, Instant::now());

        assert!(matches!(result, Err(RouterError::Violation(_))));
        assert_eq!(router.registered_count(), 0);
    }

    #[test]
    fn test_ping_gets_pong_even_with_no_peer() {
        let mut router = router();
        let (id, mut rx) = register(&mut router, Role::Extension);

        let ping = ProtocolMessage::ping(Role::Extension);
        router
            .handle_inbound(id, &serialize(&ping), Instant::now())
            .unwrap();

        let received = drain(&mut rx);
        assert_eq!(received.len(), 1, "exactly one pong, nothing else");
        match &received[0] {
            ProtocolMessage::Pong { original_id, .. } => assert_eq!(original_id, ping.id()),
            other => panic!("expected pong, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_ping_is_forwarded_to_complementary_role() {
        let mut router = router();
        let (ext, mut ext_rx) = register(&mut router, Role::Extension);
        let (_mob, mut mob_rx) = register(&mut router, Role::Mobile);

        let ping = ProtocolMessage::ping(Role::Extension);
        router
            .handle_inbound(ext, &serialize(&ping), Instant::now())
            .unwrap();

        // Sender gets the router's pong.
        let ext_frames = drain(&mut ext_rx);
        assert_eq!(ext_frames.len(), 1);
        assert!(matches!(ext_frames[0], ProtocolMessage::Pong { .. }));

        // Peer gets the ping verbatim.
        let mob_frames = drain(&mut mob_rx);
        assert_eq!(mob_frames.len(), 1);
        assert_eq!(mob_frames[0], ping);
    }

    #[test]
    fn test_file_changed_forwarded_verbatim_not_echoed() {
        let mut router = router();
        let (ext, mut ext_rx) = register(&mut router, Role::Extension);
        let (_mob, mut mob_rx) = register(&mut router, Role::Mobile);

        let changed = ProtocolMessage::file_changed("src/lib.rs");
        router
            .handle_inbound(ext, &serialize(&changed), Instant::now())
            .unwrap();

        assert_eq!(drain(&mut mob_rx), vec![changed]);
        assert!(drain(&mut ext_rx).is_empty(), "sender must not see its own message");
    }

    #[test]
    fn test_file_changed_with_no_target_is_dropped_without_error() {
        let mut router = router();
        let (ext, mut ext_rx) = register(&mut router, Role::Extension);

        let changed = ProtocolMessage::file_changed("src/lib.rs");
        let result = router.handle_inbound(ext, &serialize(&changed), Instant::now());

        assert_eq!(result, Ok(()));
        assert!(drain(&mut ext_rx).is_empty());
        assert_eq!(router.state(ext), Some(SessionState::Active));
    }

    #[test]
    fn test_broadcast_to_all_connections_of_complementary_role() {
        let mut router = router();
        let (ext, _ext_rx) = register(&mut router, Role::Extension);
        let (_m1, mut rx1) = register(&mut router, Role::Mobile);
        let (_m2, mut rx2) = register(&mut router, Role::Mobile);

        let changed = ProtocolMessage::file_changed("README.md");
        router
            .handle_inbound(ext, &serialize(&changed), Instant::now())
            .unwrap();

        assert_eq!(drain(&mut rx1), vec![changed.clone()]);
        assert_eq!(drain(&mut rx2), vec![changed]);
    }

    #[test]
    fn test_malformed_message_closes_only_the_sender() {
        let mut router = router();
        let (ext, _ext_rx) = register(&mut router, Role::Extension);
        let (mob, mut mob_rx) = register(&mut router, Role::Mobile);

        // Missing `type` entirely.
        let result = router.handle_inbound(ext, r#"{"id":"x","timestamp":1}"#, Instant::now());
        assert!(matches!(
            result,
            Err(RouterError::Protocol(ProtocolError::MalformedMessage(_)))
        ));
        assert_eq!(router.state(ext), None);

        // The other connection is unaffected and still routable.
        assert_eq!(router.state(mob), Some(SessionState::Registered));
        let ping = ProtocolMessage::ping(Role::Mobile);
        router
            .handle_inbound(mob, &serialize(&ping), Instant::now())
            .unwrap();
        assert_eq!(drain(&mut mob_rx).len(), 1);
    }

    #[test]
    fn test_disconnect_unregisters_and_is_idempotent() {
        let mut router = router();
        let (id, _rx) = register(&mut router, Role::Mobile);

        router.disconnect(id);
        assert_eq!(router.registered_count(), 0);
        assert_eq!(router.state(id), None);
        router.disconnect(id); // second call is a no-op
    }

    #[test]
    fn test_sweep_evicts_silent_connections() {
        let mut router = router();
        let start = Instant::now();

        let (stale, _stale_rx) = register(&mut router, Role::Mobile);
        let (fresh, _fresh_rx) = register(&mut router, Role::Extension);

        let later = start + Duration::from_secs(60);
        let ping = serialize(&ProtocolMessage::ping(Role::Extension));
        router.handle_inbound(fresh, &ping, later).unwrap();

        let evicted = router.sweep(later, Duration::from_secs(30));
        assert_eq!(evicted, vec![stale]);
        assert_eq!(router.state(stale), None);
        assert_eq!(router.state(fresh), Some(SessionState::Active));
    }

    #[test]
    fn test_sweep_evicts_connection_that_never_says_hello() {
        let mut router = router();
        let start = Instant::now();

        let stuck = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        router.accept(stuck, tx, start);

        // A fresh transport accepted just now must survive the same pass.
        let fresh = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let later = start + Duration::from_secs(3600);
        router.accept(fresh, tx, later);

        let evicted = router.sweep(later, Duration::from_secs(30));

        assert_eq!(evicted, vec![stuck]);
        assert_eq!(router.state(stuck), None);
        assert_eq!(router.state(fresh), Some(SessionState::Connecting));
    }

    #[test]
    fn test_sweep_demotes_quiet_connections_to_idle() {
        let mut router = router();
        let start = Instant::now();
        let (id, _rx) = register(&mut router, Role::Extension);

        // Silent past the idle window but inside the liveness timeout.
        let later = start + Duration::from_secs(15);
        let evicted = router.sweep(later, Duration::from_secs(30));

        assert!(evicted.is_empty());
        assert_eq!(router.state(id), Some(SessionState::Idle));
    }

    #[test]
    fn test_idle_connection_returns_to_active_on_traffic() {
        let mut router = router();
        let start = Instant::now();
        let (id, mut rx) = register(&mut router, Role::Extension);

        let later = start + Duration::from_secs(15);
        router.sweep(later, Duration::from_secs(30));
        assert_eq!(router.state(id), Some(SessionState::Idle));

        let ping = serialize(&ProtocolMessage::ping(Role::Extension));
        router.handle_inbound(id, &ping, later).unwrap();
        assert_eq!(router.state(id), Some(SessionState::Active));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_fifo_order_preserved_per_connection() {
        let mut router = router();
        let (ext, _ext_rx) = register(&mut router, Role::Extension);
        let (_mob, mut mob_rx) = register(&mut router, Role::Mobile);

        let first = ProtocolMessage::file_changed("a.rs");
        let second = ProtocolMessage::file_changed("b.rs");
        let now = Instant::now();
        router.handle_inbound(ext, &serialize(&first), now).unwrap();
        router.handle_inbound(ext, &serialize(&second), now).unwrap();

        assert_eq!(drain(&mut mob_rx), vec![first, second]);
    }
}
