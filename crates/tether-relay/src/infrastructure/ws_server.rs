//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from editor extensions and
//!    mobile companions.
//! 3. Upgrading each connection to a WebSocket session and admitting it
//!    to the shared [`RelayRouter`].
//! 4. Running two tasks per connection:
//!    - **Reader**: reads text frames from the WebSocket and hands them
//!      to the router.
//!    - **Writer**: drains the connection's outbound channel into the
//!      WebSocket sink, preserving the enqueue order.
//! 5. Running a periodic liveness sweep that evicts silent connections.
//! 6. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task pair.  The `run_server`
//! accept loop never blocks: it accepts a connection and immediately spawns
//! tasks for it before accepting the next one.  Routing decisions are
//! serialized behind a single async mutex on the router; actual frame
//! delivery happens on the per-connection writer tasks, outside the lock.
//!
//! # Portability
//!
//! Uses only `tokio::net` APIs which are portable across Windows, Linux, and
//! macOS.  Shutdown is triggered by a shared `AtomicBool` that is set by a
//! Ctrl+C signal handler (see `main.rs`), which is also cross-platform.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::registry::ConnectionId;
use crate::application::router::RelayRouter;
use crate::domain::RelayConfig;

/// The router behind the lock every connection task shares.
pub type SharedRouter = Arc<Mutex<RelayRouter>>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the main WebSocket accept loop until `running` is set to `false`.
///
/// Binds a TCP listener on `config.bind_addr` and accepts incoming
/// connections in a loop.  Each accepted connection is handed off to a
/// dedicated Tokio task so that one slow client never blocks others.  A
/// background sweeper task evicts connections that stay silent beyond the
/// configured liveness timeout.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

    info!("relay listening on {}", config.bind_addr);

    let router: SharedRouter = Arc::new(Mutex::new(RelayRouter::new(config.idle_after)));

    // Liveness sweeper. Runs for the life of the server; aborted on shutdown.
    let sweeper = tokio::spawn(run_sweeper(
        Arc::clone(&router),
        config.sweep_interval,
        config.liveness_timeout,
        Arc::clone(&running),
    ));

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout on `accept()` lets the loop check the `running`
        // flag even when no clients are connecting.
        let accept_result = timeout(Duration::from_millis(200), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, peer_addr))) => {
                info!("new connection from {peer_addr}");
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, router).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file
                // descriptors). Log it and keep the relay alive.
                error!("accept error: {e}");
            }
            Err(_) => {
                // Timeout; loop back to check the `running` flag.
            }
        }
    }

    sweeper.abort();
    Ok(())
}

/// Evicts silent connections every `sweep_interval`.
async fn run_sweeper(
    router: SharedRouter,
    sweep_interval: Duration,
    liveness_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    let mut ticker = interval(sweep_interval);
    ticker.tick().await; // the first tick fires immediately

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let evicted = router.lock().await.sweep(Instant::now(), liveness_timeout);
        if !evicted.is_empty() {
            info!("liveness sweep evicted {} connection(s)", evicted.len());
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Top-level handler for a single WebSocket connection.
///
/// Wraps [`run_connection`] and logs the outcome.  This function is the
/// entry point for each per-connection Tokio task spawned by [`run_server`].
async fn handle_connection(raw_stream: TcpStream, peer_addr: SocketAddr, router: SharedRouter) {
    match run_connection(raw_stream, peer_addr, router).await {
        Ok(()) => info!("connection from {peer_addr} closed"),
        Err(e) => warn!("connection from {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one WebSocket connection.
///
/// 1. Completes the WebSocket upgrade handshake.
/// 2. Admits the connection to the router under a fresh id.
/// 3. Runs two concurrent tasks:
///    - Writer: outbound channel → WebSocket sink
///    - Reader: WebSocket stream → router
/// 4. On exit of either task, tells the router the connection is gone.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn run_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    router: SharedRouter,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let connection_id: ConnectionId = Uuid::new_v4();
    debug!("session established: {peer_addr} as {connection_id}");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // The router enqueues frames here; the writer task drains them in order.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    router
        .lock()
        .await
        .accept(connection_id, outbound_tx, Instant::now());

    // ── Writer task ───────────────────────────────────────────────────────────
    //
    // Ends when the router drops the outbound sender (connection closed) or
    // the peer stops accepting frames.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(WsMessage::Text(frame)).await {
                debug!("connection {connection_id}: send failed: {e}");
                break;
            }
        }
        // Best-effort close handshake; the peer may already be gone.
        let _ = ws_tx.close().await;
    });

    // ── Reader loop ───────────────────────────────────────────────────────────
    //
    // Runs on this task. Every text frame goes to the router; a router error
    // means the router already closed this connection, so the loop ends.
    loop {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("connection {connection_id}: peer closed");
                break;
            }
            Some(Err(e)) => {
                warn!("connection {connection_id}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("connection {connection_id}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(raw) => {
                let result = router
                    .lock()
                    .await
                    .handle_inbound(connection_id, &raw, Instant::now());
                if let Err(e) = result {
                    warn!("connection {connection_id} closed by router: {e}");
                    break;
                }
            }
            WsMessage::Binary(_) => {
                // The wire protocol is JSON text only.
                warn!("connection {connection_id}: unexpected binary frame (ignored)");
            }
            WsMessage::Ping(data) => {
                // Transport-level ping, distinct from the application-level
                // ping message. tokio-tungstenite replies automatically.
                debug!("connection {connection_id}: WebSocket ping ({} bytes)", data.len());
            }
            WsMessage::Pong(_) => {
                debug!("connection {connection_id}: WebSocket pong received");
            }
            WsMessage::Close(_) => {
                debug!("connection {connection_id}: Close frame received");
                break;
            }
            WsMessage::Frame(_) => {
                debug!("connection {connection_id}: raw frame (ignored)");
            }
        }
    }

    // Idempotent: the router may already have closed this connection.
    // Dropping the session there drops the outbound sender, which in turn
    // ends the writer task.
    router.lock().await.disconnect(connection_id);
    let _ = writer_task.await;

    Ok(())
}
