//! WebSocket client connection to the relay.
//!
//! One connection per agent process. After the handshake the agent:
//!
//! 1. Declares itself with a `hello` carrying the `extension` role.
//! 2. Starts the debounced workspace watcher; each emitted batch becomes
//!    one `fileChanged` frame per path.
//! 3. Sends an application-level `ping` every `ping_interval` so the
//!    relay's liveness sweep never evicts it.
//! 4. Reads inbound frames: pongs are logged, forwarded pings from the
//!    companion side are answered with a pong.
//!
//! All outbound frames funnel through one unbounded channel drained by a
//! single writer task, so ordering is preserved regardless of which task
//! produced the frame.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, info, warn};

use tether_core::{make_pong, parse, serialize, ProtocolMessage, Role};

use crate::application::DebouncedWatcher;
use crate::domain::AgentConfig;

/// Runs the agent until the relay connection drops or `running` is cleared.
///
/// # Errors
///
/// Returns an error if the relay cannot be reached, the handshake fails,
/// or the workspace cannot be watched.
pub async fn run_agent(config: AgentConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let (ws_stream, _response) = connect_async(config.relay_url.as_str())
        .await
        .with_context(|| format!("failed to connect to relay at {}", config.relay_url))?;

    info!("connected to relay at {}", config.relay_url);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Single ordered funnel for everything the agent sends.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    // Role declaration must be the first frame on the wire.
    outbound_tx
        .send(serialize(&ProtocolMessage::hello(Role::Extension)))
        .ok();

    // ── Writer task ───────────────────────────────────────────────────────────
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(WsMessage::Text(frame)).await {
                debug!("relay send failed: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Keepalive task ────────────────────────────────────────────────────────
    //
    // Application-level pings, distinct from the WebSocket protocol pings
    // tokio-tungstenite answers on its own. Ends when the writer is gone.
    let ping_tx = outbound_tx.clone();
    let ping_interval = config.ping_interval;
    let keepalive_task = tokio::spawn(async move {
        let mut ticker = interval(ping_interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            let ping = ProtocolMessage::ping(Role::Extension);
            debug!("sending keepalive ping {}", ping.id());
            if ping_tx.send(serialize(&ping)).is_err() {
                break;
            }
        }
    });

    // ── Workspace watcher ─────────────────────────────────────────────────────
    //
    // Each debounced batch turns into one fileChanged frame per path.
    // The configured root is canonicalized up front: the watch backend
    // reports absolute paths, so stripping a relative root (the default
    // `.`) would never match.
    let watch_root = config
        .watch_path
        .canonicalize()
        .with_context(|| format!("cannot resolve watch path {}", config.watch_path.display()))?;

    let change_tx = outbound_tx.clone();
    let strip_root = watch_root.clone();
    let session = DebouncedWatcher::new().watch(&watch_root, move |batch| {
        for path in batch {
            let msg = ProtocolMessage::file_changed(reported_path(&strip_root, &path));
            change_tx
                .send(serialize(&msg))
                .map_err(|_| anyhow::anyhow!("relay connection closed"))?;
        }
        Ok(())
    })?;

    info!("watching {} for changes", watch_root.display());

    // ── Reader loop ───────────────────────────────────────────────────────────
    //
    // Runs on this task. The 200 ms timeout lets it notice the shutdown flag
    // even when the relay is silent.
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; closing relay connection");
            break;
        }

        let next = match timeout(Duration::from_millis(200), ws_rx.next()).await {
            Ok(next) => next,
            Err(_) => continue, // timeout; re-check the flag
        };

        let ws_msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                info!("relay closed the connection");
                break;
            }
            Some(Err(e)) => {
                warn!("relay connection error: {e}");
                break;
            }
            None => {
                info!("relay stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(raw) => handle_inbound(&raw, &outbound_tx),
            WsMessage::Close(_) => {
                info!("relay sent Close frame");
                break;
            }
            // Transport-level ping/pong is handled by tokio-tungstenite.
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            WsMessage::Binary(_) => warn!("unexpected binary frame from relay (ignored)"),
            WsMessage::Frame(_) => {}
        }
    }

    // Stop producing before waiting for the writer to flush and exit.
    session.stop();
    keepalive_task.abort();
    drop(outbound_tx);
    let _ = writer_task.await;

    Ok(())
}

/// Renders a changed path for the wire: relative to the (canonical) watch
/// root when the path sits under it, absolute otherwise.
fn reported_path(root: &Path, changed: &Path) -> String {
    changed
        .strip_prefix(root)
        .unwrap_or(changed)
        .to_string_lossy()
        .into_owned()
}

/// Reacts to one inbound frame from the relay.
///
/// A malformed frame is logged and skipped; one bad message from a peer is
/// no reason to drop an otherwise healthy relay connection.
fn handle_inbound(raw: &str, outbound: &mpsc::UnboundedSender<String>) {
    let msg = match parse(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("invalid frame from relay: {e}");
            return;
        }
    };

    match &msg {
        ProtocolMessage::Pong { original_id, .. } => {
            debug!("pong received for ping {original_id}");
        }
        ProtocolMessage::Ping { source, .. } => {
            // A companion's ping, forwarded by the relay. Answer it so the
            // companion sees the editor side as alive.
            debug!("ping from {source}, answering");
            if let Some(pong) = make_pong(&msg) {
                outbound.send(serialize(&pong)).ok();
            }
        }
        other => {
            debug!("ignoring {:?} frame from relay", other.kind());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_ping_is_answered_with_pong() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ping = ProtocolMessage::ping(Role::Mobile);

        handle_inbound(&serialize(&ping), &tx);

        let frame = rx.try_recv().expect("a pong must be queued");
        match parse(&frame).unwrap() {
            ProtocolMessage::Pong { original_id, .. } => assert_eq!(&original_id, ping.id()),
            other => panic!("expected pong, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_inbound_pong_queues_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ping = ProtocolMessage::ping(Role::Extension);
        let pong = make_pong(&ping).unwrap();

        handle_inbound(&serialize(&pong), &tx);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_inbound_frame_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_inbound("{half a frame", &tx);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reported_path_is_relative_under_the_root() {
        let root = Path::new("/home/dev/project");
        let changed = Path::new("/home/dev/project/src/lib.rs");
        assert_eq!(reported_path(root, changed), "src/lib.rs");
    }

    #[test]
    fn test_reported_path_falls_back_to_absolute_outside_the_root() {
        let root = Path::new("/home/dev/project");
        let changed = Path::new("/tmp/elsewhere.rs");
        assert_eq!(reported_path(root, changed), "/tmp/elsewhere.rs");
    }

    #[test]
    fn test_canonical_root_strips_backend_reported_paths() {
        // The backend reports canonical absolute paths; a relative
        // configured root must still strip after canonicalization.
        let workspace = tempfile::TempDir::new().unwrap();
        let root = workspace.path().canonicalize().unwrap();
        let changed = root.join("notes.md");
        assert_eq!(reported_path(&root, &changed), "notes.md");
    }
}
