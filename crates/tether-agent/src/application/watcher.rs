//! Debounced file-system watcher.
//!
//! Editors write in bursts: a single save can touch a file several times,
//! and a format-on-save pass touches it again milliseconds later.  Relaying
//! every raw event would flood the companion, so the watcher applies a
//! trailing debounce: each event arms (or re-arms) a deadline one
//! [`DEBOUNCE_WINDOW`] in the future, and the accumulated set of changed
//! paths is emitted only once that deadline passes with no further events.
//! A steady stream of events therefore emits nothing until the stream
//! pauses.
//!
//! The watcher is split in two pieces:
//!
//! - [`run_debounce`] is the pure debounce loop. It reads paths from a
//!   channel and drives the handler; tests exercise it directly under
//!   Tokio's paused clock.
//! - [`DebouncedWatcher::watch`] wires a `notify` backend watcher to that
//!   loop and returns a [`WatchSession`] handle for shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Quiet period required before an accumulated burst is emitted.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Error type for watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform watch backend could not be created or could not watch
    /// the requested path (missing directory, permissions, inotify limits).
    #[error("filesystem watch failed: {0}")]
    Backend(#[from] notify::Error),
}

/// Factory for debounced watch sessions.
#[derive(Debug, Clone)]
pub struct DebouncedWatcher {
    window: Duration,
}

impl DebouncedWatcher {
    /// A watcher using the standard [`DEBOUNCE_WINDOW`].
    pub fn new() -> Self {
        Self {
            window: DEBOUNCE_WINDOW,
        }
    }

    /// A watcher with a custom quiet window.
    pub fn with_window(window: Duration) -> Self {
        Self { window }
    }

    /// Starts watching `path` recursively.
    ///
    /// `handler` receives each debounced batch of distinct changed paths.
    /// A handler error is logged and does not stop the session; subsequent
    /// batches are still delivered.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Backend`] if the platform watcher cannot be
    /// created or the path cannot be watched.
    pub fn watch<F>(&self, path: &Path, handler: F) -> Result<WatchSession, WatchError>
    where
        F: FnMut(Vec<PathBuf>) -> anyhow::Result<()> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // The notify callback runs on the backend's own thread; an unbounded
        // send is the only safe bridge into the async loop from there.
        let mut backend = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for path in relevant_paths(&event) {
                        if event_tx.send(path).is_err() {
                            return; // session stopped
                        }
                    }
                }
                Err(e) => warn!("watch backend error: {e}"),
            }
        })?;
        backend.watch(path, RecursiveMode::Recursive)?;
        debug!("watching {} recursively", path.display());

        let task = tokio::spawn(run_debounce(event_rx, self.window, handler));

        Ok(WatchSession {
            backend,
            task,
        })
    }
}

impl Default for DebouncedWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a running watch session.
///
/// Dropping the session (or calling [`WatchSession::stop`]) tears down the
/// backend watcher; a deadline armed at that moment is cancelled, not
/// flushed, so nothing is emitted after stop.
pub struct WatchSession {
    backend: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchSession {
    /// Stops the session. Pending (not yet emitted) changes are discarded.
    pub fn stop(self) {
        // Dropping the backend drops the event sender; the debounce loop
        // sees the closed channel and exits without a final emission.
        drop(self.backend);
        self.task.abort();
    }
}

/// The debounce loop: accumulates distinct paths and calls `handler` once
/// the channel has been quiet for a full `window`.
///
/// Exits when the channel closes. A pending batch at that point is
/// discarded, which is what gives `stop()` its cancel semantics.
async fn run_debounce<F>(mut events: mpsc::UnboundedReceiver<PathBuf>, window: Duration, mut handler: F)
where
    F: FnMut(Vec<PathBuf>) -> anyhow::Result<()> + Send + 'static,
{
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        match deadline {
            // Nothing buffered: block until the next event or shutdown.
            None => match events.recv().await {
                Some(path) => {
                    accumulate(&mut pending, path);
                    deadline = Some(Instant::now() + window);
                }
                None => return,
            },
            // Burst in progress: each new event re-arms the deadline.
            Some(when) => {
                tokio::select! {
                    maybe = events.recv() => match maybe {
                        Some(path) => {
                            accumulate(&mut pending, path);
                            deadline = Some(Instant::now() + window);
                        }
                        None => return,
                    },
                    _ = sleep_until(when) => {
                        let batch = std::mem::take(&mut pending);
                        deadline = None;
                        debug!("emitting {} debounced change(s)", batch.len());
                        if let Err(e) = handler(batch) {
                            // The handler owns delivery; its failure must not
                            // kill change detection.
                            warn!("change handler failed: {e:#}");
                        }
                    }
                }
            }
        }
    }
}

fn accumulate(pending: &mut Vec<PathBuf>, path: PathBuf) {
    if !pending.contains(&path) {
        pending.push(path);
    }
}

/// Extracts the paths worth relaying from a raw backend event.
///
/// Only create/modify/remove events count; access and metadata-only noise
/// is dropped, as are hidden files, editor backup files, and `.tmp`
/// scratch files.
fn relevant_paths(event: &notify::Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return Vec::new(),
    }

    event
        .paths
        .iter()
        .filter(|path| {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy(),
                None => return false,
            };
            !(name.starts_with('.') || name.contains('~') || name.ends_with(".tmp"))
        })
        .cloned()
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
