//! Application layer: debounced file-change detection.

pub mod watcher;

pub use watcher::{DebouncedWatcher, WatchError, WatchSession, DEBOUNCE_WINDOW};
