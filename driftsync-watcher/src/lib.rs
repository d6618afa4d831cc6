//! # driftsync-watcher
//!
//! Change-detection engine for one watched directory tree.
//!
//! [`watch_dir`] installs one inotify watch per directory, reconciles
//! kernel events and periodic rescans against an in-memory tree model, and
//! periodically publishes deduplicated changed-path batches into an output
//! directory. Every change eventually appears in a batch at least once;
//! over-reporting is expected and resolved downstream.

pub mod changed;
pub mod error;
pub mod events;
pub mod queue;
pub mod runtime;
pub mod scan;
pub mod tree;
pub mod watches;

pub use error::WatcherError;
pub use runtime::{watch_dir, TopDir, WatchOptions};
