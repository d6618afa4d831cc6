//! Error types for driftsync-watcher.

use std::path::PathBuf;

use thiserror::Error;

use driftsync_core::CoreError;

/// Top-level failures of the watcher. Per-entry filesystem errors are
/// handled in place (implicit deletion, degrade to polling) and never
/// surface here.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The watched root could not be resolved.
    #[error("cannot resolve watched root {path}: {source}")]
    BadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the shared utilities (atomic publish, filters).
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience constructor for [`WatcherError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatcherError {
    WatcherError::Io {
        path: path.into(),
        source,
    }
}
