//! Error types for driftsync-supervisor.

use std::path::PathBuf;

use thiserror::Error;

use driftsync_core::CoreError;

/// Failures that abort a supervisor before its loop starts. Once the loop
/// runs, transfer and validation failures are rescheduled, never returned.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the shared utilities.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience constructor for [`SupervisorError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
