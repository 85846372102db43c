//! Error types for download manager operations.

use std::path::PathBuf;

use thiserror::Error;

/// Minimum allowed worker count.
pub const MIN_THREADS: usize = 1;

/// Maximum allowed worker count.
pub const MAX_THREADS: usize = 100;

/// Errors returned synchronously by [`DownloadManager`](super::DownloadManager) operations.
///
/// Transfer failures never show up here; they end the item in the ERROR
/// state and are reported through its snapshot and completion listener.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Invalid worker count provided.
    #[error("invalid thread count {value}: must be between {MIN_THREADS} and {MAX_THREADS}")]
    InvalidThreadCount {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The manager was created outside a Tokio runtime.
    #[error("download manager must be created inside a Tokio runtime")]
    NoRuntime,

    /// The manager has been shut down and accepts no new downloads.
    #[error("download manager is shut down")]
    ShutDown,

    /// The destination file could not be created.
    #[error("cannot create download file in {dir}: {source}")]
    Io {
        /// Download directory.
        dir: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ManagerError {
    /// Creates an IO error for the download directory.
    pub fn io(dir: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            dir: dir.into(),
            source,
        }
    }
}

/// Validates a worker count.
pub(crate) fn check_thread_count(value: usize) -> Result<usize, ManagerError> {
    if (MIN_THREADS..=MAX_THREADS).contains(&value) {
        Ok(value)
    } else {
        Err(ManagerError::InvalidThreadCount { value })
    }
}
