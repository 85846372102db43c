//! The seam between the download manager and the code that moves bytes.
//!
//! The manager only ever talks to a [`Transfer`]; [`HttpClient`](super::HttpClient)
//! is the production implementation.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::DownloadError;

/// Byte length of a resource, which may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "bytes")]
pub enum Total {
    /// The length has been learned from the server.
    Known(u64),
    /// The server has not (yet) told us the length.
    #[default]
    Unknown,
}

impl Total {
    /// Returns the known length, if any.
    #[must_use]
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Known(bytes) => Some(bytes),
            Self::Unknown => None,
        }
    }

    /// Returns true when the length is known.
    #[must_use]
    pub fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<u64>> for Total {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl fmt::Display for Total {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(bytes) => write!(f, "{bytes}"),
            Self::Unknown => f.write_str("?"),
        }
    }
}

/// Progress callback handed to a transfer.
///
/// Called with `(received, total)`. Returning `Err` (normally
/// [`DownloadError::Cancelled`]) makes the transfer stop and return that error.
pub type ProgressFn<'a> = dyn FnMut(u64, Total) -> Result<(), DownloadError> + Send + 'a;

/// Everything one transfer attempt needs to know.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// URL to fetch.
    pub url: &'a str,
    /// Destination file.
    pub file: &'a Path,
    /// User-Agent header value.
    pub user_agent: &'a str,
    /// Number of redirects that may still be followed.
    pub redirect_budget: u32,
    /// Byte offset to resume from; 0 downloads from the start.
    pub resume_from: u64,
}

/// Performs one complete download attempt for one URL into one file.
///
/// Implementations keep no state between calls.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Runs the attempt to completion, reporting progress through `on_progress`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] when `on_progress` asked to stop,
    /// otherwise the protocol, transport or filesystem error that ended the attempt.
    async fn download(
        &self,
        request: TransferRequest<'_>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), DownloadError>;
}
