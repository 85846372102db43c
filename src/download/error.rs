//! Error types for the download module.
//!
//! Every failure of a transfer attempt is one of three kinds: a protocol
//! error (the server answered with something the executor cannot accept),
//! a transport or filesystem error, or a cancellation requested by the
//! caller. Only the first two are failures; cancellation is reported as a
//! stopped download.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// File system error during download (create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL (or a redirect target) is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A 206 response arrived without a `Content-Range` header.
    #[error("invalid HTTP response, no 'Content-Range' header for status code {status} from {url}")]
    MissingContentRange {
        /// The URL that answered.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The `Content-Range` header does not describe the requested range.
    #[error("invalid HTTP response, wrong 'Content-Range' header value '{value}' from {url}")]
    InvalidContentRange {
        /// The URL that answered.
        url: String,
        /// The header value received.
        value: String,
    },

    /// A redirect response arrived without a `Location` header.
    #[error("invalid HTTP response, no 'Location' header for status code {status} from {url}")]
    MissingLocation {
        /// The URL that answered.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The redirect budget was exhausted before reaching the resource.
    #[error("no more redirects allowed at {url}")]
    RedirectLimit {
        /// The URL whose redirect could not be followed.
        url: String,
    },

    /// Any status other than 200, an accepted 206, or a followed redirect.
    #[error("unsuccessful status code: {status}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The attempt was stopped on request. Not a failure.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsuccessful-status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Returns true for the cancellation marker.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true for errors caused by an unacceptable server response.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MissingContentRange { .. }
                | Self::InvalidContentRange { .. }
                | Self::MissingLocation { .. }
                | Self::RedirectLimit { .. }
                | Self::HttpStatus { .. }
        )
    }
}

// Transport errors need the URL or path for context, so there are no
// `From<reqwest::Error>` / `From<std::io::Error>` impls; use the constructors.
