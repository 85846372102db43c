//! Download Manager Library
//!
//! A concurrent HTTP download engine: queue URLs, download them to a
//! directory on a bounded pool of workers, stop, resume and remove them, and
//! observe progress through consistent snapshots.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Transfer executor: one resumable, redirect-following HTTP download
//! - [`manager`] - Item registry, worker pool and the public download operations
//! - [`user_agent`] - Default `User-Agent` header value

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod manager;
pub mod user_agent;

// Re-export commonly used types
pub use download::{DownloadError, HttpClient, Total, Transfer, TransferRequest};
pub use manager::{
    CompletionListener, DownloadItem, DownloadManager, DownloadState, ItemId, ItemState,
    ManagerError, ManagerOptions,
};
