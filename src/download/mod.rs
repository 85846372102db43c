//! HTTP transfer executor: one resumable, redirect-following download.
//!
//! # Features
//!
//! - Streaming downloads written to disk in 8 KiB blocks
//! - Resume via `Range: bytes=N-` with strict `Content-Range` validation
//! - Manual redirect following (301, 302, 303, 307) with a hop budget
//! - Progress callback that can stop the transfer cooperatively
//! - File name derivation with `name (n).ext` collision handling
//!
//! # Example
//!
//! ```no_run
//! use download_manager::download::{HttpClient, TransferRequest};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let request = TransferRequest {
//!     url: "https://example.com/file.bin",
//!     file: Path::new("./file.bin"),
//!     user_agent: "example/1.0",
//!     redirect_budget: 5,
//!     resume_from: 0,
//! };
//! client
//!     .download(request, &mut |received, total| {
//!         println!("{received} / {total}");
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod filename;
mod transfer;

pub use client::HttpClient;
pub use constants::{BLOCK_SIZE, DEFAULT_REDIRECT_LIMIT};
pub use error::DownloadError;
pub use filename::{create_file_for_url, filename_for_url, next_filename};
pub use transfer::{ProgressFn, Total, Transfer, TransferRequest};
