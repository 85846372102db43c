//! Constants for the download module (timeouts, streaming, redirects).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between body chunks (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Size of the blocks written to disk; progress is reported once per block.
pub const BLOCK_SIZE: usize = 8192;

/// Default number of redirects an attempt may follow.
pub const DEFAULT_REDIRECT_LIMIT: u32 = 5;
