//! HTTP client performing one resumable, redirect-following download.
//!
//! Redirects are handled here rather than by reqwest so that every hop is
//! counted against the caller's budget and the `Range` header survives it.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE, USER_AGENT};
use reqwest::{Client, StatusCode, redirect};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{BLOCK_SIZE, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::transfer::{ProgressFn, Total, Transfer, TransferRequest};

#[allow(clippy::expect_used)]
static CONTENT_RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes (\d+)-\d+/\d+$").expect("Content-Range regex is valid")
});

/// HTTP client for downloading files with resume support.
///
/// Created once and shared by all attempts, taking advantage of connection
/// pooling. Holds no per-download state.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// What the final (non-redirect) response of an attempt turned out to be.
struct Accepted {
    response: reqwest::Response,
    url: String,
    ranged: bool,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .redirect(redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Downloads `request.url` into `request.file`.
    ///
    /// With `resume_from > 0` a `Range` request is sent and, if the server
    /// answers 206 with a matching `Content-Range`, the body is appended at
    /// `resume_from`. A plain 200 rewrites the file from offset 0.
    ///
    /// `on_progress(received, total)` is called once before streaming and
    /// after every block written to disk.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unacceptable responses, a network or IO
    /// error for transport failures (the partial file is deleted), or
    /// whatever `on_progress` returned when it asked to stop (the partial
    /// file is kept).
    #[instrument(skip(self, request, on_progress), fields(url = %request.url, resume_from = request.resume_from))]
    pub async fn download(
        &self,
        request: TransferRequest<'_>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), DownloadError> {
        let Accepted {
            response,
            url,
            ranged,
        } = self.follow_redirects(&request).await?;

        let mut received = if ranged { request.resume_from } else { 0 };
        let total = Total::from(
            response
                .content_length()
                .map(|length| received.saturating_add(length)),
        );
        debug!(ranged, %total, "response accepted");
        on_progress(received, total)?;

        let file_path = request.file;
        let mut file = open_target(file_path, ranged, request.resume_from).await?;

        let streamed = stream_to_file(
            &mut file,
            response,
            &url,
            file_path,
            &mut received,
            total,
            on_progress,
        )
        .await;

        match streamed {
            Ok(()) => {
                info!(path = %file_path.display(), bytes = received, ranged, "download complete");
                Ok(())
            }
            Err(DownloadError::Cancelled) => {
                // Keep what was written so the next attempt can resume from it
                file.flush()
                    .await
                    .map_err(|e| DownloadError::io(file_path, e))?;
                debug!(bytes = received, "download stopped on request");
                Err(DownloadError::Cancelled)
            }
            Err(e) => {
                drop(file);
                debug!(path = %file_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(file_path).await;
                Err(e)
            }
        }
    }

    /// Sends the request, following redirects until an acceptable response
    /// arrives or the budget runs out.
    async fn follow_redirects(
        &self,
        request: &TransferRequest<'_>,
    ) -> Result<Accepted, DownloadError> {
        let mut url = request.url.to_string();
        let mut budget = request.redirect_budget;

        loop {
            let response = self
                .send_request(&url, request.user_agent, request.resume_from)
                .await?;
            let status = response.status();

            if request.resume_from > 0 && status == StatusCode::PARTIAL_CONTENT {
                validate_content_range(&response, &url, request.resume_from)?;
                return Ok(Accepted {
                    response,
                    url,
                    ranged: true,
                });
            }

            if status == StatusCode::OK {
                return Ok(Accepted {
                    response,
                    url,
                    ranged: false,
                });
            }

            if !is_followed_redirect(status) {
                return Err(DownloadError::http_status(url, status.as_u16()));
            }
            if budget == 0 {
                return Err(DownloadError::RedirectLimit { url });
            }

            let next = redirect_target(&response, &url)?;
            debug!(from = %url, to = %next, remaining = budget - 1, "following redirect");
            budget -= 1;
            url = next;
        }
    }

    async fn send_request(
        &self,
        url: &str,
        user_agent: &str,
        resume_from: u64,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.client.get(parsed).header(USER_AGENT, user_agent);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })
    }
}

#[async_trait]
impl Transfer for HttpClient {
    async fn download(
        &self,
        request: TransferRequest<'_>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), DownloadError> {
        HttpClient::download(self, request, on_progress).await
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
    )
}

/// Checks that a 206 response covers exactly the range we asked for.
fn validate_content_range(
    response: &reqwest::Response,
    url: &str,
    resume_from: u64,
) -> Result<(), DownloadError> {
    let Some(header) = response.headers().get(CONTENT_RANGE) else {
        return Err(DownloadError::MissingContentRange {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    };
    let value = String::from_utf8_lossy(header.as_bytes()).into_owned();

    if content_range_starts_at(&value, resume_from) {
        Ok(())
    } else {
        Err(DownloadError::InvalidContentRange {
            url: url.to_string(),
            value,
        })
    }
}

/// The start offset must be spelled exactly as requested: `bytes 010-19/20`
/// does not answer `Range: bytes=10-`.
fn content_range_starts_at(value: &str, resume_from: u64) -> bool {
    CONTENT_RANGE_PATTERN
        .captures(value)
        .is_some_and(|caps| caps[1] == resume_from.to_string())
}

/// Resolves the `Location` header of a redirect against the current URL.
fn redirect_target(response: &reqwest::Response, url: &str) -> Result<String, DownloadError> {
    let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Err(DownloadError::MissingLocation {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    };

    let base = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    base.join(location)
        .map(String::from)
        .map_err(|_| DownloadError::invalid_url(location))
}

/// Opens the destination: truncated for a fresh download, cut back to the
/// resume offset and positioned at its end for a ranged one.
async fn open_target(path: &Path, ranged: bool, resume_from: u64) -> Result<File, DownloadError> {
    if !ranged {
        return File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.set_len(resume_from)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.seek(std::io::SeekFrom::End(0))
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(file)
}

/// Streams the response body to `file` in blocks of [`BLOCK_SIZE`],
/// reporting progress after each block is written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    received: &mut u64,
    total: Total,
    on_progress: &mut ProgressFn<'_>,
) -> Result<(), DownloadError> {
    let mut stream = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::with_capacity(BLOCK_SIZE * 2);

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;
        pending.extend_from_slice(&chunk);

        while pending.len() >= BLOCK_SIZE {
            write_block(file, file_path, &pending[..BLOCK_SIZE]).await?;
            pending.drain(..BLOCK_SIZE);
            *received += BLOCK_SIZE as u64;
            on_progress(*received, total)?;
        }
    }

    if !pending.is_empty() {
        write_block(file, file_path, &pending).await?;
        *received += pending.len() as u64;
        on_progress(*received, total)?;
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))
}

async fn write_block(file: &mut File, path: &Path, block: &[u8]) -> Result<(), DownloadError> {
    file.write_all(block)
        .await
        .map_err(|e| DownloadError::io(path, e))
}
