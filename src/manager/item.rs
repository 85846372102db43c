//! Item state, per-item records and the immutable snapshots handed to callers.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::download::{DownloadError, Total};

/// Identifier of a download item. Allocated in increasing order, never reused.
pub type ItemId = u64;

/// Callback invoked once per attempt when it reaches a terminal state.
///
/// Runs on a worker task (or, for [`stop`](super::DownloadManager::stop) of a
/// NEW item, on the caller's thread), never while the manager lock is held.
pub type CompletionListener = Arc<dyn Fn(ItemState) + Send + Sync>;

/// Lifecycle state of a download item.
///
/// ```text
/// NEW -> STARTED -> DONE | ERROR | STOPPED
/// NEW -> STOPPED                  (stop before the task ran)
/// STOPPED | ERROR -> NEW          (start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Queued, waiting for a worker.
    New,
    /// A worker is running the transfer.
    Started,
    /// Stopped on request.
    Stopped,
    /// The attempt failed.
    Error,
    /// Downloaded successfully.
    Done,
}

impl ItemState {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Done => "done",
        }
    }

    /// Returns true for STOPPED, ERROR and DONE.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::Done)
    }

    /// Returns true when `start()` may begin a new attempt from this state.
    #[must_use]
    pub fn is_restartable(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable state for one queued download. Only touched under the manager lock.
pub(crate) struct ItemRecord {
    pub(crate) id: ItemId,
    pub(crate) url: String,
    pub(crate) file: PathBuf,
    pub(crate) total: Total,
    pub(crate) received: u64,
    pub(crate) state: ItemState,
    pub(crate) error: Option<Arc<DownloadError>>,
    pub(crate) remove_requested: bool,
    /// Number of the current attempt; bumped by every `start()`.
    pub(crate) attempt: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) listener: Option<CompletionListener>,
}

impl ItemRecord {
    pub(crate) fn new(
        id: ItemId,
        url: String,
        file: PathBuf,
        listener: Option<CompletionListener>,
    ) -> Self {
        Self {
            id,
            url,
            file,
            total: Total::Unknown,
            received: 0,
            state: ItemState::New,
            error: None,
            remove_requested: false,
            attempt: 0,
            cancel: CancellationToken::new(),
            listener,
        }
    }

    /// An attempt is in flight while the item is NEW or STARTED.
    pub(crate) fn in_flight(&self) -> bool {
        matches!(self.state, ItemState::New | ItemState::Started)
    }

    pub(crate) fn snapshot(&self) -> DownloadItem {
        // A total smaller than what already arrived is a server that
        // under-reported the length; report it as unknown.
        let total = match self.total {
            Total::Known(total) if total >= self.received => Total::Known(total),
            _ => Total::Unknown,
        };
        DownloadItem {
            id: self.id,
            url: self.url.clone(),
            file: self.file.clone(),
            total,
            received: self.received,
            state: self.state,
            error: self.error.clone(),
        }
    }

    /// Bytes this item adds to the aggregate total, `None` when unknown.
    fn expected_bytes(&self) -> Option<u64> {
        if self.state == ItemState::Done {
            return Some(self.received);
        }
        match self.total {
            Total::Unknown => None,
            Total::Known(total) if total < self.received => Some(self.received),
            Total::Known(total) => Some(total),
        }
    }
}

/// Immutable snapshot of one item, taken under the manager lock.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    /// Item identifier.
    pub id: ItemId,
    /// Requested URL.
    pub url: String,
    /// Destination file.
    pub file: PathBuf,
    /// Resource length, when known and consistent with `received`.
    pub total: Total,
    /// Bytes written so far.
    pub received: u64,
    /// Lifecycle state.
    pub state: ItemState,
    /// Last failure or cancellation marker.
    #[serde(serialize_with = "serialize_failure")]
    pub error: Option<Arc<DownloadError>>,
}

impl DownloadItem {
    /// Returns true if the item finished successfully.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ItemState::Done
    }

    /// Returns true if the item was stopped on request.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == ItemState::Stopped
    }

    /// Returns the stored error unless it is only the cancellation marker.
    #[must_use]
    pub fn failure(&self) -> Option<&DownloadError> {
        self.error
            .as_deref()
            .filter(|error| !error.is_cancellation())
    }
}

fn serialize_failure<S>(error: &Option<Arc<DownloadError>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let message = error
        .as_deref()
        .filter(|error| !error.is_cancellation())
        .map(ToString::to_string);
    message.serialize(serializer)
}

/// Snapshot of every item plus aggregated byte counts.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadState {
    /// Sum of expected bytes; unknown if any unfinished item's length is unknown.
    pub total: Total,
    /// Sum of bytes received.
    pub received: u64,
    /// Item snapshots in creation order.
    pub items: Vec<DownloadItem>,
}

impl DownloadState {
    /// Builds the aggregate from records, skipping failed items.
    ///
    /// DONE items count what they actually received. An item whose total is
    /// smaller than its received bytes counts the received bytes; this keeps
    /// a malformed `Content-Length` from making the aggregate shrink.
    pub(crate) fn collect<'a>(records: impl IntoIterator<Item = &'a ItemRecord>) -> Self {
        let mut total = Total::Known(0);
        let mut received = 0u64;
        let mut items = Vec::new();

        for record in records {
            items.push(record.snapshot());
            if record.state == ItemState::Error {
                continue;
            }
            received = received.saturating_add(record.received);
            total = match (total, record.expected_bytes()) {
                (Total::Known(sum), Some(bytes)) => Total::Known(sum.saturating_add(bytes)),
                _ => Total::Unknown,
            };
        }

        Self {
            total,
            received,
            items,
        }
    }

    /// Returns true when every item is in a terminal state.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.items.iter().all(|item| item.state.is_terminal())
    }

    /// Counts items in the given state.
    #[must_use]
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|item| item.state == state).count()
    }
}
