//! One pool-scheduled download attempt.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Shared;
use super::item::{CompletionListener, ItemId, ItemRecord, ItemState};
use crate::download::{DownloadError, Total, TransferRequest};

/// Identity of one attempt, captured when it is submitted.
#[derive(Debug, Clone)]
pub(super) struct Attempt {
    pub(super) id: ItemId,
    pub(super) number: u64,
    pub(super) cancel: CancellationToken,
}

impl Attempt {
    pub(super) fn of(record: &ItemRecord) -> Self {
        Self {
            id: record.id,
            number: record.attempt,
            cancel: record.cancel.clone(),
        }
    }
}

/// What the attempt found when a worker picked it up.
enum Begin {
    Run {
        url: String,
        file: PathBuf,
        resume_from: u64,
    },
    Cancelled,
}

/// Terminal transition to report once the lock is released.
struct Finished {
    file: PathBuf,
    delete: bool,
    listener: Option<CompletionListener>,
}

/// Drives one attempt from NEW to a terminal state.
#[instrument(skip_all, fields(item_id = attempt.id, attempt = attempt.number))]
pub(super) async fn run_attempt(shared: Arc<Shared>, attempt: Attempt) {
    let begin = {
        let mut registry = shared.lock();
        let Some(record) = registry.current_mut(attempt.id, attempt.number) else {
            debug!("attempt superseded before dispatch");
            return;
        };
        if record.state != ItemState::New {
            debug!(state = %record.state, "item left NEW before dispatch");
            return;
        }
        if attempt.cancel.is_cancelled() {
            Begin::Cancelled
        } else {
            record.state = ItemState::Started;
            Begin::Run {
                url: record.url.clone(),
                file: record.file.clone(),
                resume_from: record.received,
            }
        }
    };

    let (state, error) = match begin {
        Begin::Cancelled => (
            ItemState::Stopped,
            Some(Arc::new(DownloadError::Cancelled)),
        ),
        Begin::Run {
            url,
            file,
            resume_from,
        } => {
            let resume_from = resume_offset(&file, resume_from).await;
            transfer(&shared, &attempt, &url, &file, resume_from).await
        }
    };

    let finished = {
        let mut registry = shared.lock();
        let Some(record) = registry.current_mut(attempt.id, attempt.number) else {
            return;
        };
        let delete = record.remove_requested || state == ItemState::Error;
        record.state = state;
        record.error = error;
        let finished = Finished {
            file: record.file.clone(),
            delete,
            listener: record.listener.clone(),
        };
        if record.remove_requested {
            registry.detached.remove(&attempt.id);
        }
        finished
    };

    if finished.delete {
        delete_file(&finished.file).await;
    }
    if let Some(listener) = finished.listener {
        listener(state);
    }
}

/// Runs the executor and classifies its outcome.
async fn transfer(
    shared: &Shared,
    attempt: &Attempt,
    url: &str,
    file: &Path,
    resume_from: u64,
) -> (ItemState, Option<Arc<DownloadError>>) {
    let settings = shared.settings();
    let request = TransferRequest {
        url,
        file,
        user_agent: &settings.user_agent,
        redirect_budget: settings.redirect_limit,
        resume_from,
    };
    debug!(resume_from, "attempt started");

    let mut on_progress = |received: u64, total: Total| -> Result<(), DownloadError> {
        let mut registry = shared.lock();
        if attempt.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(record) = registry.current_mut(attempt.id, attempt.number) {
            record.received = received;
            record.total = total;
        }
        Ok(())
    };

    match shared.transfer.download(request, &mut on_progress).await {
        Ok(()) => {
            info!(url, "download finished");
            (ItemState::Done, None)
        }
        Err(e) if e.is_cancellation() => {
            info!(url, "download stopped");
            (ItemState::Stopped, Some(Arc::new(e)))
        }
        Err(e) => {
            warn!(url, error = %e, "download failed");
            (ItemState::Error, Some(Arc::new(e)))
        }
    }
}

/// Clamps the recorded progress to what is actually on disk. A missing
/// file (deleted after an ERROR, or by someone else) restarts from zero.
async fn resume_offset(file: &Path, received: u64) -> u64 {
    if received == 0 {
        return 0;
    }
    let on_disk = match tokio::fs::metadata(file).await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            debug!(path = %file.display(), error = %e, "partial file unavailable");
            0
        }
    };
    if on_disk < received {
        debug!(received, on_disk, "resume offset clamped to file length");
    }
    received.min(on_disk)
}

async fn delete_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "deleted download file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete download file"),
    }
}
