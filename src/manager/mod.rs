//! Download manager: a registry of items driven by a bounded worker pool.
//!
//! Every public operation is synchronous and only touches in-memory state
//! under one coarse lock; network and disk I/O happen on worker tasks. Each
//! `add()` or `start()` submits one attempt; attempts begin in submission
//! order and at most [`threads_count`](DownloadManager::threads_count) run at
//! once.
//!
//! # Example
//!
//! ```no_run
//! use download_manager::manager::{DownloadManager, ManagerOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(ManagerOptions::default())?;
//! let item = manager.add("https://example.com/file.bin", None)?;
//! // ...
//! manager.stop(item.id);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod pool;
mod task;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use error::{MAX_THREADS, MIN_THREADS, ManagerError};
pub use item::{CompletionListener, DownloadItem, DownloadState, ItemId, ItemState};

use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::download::{DEFAULT_REDIRECT_LIMIT, DownloadError, HttpClient, Transfer, create_file_for_url};
use crate::user_agent::default_user_agent;
use error::check_thread_count;
use item::ItemRecord;
use pool::WorkerPool;
use task::Attempt;

/// Default number of concurrent downloads.
pub const DEFAULT_THREADS: usize = 4;

/// Default download directory, relative to the working directory.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Interval between progress reports while `shutdown()` waits for the drain.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Construction options for [`DownloadManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Maximum number of concurrent downloads (1..=100).
    pub threads: usize,
    /// Directory new files are created in. Must exist.
    pub download_dir: PathBuf,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Maximum number of redirects one attempt follows.
    pub redirect_limit: u32,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Socket read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            user_agent: default_user_agent(),
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// Per-attempt transfer settings, read when an attempt starts.
#[derive(Debug, Clone)]
struct TransferSettings {
    user_agent: String,
    redirect_limit: u32,
}

/// Item records guarded by the manager lock.
#[derive(Default)]
struct Registry {
    items: BTreeMap<ItemId, ItemRecord>,
    /// Removed items whose attempt has not reached a terminal state yet.
    detached: HashMap<ItemId, ItemRecord>,
    next_id: ItemId,
}

impl Registry {
    /// Returns the record if `number` is still its current attempt.
    fn current_mut(&mut self, id: ItemId, number: u64) -> Option<&mut ItemRecord> {
        let record = match self.items.get_mut(&id) {
            Some(record) => record,
            None => self.detached.get_mut(&id)?,
        };
        (record.attempt == number).then_some(record)
    }
}

struct Shared {
    registry: Mutex<Registry>,
    settings: RwLock<TransferSettings>,
    transfer: Arc<dyn Transfer>,
    pool: WorkerPool,
    download_dir: PathBuf,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> TransferSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_settings(&self, update: impl FnOnce(&mut TransferSettings)) {
        update(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Concurrent HTTP download manager.
///
/// Cheap to clone; clones share the same items and worker pool.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("download_dir", &self.shared.download_dir)
            .field("threads", &self.shared.pool.size())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager backed by an [`HttpClient`].
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidThreadCount`] for a thread count
    /// outside 1..=100, or [`ManagerError::NoRuntime`] when called outside a
    /// Tokio runtime.
    pub fn new(options: ManagerOptions) -> Result<Self, ManagerError> {
        let client =
            HttpClient::new_with_timeouts(options.connect_timeout_secs, options.read_timeout_secs);
        Self::with_transfer(options, Arc::new(client))
    }

    /// Creates a manager that runs attempts through `transfer`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_transfer(
        options: ManagerOptions,
        transfer: Arc<dyn Transfer>,
    ) -> Result<Self, ManagerError> {
        let threads = check_thread_count(options.threads)?;
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;

        info!(
            threads,
            download_dir = %options.download_dir.display(),
            "download manager started"
        );

        let shared = Shared {
            registry: Mutex::new(Registry::default()),
            settings: RwLock::new(TransferSettings {
                user_agent: options.user_agent,
                redirect_limit: options.redirect_limit,
            }),
            transfer,
            pool: WorkerPool::new(threads, runtime),
            download_dir: options.download_dir,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Directory new downloads are created in.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.shared.download_dir
    }

    /// Queues a download of `url`.
    ///
    /// Reserves a non-colliding file in the download directory by creating
    /// it empty, registers the item as NEW and submits its first attempt.
    /// `listener` is called with the final state each time an attempt ends.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`] if the file cannot be created (no item is
    /// registered) or [`ManagerError::ShutDown`] after [`shutdown`](Self::shutdown).
    #[instrument(skip(self, url, listener), fields(url = %url.as_ref()))]
    pub fn add(
        &self,
        url: impl AsRef<str>,
        listener: Option<CompletionListener>,
    ) -> Result<DownloadItem, ManagerError> {
        if !self.shared.pool.is_accepting() {
            return Err(ManagerError::ShutDown);
        }
        let url = url.as_ref();
        let dir = &self.shared.download_dir;
        let file = create_file_for_url(url, dir).map_err(|e| ManagerError::io(dir, e))?;

        let mut registry = self.shared.lock();
        let id = registry.next_id;
        let record = ItemRecord::new(id, url.to_string(), file, listener);

        if let Err(e) = self.submit(Attempt::of(&record)) {
            drop(registry);
            remove_file_now(&record.file);
            return Err(e);
        }

        registry.next_id += 1;
        let snapshot = record.snapshot();
        registry.items.insert(id, record);
        debug!(item_id = id, file = %snapshot.file.display(), "download queued");
        Ok(snapshot)
    }

    /// Starts a new attempt for a STOPPED or ERROR item.
    ///
    /// The attempt resumes from the bytes already received. No-op for
    /// unknown ids, items in any other state, or after shutdown.
    #[instrument(skip(self))]
    pub fn start(&self, id: ItemId) {
        let mut registry = self.shared.lock();
        let Some(record) = registry.items.get_mut(&id) else {
            return;
        };
        if !record.state.is_restartable() {
            debug!(state = %record.state, "start ignored");
            return;
        }

        let previous = (record.state, record.error.take(), record.cancel.clone());
        record.state = ItemState::New;
        record.attempt += 1;
        record.cancel = CancellationToken::new();

        if let Err(e) = self.submit(Attempt::of(record)) {
            warn!(error = %e, "cannot restart download");
            let (state, error, cancel) = previous;
            record.state = state;
            record.error = error;
            record.cancel = cancel;
            record.attempt -= 1;
            return;
        }
        debug!(attempt = record.attempt, resume_from = record.received, "download restarted");
    }

    /// Stops an item.
    ///
    /// A NEW item becomes STOPPED immediately and its listener runs before
    /// this returns. A STARTED item is asked to stop and becomes STOPPED once
    /// its attempt observes the request.
    #[instrument(skip(self))]
    pub fn stop(&self, id: ItemId) {
        let notify = {
            let mut registry = self.shared.lock();
            let Some(record) = registry.items.get_mut(&id) else {
                return;
            };
            match record.state {
                ItemState::New => {
                    record.state = ItemState::Stopped;
                    record.error = Some(Arc::new(DownloadError::Cancelled));
                    record.cancel.cancel();
                    debug!("stopped before dispatch");
                    Some(record.listener.clone())
                }
                ItemState::Started => {
                    record.cancel.cancel();
                    None
                }
                _ => None,
            }
        };

        if let Some(Some(listener)) = notify {
            listener(ItemState::Stopped);
        }
    }

    /// Asks every in-flight attempt to stop. Returns immediately.
    pub fn stop_all(&self) {
        let registry = self.shared.lock();
        let mut count = 0usize;
        for record in registry.items.values().filter(|r| r.in_flight()) {
            record.cancel.cancel();
            count += 1;
        }
        debug!(count, "stop requested for all downloads");
    }

    /// Forgets an item and deletes its file.
    ///
    /// An in-flight attempt is cancelled and the file is deleted when it
    /// ends, whatever its outcome; otherwise the file is deleted now.
    #[instrument(skip(self))]
    pub fn remove(&self, id: ItemId) {
        let file = {
            let mut registry = self.shared.lock();
            let Some(mut record) = registry.items.remove(&id) else {
                return;
            };
            if record.in_flight() {
                record.remove_requested = true;
                record.cancel.cancel();
                registry.detached.insert(id, record);
                debug!("removal pending until attempt ends");
                None
            } else {
                Some(record.file)
            }
        };

        if let Some(file) = file {
            remove_file_now(&file);
        }
    }

    /// Current concurrency bound.
    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.shared.pool.size()
    }

    /// Changes how many attempts may run at once. Running attempts are not
    /// affected.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidThreadCount`] outside 1..=100.
    pub fn set_threads_count(&self, threads: usize) -> Result<(), ManagerError> {
        let threads = check_thread_count(threads)?;
        self.shared.pool.resize(threads);
        Ok(())
    }

    /// `User-Agent` sent by attempts started from now on.
    #[must_use]
    pub fn user_agent(&self) -> String {
        self.shared.settings().user_agent
    }

    /// Sets the `User-Agent` for attempts started from now on.
    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        let user_agent = user_agent.into();
        self.shared
            .update_settings(|settings| settings.user_agent = user_agent);
    }

    /// Redirect budget of attempts started from now on.
    #[must_use]
    pub fn redirect_limit(&self) -> u32 {
        self.shared.settings().redirect_limit
    }

    /// Sets the redirect budget for attempts started from now on.
    pub fn set_redirect_limit(&self, limit: u32) {
        self.shared
            .update_settings(|settings| settings.redirect_limit = limit);
    }

    /// Consistent snapshot of all items with aggregated byte counts.
    #[must_use]
    pub fn get_state(&self) -> DownloadState {
        let registry = self.shared.lock();
        DownloadState::collect(registry.items.values())
    }

    /// Snapshot of one item, `None` if unknown or removed.
    #[must_use]
    pub fn get_item(&self, id: ItemId) -> Option<DownloadItem> {
        self.shared.lock().items.get(&id).map(ItemRecord::snapshot)
    }

    /// Returns true once [`shutdown`](Self::shutdown) has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        !self.shared.pool.is_accepting()
    }

    /// Stops accepting downloads, cancels every attempt and waits until all
    /// workers have finished.
    ///
    /// Logs a warning every 10 seconds while attempts are still draining.
    pub async fn shutdown(&self) {
        info!("shutting down download manager");
        self.shared.pool.close();
        self.stop_all();

        let mut waited = 0u32;
        while tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, self.shared.pool.wait())
            .await
            .is_err()
        {
            waited += 1;
            warn!(
                waited_secs = u64::from(waited) * SHUTDOWN_POLL_INTERVAL.as_secs(),
                "still waiting for downloads to finish"
            );
        }
        info!("download manager terminated");
    }

    /// Waits up to `timeout` for the workers to finish after shutdown began.
    ///
    /// Returns false if they are still running (or shutdown never started).
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        if self.shared.pool.is_accepting() {
            return false;
        }
        tokio::time::timeout(timeout, self.shared.pool.wait())
            .await
            .is_ok()
    }

    fn submit(&self, attempt: Attempt) -> Result<(), ManagerError> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .pool
            .submit(Box::pin(task::run_attempt(shared, attempt)))
    }
}

fn remove_file_now(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "deleted download file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete download file"),
    }
}
