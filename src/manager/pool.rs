//! Resizable worker pool for download tasks.
//!
//! Submitted jobs go into a FIFO channel. A single dispatcher takes them in
//! order, acquires a semaphore permit (waiting while the pool is at its
//! limit) and spawns the job with the permit held; the permit is released
//! when the job finishes (RAII). Jobs therefore start in submission order and
//! at most `size` run at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use super::error::ManagerError;

/// A unit of work run by the pool.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) struct WorkerPool {
    /// `None` once the pool stopped accepting work.
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    semaphore: Arc<Semaphore>,
    size: Mutex<usize>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs at once on `runtime`.
    pub(crate) fn new(size: usize, runtime: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(size));
        let tracker = TaskTracker::new();

        tracker.spawn_on(
            dispatch(
                receiver,
                Arc::clone(&semaphore),
                tracker.clone(),
                runtime.clone(),
            ),
            &runtime,
        );

        Self {
            sender: Mutex::new(Some(sender)),
            semaphore,
            size: Mutex::new(size),
            tracker,
            runtime,
        }
    }

    /// Queues a job.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ShutDown`] once [`close`](Self::close) was called.
    pub(crate) fn submit(&self, job: Job) -> Result<(), ManagerError> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(ManagerError::ShutDown);
        };
        sender.send(job).map_err(|_| ManagerError::ShutDown)
    }

    pub(crate) fn is_accepting(&self) -> bool {
        lock(&self.sender).is_some()
    }

    pub(crate) fn size(&self) -> usize {
        *lock(&self.size)
    }

    /// Changes the concurrency bound.
    ///
    /// Growing takes effect immediately. Shrinking retires permits as running
    /// jobs release them; jobs already running are never interrupted.
    pub(crate) fn resize(&self, size: usize) {
        let mut current = lock(&self.size);
        if size > *current {
            self.semaphore.add_permits(size - *current);
        } else if size < *current {
            let excess = u32::try_from(*current - size).unwrap_or(u32::MAX);
            let semaphore = Arc::clone(&self.semaphore);
            self.runtime.spawn(async move {
                if let Ok(permits) = semaphore.acquire_many(excess).await {
                    permits.forget();
                    trace!(excess, "retired worker permits");
                }
            });
        }
        debug!(from = *current, to = size, "resized worker pool");
        *current = size;
    }

    /// Stops accepting jobs. Already queued jobs still run.
    pub(crate) fn close(&self) {
        lock(&self.sender).take();
        self.tracker.close();
    }

    /// Waits until the pool is closed and every job has finished.
    pub(crate) async fn wait(&self) {
        self.tracker.wait().await;
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
) {
    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        tracker.spawn_on(
            async move {
                // Permit is dropped when the job completes (RAII)
                let _permit = permit;
                job.await;
            },
            &runtime,
        );
    }
    debug!("worker pool dispatcher finished");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
