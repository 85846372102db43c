//! Integration tests for the download manager.
//!
//! Most tests drive the manager with a fake transfer whose attempts block
//! until the test releases them; the last few run real downloads against a
//! mock HTTP server.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use download_manager::download::{
    DownloadError, HttpClient, ProgressFn, Total, Transfer, TransferRequest,
};
use download_manager::{
    CompletionListener, DownloadManager, ItemId, ItemState, ManagerError, ManagerOptions,
};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Size of every fake resource.
const SIZE: u64 = 100;
/// Bytes a fake attempt reports while it waits to be released.
const CHUNK: u64 = 10;
const TICK: Duration = Duration::from_millis(5);

/// What a fake attempt saw when it began.
#[derive(Debug, Clone)]
struct Started {
    url: String,
    resume_from: u64,
    user_agent: String,
    redirect_budget: u32,
}

/// Transfer that blocks each attempt until [`FakeTransfer::release`] is
/// called for its URL. URLs containing `/fail` end with a 500 error.
struct FakeTransfer {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    started: mpsc::UnboundedSender<Started>,
}

impl FakeTransfer {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Started>) {
        let (started, receiver) = mpsc::unbounded_channel();
        let transfer = Arc::new(Self {
            gates: Mutex::new(HashMap::new()),
            started,
        });
        (transfer, receiver)
    }

    fn gate(&self, url: &str) -> Arc<Notify> {
        Arc::clone(
            self.gates
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default(),
        )
    }

    fn release(&self, url: &str) {
        self.gate(url).notify_one();
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn download(
        &self,
        request: TransferRequest<'_>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), DownloadError> {
        let gate = self.gate(request.url);
        let total = Total::Known(SIZE);
        on_progress(request.resume_from, total)?;
        let _ = self.started.send(Started {
            url: request.url.to_string(),
            resume_from: request.resume_from,
            user_agent: request.user_agent.to_string(),
            redirect_budget: request.redirect_budget,
        });

        // Progress reported below is backed by bytes on disk
        let partial = (request.resume_from + CHUNK).min(SIZE);
        tokio::fs::write(request.file, vec![0u8; partial as usize])
            .await
            .map_err(|e| DownloadError::io(request.file, e))?;
        loop {
            tokio::select! {
                () = gate.notified() => break,
                () = tokio::time::sleep(TICK) => on_progress(partial, total)?,
            }
        }

        if request.url.contains("/fail") {
            return Err(DownloadError::http_status(request.url, 500));
        }
        tokio::fs::write(request.file, vec![0u8; SIZE as usize])
            .await
            .map_err(|e| DownloadError::io(request.file, e))?;
        on_progress(SIZE, total)
    }
}

struct Harness {
    manager: DownloadManager,
    transfer: Arc<FakeTransfer>,
    started: mpsc::UnboundedReceiver<Started>,
    _dir: TempDir,
}

impl Harness {
    fn new(threads: usize) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let (transfer, started) = FakeTransfer::new();
        let options = ManagerOptions {
            threads,
            download_dir: dir.path().to_path_buf(),
            ..ManagerOptions::default()
        };
        let manager = DownloadManager::with_transfer(options, transfer.clone())
            .expect("manager should start inside a runtime");
        Self {
            manager,
            transfer,
            started,
            _dir: dir,
        }
    }

    async fn next_started(&mut self) -> Started {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv())
            .await
            .expect("timed out waiting for an attempt to start")
            .expect("transfer dropped")
    }

    fn state(&self, id: ItemId) -> ItemState {
        self.manager.get_item(id).expect("item exists").state
    }

    async fn wait_state(&self, id: ItemId, state: ItemState) {
        wait_for(&format!("item {id} to be {state}"), || self.state(id) == state).await;
    }
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Listener that records every state it is called with.
fn recorder() -> (Option<CompletionListener>, Arc<Mutex<Vec<ItemState>>>) {
    let calls = Arc::new(Mutex::new(Vec::<ItemState>::new()));
    let sink = Arc::clone(&calls);
    let listener: CompletionListener =
        Arc::new(move |state: ItemState| sink.lock().unwrap().push(state));
    (Some(listener), calls)
}

fn recorded(calls: &Mutex<Vec<ItemState>>) -> Vec<ItemState> {
    calls.lock().unwrap().clone()
}

fn file_of(manager: &DownloadManager, id: ItemId) -> PathBuf {
    manager.get_item(id).expect("item exists").file
}

#[tokio::test]
async fn test_pool_runs_at_most_thread_count_attempts() {
    // Setup
    let mut h = Harness::new(2);
    let urls = ["http://fake/a.bin", "http://fake/b.bin", "http://fake/c.bin"];
    let mut listeners = Vec::new();
    let mut ids = Vec::new();
    for url in urls {
        let (listener, calls) = recorder();
        ids.push(h.manager.add(url, listener).unwrap().id);
        listeners.push(calls);
    }

    // First two start, the third waits for a free worker
    let first: HashSet<String> = [h.next_started().await.url, h.next_started().await.url].into();
    assert_eq!(first, HashSet::from([urls[0].to_string(), urls[1].to_string()]));
    assert_eq!(h.state(ids[0]), ItemState::Started);
    assert_eq!(h.state(ids[1]), ItemState::Started);
    assert_eq!(h.state(ids[2]), ItemState::New);
    assert_eq!(h.manager.get_state().count(ItemState::Started), 2);

    // Completing the first frees a worker for the third
    h.transfer.release(urls[0]);
    h.wait_state(ids[0], ItemState::Done).await;
    assert_eq!(h.next_started().await.url, urls[2]);
    assert!(h.manager.get_state().count(ItemState::Started) <= 2);

    h.transfer.release(urls[1]);
    h.transfer.release(urls[2]);
    for id in &ids {
        h.wait_state(*id, ItemState::Done).await;
    }

    // Verify
    let state = h.manager.get_state();
    assert_eq!(state.count(ItemState::Done), 3);
    assert_eq!(state.received, 3 * SIZE);
    assert_eq!(state.total, Total::Known(3 * SIZE));
    for calls in &listeners {
        assert_eq!(recorded(calls), [ItemState::Done]);
    }
}

#[tokio::test]
async fn test_stop_new_item_is_synchronous() {
    let mut h = Harness::new(1);
    let (listener_a, calls_a) = recorder();
    let (listener_b, calls_b) = recorder();
    let a = h.manager.add("http://fake/a.bin", listener_a).unwrap().id;
    let b = h.manager.add("http://fake/b.bin", listener_b).unwrap().id;
    h.next_started().await;
    assert_eq!(h.state(b), ItemState::New);

    h.manager.stop(b);

    // Transition and listener happen before stop() returns
    let item = h.manager.get_item(b).unwrap();
    assert_eq!(item.state, ItemState::Stopped);
    assert!(item.error.as_deref().is_some_and(DownloadError::is_cancellation));
    assert!(item.failure().is_none());
    assert_eq!(recorded(&calls_b), [ItemState::Stopped]);

    // The queued attempt for b is dispatched later and must not run
    h.transfer.release("http://fake/a.bin");
    h.wait_state(a, ItemState::Done).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.started.try_recv().is_err(), "stopped item must not start");
    assert_eq!(h.state(b), ItemState::Stopped);
    assert_eq!(recorded(&calls_b), [ItemState::Stopped]);
    assert_eq!(recorded(&calls_a), [ItemState::Done]);
    assert!(file_of(&h.manager, b).exists(), "stopped item keeps its file");
}

#[tokio::test]
async fn test_stop_on_terminal_item_is_noop() {
    let mut h = Harness::new(1);
    let (listener, calls) = recorder();
    let id = h.manager.add("http://fake/done.bin", listener).unwrap().id;
    h.next_started().await;
    h.transfer.release("http://fake/done.bin");
    h.wait_state(id, ItemState::Done).await;

    h.manager.stop(id);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.state(id), ItemState::Done);
    assert_eq!(recorded(&calls), [ItemState::Done]);

    let (listener, calls) = recorder();
    let stopped = h.manager.add("http://fake/stopped.bin", listener).unwrap().id;
    h.next_started().await;
    h.manager.stop(stopped);
    h.wait_state(stopped, ItemState::Stopped).await;
    h.manager.stop(stopped);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorded(&calls), [ItemState::Stopped]);
}

#[tokio::test]
async fn test_stop_started_item_keeps_file_and_restart_resumes() {
    let mut h = Harness::new(1);
    let url = "http://fake/resume.bin";
    let (listener, calls) = recorder();
    let id = h.manager.add(url, listener).unwrap().id;
    assert_eq!(h.next_started().await.resume_from, 0);

    let manager = h.manager.clone();
    wait_for("partial progress", || {
        manager.get_item(id).is_some_and(|item| item.received == CHUNK)
    })
    .await;

    h.manager.stop(id);
    h.wait_state(id, ItemState::Stopped).await;
    assert_eq!(recorded(&calls), [ItemState::Stopped]);
    assert!(file_of(&h.manager, id).exists());
    assert_eq!(h.manager.get_item(id).unwrap().received, CHUNK);

    // A stopped item can be restarted; it resumes from what it received
    h.manager.start(id);
    assert_eq!(h.next_started().await.resume_from, CHUNK);
    h.transfer.release(url);
    h.wait_state(id, ItemState::Done).await;

    let item = h.manager.get_item(id).unwrap();
    assert!(item.is_done());
    assert!(item.error.is_none());
    assert_eq!(item.received, SIZE);
    assert_eq!(recorded(&calls), [ItemState::Stopped, ItemState::Done]);
}

#[tokio::test]
async fn test_start_ignored_unless_stopped_or_failed() {
    let mut h = Harness::new(1);
    let url = "http://fake/once.bin";
    let id = h.manager.add(url, None).unwrap().id;
    h.next_started().await;

    h.manager.start(id);
    h.manager.start(9999);
    h.transfer.release(url);
    h.wait_state(id, ItemState::Done).await;

    h.manager.start(id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.state(id), ItemState::Done);
    assert!(h.started.try_recv().is_err(), "no second attempt");
}

#[tokio::test]
async fn test_failed_attempt_deletes_file_and_reports_error() {
    let mut h = Harness::new(1);
    let url = "http://fake/fail/report.pdf";
    let (listener, calls) = recorder();
    let item = h.manager.add(url, listener).unwrap();
    assert!(item.file.exists(), "add() reserves the file");
    h.next_started().await;
    let manager = h.manager.clone();
    wait_for("partial progress", || {
        manager.get_item(item.id).is_some_and(|item| item.received == CHUNK)
    })
    .await;

    h.transfer.release(url);
    h.wait_state(item.id, ItemState::Error).await;

    let failed = h.manager.get_item(item.id).unwrap();
    assert!(!failed.file.exists(), "failed download is deleted");
    assert_eq!(
        failed.failure().map(ToString::to_string).as_deref(),
        Some("unsuccessful status code: 500")
    );
    assert_eq!(recorded(&calls), [ItemState::Error]);

    // Failed items are excluded from the aggregate
    let state = h.manager.get_state();
    assert_eq!(state.total, Total::Known(0));
    assert_eq!(state.received, 0);

    // and can be retried; the deleted partial file means starting over
    assert_eq!(failed.received, CHUNK);
    h.manager.start(item.id);
    assert_eq!(h.state(item.id), ItemState::New);
    assert_eq!(h.next_started().await.resume_from, 0);
    assert_eq!(h.state(item.id), ItemState::Started);
    assert!(h.manager.get_item(item.id).unwrap().error.is_none());
}

#[tokio::test]
async fn test_remove_running_item_deletes_file_on_completion() {
    let mut h = Harness::new(1);
    let url = "http://fake/removed.bin";
    let (listener, calls) = recorder();
    let item = h.manager.add(url, listener).unwrap();
    h.next_started().await;

    h.manager.remove(item.id);

    assert!(h.manager.get_item(item.id).is_none());
    assert!(h.manager.get_state().items.is_empty());
    let file = item.file.clone();
    wait_for("removed file to be deleted", || !file.exists()).await;
    let calls_ref = Arc::clone(&calls);
    wait_for("listener", || !calls_ref.lock().unwrap().is_empty()).await;
    assert_eq!(recorded(&calls), [ItemState::Stopped]);
}

#[tokio::test]
async fn test_remove_finished_item_deletes_file_immediately() {
    let mut h = Harness::new(1);
    let url = "http://fake/keep.bin";
    let item = h.manager.add(url, None).unwrap();
    h.next_started().await;
    h.transfer.release(url);
    h.wait_state(item.id, ItemState::Done).await;
    assert_eq!(std::fs::metadata(&item.file).unwrap().len(), SIZE);

    h.manager.remove(item.id);

    assert!(!item.file.exists());
    assert!(h.manager.get_item(item.id).is_none());
    h.manager.remove(item.id);
}

#[tokio::test]
async fn test_remove_queued_item_never_runs() {
    let mut h = Harness::new(1);
    let (listener, calls) = recorder();
    h.manager.add("http://fake/a.bin", None).unwrap();
    let queued = h.manager.add("http://fake/b.bin", listener).unwrap();
    h.next_started().await;

    h.manager.remove(queued.id);
    h.transfer.release("http://fake/a.bin");

    let file = queued.file.clone();
    wait_for("queued file to be deleted", || !file.exists()).await;
    let calls_ref = Arc::clone(&calls);
    wait_for("listener", || !calls_ref.lock().unwrap().is_empty()).await;
    assert_eq!(recorded(&calls), [ItemState::Stopped]);
    assert!(h.started.try_recv().is_err(), "removed item must not start");
}

#[tokio::test]
async fn test_set_threads_count_lets_queued_items_start() {
    let mut h = Harness::new(1);
    h.manager.add("http://fake/a.bin", None).unwrap();
    let b = h.manager.add("http://fake/b.bin", None).unwrap().id;
    h.next_started().await;
    assert_eq!(h.state(b), ItemState::New);

    h.manager.set_threads_count(2).unwrap();
    assert_eq!(h.manager.threads_count(), 2);
    assert_eq!(h.next_started().await.url, "http://fake/b.bin");

    assert!(matches!(
        h.manager.set_threads_count(0),
        Err(ManagerError::InvalidThreadCount { value: 0 })
    ));
    assert!(h.manager.set_threads_count(101).is_err());
    assert_eq!(h.manager.threads_count(), 2);
}

#[tokio::test]
async fn test_transfer_settings_apply_to_new_attempts() {
    let mut h = Harness::new(1);
    assert_eq!(h.manager.redirect_limit(), 5);
    assert!(h.manager.user_agent().starts_with("download-manager/"));

    h.manager.set_user_agent("probe/2.0");
    h.manager.set_redirect_limit(1);
    h.manager.add("http://fake/a.bin", None).unwrap();

    let started = h.next_started().await;
    assert_eq!(started.user_agent, "probe/2.0");
    assert_eq!(started.redirect_budget, 1);
}

#[tokio::test]
async fn test_add_names_files_without_collisions() {
    let h = Harness::new(1);
    let names: Vec<String> = (0..3)
        .map(|_| {
            let item = h.manager.add("http://fake/dir/picture.jpg?x=1", None).unwrap();
            item.file.file_name().unwrap().to_string_lossy().into_owned()
        })
        .collect();
    assert_eq!(names, ["picture.jpg", "picture (2).jpg", "picture (3).jpg"]);

    let ids: Vec<ItemId> = h.manager.get_state().items.iter().map(|i| i.id).collect();
    assert_eq!(ids, [0, 1, 2]);
}

#[tokio::test]
async fn test_add_into_missing_directory_fails_without_item() {
    let (transfer, _started) = FakeTransfer::new();
    let dir = TempDir::new().unwrap();
    let options = ManagerOptions {
        download_dir: dir.path().join("missing"),
        ..ManagerOptions::default()
    };
    let manager = DownloadManager::with_transfer(options, transfer).unwrap();

    let result = manager.add("http://fake/a.bin", None);

    assert!(matches!(result, Err(ManagerError::Io { .. })));
    assert!(manager.get_state().items.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_running_items_and_rejects_new_ones() {
    let mut h = Harness::new(2);
    let (listener, calls) = recorder();
    let id = h.manager.add("http://fake/a.bin", listener).unwrap().id;
    h.next_started().await;

    tokio::time::timeout(Duration::from_secs(5), h.manager.shutdown())
        .await
        .expect("shutdown should drain");

    assert!(h.manager.is_shut_down());
    assert_eq!(h.state(id), ItemState::Stopped);
    assert_eq!(recorded(&calls), [ItemState::Stopped]);
    assert!(h.manager.await_termination(Duration::from_millis(10)).await);
    assert!(matches!(
        h.manager.add("http://fake/b.bin", None),
        Err(ManagerError::ShutDown)
    ));

    h.manager.start(id);
    assert_eq!(h.state(id), ItemState::Stopped, "start after shutdown is ignored");
}

#[tokio::test]
async fn test_await_termination_false_while_running() {
    let h = Harness::new(1);
    assert!(!h.manager.await_termination(Duration::from_millis(10)).await);
}

#[test]
fn test_manager_requires_runtime() {
    let (transfer, _started) = FakeTransfer::new();
    let result = DownloadManager::with_transfer(ManagerOptions::default(), transfer);
    assert!(matches!(result, Err(ManagerError::NoRuntime)));
}

#[tokio::test]
async fn test_manager_rejects_invalid_thread_count() {
    let (transfer, _started) = FakeTransfer::new();
    let options = ManagerOptions {
        threads: 0,
        ..ManagerOptions::default()
    };
    let result = DownloadManager::with_transfer(options, transfer);
    assert!(matches!(
        result,
        Err(ManagerError::InvalidThreadCount { value: 0 })
    ));
}

// ==================== End-to-end over HTTP ====================

fn http_manager(dir: &Path, threads: usize) -> DownloadManager {
    DownloadManager::new(ManagerOptions {
        threads,
        download_dir: dir.to_path_buf(),
        ..ManagerOptions::default()
    })
    .expect("manager should start")
}

async fn wait_all_terminal(manager: &DownloadManager) {
    wait_for("all downloads to finish", || manager.get_state().all_terminal()).await;
}

#[tokio::test]
async fn test_http_downloads_complete() {
    let mock_server = MockServer::start().await;
    let bodies: [(&str, &[u8]); 3] = [
        ("/one.txt", b"first file"),
        ("/two.txt", b"second file, a bit longer"),
        ("/three.txt", b""),
    ];
    for (route, body) in bodies {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let manager = http_manager(dir.path(), 2);
    for (route, _) in bodies {
        manager
            .add(format!("{}{route}", mock_server.uri()), None)
            .unwrap();
    }
    wait_all_terminal(&manager).await;

    let state = manager.get_state();
    assert_eq!(state.count(ItemState::Done), 3);
    let expected: u64 = bodies.iter().map(|(_, body)| body.len() as u64).sum();
    assert_eq!(state.received, expected);
    assert_eq!(state.total, Total::Known(expected));
    for (item, (_, body)) in state.items.iter().zip(bodies) {
        assert_eq!(std::fs::read(&item.file).unwrap(), body);
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_http_not_found_ends_in_error_without_file() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = http_manager(dir.path(), 1);
    let (listener, calls) = recorder();
    let item = manager
        .add(format!("{}/gone.bin", mock_server.uri()), listener)
        .unwrap();
    wait_all_terminal(&manager).await;

    let failed = manager.get_item(item.id).unwrap();
    assert_eq!(failed.state, ItemState::Error);
    assert!(!failed.file.exists());
    assert_eq!(recorded(&calls), [ItemState::Error]);

    let json = serde_json::to_value(&failed).unwrap();
    assert_eq!(json["state"], "error");
    assert_eq!(json["error"], "unsuccessful status code: 404");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_http_redirect_limit_is_configurable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/end.bin"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/end.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"end".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = http_manager(dir.path(), 1);
    manager.set_redirect_limit(0);
    let blocked = manager
        .add(format!("{}/start", mock_server.uri()), None)
        .unwrap();
    wait_all_terminal(&manager).await;
    assert_eq!(manager.get_item(blocked.id).unwrap().state, ItemState::Error);

    manager.set_redirect_limit(1);
    manager.start(blocked.id);
    wait_all_terminal(&manager).await;
    let item = manager.get_item(blocked.id).unwrap();
    assert_eq!(item.state, ItemState::Done);
    assert_eq!(std::fs::read(&item.file).unwrap(), b"end");

    manager.shutdown().await;
}

/// Fails its first attempt after writing part of the file, then downloads
/// over HTTP.
struct FailOnceTransfer {
    failed: AtomicBool,
    http: HttpClient,
}

#[async_trait]
impl Transfer for FailOnceTransfer {
    async fn download(
        &self,
        request: TransferRequest<'_>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), DownloadError> {
        if self.failed.swap(true, Ordering::SeqCst) {
            return self.http.download(request, on_progress).await;
        }
        tokio::fs::write(request.file, b"0123456789")
            .await
            .map_err(|e| DownloadError::io(request.file, e))?;
        on_progress(10, Total::Known(20))?;
        Err(DownloadError::io(
            request.file,
            std::io::Error::other("disk went away"),
        ))
    }
}

#[tokio::test]
async fn test_http_restart_after_error_downloads_from_scratch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/retry.bin"))
        .and(header("Range", "bytes=10-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 10-19/20")
                .set_body_bytes(b"abcdefghij".to_vec()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/retry.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789abcdefghij".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FailOnceTransfer {
        failed: AtomicBool::new(false),
        http: HttpClient::new(),
    });
    let manager = DownloadManager::with_transfer(
        ManagerOptions {
            threads: 1,
            download_dir: dir.path().to_path_buf(),
            ..ManagerOptions::default()
        },
        transfer,
    )
    .unwrap();

    let item = manager
        .add(format!("{}/retry.bin", mock_server.uri()), None)
        .unwrap();
    wait_all_terminal(&manager).await;
    let failed = manager.get_item(item.id).unwrap();
    assert_eq!(failed.state, ItemState::Error);
    assert_eq!(failed.received, 10);
    assert!(!failed.file.exists());

    manager.start(item.id);
    wait_all_terminal(&manager).await;

    let done = manager.get_item(item.id).unwrap();
    assert_eq!(done.state, ItemState::Done);
    assert_eq!(done.received, 20);
    assert_eq!(std::fs::read(&done.file).unwrap(), b"0123456789abcdefghij");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("range").is_none());

    manager.shutdown().await;
}
