//! Debounced config persistence.
//!
//! The [`PersistenceScheduler`] task coalesces bursts of save requests into
//! a single write and guarantees that at most one write is in flight.
//!
//! ```text
//!            request                 timer                 write done
//!   Idle ─────────────► Scheduled ──────────► Writing ───────────────► Idle
//!                        │    ▲                  │
//!                request │    │ write done       │ request
//!        (restart timer) ▼    │                  ▼
//!                    Scheduled └───────────── WritingDirty ◄─┐
//!                                                  │ request │
//!                                                  └─────────┘
//! ```
//!
//! Every request carries the whole [`ConfigDocument`]; the write that
//! eventually runs uses the most recent one.  A failed write is logged and
//! the machine moves on as if it had succeeded.  Nothing retries it unless
//! a new request arrives.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldhub_types::{ConfigDocument, PersistenceError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Storage
// ────────────────────────────────────────────────────────────────────────────

/// Durable destination of the config document.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Replace the stored document with `document`.
    async fn save(&self, document: &ConfigDocument) -> Result<(), PersistenceError>;
}

/// Writes the document as pretty-printed JSON, replacing the file through a
/// sibling `.tmp` file and a rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ConfigStore for FileStore {
    async fn save(&self, document: &ConfigDocument) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(document)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, json)
            .await
            .map_err(|source| PersistenceError::Write {
                path: temp.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| PersistenceError::Write {
                path: self.path.display().to_string(),
                source,
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State machine
// ────────────────────────────────────────────────────────────────────────────

/// Write state of the scheduler.  Transitions are pure so they can be
/// tested without a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Nothing pending, nothing in flight.
    Idle,
    /// A write will start at `deadline` unless another request moves it.
    Scheduled { deadline: Instant },
    /// A write is in flight.
    Writing,
    /// A write is in flight and at least one request arrived during it.
    WritingDirty,
}

impl WriteState {
    /// A save was requested at `now`.
    pub fn on_request(self, now: Instant, delay: Duration) -> Self {
        match self {
            WriteState::Idle | WriteState::Scheduled { .. } => WriteState::Scheduled {
                deadline: now + delay,
            },
            WriteState::Writing | WriteState::WritingDirty => WriteState::WritingDirty,
        }
    }

    /// The debounce timer fired.  Returns the next state and whether a write
    /// must start now.
    pub fn on_timer(self) -> (Self, bool) {
        match self {
            WriteState::Scheduled { .. } => (WriteState::Writing, true),
            other => (other, false),
        }
    }

    /// The in-flight write finished, successfully or not.
    pub fn on_write_complete(self, now: Instant, delay: Duration) -> Self {
        match self {
            WriteState::WritingDirty => WriteState::Scheduled {
                deadline: now + delay,
            },
            WriteState::Writing => WriteState::Idle,
            other => other,
        }
    }

    /// When the debounce timer fires, if it is armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WriteState::Scheduled { deadline } => Some(*deadline),
            _ => None,
        }
    }

    /// Whether some request has not been covered by a started write yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteState::Scheduled { .. } | WriteState::WritingDirty)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler task
// ────────────────────────────────────────────────────────────────────────────

enum Command {
    Persist(Box<ConfigDocument>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable sender of save requests.
#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PersistenceHandle {
    /// Ask for `document` to be written.  Never blocks.
    pub fn request(&self, document: ConfigDocument) {
        if self
            .commands
            .send(Command::Persist(Box::new(document)))
            .is_err()
        {
            warn!("persistence scheduler has stopped; config change not saved");
        }
    }

    /// Flush pending work and stop the scheduler.  Returns once the final
    /// write has finished.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Owns the [`WriteState`] and the store.  Consumed by [`spawn`](Self::spawn).
pub struct PersistenceScheduler {
    store: Arc<dyn ConfigStore>,
    delay: Duration,
}

impl PersistenceScheduler {
    pub fn new(store: Arc<dyn ConfigStore>, delay: Duration) -> Self {
        Self { store, delay }
    }

    /// Start the scheduler task.
    pub fn spawn(self) -> (PersistenceHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(receiver));
        (PersistenceHandle { commands }, task)
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut state = WriteState::Idle;
        let mut latest: Option<ConfigDocument> = None;
        let mut in_flight: Option<JoinHandle<Result<(), PersistenceError>>> = None;
        let mut shutdown_ack = None;

        loop {
            let deadline = state.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Persist(document)) => {
                        latest = Some(*document);
                        state = state.on_request(Instant::now(), self.delay);
                        debug!(?state, "config save requested");
                    }
                    Some(Command::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    None => break,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let (next, start) = state.on_timer();
                    state = next;
                    if let (true, Some(document)) = (start, latest.clone()) {
                        in_flight = Some(self.start_write(document));
                    }
                },
                result = wait_for(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    log_outcome(result);
                    state = state.on_write_complete(Instant::now(), self.delay);
                }
            }
        }

        if let Some(task) = in_flight.take() {
            log_outcome(task.await);
            state = state.on_write_complete(Instant::now(), self.delay);
        }
        if let (true, Some(document)) = (state.is_pending(), latest) {
            info!("flushing pending config save");
            log_outcome(Ok(self.store.save(&document).await));
        }
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
        debug!("persistence scheduler stopped");
    }

    fn start_write(&self, document: ConfigDocument) -> JoinHandle<Result<(), PersistenceError>> {
        info!("saving the config file");
        let store = Arc::clone(&self.store);
        tokio::spawn(async move { store.save(&document).await })
    }
}

async fn wait_for<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn log_outcome(result: Result<Result<(), PersistenceError>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!("config saved"),
        Ok(Err(e)) => error!(error = %e, "failed to save the config file"),
        Err(e) => error!(error = %e, "config write task failed"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    /// Store that records every save attempt and can be made slow or failing.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub writes: Mutex<Vec<(Instant, ConfigDocument)>>,
        pub latency: Duration,
        pub fail: bool,
        active: AtomicUsize,
        pub max_active: AtomicUsize,
    }

    impl RecordingStore {
        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        pub fn writes(&self) -> Vec<(Instant, ConfigDocument)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfigStore for RecordingStore {
        async fn save(&self, document: &ConfigDocument) -> Result<(), PersistenceError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.writes
                .lock()
                .unwrap()
                .push((Instant::now(), document.clone()));
            sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(PersistenceError::Write {
                    path: "memory".into(),
                    source: std::io::Error::other("disk full"),
                })
            } else {
                Ok(())
            }
        }
    }

    fn doc(seq: u64) -> ConfigDocument {
        let mut document = ConfigDocument::default();
        document.extra.insert("seq".into(), json!(seq));
        document
    }

    const DELAY: Duration = Duration::from_millis(500);

    // ── pure transitions ────────────────────────────────────────────────────

    #[test]
    fn request_restarts_the_timer() {
        let t0 = Instant::now();
        let state = WriteState::Idle.on_request(t0, DELAY);
        assert_eq!(state.deadline(), Some(t0 + DELAY));

        let t1 = t0 + Duration::from_millis(100);
        let state = state.on_request(t1, DELAY);
        assert_eq!(state.deadline(), Some(t1 + DELAY));
    }

    #[test]
    fn request_during_write_marks_dirty() {
        let now = Instant::now();
        assert_eq!(
            WriteState::Writing.on_request(now, DELAY),
            WriteState::WritingDirty
        );
        assert_eq!(
            WriteState::WritingDirty.on_request(now, DELAY),
            WriteState::WritingDirty
        );
    }

    #[test]
    fn timer_starts_a_write_only_when_scheduled() {
        let now = Instant::now();
        let scheduled = WriteState::Idle.on_request(now, DELAY);
        assert_eq!(scheduled.on_timer(), (WriteState::Writing, true));
        assert_eq!(WriteState::Idle.on_timer(), (WriteState::Idle, false));
        assert_eq!(WriteState::Writing.on_timer(), (WriteState::Writing, false));
    }

    #[test]
    fn write_completion_rearms_only_when_dirty() {
        let now = Instant::now();
        assert_eq!(
            WriteState::Writing.on_write_complete(now, DELAY),
            WriteState::Idle
        );
        assert_eq!(
            WriteState::WritingDirty.on_write_complete(now, DELAY),
            WriteState::Scheduled {
                deadline: now + DELAY
            }
        );
    }

    #[test]
    fn pending_states() {
        assert!(!WriteState::Idle.is_pending());
        assert!(!WriteState::Writing.is_pending());
        assert!(WriteState::WritingDirty.is_pending());
        assert!(WriteState::Idle.on_request(Instant::now(), DELAY).is_pending());
    }

    // ── scheduler task ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_produces_one_write_of_the_last_document() {
        let store = Arc::new(RecordingStore::default());
        let (handle, _task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();
        let start = Instant::now();

        for seq in 0..10 {
            handle.request(doc(seq));
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_secs(2)).await;

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, doc(9));
        assert!(writes[0].0 - start >= Duration::from_millis(590));
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_write_causes_exactly_one_more_write() {
        let store = Arc::new(RecordingStore::with_latency(Duration::from_millis(200)));
        let (handle, _task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();
        let start = Instant::now();

        handle.request(doc(0));
        // The first write runs from 500ms to 700ms.
        sleep(Duration::from_millis(600)).await;
        handle.request(doc(1));
        sleep(Duration::from_secs(3)).await;

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, doc(0));
        assert_eq!(writes[1].1, doc(1));
        assert!(writes[1].0 - start >= Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_one_write_in_flight() {
        let store = Arc::new(RecordingStore::with_latency(Duration::from_millis(300)));
        let (handle, _task) =
            PersistenceScheduler::new(store.clone(), Duration::from_millis(50)).spawn();

        for seq in 0..100 {
            handle.request(doc(seq));
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_secs(2)).await;

        let writes = store.writes();
        assert!(writes.len() > 1);
        assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(writes.last().map(|(_, d)| d.clone()), Some(doc(99)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_not_retried_without_a_new_request() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let (handle, _task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();

        handle.request(doc(0));
        sleep(Duration::from_secs(5)).await;
        assert_eq!(store.writes().len(), 1);

        handle.request(doc(1));
        sleep(Duration::from_secs(1)).await;
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_a_scheduled_save() {
        let store = Arc::new(RecordingStore::default());
        let (handle, task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();

        handle.request(doc(3));
        handle.shutdown().await;

        assert_eq!(store.writes().len(), 1);
        assert_eq!(store.writes()[0].1, doc(3));
        assert!(task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_write_then_flushes_dirty() {
        let store = Arc::new(RecordingStore::with_latency(Duration::from_millis(200)));
        let (handle, _task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();

        handle.request(doc(0));
        sleep(Duration::from_millis(550)).await;
        handle.request(doc(1));
        handle.shutdown().await;

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].1, doc(1));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_when_idle_writes_nothing() {
        let store = Arc::new(RecordingStore::default());
        let (handle, _task) = PersistenceScheduler::new(store.clone(), DELAY).spawn();
        handle.shutdown().await;
        assert!(store.writes().is_empty());
    }

    // ── file store ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn file_store_writes_pretty_json() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        let store = FileStore::new(&path);

        store.save(&doc(7)).await?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("\n  \"devices\": []"));
        let parsed: ConfigDocument = serde_json::from_str(&text)?;
        assert_eq!(parsed, doc(7));
        assert!(!dir.path().join("config.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn file_store_reports_unwritable_path() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path().join("missing").join("config.json"));

        let result = store.save(&doc(0)).await;
        assert!(matches!(result, Err(PersistenceError::Write { .. })));
        Ok(())
    }
}
