use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_stream::StreamExt;

use fedwatch_common::{ClusterSnapshot, FrameworkCatalog, StatusReply, TrainingConfig};

use crate::api::{ControlPlane, LogEventStream, RawReply};
use crate::error::ApiError;
use crate::sse::StreamEvent;

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        detail: Some("unavailable".to_string()),
    }
}

/// Wait until `held` is cleared. Each `Notified` is created before the flag
/// is read so a release between the two is not missed.
async fn wait_released(held: &AtomicBool, release: &Notify) {
    loop {
        let released = release.notified();
        if !held.load(Ordering::SeqCst) {
            return;
        }
        released.await;
    }
}

fn ok_reply(body: &str) -> RawReply {
    RawReply {
        status: 200,
        body: body.to_string(),
    }
}

/// In-memory control plane with scripted replies and call counters.
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    snapshot: Mutex<ClusterSnapshot>,
    fail_snapshots: AtomicBool,
    snapshot_calls: AtomicUsize,
    hold_snapshots: AtomicBool,
    snapshot_release: Notify,
    snapshots_in_flight: AtomicUsize,
    max_snapshots_in_flight: AtomicUsize,

    catalog: Mutex<Option<FrameworkCatalog>>,
    fail_catalog: AtomicBool,

    status: Mutex<VecDeque<StatusReply>>,
    status_calls: AtomicUsize,

    starts: Mutex<VecDeque<RawReply>>,
    hold_starts: AtomicBool,
    start_release: Notify,
    start_calls: AtomicUsize,
    last_start: Mutex<Option<TrainingConfig>>,

    stops: Mutex<VecDeque<RawReply>>,
    stop_calls: AtomicUsize,

    fail_resets: AtomicBool,
    reset_calls: AtomicUsize,

    log: Mutex<Vec<StreamEvent>>,
    fail_log_opens: AtomicBool,
    log_opens: AtomicUsize,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, snapshot: ClusterSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Snapshot requests wait while held and complete once released.
    pub fn hold_snapshots(&self, hold: bool) {
        self.hold_snapshots.store(hold, Ordering::SeqCst);
        if !hold {
            self.snapshot_release.notify_waiters();
        }
    }

    /// Highest number of snapshot requests outstanding at the same time.
    pub fn max_snapshots_in_flight(&self) -> usize {
        self.max_snapshots_in_flight.load(Ordering::SeqCst)
    }

    /// Catalog served instead of the built-in fallback.
    pub fn set_catalog(&self, catalog: FrameworkCatalog) {
        *self.catalog.lock().unwrap() = Some(catalog);
    }

    pub fn fail_catalog(&self, fail: bool) {
        self.fail_catalog.store(fail, Ordering::SeqCst);
    }

    /// Replies handed out in order; an empty queue answers "inactive".
    pub fn script_status(&self, replies: Vec<StatusReply>) {
        *self.status.lock().unwrap() = replies.into();
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// An empty queue answers 200 with no switch.
    pub fn push_start(&self, status: u16, body: &str) {
        self.starts.lock().unwrap().push_back(RawReply {
            status,
            body: body.to_string(),
        });
    }

    /// Start requests get no reply while held; releasing lets them finish.
    pub fn hold_start_replies(&self, hold: bool) {
        self.hold_starts.store(hold, Ordering::SeqCst);
        if !hold {
            self.start_release.notify_waiters();
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Body of the most recent start request.
    pub fn last_start(&self) -> Option<TrainingConfig> {
        self.last_start.lock().unwrap().clone()
    }

    pub fn push_stop(&self, status: u16, body: &str) {
        self.stops.lock().unwrap().push_back(RawReply {
            status,
            body: body.to_string(),
        });
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn fail_resets(&self, fail: bool) {
        self.fail_resets.store(fail, Ordering::SeqCst);
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    /// Events every log connection yields before going quiet.
    pub fn script_log(&self, events: Vec<StreamEvent>) {
        *self.log.lock().unwrap() = events;
    }

    pub fn fail_log_opens(&self, fail: bool) {
        self.fail_log_opens.store(fail, Ordering::SeqCst);
    }

    pub fn log_opens(&self) -> usize {
        self.log_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn snapshot(&self) -> Result<ClusterSnapshot, ApiError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.snapshots_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_snapshots_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        wait_released(&self.hold_snapshots, &self.snapshot_release).await;
        self.snapshots_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn training_status(&self) -> Result<StatusReply, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn frameworks(&self) -> Result<FrameworkCatalog, ApiError> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let scripted = self.catalog.lock().unwrap().clone();
        Ok(scripted.unwrap_or_else(FrameworkCatalog::fallback))
    }

    async fn start(&self, config: &TrainingConfig) -> Result<RawReply, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_start.lock().unwrap() = Some(config.clone());
        wait_released(&self.hold_starts, &self.start_release).await;
        let scripted = self.starts.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| ok_reply(r#"{"status": "started"}"#)))
    }

    async fn stop(&self) -> Result<RawReply, ApiError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.stops.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| ok_reply(r#"{"status": "stopped"}"#)))
    }

    async fn reset(&self) -> Result<RawReply, ApiError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_resets.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(ok_reply("{}"))
    }

    async fn open_log(&self) -> Result<LogEventStream, ApiError> {
        self.log_opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_log_opens.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let events = self.log.lock().unwrap().clone();
        let stream = tokio_stream::iter(events)
            .chain(tokio_stream::pending())
            .map(Ok::<StreamEvent, ApiError>);
        Ok(Box::pin(stream))
    }
}
