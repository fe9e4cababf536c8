use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::ControlPlane;
use crate::lifecycle::Epoch;
use crate::session::Event;

/// Fetches the cluster snapshot for the whole life of the session.
///
/// Requests never overlap: the loop awaits each fetch before waiting for the
/// next tick, and refresh requests made during a fetch collapse into a single
/// pending one.
pub struct SnapshotPoller {
    refresh: Arc<Notify>,
    _guard: DropGuard,
}

impl SnapshotPoller {
    pub fn spawn(
        api: Arc<dyn ControlPlane>,
        period: Duration,
        events: UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        let refresh = Arc::new(Notify::new());
        tokio::spawn(snapshot_loop(
            api,
            period,
            events,
            refresh.clone(),
            cancel.clone(),
        ));
        Self {
            refresh,
            _guard: cancel.drop_guard(),
        }
    }

    /// Poll now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }
}

async fn snapshot_loop(
    api: Arc<dyn ControlPlane>,
    period: Duration,
    events: UnboundedSender<Event>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = refresh.notified() => {
                tracing::debug!("snapshot refresh requested");
            }
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            fetched = api.snapshot() => fetched,
        };
        let event = match fetched {
            Ok(snapshot) => Event::SnapshotFetched(snapshot),
            Err(e) => Event::SnapshotFailed(e.to_string()),
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

struct Polling {
    epoch: Epoch,
    _guard: DropGuard,
}

/// Checks whether the server still considers the run active. Runs only
/// while the lifecycle owns a run; each start replaces the previous timer.
pub struct StatusPoller {
    api: Arc<dyn ControlPlane>,
    period: Duration,
    events: UnboundedSender<Event>,
    current: Option<Polling>,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn ControlPlane>, period: Duration, events: UnboundedSender<Event>) -> Self {
        Self {
            api,
            period,
            events,
            current: None,
        }
    }

    pub fn start(&mut self, epoch: Epoch) {
        self.stop();

        let cancel = CancellationToken::new();
        tokio::spawn(status_loop(
            self.api.clone(),
            self.period,
            epoch,
            self.events.clone(),
            cancel.clone(),
        ));
        tracing::debug!(epoch = epoch.0, "status polling started");
        self.current = Some(Polling {
            epoch,
            _guard: cancel.drop_guard(),
        });
    }

    /// Idempotent. Returns whether a running timer was cancelled.
    pub fn stop(&mut self) -> bool {
        match self.current.take() {
            Some(polling) => {
                tracing::debug!(epoch = polling.epoch.0, "status polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }
}

async fn status_loop(
    api: Arc<dyn ControlPlane>,
    period: Duration,
    epoch: Epoch,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    // first check one full period after the run starts
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            polled = api.training_status() => polled,
        };
        match polled {
            Ok(reply) => {
                if events.send(Event::StatusPolled { epoch, reply }).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error=%e, "status poll failed, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fedwatch_common::StatusReply;
    use tokio::sync::mpsc;

    use crate::testing::FakeControlPlane;

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_polls_immediately_and_on_refresh() {
        let api = Arc::new(FakeControlPlane::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = SnapshotPoller::spawn(
            api.clone(),
            Duration::from_secs(10),
            tx,
            CancellationToken::new(),
        );

        assert!(matches!(rx.recv().await, Some(Event::SnapshotFetched(_))));
        for _ in 0..5 {
            poller.refresh_now();
        }
        assert!(matches!(rx.recv().await, Some(Event::SnapshotFetched(_))));

        tokio::time::sleep(Duration::from_secs(1)).await;
        // a burst of refreshes queues at most one extra fetch
        let after_burst = api.snapshot_calls();
        assert!((2..=3).contains(&after_burst), "calls: {after_burst}");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.snapshot_calls(), after_burst + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_requests_never_overlap() {
        let api = Arc::new(FakeControlPlane::new());
        api.hold_snapshots(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = SnapshotPoller::spawn(
            api.clone(),
            Duration::from_secs(10),
            tx,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(api.snapshot_calls(), 1);
        for _ in 0..5 {
            poller.refresh_now();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(api.snapshot_calls(), 1);

        // the refresh burst becomes one follow-up fetch, before the next tick
        api.hold_snapshots(false);
        assert!(matches!(rx.recv().await, Some(Event::SnapshotFetched(_))));
        assert!(matches!(rx.recv().await, Some(Event::SnapshotFetched(_))));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(api.snapshot_calls(), 2);

        // the tick at 10s starts a fetch that outlasts several periods
        api.hold_snapshots(true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.snapshot_calls(), 3);
        assert_eq!(api.max_snapshots_in_flight(), 1);

        api.hold_snapshots(false);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(api.snapshot_calls() > 3);
        assert_eq!(api.max_snapshots_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_failure_reported() {
        let api = Arc::new(FakeControlPlane::new());
        api.fail_snapshots(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poller = SnapshotPoller::spawn(
            api.clone(),
            Duration::from_secs(10),
            tx,
            CancellationToken::new(),
        );
        assert!(matches!(rx.recv().await, Some(Event::SnapshotFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_poller_stop_is_idempotent() {
        let api = Arc::new(FakeControlPlane::new());
        api.script_status(vec![StatusReply {
            active: true,
            ..StatusReply::default()
        }]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = StatusPoller::new(api.clone(), Duration::from_secs(3), tx);

        poller.start(Epoch(1));
        match rx.recv().await {
            Some(Event::StatusPolled { epoch, reply }) => {
                assert_eq!(epoch, Epoch(1));
                assert!(reply.active);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(poller.stop());
        assert!(!poller.stop());
        assert!(!poller.is_running());

        let calls = api.status_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.status_calls(), calls);
    }
}
