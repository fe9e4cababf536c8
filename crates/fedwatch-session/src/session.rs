use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use fedwatch_common::{ClusterSnapshot, CurrentRun, FrameworkCatalog, LogLine, StartReply, StatusReply};

use crate::error::CommandError;
use crate::lifecycle::{Effect, Epoch, Lifecycle, Phase, Signal, Ticket};
use crate::sse::StreamEvent;

/// Everything that can happen to a session. Timers, stream readers and
/// network calls only ever report back through these.
#[derive(Debug, Clone)]
pub enum Event {
    SnapshotFetched(ClusterSnapshot),
    SnapshotFailed(String),
    CatalogLoaded(FrameworkCatalog),
    /// The catalog request failed; the built-in list stays in use.
    CatalogUnavailable,
    /// One-shot probe made when the session comes up.
    InitialStatus(StatusReply),
    StatusPolled { epoch: Epoch, reply: StatusReply },
    Stream { epoch: Epoch, event: StreamEvent },
    /// The stream reader gave up reconnecting.
    StreamLost { epoch: Epoch },
    StartFinished {
        ticket: Ticket,
        framework: String,
        result: Result<StartReply, CommandError>,
    },
    StopFinished {
        epoch: Epoch,
        result: Result<(), CommandError>,
    },
    ResetRequested,
    ClearLog,
    Notice(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Short user-facing message, the terminal equivalent of a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn from_command_error(err: &CommandError) -> Self {
        if err.is_benign() {
            Self::warning(err.to_string())
        } else {
            Self::error(err.to_string())
        }
    }
}

/// Bounded display log. Lines carry a monotonically increasing position so
/// renderers can print only what they have not seen yet.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    total: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.total += 1;
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Position one past the newest line ever pushed.
    pub fn end(&self) -> u64 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// Retained lines at or after position `cursor`.
    pub fn since(&self, cursor: u64) -> impl Iterator<Item = &LogLine> {
        let first = self.total - self.lines.len() as u64;
        let skip = cursor.saturating_sub(first).min(self.lines.len() as u64) as usize;
        self.lines.iter().skip(skip)
    }
}

/// All state of one supervised client, mutated only through [`ClientSession::handle`].
#[derive(Debug)]
pub struct ClientSession {
    lifecycle: Lifecycle,
    snapshot: Option<ClusterSnapshot>,
    offline: bool,
    last_updated: Option<DateTime<Utc>>,
    log: LogBuffer,
    catalog: FrameworkCatalog,
    cluster_framework: Option<String>,
    notices: Vec<Notice>,
}

impl ClientSession {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            snapshot: None,
            offline: false,
            last_updated: None,
            log: LogBuffer::new(log_capacity),
            catalog: FrameworkCatalog::fallback(),
            cluster_framework: None,
            notices: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn snapshot(&self) -> Option<&ClusterSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn catalog(&self) -> &FrameworkCatalog {
        &self.catalog
    }

    /// Framework the workers are provisioned with, as far as this client knows.
    pub fn cluster_framework(&self) -> Option<&str> {
        self.cluster_framework.as_deref()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub(crate) fn begin_start(&mut self) -> Result<Ticket, CommandError> {
        self.lifecycle.begin_start().ok_or(CommandError::Busy)
    }

    pub(crate) fn begin_stop(&mut self) -> Result<Epoch, CommandError> {
        self.lifecycle
            .begin_stop()
            .ok_or_else(|| CommandError::Invalid("No active training to stop".to_string()))
    }

    /// Apply one event and return the resource effects the owner must carry
    /// out. Data effects are applied here.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let effects = match event {
            Event::SnapshotFetched(snapshot) => {
                self.offline = false;
                self.last_updated = Some(Utc::now());
                self.snapshot = Some(snapshot);
                Vec::new()
            }
            Event::SnapshotFailed(error) => {
                if !self.offline {
                    tracing::warn!(%error, "snapshot poll failed, keeping last snapshot");
                }
                self.offline = true;
                Vec::new()
            }
            Event::CatalogLoaded(catalog) => {
                if self.cluster_framework.is_none() {
                    self.cluster_framework = catalog.cluster_framework().map(str::to_string);
                }
                self.catalog = catalog;
                Vec::new()
            }
            Event::CatalogUnavailable => Vec::new(),
            Event::InitialStatus(reply) => {
                if reply.active && self.lifecycle.can_start() {
                    tracing::info!(framework = ?reply.framework, "adopting run already in progress");
                    self.log.clear();
                    self.lifecycle.apply(Signal::Adopt)
                } else {
                    Vec::new()
                }
            }
            Event::StatusPolled { epoch, reply } => self.on_status(epoch, reply),
            Event::Stream { epoch, event } => self.on_stream(epoch, event),
            Event::StreamLost { epoch } => {
                if epoch == self.lifecycle.epoch() && self.phase().is_active() {
                    tracing::warn!(epoch = epoch.0, "log stream lost, relying on status polling");
                    self.notices
                        .push(Notice::warning("Log stream lost; waiting for training status"));
                }
                Vec::new()
            }
            Event::StartFinished {
                ticket,
                framework,
                result,
            } => self.on_start_finished(ticket, framework, result),
            Event::StopFinished { epoch, result } => match result {
                Ok(()) => {
                    let effects = self.lifecycle.apply(Signal::StopAccepted(epoch));
                    if self.phase() == Phase::Stopped && !effects.is_empty() {
                        self.notices.push(Notice::info("Training stopped"));
                    }
                    effects
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stop rejected");
                    self.notices.push(Notice::from_command_error(&err));
                    self.lifecycle.apply(Signal::StopFailed(epoch))
                }
            },
            Event::ResetRequested => self.lifecycle.apply(Signal::Reset),
            Event::ClearLog => {
                self.log.clear();
                Vec::new()
            }
            Event::Notice(notice) => {
                self.notices.push(notice);
                Vec::new()
            }
        };

        effects
            .into_iter()
            .filter(|effect| match effect {
                Effect::ClearRunData => {
                    self.clear_run_data();
                    false
                }
                _ => true,
            })
            .collect()
    }

    fn on_status(&mut self, epoch: Epoch, reply: StatusReply) -> Vec<Effect> {
        if reply.active {
            return self.lifecycle.apply(Signal::StatusActive(epoch));
        }
        let failed = reply
            .last_completed
            .as_ref()
            .is_some_and(|run| run.failed());
        let effects = self
            .lifecycle
            .apply(Signal::StatusInactive { epoch, failed });
        if !effects.is_empty() {
            tracing::info!(epoch = epoch.0, exit_code = ?reply.exit_code(), "status reports run inactive");
            self.notices.push(if failed {
                Notice::error("Training failed")
            } else {
                Notice::info("Training finished")
            });
        }
        effects
    }

    fn on_stream(&mut self, epoch: Epoch, event: StreamEvent) -> Vec<Effect> {
        if epoch != self.lifecycle.epoch() || !self.phase().is_active() {
            tracing::debug!(epoch = epoch.0, "dropping event from closed stream");
            return Vec::new();
        }
        match event {
            StreamEvent::Line(line) => {
                self.log.push(line);
                self.lifecycle.apply(Signal::StreamActivity(epoch))
            }
            StreamEvent::Complete => {
                self.log.push(LogLine::completion_marker());
                self.notices.push(Notice::info("Training complete"));
                self.lifecycle.apply(Signal::StreamComplete(epoch))
            }
        }
    }

    fn on_start_finished(
        &mut self,
        ticket: Ticket,
        framework: String,
        result: Result<StartReply, CommandError>,
    ) -> Vec<Effect> {
        if self.lifecycle.pending_start() != Some(ticket) {
            tracing::debug!(ticket = ticket.0, "ignoring reply to abandoned start request");
            return Vec::new();
        }
        match result {
            Ok(reply) => {
                if reply.switched {
                    tracing::info!(%framework, "workers switched framework");
                    self.cluster_framework = Some(framework);
                }
                self.log.clear();
                self.notices.push(Notice::info("Training started"));
                self.lifecycle.apply(Signal::StartAccepted(ticket))
            }
            Err(err) => {
                tracing::warn!(error = %err, "start rejected");
                self.notices.push(Notice::from_command_error(&err));
                self.lifecycle.apply(Signal::StartFailed(ticket))
            }
        }
    }

    fn clear_run_data(&mut self) {
        self.log.clear();
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.current_run = CurrentRun::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedwatch_common::{CompletedRun, RoundResult};

    fn running_session() -> (ClientSession, Epoch) {
        let mut session = ClientSession::new(100);
        let ticket = session.begin_start().unwrap();
        let effects = session.handle(Event::StartFinished {
            ticket,
            framework: "pytorch".to_string(),
            result: Ok(StartReply::default()),
        });
        assert_eq!(effects.len(), 2);
        let epoch = session.lifecycle().epoch();
        (session, epoch)
    }

    fn line(epoch: Epoch, text: &str) -> Event {
        Event::Stream {
            epoch,
            event: StreamEvent::Line(LogLine::new(text)),
        }
    }

    fn complete(epoch: Epoch) -> Event {
        Event::Stream {
            epoch,
            event: StreamEvent::Complete,
        }
    }

    fn inactive(epoch: Epoch) -> Event {
        Event::StatusPolled {
            epoch,
            reply: StatusReply::default(),
        }
    }

    fn count(effects: &[Effect], target: Effect) -> usize {
        effects.iter().filter(|e| **e == target).count()
    }

    #[test]
    fn test_log_buffer_bounded() {
        let mut buf = LogBuffer::new(2);
        for i in 0..3 {
            buf.push(LogLine::new(format!("line {i}")));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.end(), 3);
        let texts: Vec<&str> = buf.since(0).map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line 1", "line 2"]);
        assert_eq!(buf.since(2).count(), 1);
        assert_eq!(buf.since(3).count(), 0);

        buf.clear();
        assert_eq!(buf.since(0).count(), 0);
        buf.push(LogLine::new("after"));
        assert_eq!(buf.since(3).count(), 1);
    }

    #[test]
    fn test_three_lines_then_complete() {
        let (mut session, epoch) = running_session();
        for text in ["round 1", "round 2", "round 3"] {
            assert!(session.handle(line(epoch, text)).is_empty());
        }
        assert_eq!(session.phase(), Phase::Running);

        let effects = session.handle(complete(epoch));
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(count(&effects, Effect::RefreshSnapshot), 1);

        let lines: Vec<&LogLine> = session.log().iter().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(*lines[3], LogLine::completion_marker());
    }

    #[test]
    fn test_cleanup_exactly_once_in_any_order() {
        let orders: [&[u8]; 6] = [
            &[0, 1],
            &[1, 0],
            &[0, 0, 1],
            &[1, 1, 0],
            &[0, 1, 0, 1],
            &[1, 0, 1, 0],
        ];
        for order in orders {
            let (mut session, epoch) = running_session();
            let mut effects = Vec::new();
            for which in order {
                let event = if *which == 0 { complete(epoch) } else { inactive(epoch) };
                effects.extend(session.handle(event));
            }
            assert_eq!(count(&effects, Effect::CloseStream), 1, "order {order:?}");
            assert_eq!(count(&effects, Effect::StopStatusPoller), 1, "order {order:?}");
            assert_eq!(count(&effects, Effect::RefreshSnapshot), 1, "order {order:?}");
            assert_eq!(session.phase(), Phase::Completed);
        }
    }

    #[test]
    fn test_status_fallback_without_complete() {
        let (mut session, epoch) = running_session();
        session.handle(line(epoch, "round 1"));
        assert_eq!(session.phase(), Phase::Running);

        let effects = session.handle(inactive(epoch));
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(
            effects,
            vec![Effect::CloseStream, Effect::StopStatusPoller, Effect::RefreshSnapshot]
        );
        // no completion marker on the fallback path
        assert_eq!(session.log().len(), 1);
    }

    #[test]
    fn test_status_fallback_failed_exit() {
        let (mut session, epoch) = running_session();
        session.handle(Event::StatusPolled {
            epoch,
            reply: StatusReply {
                active: false,
                last_completed: Some(CompletedRun {
                    exit_code: Some(1),
                    ..CompletedRun::default()
                }),
                ..StatusReply::default()
            },
        });
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.notices().last().map(|n| n.level), Some(NoticeLevel::Error));
    }

    #[test]
    fn test_conflict_keeps_idle() {
        let mut session = ClientSession::new(10);
        let ticket = session.begin_start().unwrap();
        let effects = session.handle(Event::StartFinished {
            ticket,
            framework: "pytorch".to_string(),
            result: Err(CommandError::Conflict),
        });
        assert!(effects.is_empty());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.lifecycle().can_start());
        assert_eq!(
            session.notices(),
            &[Notice::warning("Training is already running")]
        );
    }

    #[test]
    fn test_switched_framework_tracked_after_success() {
        let mut session = ClientSession::new(10);
        session.handle(Event::CatalogLoaded(FrameworkCatalog {
            cluster_framework: "pytorch".to_string(),
            ..FrameworkCatalog::fallback()
        }));
        assert_eq!(session.cluster_framework(), Some("pytorch"));

        let ticket = session.begin_start().unwrap();
        assert_eq!(session.cluster_framework(), Some("pytorch"));

        session.handle(Event::StartFinished {
            ticket,
            framework: "sklearn".to_string(),
            result: Ok(StartReply {
                switched: true,
                ..StartReply::default()
            }),
        });
        assert_eq!(session.cluster_framework(), Some("sklearn"));
    }

    #[test]
    fn test_reset_clears_run_data() {
        let (mut session, epoch) = running_session();
        let mut snapshot = ClusterSnapshot::default();
        snapshot.current_run.run_id = Some("7".to_string());
        snapshot.current_run.rounds = vec![RoundResult {
            round_num: 1,
            loss: Some(0.3),
            ..RoundResult::default()
        }];
        session.handle(Event::SnapshotFetched(snapshot));
        session.handle(line(epoch, "round 1"));
        session.handle(complete(epoch));

        let effects = session.handle(Event::ResetRequested);
        assert!(effects.is_empty());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.log().is_empty());
        let run = &session.snapshot().unwrap().current_run;
        assert!(run.rounds.is_empty());
        assert!(!run.is_present());
    }

    #[test]
    fn test_stale_stream_events_dropped() {
        let (mut session, epoch) = running_session();
        session.handle(complete(epoch));
        session.handle(Event::ResetRequested);

        session.handle(line(epoch, "late line"));
        assert!(session.log().is_empty());
    }

    #[test]
    fn test_snapshot_failure_keeps_cache() {
        let mut session = ClientSession::new(10);
        let snapshot = ClusterSnapshot {
            connected_supernodes: 2,
            ..ClusterSnapshot::default()
        };
        session.handle(Event::SnapshotFetched(snapshot.clone()));
        session.handle(Event::SnapshotFailed("connection refused".to_string()));
        assert!(session.is_offline());
        assert_eq!(session.snapshot(), Some(&snapshot));

        session.handle(Event::SnapshotFetched(snapshot));
        assert!(!session.is_offline());
    }

    #[test]
    fn test_adopt_active_run() {
        let mut session = ClientSession::new(10);
        let effects = session.handle(Event::InitialStatus(StatusReply {
            active: true,
            ..StatusReply::default()
        }));
        assert_eq!(session.phase(), Phase::Running);
        assert_eq!(effects.len(), 2);
    }
}
