use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use fedwatch_common::ClusterSnapshot;

use crate::api::ControlPlane;
use crate::config::SessionConfig;
use crate::dispatcher::{CommandDispatcher, StartParams};
use crate::lifecycle::{Effect, Phase};
use crate::poller::{SnapshotPoller, StatusPoller};
use crate::session::{ClientSession, Event, LogBuffer, Notice};
use crate::stream::LogStreamManager;

/// Consumes the merged session state after every handled event.
pub trait Renderer: Send {
    fn render(&mut self, view: &SessionView<'_>);
}

/// Which commands the user can issue right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub can_start: bool,
    pub can_stop: bool,
    pub can_reset: bool,
}

/// Read-only view of a session handed to renderers.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub phase: Phase,
    pub snapshot: Option<&'a ClusterSnapshot>,
    pub offline: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub log: &'a LogBuffer,
    /// Notices raised since the previous render.
    pub notices: &'a [Notice],
    pub cluster_framework: Option<&'a str>,
    pub controls: Controls,
}

impl<'a> SessionView<'a> {
    pub fn new(session: &'a ClientSession) -> Self {
        let lifecycle = session.lifecycle();
        Self {
            phase: session.phase(),
            snapshot: session.snapshot(),
            offline: session.is_offline(),
            last_updated: session.last_updated(),
            log: session.log(),
            notices: session.notices(),
            cluster_framework: session.cluster_framework(),
            controls: Controls {
                can_start: lifecycle.can_start(),
                can_stop: lifecycle.can_stop(),
                can_reset: lifecycle.can_reset(),
            },
        }
    }

    pub fn node_count(&self) -> usize {
        self.snapshot.map_or(0, |s| s.node_count())
    }

    pub fn running_nodes(&self) -> usize {
        self.snapshot.map_or(0, |s| s.running_nodes())
    }

    pub fn run_label(&self) -> &'static str {
        match self.snapshot.map(|s| &s.current_run) {
            Some(run) if run.is_present() => run.status.as_str(),
            _ => "no active run",
        }
    }

    /// `(completed, configured)` rounds of the snapshot's current run.
    pub fn round_progress(&self) -> Option<(u32, u32)> {
        let run = &self.snapshot?.current_run;
        run.is_present()
            .then_some((run.rounds_completed, run.rounds_configured))
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.snapshot?.current_run.final_loss()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Start(StartParams),
    Stop,
    Reset,
    Refresh,
    ClearLog,
    Quit,
}

enum Step {
    Shutdown,
    Command(Option<UserCommand>),
    Event(Option<Event>),
}

/// Owns a [`ClientSession`] and every resource acting on its behalf.
///
/// All state changes happen on the task calling [`Supervisor::run`]; pollers,
/// stream readers and requests only send events back to it.
pub struct Supervisor<R: Renderer> {
    config: SessionConfig,
    api: Arc<dyn ControlPlane>,
    session: ClientSession,
    renderer: R,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    dispatcher: CommandDispatcher,
    stream: LogStreamManager,
    status: StatusPoller,
    snapshots: Option<SnapshotPoller>,
    /// Set once the catalog request has answered or failed.
    catalog_ready: bool,
    deferred_start: Option<StartParams>,
    shutdown: CancellationToken,
}

impl<R: Renderer> Supervisor<R> {
    pub fn new(config: SessionConfig, api: Arc<dyn ControlPlane>, renderer: R) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session: ClientSession::new(config.log_capacity),
            dispatcher: CommandDispatcher::new(api.clone(), events_tx.clone()),
            stream: LogStreamManager::new(api.clone(), events_tx.clone(), config.reconnect),
            status: StatusPoller::new(api.clone(), config.status_interval, events_tx.clone()),
            snapshots: None,
            catalog_ready: false,
            deferred_start: None,
            shutdown: CancellationToken::new(),
            config,
            api,
            renderer,
            events_tx,
            events_rx,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Cancelling this token ends [`Supervisor::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Drive the session until `commands` closes, a quit is requested or the
    /// shutdown token fires. Resources are disposed before returning.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<UserCommand>) {
        tracing::info!("session started");
        self.snapshots = Some(SnapshotPoller::spawn(
            self.api.clone(),
            self.config.snapshot_interval,
            self.events_tx.clone(),
            self.shutdown.child_token(),
        ));
        self.probe_server();
        self.render();

        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Step::Shutdown,
                cmd = commands.recv() => Step::Command(cmd),
                event = self.events_rx.recv() => Step::Event(event),
            };
            match step {
                Step::Shutdown | Step::Command(None) | Step::Command(Some(UserCommand::Quit)) => {
                    break
                }
                Step::Command(Some(cmd)) => self.on_command(cmd),
                Step::Event(Some(event)) => self.on_event(event),
                // the supervisor holds a sender, so the channel never closes
                Step::Event(None) => break,
            }
            self.render();
        }

        self.dispose();
    }

    /// Stop every task acting for the session. Safe to call more than once.
    pub fn dispose(&mut self) {
        let closed = self.stream.close();
        let stopped = self.status.stop();
        let polling = self.snapshots.take().is_some();
        self.shutdown.cancel();
        if closed || stopped || polling {
            tracing::info!(phase = %self.session.phase(), "session disposed");
        }
    }

    fn probe_server(&self) {
        let api = self.api.clone();
        let events = self.events_tx.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                catalog = api.frameworks() => match catalog {
                    Ok(catalog) => {
                        let _ = events.send(Event::CatalogLoaded(catalog));
                    }
                    Err(e) => {
                        tracing::warn!(error=%e, "framework catalog unavailable, using built-in list");
                        let _ = events.send(Event::CatalogUnavailable);
                    }
                },
            }
        });

        let api = self.api.clone();
        let events = self.events_tx.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                status = api.training_status() => match status {
                    Ok(reply) => {
                        let _ = events.send(Event::InitialStatus(reply));
                    }
                    Err(e) => tracing::debug!(error=%e, "initial status probe failed"),
                },
            }
        });
    }

    fn on_command(&mut self, cmd: UserCommand) {
        tracing::debug!(?cmd, "user command");
        let result = match cmd {
            // run defaults and the worker framework come from the catalog
            UserCommand::Start(params) if !self.catalog_ready => {
                tracing::debug!("holding start until the framework catalog is known");
                self.deferred_start = Some(params);
                Ok(())
            }
            UserCommand::Start(params) => self.dispatcher.start(&mut self.session, params),
            UserCommand::Stop => self.dispatcher.stop(&mut self.session),
            UserCommand::Reset => self.dispatcher.reset(&self.session),
            UserCommand::Refresh => {
                if let Some(poller) = &self.snapshots {
                    poller.refresh_now();
                }
                Ok(())
            }
            UserCommand::ClearLog => {
                self.on_event(Event::ClearLog);
                Ok(())
            }
            UserCommand::Quit => Ok(()),
        };
        if let Err(err) = result {
            self.on_event(Event::Notice(Notice::from_command_error(&err)));
        }
    }

    fn on_event(&mut self, event: Event) {
        let catalog_resolved = matches!(event, Event::CatalogLoaded(_) | Event::CatalogUnavailable);
        for effect in self.session.handle(event) {
            self.execute(effect);
        }
        if catalog_resolved && !self.catalog_ready {
            self.catalog_ready = true;
            if let Some(params) = self.deferred_start.take() {
                self.on_command(UserCommand::Start(params));
            }
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenStream(epoch) => self.stream.open(epoch),
            Effect::CloseStream => {
                self.stream.close();
            }
            Effect::StartStatusPoller(epoch) => self.status.start(epoch),
            Effect::StopStatusPoller => {
                self.status.stop();
            }
            Effect::RefreshSnapshot => {
                if let Some(poller) = &self.snapshots {
                    poller.refresh_now();
                }
            }
            // applied by the session itself
            Effect::ClearRunData => {}
        }
    }

    fn render(&mut self) {
        let view = SessionView::new(&self.session);
        self.renderer.render(&view);
        self.session.take_notices();
    }
}
