use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use fedwatch_common::{framework_label, RunDefaults, StartReply, Strategy, TrainingConfig};

use crate::api::{ControlPlane, RawReply};
use crate::error::{ApiError, CommandError, CommandKind};
use crate::session::{ClientSession, Event, Notice};

/// What the user asked to start. Unset fields fall back to the server's
/// run defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartParams {
    pub framework: Option<String>,
    pub num_rounds: Option<u32>,
    pub strategy: Strategy,
    pub local_epochs: Option<u32>,
    pub batch_size: Option<u32>,
    pub min_clients: Option<u32>,
}

impl StartParams {
    pub fn new(framework: impl Into<String>) -> Self {
        Self {
            framework: Some(framework.into()),
            ..Self::default()
        }
    }

    pub fn into_config(self, defaults: &RunDefaults) -> Result<TrainingConfig, CommandError> {
        let framework = self
            .framework
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| CommandError::Invalid("Select a framework first".to_string()))?;

        // zero means "use the default", as with an empty form field
        let pick = |value: Option<u32>, default: u32| value.filter(|v| *v > 0).unwrap_or(default);
        let min_clients = pick(self.min_clients, defaults.min_clients);

        Ok(TrainingConfig {
            framework,
            num_rounds: pick(self.num_rounds, defaults.num_rounds),
            strategy: self.strategy.name().to_string(),
            local_epochs: pick(self.local_epochs, defaults.local_epochs),
            batch_size: pick(self.batch_size, defaults.batch_size),
            min_fit_clients: min_clients,
            min_available_clients: min_clients,
            extra_config: self.strategy.extra_config(),
        })
    }
}

/// Map a start response onto its outcome. `409` means a run is already
/// active, which is reported apart from other failures.
pub fn interpret_start(reply: RawReply) -> Result<StartReply, CommandError> {
    if reply.status == 409 {
        return Err(CommandError::Conflict);
    }
    if !reply.is_success() {
        return Err(rejected(CommandKind::Start, &reply));
    }
    match serde_json::from_str(&reply.body) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            tracing::debug!(error=%e, "start reply body not understood, assuming no switch");
            Ok(StartReply::default())
        }
    }
}

pub fn interpret_stop(reply: RawReply) -> Result<(), CommandError> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(rejected(CommandKind::Stop, &reply))
    }
}

fn rejected(command: CommandKind, reply: &RawReply) -> CommandError {
    match ApiError::from_status(reply.status, &reply.body) {
        ApiError::Status { status, detail } => CommandError::Rejected {
            command,
            status,
            detail,
        },
        other => CommandError::Transport(other.to_string()),
    }
}

pub async fn send_start(
    api: &dyn ControlPlane,
    config: &TrainingConfig,
) -> Result<StartReply, CommandError> {
    let reply = api
        .start(config)
        .await
        .map_err(|e| CommandError::from_api(CommandKind::Start, e))?;
    interpret_start(reply)
}

pub async fn send_stop(api: &dyn ControlPlane) -> Result<(), CommandError> {
    let reply = api
        .stop()
        .await
        .map_err(|e| CommandError::from_api(CommandKind::Stop, e))?;
    interpret_stop(reply)
}

/// Best-effort: a failed reset is logged and otherwise ignored.
pub async fn send_reset(api: &dyn ControlPlane) {
    match api.reset().await {
        Ok(reply) if reply.is_success() => tracing::debug!("server acknowledged reset"),
        Ok(reply) => tracing::debug!(status = reply.status, "server refused reset, ignoring"),
        Err(e) => tracing::debug!(error=%e, "reset request failed, ignoring"),
    }
}

/// Turns user intent into server requests. Replies come back to the session
/// as events; nothing here changes lifecycle state directly.
pub struct CommandDispatcher {
    api: Arc<dyn ControlPlane>,
    events: UnboundedSender<Event>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn ControlPlane>, events: UnboundedSender<Event>) -> Self {
        Self { api, events }
    }

    /// Validate and send a start request. Fails without touching the network
    /// when no framework is selected or a start is already in flight.
    pub fn start(&self, session: &mut ClientSession, params: StartParams) -> Result<(), CommandError> {
        if session.phase().is_terminal() {
            return Err(CommandError::Invalid(
                "Reset the finished run before starting another".to_string(),
            ));
        }
        if !session.lifecycle().can_start() {
            return Err(CommandError::Busy);
        }
        let config = params.into_config(&session.catalog().run_defaults())?;
        let ticket = session.begin_start()?;

        if let Some(current) = session.cluster_framework() {
            if current != config.framework {
                let _ = self.events.send(Event::Notice(Notice::info(format!(
                    "Switching workers to {}...",
                    framework_label(&config.framework)
                ))));
            }
        }

        tracing::info!(
            ticket = ticket.0,
            framework = %config.framework,
            strategy = %config.strategy,
            rounds = config.num_rounds,
            "sending start request"
        );
        let api = self.api.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = send_start(api.as_ref(), &config).await;
            let _ = events.send(Event::StartFinished {
                ticket,
                framework: config.framework,
                result,
            });
        });
        Ok(())
    }

    pub fn stop(&self, session: &mut ClientSession) -> Result<(), CommandError> {
        let epoch = session.begin_stop()?;
        tracing::info!(epoch = epoch.0, "sending stop request");

        let api = self.api.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = send_stop(api.as_ref()).await;
            let _ = events.send(Event::StopFinished { epoch, result });
        });
        Ok(())
    }

    /// Tell the server to forget the last run and clear local run data. The
    /// local clear does not wait for, or depend on, the server.
    pub fn reset(&self, session: &ClientSession) -> Result<(), CommandError> {
        if !session.lifecycle().can_reset() {
            return Err(CommandError::Invalid(
                "Stop the active run before resetting".to_string(),
            ));
        }
        let api = self.api.clone();
        tokio::spawn(async move { send_reset(api.as_ref()).await });
        let _ = self.events.send(Event::ResetRequested);
        Ok(())
    }
}
