use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::ControlPlane;
use crate::config::BackoffPolicy;
use crate::lifecycle::Epoch;
use crate::session::Event;
use crate::sse::StreamEvent;

struct Connection {
    epoch: Epoch,
    _guard: DropGuard,
}

/// Owns at most one log stream connection at a time.
pub struct LogStreamManager {
    api: Arc<dyn ControlPlane>,
    events: UnboundedSender<Event>,
    policy: BackoffPolicy,
    conn: Option<Connection>,
}

impl LogStreamManager {
    pub fn new(
        api: Arc<dyn ControlPlane>,
        events: UnboundedSender<Event>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            api,
            events,
            policy,
            conn: None,
        }
    }

    /// Connect for `epoch`, replacing any connection already open.
    pub fn open(&mut self, epoch: Epoch) {
        self.close();

        let cancel = CancellationToken::new();
        tokio::spawn(read_log(
            self.api.clone(),
            epoch,
            self.policy,
            self.events.clone(),
            cancel.clone(),
        ));
        tracing::debug!(epoch = epoch.0, "log stream opened");
        self.conn = Some(Connection {
            epoch,
            _guard: cancel.drop_guard(),
        });
    }

    /// Idempotent. Returns whether a connection was actually closed.
    pub fn close(&mut self) -> bool {
        match self.conn.take() {
            Some(conn) => {
                tracing::debug!(epoch = conn.epoch.0, "log stream closed");
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

async fn read_log(
    api: Arc<dyn ControlPlane>,
    epoch: Epoch,
    policy: BackoffPolicy,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = api.open_log() => opened,
        };

        match opened {
            Ok(mut stream) => loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        failures = 0;
                        let done = event == StreamEvent::Complete;
                        if events.send(Event::Stream { epoch, event }).is_err() || done {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error=%e, "log stream error, reconnecting");
                        break;
                    }
                    None => {
                        tracing::warn!("log stream ended before completion, reconnecting");
                        break;
                    }
                }
            },
            Err(e) => {
                tracing::warn!(error=%e, attempt = failures + 1, "failed to open log stream");
            }
        }

        let Some(delay) = policy.delay(failures) else {
            tracing::warn!(attempts = failures, "giving up on log stream");
            let _ = events.send(Event::StreamLost { epoch });
            return;
        };
        failures += 1;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
