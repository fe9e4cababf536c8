//! Client-side training lifecycle.
//!
//! The lifecycle tracks local intent and resource ownership, not just what the
//! server reports. While `Starting` or `Running` the session owns exactly one
//! log stream and one status poller, both tagged with the current [`Epoch`];
//! leaving those phases releases both, exactly once.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl Phase {
    /// Phases that own the log stream and the status poller.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Starting | Phase::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation of the resources owned by one active period. Stream and status
/// results carry the epoch they were started under; results from an older
/// epoch are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

/// Identifies one in-flight start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    StartAccepted(Ticket),
    StartFailed(Ticket),
    StopAccepted(Epoch),
    StopFailed(Epoch),
    /// A log line arrived on the stream.
    StreamActivity(Epoch),
    StreamComplete(Epoch),
    StatusActive(Epoch),
    StatusInactive { epoch: Epoch, failed: bool },
    /// The server already has a run in progress when the session comes up.
    Adopt,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenStream(Epoch),
    CloseStream,
    StartStatusPoller(Epoch),
    StopStatusPoller,
    RefreshSnapshot,
    ClearRunData,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    phase: Phase,
    epoch: Epoch,
    pending_start: Option<Ticket>,
    pending_stop: Option<Epoch>,
    next_ticket: u64,
}

impl Lifecycle {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn pending_start(&self) -> Option<Ticket> {
        self.pending_start
    }

    pub fn can_start(&self) -> bool {
        self.phase == Phase::Idle && self.pending_start.is_none()
    }

    pub fn can_stop(&self) -> bool {
        self.phase.is_active() && self.pending_stop.is_none()
    }

    pub fn can_reset(&self) -> bool {
        !self.phase.is_active()
    }

    /// Register an outgoing start request. Returns `None` when a start is
    /// already in flight or the phase does not allow one.
    pub fn begin_start(&mut self) -> Option<Ticket> {
        if !self.can_start() {
            return None;
        }
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.pending_start = Some(ticket);
        Some(ticket)
    }

    /// Register an outgoing stop request for the current epoch.
    pub fn begin_stop(&mut self) -> Option<Epoch> {
        if !self.can_stop() {
            return None;
        }
        self.pending_stop = Some(self.epoch);
        Some(self.epoch)
    }

    pub fn apply(&mut self, signal: Signal) -> Vec<Effect> {
        match signal {
            Signal::StartAccepted(ticket) => {
                if self.pending_start != Some(ticket) || self.phase != Phase::Idle {
                    tracing::debug!(ticket = ticket.0, "ignoring stale start acceptance");
                    return Vec::new();
                }
                self.pending_start = None;
                self.enter_active(Phase::Starting)
            }
            Signal::StartFailed(ticket) => {
                if self.pending_start == Some(ticket) {
                    self.pending_start = None;
                }
                Vec::new()
            }
            Signal::StopAccepted(epoch) => {
                if self.pending_stop == Some(epoch) {
                    self.pending_stop = None;
                }
                if !self.owns(epoch) {
                    return Vec::new();
                }
                self.leave_active(Phase::Stopped, false)
            }
            Signal::StopFailed(epoch) => {
                if self.pending_stop == Some(epoch) {
                    self.pending_stop = None;
                }
                Vec::new()
            }
            Signal::StreamActivity(epoch) | Signal::StatusActive(epoch) => {
                if self.owns(epoch) && self.phase == Phase::Starting {
                    self.set_phase(Phase::Running);
                }
                Vec::new()
            }
            Signal::StreamComplete(epoch) => {
                if !self.owns(epoch) {
                    return Vec::new();
                }
                self.leave_active(Phase::Completed, true)
            }
            Signal::StatusInactive { epoch, failed } => {
                if !self.owns(epoch) {
                    return Vec::new();
                }
                let next = if failed { Phase::Failed } else { Phase::Completed };
                self.leave_active(next, true)
            }
            Signal::Adopt => {
                if !self.can_start() {
                    return Vec::new();
                }
                self.enter_active(Phase::Running)
            }
            Signal::Reset => {
                if !self.can_reset() {
                    return Vec::new();
                }
                // A start still in flight keeps its ticket: the server may
                // already have launched the run its reply reports.
                self.pending_stop = None;
                self.set_phase(Phase::Idle);
                vec![Effect::ClearRunData]
            }
        }
    }

    fn owns(&self, epoch: Epoch) -> bool {
        self.phase.is_active() && epoch == self.epoch
    }

    fn enter_active(&mut self, phase: Phase) -> Vec<Effect> {
        self.epoch = Epoch(self.epoch.0 + 1);
        self.set_phase(phase);
        vec![
            Effect::OpenStream(self.epoch),
            Effect::StartStatusPoller(self.epoch),
        ]
    }

    fn leave_active(&mut self, phase: Phase, refresh: bool) -> Vec<Effect> {
        self.set_phase(phase);
        let mut effects = vec![Effect::CloseStream, Effect::StopStatusPoller];
        if refresh {
            effects.push(Effect::RefreshSnapshot);
        }
        effects
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::info!(from = %self.phase, to = %phase, epoch = self.epoch.0, "lifecycle transition");
            self.phase = phase;
        }
    }
}
