use std::fmt;

use fedwatch_common::ErrorDetail;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}{}", detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Status { status: u16, detail: Option<String> },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("file exceeds the {limit_mb} MB upload limit ({size} bytes)")]
    TooLarge { size: u64, limit_mb: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<ErrorDetail>(body)
            .ok()
            .and_then(|d| d.message());
        ApiError::Status { status, detail }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
        })
    }
}

/// Outcome of a user command that did not go through.
///
/// `Display` is the text shown to the user: server-provided detail verbatim
/// when present, otherwise a generic message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Rejected locally, nothing was sent.
    #[error("{0}")]
    Invalid(String),

    #[error("Training is already starting or running")]
    Busy,

    #[error("Training is already running")]
    Conflict,

    #[error("{}", detail.clone().unwrap_or_else(|| format!("Failed to {command} training")))]
    Rejected {
        command: CommandKind,
        status: u16,
        detail: Option<String>,
    },

    #[error("Connection error: {0}")]
    Transport(String),
}

impl CommandError {
    /// Conflicts and local refusals are informational rather than failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, CommandError::Conflict | CommandError::Busy)
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub(crate) fn from_api(command: CommandKind, err: ApiError) -> Self {
        match err {
            ApiError::Status { status, detail } => CommandError::Rejected {
                command,
                status,
                detail,
            },
            other => CommandError::Transport(other.to_string()),
        }
    }
}
