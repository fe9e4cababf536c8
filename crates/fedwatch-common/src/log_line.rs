use serde::{Deserialize, Serialize};

pub const COMPLETION_MARKER: &str = "--- Training complete ---";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    #[default]
    Info,
    Error,
    Success,
}

/// One line of training output as shown in the display log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub kind: LogKind,
}

impl LogLine {
    /// Untagged output line; the kind is inferred from its text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = Self::classify(&text);
        Self { text, kind }
    }

    pub fn tagged(text: impl Into<String>, kind: LogKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn completion_marker() -> Self {
        Self::tagged(COMPLETION_MARKER, LogKind::Success)
    }

    /// Error keywords take precedence over success keywords.
    pub fn classify(text: &str) -> LogKind {
        let lower = text.to_ascii_lowercase();
        if ["error", "exception", "traceback"]
            .iter()
            .any(|p| lower.contains(p))
        {
            LogKind::Error
        } else if ["complete", "finished", "done"]
            .iter()
            .any(|p| lower.contains(p))
        {
            LogKind::Success
        } else {
            LogKind::Info
        }
    }
}
