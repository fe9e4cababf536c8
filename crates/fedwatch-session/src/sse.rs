use fedwatch_common::{LogKind, LogLine};
use serde::Deserialize;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines (and UTF-8
/// sequences) anywhere; only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.feed_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // keep-alive comment
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Event delivered by the training log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(LogLine),
    /// Terminal event: the run has finished and the server closes the stream.
    Complete,
}

impl StreamEvent {
    /// Named events other than `complete` are not part of the log protocol
    /// and yield `None`.
    pub fn from_frame(frame: SseFrame) -> Option<Self> {
        match frame.event.as_deref() {
            Some("complete") => Some(StreamEvent::Complete),
            None | Some("message") => Some(StreamEvent::Line(parse_line(&frame.data))),
            Some(other) => {
                tracing::debug!(event = other, "ignoring unknown stream event");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct LinePayload {
    line: Option<String>,
    kind: Option<LogKind>,
}

/// Structured `{"line": ...}` payloads are unwrapped; anything else is shown
/// as raw text so no message is ever dropped.
fn parse_line(data: &str) -> LogLine {
    match serde_json::from_str::<LinePayload>(data) {
        Ok(LinePayload {
            line: Some(text),
            kind: Some(kind),
        }) => LogLine::tagged(text, kind),
        Ok(LinePayload {
            line: Some(text),
            kind: None,
        }) => LogLine::new(text),
        _ => LogLine::new(data),
    }
}
