pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod poller;
pub mod session;
pub mod sse;
pub mod stream;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ControlPlane, HttpControlPlane, LogEventStream, RawReply};
pub use config::{BackoffPolicy, SessionConfig};
pub use dispatcher::{send_reset, send_start, send_stop, CommandDispatcher, StartParams};
pub use error::{ApiError, CommandError, CommandKind};
pub use lifecycle::{Effect, Epoch, Lifecycle, Phase, Ticket};
pub use session::{ClientSession, Event, LogBuffer, Notice, NoticeLevel};
pub use sse::StreamEvent;
pub use supervisor::{Controls, Renderer, SessionView, Supervisor, UserCommand};
