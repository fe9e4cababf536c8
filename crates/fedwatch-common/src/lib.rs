pub mod catalog;
pub mod log_line;
pub mod snapshot;
pub mod training;
pub mod upload;

pub use catalog::{framework_label, FrameworkCatalog, RunDefaults};
pub use log_line::{LogKind, LogLine};
pub use snapshot::{ClusterSnapshot, ContainerStatus, CurrentRun, Node, NodeRole, RoundResult, RunStatus};
pub use training::{
    CompletedRun, ErrorDetail, ParseStrategyError, StartReply, StatusReply, Strategy,
    TrainingConfig,
};
pub use upload::{UploadNodeResult, UploadReport, MAX_UPLOAD_BYTES};

pub mod telemetry;
