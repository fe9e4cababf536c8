use serde::{Deserialize, Serialize};

/// Largest dataset the server accepts.
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadReport {
    pub filename: Option<String>,
    pub size_bytes: Option<u64>,
    pub nodes: Vec<UploadNodeResult>,
}

impl UploadReport {
    pub fn failures(&self) -> usize {
        self.nodes.iter().filter(|n| !n.success).count()
    }
}

/// Per-worker copy result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadNodeResult {
    pub node: Option<String>,
    pub ip: Option<String>,
    pub success: bool,
    pub message: Option<String>,
}

impl UploadNodeResult {
    pub fn label(&self) -> &str {
        self.node
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or("?")
    }
}
