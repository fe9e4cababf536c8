use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum NodeRole {
    Coordinator,
    #[default]
    Worker,
}

impl From<String> for NodeRole {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "coordinator" | "superlink" => NodeRole::Coordinator,
            _ => NodeRole::Worker,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ContainerStatus {
    Running,
    Stopped,
    #[default]
    Unknown,
}

impl From<String> for ContainerStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "stopped" | "exited" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// Run status as reported by the server. Distinct from the client-side
/// lifecycle phase, which also tracks connection ownership.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Idle,
        }
    }
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Node {
    #[serde(alias = "vm_id")]
    pub id: u64,
    pub name: String,
    pub role: NodeRole,
    pub ip: String,

    /// VM state, not the container.
    pub status: String,
    pub cpu: u32,
    pub memory_mb: u64,

    pub container_status: ContainerStatus,
    pub container_uptime: String,
    pub flower_version: String,
    pub framework: String,
}

impl Node {
    pub fn is_running(&self) -> bool {
        self.container_status == ContainerStatus::Running
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoundResult {
    pub round_num: u32,
    pub loss: Option<f64>,
    pub accuracy: Option<f64>,
    pub fit_clients: u32,
    pub fit_failures: u32,
    pub eval_clients: u32,
    pub eval_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CurrentRun {
    /// `None` when no run has been recorded.
    #[serde(deserialize_with = "empty_string_as_none")]
    pub run_id: Option<String>,
    pub status: RunStatus,
    #[serde(alias = "num_rounds_completed")]
    pub rounds_completed: u32,
    #[serde(alias = "num_rounds_configured")]
    pub rounds_configured: u32,
    #[serde(alias = "total_duration_s")]
    pub duration_s: f64,
    pub rounds: Vec<RoundResult>,
    #[serde(deserialize_with = "empty_map_as_none")]
    pub model_info: Option<Map<String, Value>>,
}

impl CurrentRun {
    pub fn is_present(&self) -> bool {
        self.run_id.is_some()
    }

    /// Loss of the latest round that reported one.
    pub fn final_loss(&self) -> Option<f64> {
        self.rounds.iter().rev().find_map(|r| r.loss)
    }
}

/// Full point-in-time view of the cluster, replaced wholesale on every poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub timestamp: Option<String>,
    pub nodes: Vec<Node>,
    pub current_run: CurrentRun,
    pub connected_supernodes: u32,
    pub superlink_ip: String,
}

impl ClusterSnapshot {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn running_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_running()).count()
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Coordinator)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Worker)
    }

    /// Framework the workers are currently provisioned with, if any reports one.
    pub fn worker_framework(&self) -> Option<&str> {
        self.workers()
            .map(|n| n.framework.as_str())
            .find(|fw| !fw.is_empty())
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

fn empty_map_as_none<'de, D>(deserializer: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|m| !m.is_empty()))
}
