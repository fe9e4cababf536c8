use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_PROXIMAL_MU: f64 = 1.0;
pub const DEFAULT_SERVER_LR: f64 = 0.01;
pub const DEFAULT_TAU: f64 = 0.1;

/// Aggregation strategy together with its strategy-specific parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Strategy {
    #[default]
    FedAvg,
    FedProx { proximal_mu: f64 },
    FedAdam { server_lr: f64, tau: f64 },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FedAvg => "FedAvg",
            Strategy::FedProx { .. } => "FedProx",
            Strategy::FedAdam { .. } => "FedAdam",
        }
    }

    /// Overrides passed through to the run config, keyed the way the
    /// server app reads them.
    pub fn extra_config(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        match self {
            Strategy::FedAvg => {}
            Strategy::FedProx { proximal_mu } => {
                extra.insert("proximal-mu".to_string(), Value::from(*proximal_mu));
            }
            Strategy::FedAdam { server_lr, tau } => {
                extra.insert("server-lr".to_string(), Value::from(*server_lr));
                extra.insert("tau".to_string(), Value::from(*tau));
            }
        }
        extra
    }

    pub fn with_proximal_mu(self, mu: Option<f64>) -> Self {
        match (self, mu) {
            (Strategy::FedProx { .. }, Some(proximal_mu)) => Strategy::FedProx { proximal_mu },
            (other, _) => other,
        }
    }

    pub fn with_adam_params(self, server_lr: Option<f64>, tau: Option<f64>) -> Self {
        match self {
            Strategy::FedAdam {
                server_lr: lr,
                tau: t,
            } => Strategy::FedAdam {
                server_lr: server_lr.unwrap_or(lr),
                tau: tau.unwrap_or(t),
            },
            other => other,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy '{0}' (expected FedAvg, FedProx or FedAdam)")]
pub struct ParseStrategyError(pub String);

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fedavg" => Ok(Strategy::FedAvg),
            "fedprox" => Ok(Strategy::FedProx {
                proximal_mu: DEFAULT_PROXIMAL_MU,
            }),
            "fedadam" => Ok(Strategy::FedAdam {
                server_lr: DEFAULT_SERVER_LR,
                tau: DEFAULT_TAU,
            }),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

/// Body of the start request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub framework: String,
    pub num_rounds: u32,
    pub strategy: String,
    pub local_epochs: u32,
    pub batch_size: u32,
    pub min_fit_clients: u32,
    pub min_available_clients: u32,
    #[serde(default)]
    pub extra_config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub framework: Option<String>,

    /// Set when the workers had to be re-provisioned for another framework.
    #[serde(default)]
    pub switched: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletedRun {
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub duration_s: f64,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub last_lines: Vec<String>,
}

impl CompletedRun {
    pub fn failed(&self) -> bool {
        self.exit_code.is_some_and(|code| code != 0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusReply {
    pub active: bool,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub elapsed_s: Option<f64>,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub last_completed: Option<CompletedRun>,
}

impl StatusReply {
    pub fn exit_code(&self) -> Option<i32> {
        self.last_completed.as_ref().and_then(|c| c.exit_code)
    }
}

/// Error body returned with non-2xx responses. `detail` is a plain string for
/// application errors and a list of objects for request validation errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorDetail {
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.join("; "))
                }
            }
            Value::Null | Value::String(_) => None,
            other => Some(other.to_string()),
        }
    }
}
