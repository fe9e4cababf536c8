use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const BUILTIN_FRAMEWORKS: [&str; 3] = ["pytorch", "tensorflow", "sklearn"];
pub const BUILTIN_STRATEGIES: [&str; 3] = ["FedAvg", "FedProx", "FedAdam"];

/// Human label for a framework id, falling back to the id itself.
pub fn framework_label(framework: &str) -> &str {
    match framework {
        "pytorch" => "PyTorch",
        "tensorflow" => "TensorFlow",
        "sklearn" => "scikit-learn",
        other => other,
    }
}

/// Frameworks and strategies the server can launch, with run defaults read
/// from the demo project's config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameworkCatalog {
    pub frameworks: Vec<String>,
    pub cluster_framework: String,
    pub strategies: Vec<String>,
    pub defaults: Map<String, Value>,
}

impl FrameworkCatalog {
    /// Used when the catalog endpoint is unreachable.
    pub fn fallback() -> Self {
        Self {
            frameworks: BUILTIN_FRAMEWORKS.iter().map(|s| s.to_string()).collect(),
            cluster_framework: String::new(),
            strategies: BUILTIN_STRATEGIES.iter().map(|s| s.to_string()).collect(),
            defaults: Map::new(),
        }
    }

    pub fn cluster_framework(&self) -> Option<&str> {
        Some(self.cluster_framework.as_str()).filter(|fw| !fw.is_empty())
    }

    pub fn run_defaults(&self) -> RunDefaults {
        let builtin = RunDefaults::default();
        let read = |key: &str| {
            self.defaults
                .get(key)
                .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
        };
        RunDefaults {
            num_rounds: read("num-server-rounds").unwrap_or(builtin.num_rounds),
            local_epochs: read("local-epochs").unwrap_or(builtin.local_epochs),
            batch_size: read("batch-size").unwrap_or(builtin.batch_size),
            min_clients: read("min-fit-clients").unwrap_or(builtin.min_clients),
        }
    }
}

/// Values used for any start parameter the user leaves unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDefaults {
    pub num_rounds: u32,
    pub local_epochs: u32,
    pub batch_size: u32,
    pub min_clients: u32,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            num_rounds: 3,
            local_epochs: 1,
            batch_size: 32,
            min_clients: 2,
        }
    }
}
