use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fedwatch_common::Strategy;
use fedwatch_session::StartParams;

#[derive(Debug, Parser)]
#[command(name = "fedwatch")]
#[command(about = "Supervise federated training runs on a Flower cluster", long_about = None)]
pub struct Args {
    /// Dashboard server URL
    #[arg(
        long,
        env = "FEDWATCH_SERVER_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub server_url: String,

    /// API token (Authorization: Bearer)
    #[arg(long, env = "FEDWATCH_TOKEN")]
    pub token: Option<String>,

    /// OTLP/HTTP endpoint for span export
    #[arg(long, env = "FEDWATCH_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "FEDWATCH_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show cluster nodes and the current run
    Status,
    /// List frameworks and strategies the server can launch
    Frameworks,
    /// Start a training run
    Start(RunArgs),
    /// Stop the active training run
    Stop,
    /// Clear the last run on the server
    Reset,
    /// Upload a dataset to every worker
    Upload {
        /// File to send (500 MB max)
        path: PathBuf,
    },
    /// Follow the cluster, the run state and the training log
    Watch(WatchArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Framework to train with (pytorch, tensorflow, sklearn)
    #[arg(long)]
    pub framework: Option<String>,

    /// Server rounds (default from the server's project config)
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Aggregation strategy: FedAvg, FedProx or FedAdam
    #[arg(long, default_value = "FedAvg")]
    pub strategy: Strategy,

    #[arg(long)]
    pub epochs: Option<u32>,

    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Minimum fit/available clients
    #[arg(long)]
    pub min_clients: Option<u32>,

    /// FedProx proximal term
    #[arg(long)]
    pub proximal_mu: Option<f64>,

    /// FedAdam server learning rate
    #[arg(long)]
    pub server_lr: Option<f64>,

    /// FedAdam tau
    #[arg(long)]
    pub tau: Option<f64>,
}

impl RunArgs {
    pub fn into_params(self) -> StartParams {
        StartParams {
            framework: self.framework,
            num_rounds: self.rounds,
            strategy: self
                .strategy
                .with_proximal_mu(self.proximal_mu)
                .with_adam_params(self.server_lr, self.tau),
            local_epochs: self.epochs,
            batch_size: self.batch_size,
            min_clients: self.min_clients,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    /// Start a run with this framework as soon as the session is up
    #[arg(long)]
    pub start_framework: Option<String>,

    /// Seconds between cluster snapshots
    #[arg(long, default_value_t = 10)]
    pub snapshot_interval_secs: u64,

    /// Seconds between run status checks while training
    #[arg(long, default_value_t = 3)]
    pub status_interval_secs: u64,

    /// Log lines kept on screen
    #[arg(long, default_value_t = 500)]
    pub log_capacity: usize,

    /// Consecutive failed log reconnects before giving up
    #[arg(long, default_value_t = 8)]
    pub max_reconnects: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_args_to_params() {
        let args = Args::try_parse_from([
            "fedwatch",
            "start",
            "--framework",
            "pytorch",
            "--strategy",
            "fedprox",
            "--proximal-mu",
            "0.5",
            "--rounds",
            "5",
        ])
        .unwrap();
        let Command::Start(run) = args.command else {
            panic!("expected start");
        };
        let params = run.into_params();
        assert_eq!(params.framework.as_deref(), Some("pytorch"));
        assert_eq!(params.num_rounds, Some(5));
        assert_eq!(params.strategy, Strategy::FedProx { proximal_mu: 0.5 });
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let parsed = Args::try_parse_from(["fedwatch", "start", "--strategy", "fedsgd"]);
        assert!(parsed.is_err());
    }
}
