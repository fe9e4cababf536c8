mod args;
mod input;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use fedwatch_common::telemetry::init_tracing;
use fedwatch_common::{framework_label, FrameworkCatalog};
use fedwatch_session::{
    send_reset, send_start, send_stop, BackoffPolicy, CommandError, ControlPlane,
    HttpControlPlane, SessionConfig, StartParams, Supervisor, UserCommand,
};

use crate::args::{Args, Command, WatchArgs};
use crate::input::{read_commands, HELP};
use crate::output::{print_cluster, print_frameworks, print_upload_report, TerminalRenderer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let tracer_provider = init_tracing(
        "fedwatch",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let timeout = Duration::from_secs(args.timeout_secs.max(1));
    let api = HttpControlPlane::new(&args.server_url, args.token, timeout)?;
    let result = run(api, args.command, timeout).await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush spans: {e}");
        }
    }
    result
}

async fn run(api: HttpControlPlane, command: Command, timeout: Duration) -> Result<()> {
    match command {
        Command::Status => {
            let snapshot = api.snapshot().await?;
            print_cluster(&snapshot);
        }
        Command::Frameworks => {
            let catalog = api.frameworks().await?;
            print_frameworks(&catalog);
        }
        Command::Start(run) => {
            let catalog = load_catalog(&api).await;
            let config = match run.into_params().into_config(&catalog.run_defaults()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("✗ {}", e.user_message());
                    return Ok(());
                }
            };
            if let Some(current) = catalog.cluster_framework() {
                if current != config.framework {
                    println!(
                        "Switching workers to {}...",
                        framework_label(&config.framework)
                    );
                }
            }
            match send_start(&api, &config).await {
                Ok(reply) => {
                    println!(
                        "✓ Training started: {} with {}, {} rounds",
                        framework_label(&config.framework),
                        config.strategy,
                        config.num_rounds
                    );
                    if reply.switched {
                        println!("  workers switched to {}", framework_label(&config.framework));
                    }
                    if let Some(pid) = reply.pid {
                        println!("  pid {pid}");
                    }
                }
                Err(CommandError::Conflict) => {
                    println!("! {}", CommandError::Conflict.user_message());
                }
                Err(e) => eprintln!("✗ {}", e.user_message()),
            }
        }
        Command::Stop => match send_stop(&api).await {
            Ok(()) => println!("✓ Training stopped"),
            Err(e) => eprintln!("✗ {}", e.user_message()),
        },
        Command::Reset => {
            send_reset(&api).await;
            println!("✓ Run data cleared");
        }
        Command::Upload { path } => {
            let report = api.upload(&path).await?;
            print_upload_report(&report);
        }
        Command::Watch(watch) => watch_session(api, watch, timeout).await?,
    }
    Ok(())
}

async fn load_catalog(api: &HttpControlPlane) -> FrameworkCatalog {
    match api.frameworks().await {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!(error=%e, "framework catalog unavailable, using built-in list");
            FrameworkCatalog::fallback()
        }
    }
}

async fn watch_session(api: HttpControlPlane, watch: WatchArgs, timeout: Duration) -> Result<()> {
    let config = SessionConfig {
        snapshot_interval: Duration::from_secs(watch.snapshot_interval_secs.max(1)),
        status_interval: Duration::from_secs(watch.status_interval_secs.max(1)),
        request_timeout: timeout,
        log_capacity: watch.log_capacity,
        reconnect: BackoffPolicy {
            max_attempts: watch.max_reconnects,
            ..BackoffPolicy::default()
        },
    };
    println!("Watching {} (Ctrl-C to exit)", api.base_url());
    println!("{HELP}");

    let api: Arc<dyn ControlPlane> = Arc::new(api);
    let mut supervisor = Supervisor::new(config, api, TerminalRenderer::new());

    let shutdown = supervisor.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(16);
    if let Some(framework) = watch.start_framework {
        tx.send(UserCommand::Start(StartParams::new(framework)))
            .await?;
    }
    std::thread::spawn(move || read_commands(tx));

    supervisor.run(rx).await;
    println!("Session closed ({})", supervisor.session().phase());
    Ok(())
}
