//! Arduino App Orchestrator - Entry Point
//!
//! Provisions, starts, stops and inspects Arduino Apps on the board.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use app_orchestrator::app::options::OrchestratorOptions;
use app_orchestrator::app::run::run;
use app_orchestrator::app::state::AppState;
use app_orchestrator::apps::manager::ListAppsRequest;
use app_orchestrator::deploy::logs::{app_logs, AppLogsRequest, LogMessage};
use app_orchestrator::deploy::status::AppStatus;
use app_orchestrator::deploy::stream::{OperationStream, StreamMessage};
use app_orchestrator::logs::init_logging;
use app_orchestrator::storage::layout::StorageLayout;
use app_orchestrator::utils::version_info;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to serialize version: {e}"),
        }
        return;
    }

    if let Err(e) = run_cli(&cli_args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    let layout = StorageLayout::from_env()?;
    let options = OrchestratorOptions::load(layout).await?;

    // Initialize logging; the guard flushes the log file on exit
    let mut log_options = options.logs.clone();
    if !cli_args.contains_key("daemon") {
        log_options.stdout = false;
    }
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let state = Arc::new(AppState::init(&options).await?);
    let cancel = CancellationToken::new();

    if cli_args.contains_key("daemon") {
        info!("Running orchestrator with options: {:?}", options);
        let (status_tx, mut status_rx) = mpsc::channel::<AppStatus>(32);
        let printer = tokio::spawn(async move {
            while let Some(change) = status_rx.recv().await {
                let event = serde_json::json!({
                    "time": chrono::Utc::now().to_rfc3339(),
                    "id": change.id.to_string(),
                    "status": change.status,
                });
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
        });
        run(options, state, status_tx, await_shutdown_signal()).await?;
        let _ = printer.await;
        return Ok(());
    }

    if cli_args.contains_key("list") {
        let req = ListAppsRequest {
            show_apps: true,
            show_examples: true,
            ..Default::default()
        };
        let result = state.apps.list(&req, &cancel).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if cli_args.contains_key("status") {
        let snapshot = state.lifecycle.status_reporter().snapshot(&cancel).await?;
        let mut statuses: Vec<_> = snapshot.into_iter().collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, status) in statuses {
            println!("{}\t{}", id, status);
        }
        return Ok(());
    }

    if let Some(input) = cli_args.get("logs") {
        let app = state.apps.resolve(input).await?;
        let (tx, mut rx) = mpsc::channel::<LogMessage>(64);
        let printer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                println!("[{}] {}", message.name, message.content);
            }
        });
        let req = AppLogsRequest {
            show_services_logs: true,
            ..Default::default()
        };
        app_logs(&state.lifecycle, &app, &req, tx, &cancel).await?;
        let _ = printer.await;
        return Ok(());
    }

    if let Some(input) = cli_args.get("provision") {
        let app = state.apps.resolve(input).await?;
        return drain(state.lifecycle.provision_stream(app)).await;
    }
    if let Some(input) = cli_args.get("start") {
        let app = state.apps.resolve(input).await?;
        return drain(state.lifecycle.start(app)).await;
    }
    if let Some(input) = cli_args.get("stop") {
        let app = state.apps.resolve(input).await?;
        return drain(state.lifecycle.stop(app)).await;
    }
    if let Some(input) = cli_args.get("restart") {
        let app = state.apps.resolve(input).await?;
        return drain(state.lifecycle.restart(app)).await;
    }
    if let Some(input) = cli_args.get("delete") {
        let app = state.apps.resolve(input).await?;
        state.lifecycle.delete(app).await?;
        println!("deleted {}", input);
        return Ok(());
    }

    anyhow::bail!(
        "usage: app-orchestrator [--version | --daemon | --list | --status | \
         --start=<app> | --stop=<app> | --restart=<app> | --provision=<app> | \
         --delete=<app> | --logs=<app>]"
    )
}

/// Print an operation's messages until it ends; Ctrl+C cancels it
async fn drain(mut stream: OperationStream) -> anyhow::Result<()> {
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = tokio::signal::ctrl_c() => {
                stream.cancel();
                continue;
            }
        };
        match message {
            Some(StreamMessage::Progress(p)) => println!("{}: {:.0}%", p.name, p.progress),
            Some(StreamMessage::Info(line)) => println!("{}", line),
            Some(StreamMessage::Error(e)) => return Err(e.into()),
            None => return Ok(()),
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
