//! Daemon run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::options::OrchestratorOptions;
use crate::app::state::AppState;
use crate::deploy::status::AppStatus;
use crate::errors::{OrchestratorError, Result};
use crate::workers::status_poller;

/// Run the orchestrator daemon until `shutdown_signal` resolves. Status
/// changes are sent on `status_tx`.
pub async fn run(
    options: OrchestratorOptions,
    state: Arc<AppState>,
    status_tx: mpsc::Sender<AppStatus>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!("Starting orchestrator daemon...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    if let Err(e) = init(&options, state, status_tx, &shutdown_tx, &mut shutdown_manager) {
        error!("Failed to start daemon: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

fn init(
    options: &OrchestratorOptions,
    state: Arc<AppState>,
    status_tx: mpsc::Sender<AppStatus>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<()> {
    init_status_poller(
        options.status_poller.clone(),
        state.clone(),
        status_tx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.start_default_app {
        init_default_app(state, shutdown_manager, shutdown_tx.subscribe())?;
    }
    Ok(())
}

fn init_status_poller(
    options: status_poller::Options,
    state: Arc<AppState>,
    status_tx: mpsc::Sender<AppStatus>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    info!("Initializing status poller...");

    let handle = tokio::spawn(async move {
        status_poller::run(
            &options,
            &state.lifecycle,
            status_tx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_status_poller_handle(handle)
}

/// Start the default app in the background; shutdown cancels a start still
/// in progress
fn init_default_app(
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let handle = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        tokio::select! {
            result = state.apps.start_default_app(&cancel) => {
                if let Err(e) = result {
                    error!("Failed to start default app: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                cancel.cancel();
                info!("Default app start interrupted by shutdown");
            }
        }
    });

    shutdown_manager.with_default_app_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    status_poller_handle: Option<JoinHandle<()>>,
    default_app_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            status_poller_handle: None,
            default_app_handle: None,
        }
    }

    fn with_status_poller_handle(&mut self, handle: JoinHandle<()>) -> Result<()> {
        if self.status_poller_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "status_poller_handle already set".to_string(),
            ));
        }
        self.status_poller_handle = Some(handle);
        Ok(())
    }

    fn with_default_app_handle(&mut self, handle: JoinHandle<()>) -> Result<()> {
        if self.default_app_handle.is_some() {
            return Err(OrchestratorError::ShutdownError(
                "default_app_handle already set".to_string(),
            ));
        }
        self.default_app_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::ShutdownError(format!(
                "shutdown timed out after {:?}",
                self.max_shutdown_delay
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<()> {
        info!("Shutting down orchestrator...");

        // 1. Default app start
        if let Some(handle) = self.default_app_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))?;
        }

        // 2. Status poller
        if let Some(handle) = self.status_poller_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
