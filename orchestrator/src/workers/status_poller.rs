//! Polling worker for app status changes

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::apps::id::AppId;
use crate::deploy::lifecycle::Lifecycle;
use crate::deploy::status::{AppStatus, Status};

/// Status poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Last status seen per app
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: HashMap<AppId, Status>,
}

impl StatusTracker {
    /// Record `snapshot` and return what changed since the previous one. Apps
    /// that disappeared from the runtime are reported stopped.
    pub fn diff(&mut self, snapshot: HashMap<AppId, Status>) -> Vec<AppStatus> {
        let mut changes: Vec<AppStatus> = snapshot
            .iter()
            .filter(|(id, status)| self.last.get(*id) != Some(*status))
            .map(|(id, status)| AppStatus {
                id: id.clone(),
                status: *status,
            })
            .collect();

        changes.extend(
            self.last
                .iter()
                .filter(|(id, status)| **status != Status::Stopped && !snapshot.contains_key(*id))
                .map(|(id, _)| AppStatus {
                    id: id.clone(),
                    status: Status::Stopped,
                }),
        );
        changes.sort_by(|a, b| a.id.cmp(&b.id));

        self.last = snapshot;
        changes
    }
}

/// Run the status poller until shutdown or until the receiver goes away
pub async fn run<S, F>(
    options: &Options,
    lifecycle: &Lifecycle,
    changes: mpsc::Sender<AppStatus>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Status poller starting...");

    let mut tracker = StatusTracker::default();
    let cancel = CancellationToken::new();
    let mut delay = options.initial_delay;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Status poller shutting down...");
                cancel.cancel();
                return;
            }
            _ = sleep_fn(delay) => {}
        }
        delay = options.interval;

        debug!("Polling app status...");
        let snapshot = match lifecycle.status_reporter().snapshot(&cancel).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Status poll failed: {}", e);
                continue;
            }
        };

        for change in tracker.diff(snapshot) {
            info!(app = %change.id, status = %change.status, "app status changed");
            if changes.send(change).await.is_err() {
                info!("Status receiver closed, poller exiting...");
                return;
            }
        }
    }
}
