//! App status derived from container states

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::apps::id::{AppId, AppIdResolver};
use crate::deploy::runtime::{ContainerRuntime, ContainerState};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ContainerState> for Status {
    fn from(state: ContainerState) -> Self {
        match state {
            ContainerState::Running => Status::Running,
            ContainerState::Restarting => Status::Starting,
            ContainerState::Removing => Status::Stopping,
            ContainerState::Created | ContainerState::Exited | ContainerState::Paused => Status::Stopped,
            ContainerState::Dead => Status::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStatus {
    pub id: AppId,
    pub status: Status,
}

/// Stateless view over the runtime's labelled containers
#[derive(Clone, Copy)]
pub struct StatusReporter<'a> {
    runtime: &'a dyn ContainerRuntime,
    resolver: &'a AppIdResolver,
}

impl<'a> StatusReporter<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, resolver: &'a AppIdResolver) -> Self {
        Self { runtime, resolver }
    }

    /// Status of every app that has a container, keyed by app
    pub async fn snapshot(&self, cancel: &CancellationToken) -> Result<HashMap<AppId, Status>> {
        let mut statuses = HashMap::new();
        for container in self.runtime.list_app_containers(cancel).await? {
            let Some(path) = container.app_path else {
                debug!(container = %container.id, "container without app path label");
                continue;
            };
            match self.resolver.from_path(&path) {
                // one container per app; the first one wins
                Ok(id) => {
                    statuses.entry(id).or_insert_with(|| Status::from(container.state));
                }
                Err(e) => debug!(container = %container.id, "ignoring container: {}", e),
            }
        }
        Ok(statuses)
    }

    /// Status of each requested app, stopped when it has no container
    pub async fn status(&self, apps: &[AppId], cancel: &CancellationToken) -> Result<Vec<AppStatus>> {
        let snapshot = self.snapshot(cancel).await?;
        Ok(apps
            .iter()
            .map(|id| AppStatus {
                id: id.clone(),
                status: snapshot.get(id).copied().unwrap_or(Status::Stopped),
            })
            .collect())
    }

    pub async fn status_of(&self, app: &AppId, cancel: &CancellationToken) -> Result<Status> {
        Ok(self
            .snapshot(cancel)
            .await?
            .remove(app)
            .unwrap_or(Status::Stopped))
    }
}
