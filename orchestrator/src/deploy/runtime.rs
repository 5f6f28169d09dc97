//! Container runtime seam

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::deploy::stream::LineSink;
use crate::errors::{OrchestratorError, Result};

/// Label marking the main container of an Arduino App
pub const APP_LABEL: &str = "cc.arduino.app";
/// Label holding the absolute path of the app a container belongs to
pub const APP_PATH_LABEL: &str = "cc.arduino.app.path";

/// Container states reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub const ALL: [ContainerState; 7] = [
        ContainerState::Created,
        ContainerState::Running,
        ContainerState::Paused,
        ContainerState::Restarting,
        ContainerState::Removing,
        ContainerState::Exited,
        ContainerState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        }
    }
}

impl FromStr for ContainerState {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        ContainerState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrchestratorError::RuntimeOperationFailed(format!("unknown container state {:?}", s))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub state: ContainerState,
    /// Value of [`APP_PATH_LABEL`]
    pub app_path: Option<PathBuf>,
}

/// Files making up a generated compose project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub main_file: PathBuf,
    pub override_file: Option<PathBuf>,
}

impl ComposeProject {
    pub fn new(main_file: impl Into<PathBuf>) -> Self {
        Self {
            main_file: main_file.into(),
            override_file: None,
        }
    }

    /// `-f` arguments in precedence order
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.main_file.as_path()).chain(self.override_file.as_deref())
    }
}

/// One-shot container that runs to completion and is removed afterwards
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub user: Option<String>,
    /// `host:container` bind mounts
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub follow: bool,
    pub tail: Option<u64>,
    /// Restrict to these services; all services when empty
    pub services: Vec<String>,
}

/// Operations the orchestrator needs from the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, any state, carrying [`APP_LABEL`]
    async fn list_app_containers(&self, cancel: &CancellationToken) -> Result<Vec<ContainerSummary>>;

    /// `repository:tag` references of images present locally
    async fn list_images(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    async fn pull_image(&self, image: &str, sink: &dyn LineSink, cancel: &CancellationToken) -> Result<()>;

    /// Create, start and wait for a container, removing it afterwards
    async fn run_container(&self, spec: &RunSpec, sink: &dyn LineSink, cancel: &CancellationToken) -> Result<()>;

    /// `compose config --services`
    async fn compose_services(&self, project: &ComposeProject, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// `compose up -d --remove-orphans`, with extra environment variables
    async fn compose_up(
        &self,
        project: &ComposeProject,
        env: &BTreeMap<String, String>,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn compose_stop(
        &self,
        project: &ComposeProject,
        timeout_secs: u64,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn compose_logs(
        &self,
        project: &ComposeProject,
        options: &LogsOptions,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
