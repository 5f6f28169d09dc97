//! Docker CLI container runtime

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::process;
use crate::deploy::runtime::{
    ComposeProject, ContainerRuntime, ContainerState, ContainerSummary, LogsOptions, RunSpec,
    APP_LABEL, APP_PATH_LABEL,
};
use crate::deploy::stream::LineSink;
use crate::errors::{OrchestratorError, Result};
use crate::utils::{calc_exp_backoff, CooldownOptions};

const RATE_LIMITED: &str = "toomanyrequests";

/// Drives the `docker` binary (and its `compose` plugin)
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
    pull_cooldown: CooldownOptions,
    max_pull_attempts: u32,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
            pull_cooldown: CooldownOptions::default(),
            max_pull_attempts: 5,
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Default::default()
        }
    }

    pub fn with_pull_retries(mut self, cooldown: CooldownOptions, max_attempts: u32) -> Self {
        self.pull_cooldown = cooldown;
        self.max_pull_attempts = max_attempts.max(1);
        self
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn compose(&self, project: &ComposeProject) -> Command {
        let mut cmd = self.command();
        cmd.arg("compose");
        for file in project.files() {
            cmd.arg("-f").arg(file);
        }
        cmd
    }

    async fn force_remove(&self, name: &str) {
        let mut cmd = self.command();
        cmd.args(["rm", "-f", name]);
        // the caller's token is already canceled
        if let Err(e) = process::run_captured(cmd, &CancellationToken::new()).await {
            warn!(container = name, "failed to remove container: {}", e);
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_app_containers(&self, cancel: &CancellationToken) -> Result<Vec<ContainerSummary>> {
        let mut cmd = self.command();
        cmd.args(["ps", "-a", "--no-trunc", "--filter"])
            .arg(format!("label={}=true", APP_LABEL))
            .arg("--format")
            .arg(format!(
                "{{{{.ID}}}}\t{{{{.State}}}}\t{{{{.Label \"{}\"}}}}",
                APP_PATH_LABEL
            ));
        let captured = process::run_captured(cmd, cancel).await?;
        Ok(captured.stdout.lines().filter_map(parse_ps_line).collect())
    }

    async fn list_images(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["image", "ls", "--format", "{{.Repository}}:{{.Tag}}"]);
        let captured = process::run_captured(cmd, cancel).await?;
        Ok(parse_image_list(&captured.stdout))
    }

    async fn pull_image(&self, image: &str, sink: &dyn LineSink, cancel: &CancellationToken) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut cmd = self.command();
            cmd.args(["pull", image]);
            match process::run_streaming(cmd, sink, cancel).await {
                Ok(()) => {
                    info!(image, "image pulled");
                    return Ok(());
                }
                Err(OrchestratorError::RuntimeOperationFailed(msg))
                    if msg.contains(RATE_LIMITED) && attempt + 1 < self.max_pull_attempts =>
                {
                    let delay = calc_exp_backoff(&self.pull_cooldown, attempt);
                    warn!(image, attempt, "registry rate limit hit, retrying in {:?}", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(OrchestratorError::OperationCanceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_container(&self, spec: &RunSpec, sink: &dyn LineSink, cancel: &CancellationToken) -> Result<()> {
        let name = format!("arduino-provision-{}", uuid::Uuid::new_v4().simple());
        let mut cmd = self.command();
        cmd.args(["run", "--rm", "--name", &name]);
        if let Some(user) = &spec.user {
            cmd.args(["--user", user]);
        }
        for bind in &spec.binds {
            cmd.args(["-v", bind]);
        }
        let mut entrypoint = spec.entrypoint.iter();
        if let Some(program) = entrypoint.next() {
            cmd.args(["--entrypoint", program]);
        }
        cmd.arg(&spec.image).args(entrypoint);

        debug!(container = %name, image = %spec.image, "running one-shot container");
        let result = process::run_streaming(cmd, sink, cancel).await;
        if matches!(result, Err(OrchestratorError::OperationCanceled)) {
            self.force_remove(&name).await;
        }
        result
    }

    async fn compose_services(&self, project: &ComposeProject, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut cmd = self.compose(project);
        cmd.args(["config", "--services"]);
        let captured = process::run_captured(cmd, cancel).await?;
        Ok(captured
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn compose_up(
        &self,
        project: &ComposeProject,
        env: &BTreeMap<String, String>,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.args(["up", "-d", "--remove-orphans", "--pull", "missing"])
            .envs(env);
        process::run_streaming(cmd, sink, cancel).await
    }

    async fn compose_stop(
        &self,
        project: &ComposeProject,
        timeout_secs: u64,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.arg("stop").arg(format!("--timeout={}", timeout_secs));
        process::run_streaming(cmd, sink, cancel).await
    }

    async fn compose_logs(
        &self,
        project: &ComposeProject,
        options: &LogsOptions,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.args(["logs", "--no-color"]);
        if options.follow {
            cmd.arg("--follow");
        }
        if let Some(tail) = options.tail {
            cmd.arg(format!("--tail={}", tail));
        }
        cmd.args(&options.services);
        process::run_streaming(cmd, sink, cancel).await
    }
}

fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut fields = line.trim_end().splitn(3, '\t');
    let id = fields.next().filter(|id| !id.is_empty())?.to_string();
    let state = match fields.next()?.parse::<ContainerState>() {
        Ok(state) => state,
        Err(e) => {
            warn!(container = %id, "{}", e);
            return None;
        }
    };
    let app_path = fields
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    Some(ContainerSummary {
        id,
        state,
        app_path,
    })
}

fn parse_image_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains("<none>"))
        .map(str::to_string)
        .collect()
}
