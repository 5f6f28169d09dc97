//! In-memory container runtime and sketch toolchain

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use app_orchestrator::deploy::runtime::{
    ComposeProject, ContainerRuntime, ContainerSummary, LogsOptions, RunSpec,
};
use app_orchestrator::deploy::sketch::{Board, SketchToolchain};
use app_orchestrator::deploy::stream::LineSink;
use app_orchestrator::errors::{OrchestratorError, Result};
use app_orchestrator::filesys::file::File;

/// Sets a flag when dropped, i.e. when the future holding it is torn down
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub images: Mutex<Vec<String>>,
    pub services: Vec<String>,
    pub calls: Mutex<Vec<String>>,
    /// `compose_up` never returns on its own
    pub hang_compose_up: bool,
    pub compose_up_started: Arc<Notify>,
    pub compose_up_dropped: Arc<AtomicBool>,
    pub fail_compose_stop: bool,
    /// Files the provisioning container writes, relative to the app dir
    pub provision_output: Vec<(String, String)>,
}

impl FakeRuntime {
    pub fn with_images(images: &[&str]) -> Self {
        Self {
            images: Mutex::new(images.iter().map(|i| i.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_app_containers(&self, _cancel: &CancellationToken) -> Result<Vec<ContainerSummary>> {
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn list_images(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn pull_image(&self, image: &str, _sink: &dyn LineSink, _cancel: &CancellationToken) -> Result<()> {
        self.record(format!("pull {}", image));
        self.images.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec, _sink: &dyn LineSink, _cancel: &CancellationToken) -> Result<()> {
        self.record(format!("run {}", spec.image));
        let app_dir = spec
            .binds
            .iter()
            .find_map(|bind| bind.strip_suffix(":/app"))
            .expect("app bind mount");
        for (path, contents) in &self.provision_output {
            File::new(Path::new(app_dir).join(path))
                .write_atomic(contents.as_bytes())
                .await?;
        }
        Ok(())
    }

    async fn compose_services(&self, _project: &ComposeProject, _cancel: &CancellationToken) -> Result<Vec<String>> {
        self.record("services");
        Ok(self.services.clone())
    }

    async fn compose_up(
        &self,
        _project: &ComposeProject,
        _env: &BTreeMap<String, String>,
        sink: &dyn LineSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("up");
        if !self.hang_compose_up {
            return Ok(());
        }
        let _flag = DropFlag(self.compose_up_dropped.clone());
        self.compose_up_started.notify_one();
        sink.line("Container main-1 Starting".to_string()).await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn compose_stop(
        &self,
        _project: &ComposeProject,
        timeout_secs: u64,
        _sink: &dyn LineSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(format!("stop {}", timeout_secs));
        if self.fail_compose_stop {
            return Err(OrchestratorError::RuntimeOperationFailed("docker compose stop: exit status 1".to_string()));
        }
        Ok(())
    }

    async fn compose_logs(
        &self,
        _project: &ComposeProject,
        options: &LogsOptions,
        sink: &dyn LineSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(format!("logs {}", options.services.join(",")));
        for service in &options.services {
            sink.line(format!("{}-1  | hello from {}", service, service)).await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeToolchain {
    pub calls: Mutex<Vec<String>>,
    pub fail_upload: bool,
}

#[async_trait]
impl SketchToolchain for FakeToolchain {
    async fn detect_board(&self, _cancel: &CancellationToken) -> Result<Board> {
        Ok(Board {
            name: "Arduino UNO Q".to_string(),
            fqbn: "arduino:zephyr:unoq".to_string(),
            port: None,
        })
    }

    async fn compile(
        &self,
        sketch: &Path,
        _build_dir: &Path,
        fqbn: &str,
        _sink: &dyn LineSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("compile {} {}", fqbn, sketch.display()));
        Ok(())
    }

    async fn upload(
        &self,
        sketch: &Path,
        _build_dir: &Path,
        fqbn: &str,
        _port: Option<&str>,
        _sink: &dyn LineSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("upload {} {}", fqbn, sketch.display()));
        if self.fail_upload {
            return Err(OrchestratorError::RuntimeOperationFailed("no board on the serial port".to_string()));
        }
        Ok(())
    }
}
