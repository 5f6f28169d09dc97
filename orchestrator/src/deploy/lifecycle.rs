//! App lifecycle engine
//!
//! Start, stop, provision and delete an app. Long operations return an
//! [`OperationStream`]; the app's container states are the only lifecycle
//! state, nothing is tracked here.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apps::arduino_app::ArduinoApp;
use crate::apps::id::AppIdResolver;
use crate::catalog::{Catalog, CatalogHandle};
use crate::deploy::compose::{self, HostProfile};
use crate::deploy::progress::{DockerProgressParser, DEFAULT_HISTORY_SIZE};
use crate::deploy::provision::{Provisioned, Provisioner};
use crate::deploy::runtime::ContainerRuntime;
use crate::deploy::sketch::{self, SketchTarget, SketchToolchain};
use crate::deploy::status::StatusReporter;
use crate::deploy::stream::{Emitter, LineSink, OperationStream};
use crate::errors::Result;

/// Settings of the lifecycle engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub python_image: String,
    /// Brick images from these prefixes are pulled during provisioning
    pub trusted_registries: Vec<String>,
    pub stop_timeout_secs: u64,
    pub progress_history: usize,
    pub router_socket: PathBuf,
    pub sketch_target: SketchTarget,
    /// Fixed host profile; probed before each provisioning when unset
    pub host: Option<HostProfile>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            python_image: "ghcr.io/arduino/app-bricks/python-apps-base:0.5.0".to_string(),
            trusted_registries: vec![
                "ghcr.io/arduino/".to_string(),
                "ghcr.io/bcmi-labs/".to_string(),
                "public.ecr.aws/arduino/".to_string(),
                "influxdb".to_string(),
            ],
            stop_timeout_secs: 5,
            progress_history: DEFAULT_HISTORY_SIZE,
            router_socket: PathBuf::from("/var/run/arduino-router.sock"),
            sketch_target: SketchTarget::default(),
            host: None,
        }
    }
}

/// Lifecycle engine
#[derive(Clone)]
pub struct Lifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    toolchain: Arc<dyn SketchToolchain>,
    catalog: Arc<CatalogHandle>,
    resolver: Arc<AppIdResolver>,
    options: Arc<LifecycleOptions>,
}

impl Lifecycle {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        toolchain: Arc<dyn SketchToolchain>,
        catalog: Arc<CatalogHandle>,
        resolver: Arc<AppIdResolver>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            runtime,
            toolchain,
            catalog,
            resolver,
            options: Arc::new(options),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn resolver(&self) -> &Arc<AppIdResolver> {
        &self.resolver
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    pub fn status_reporter(&self) -> StatusReporter<'_> {
        StatusReporter::new(self.runtime.as_ref(), &self.resolver)
    }

    /// Provision the app without starting it
    pub fn provision_stream(&self, app: ArduinoApp) -> OperationStream {
        self.spawn_operation(app, |engine, app, emitter| async move {
            engine.run_provision(&app, &emitter).await.map(|_| ())
        })
    }

    /// Provision the app, discarding its output
    pub async fn provision(&self, app: ArduinoApp) -> Result<()> {
        self.provision_stream(app).wait().await
    }

    /// Flash the sketch and bring the compose project up
    pub fn start(&self, app: ArduinoApp) -> OperationStream {
        self.spawn_operation(app, |engine, app, emitter| async move {
            engine.run_start(&app, &emitter).await
        })
    }

    /// Stop the microcontroller and the app containers
    pub fn stop(&self, app: ArduinoApp) -> OperationStream {
        self.spawn_operation(app, |engine, app, emitter| async move {
            engine.run_stop(&app, &emitter).await
        })
    }

    /// Stop then start, in one stream
    pub fn restart(&self, app: ArduinoApp) -> OperationStream {
        self.spawn_operation(app, |engine, app, emitter| async move {
            engine.run_stop(&app, &emitter).await?;
            engine.run_start(&app, &emitter).await
        })
    }

    /// Streams are named by app id. An app outside both roots gets a stream
    /// that fails right away.
    fn spawn_operation<F, Fut>(&self, app: ArduinoApp, operation: F) -> OperationStream
    where
        F: FnOnce(Lifecycle, ArduinoApp, Emitter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.resolver.from_path(&app.full_path) {
            Ok(id) => {
                let engine = self.clone();
                OperationStream::spawn(id.to_string(), move |emitter| operation(engine, app, emitter))
            }
            Err(e) => OperationStream::spawn(app.full_path.display().to_string(), move |_| async move { Err(e) }),
        }
    }

    /// Stop the app and remove its directory. A failed stop leaves the
    /// directory in place.
    pub async fn delete(&self, app: ArduinoApp) -> Result<()> {
        let dir = app.dir();
        self.stop(app).wait().await?;
        dir.delete().await?;
        info!(app = %dir.path().display(), "app deleted");
        Ok(())
    }

    async fn host_profile(&self) -> HostProfile {
        match &self.options.host {
            Some(host) => host.clone(),
            None => HostProfile::probe(&self.options.router_socket).await,
        }
    }

    async fn run_provision(&self, app: &ArduinoApp, emitter: &Emitter) -> Result<Provisioned> {
        let host = self.host_profile().await;
        let provisioner = Provisioner {
            runtime: self.runtime.as_ref(),
            catalog: self.catalog.current(),
            resolver: &self.resolver,
            host: &host,
            python_image: &self.options.python_image,
            trusted_registries: &self.options.trusted_registries,
        };
        provisioner
            .provision(app, emitter, emitter.cancel_token())
            .await
    }

    async fn run_start(&self, app: &ArduinoApp, emitter: &Emitter) -> Result<()> {
        info!(app = %app.full_path.display(), "starting app");
        let cancel = emitter.cancel_token();

        if let Some(sketch_dir) = &app.main_sketch_path {
            sketch::compile_and_upload(
                self.toolchain.as_ref(),
                &self.options.sketch_target,
                sketch_dir,
                app.sketch_build_dir().path(),
                emitter,
                cancel,
            )
            .await?;
        }

        if app.main_python_file.is_some() {
            emitter.info("Provisioning app...").await?;
            let provisioned = self.run_provision(app, emitter).await?;
            emitter.info("Starting app...").await?;

            let env = compose_env(app, &provisioned.catalog);
            let sink = PullProgressSink::new(emitter, self.options.progress_history);
            self.runtime
                .compose_up(&provisioned.project, &env, &sink, cancel)
                .await?;
        }
        info!(app = %app.full_path.display(), "app started");
        Ok(())
    }

    async fn run_stop(&self, app: &ArduinoApp, emitter: &Emitter) -> Result<()> {
        info!(app = %app.full_path.display(), "stopping app");
        let cancel = emitter.cancel_token();

        if app.main_sketch_path.is_some() {
            if let Err(e) = self.flash_empty_sketch(cancel).await {
                if e.is_canceled() {
                    return Err(e);
                }
                warn!(app = %app.full_path.display(), "failed to flash empty sketch: {}", e);
            }
        }

        if app.main_python_file.is_some() {
            match compose::existing_project(app).await {
                Some(project) => {
                    self.runtime
                        .compose_stop(&project, self.options.stop_timeout_secs, emitter, cancel)
                        .await?;
                }
                None => debug!(app = %app.full_path.display(), "no compose project, app was never started"),
            }
        }
        Ok(())
    }

    async fn flash_empty_sketch(&self, cancel: &CancellationToken) -> Result<()> {
        let empty = sketch::empty_sketch().await?;
        sketch::compile_and_upload(
            self.toolchain.as_ref(),
            &self.options.sketch_target,
            &empty.sketch_dir(),
            &empty.build_dir(),
            &crate::deploy::stream::NullSink,
            cancel,
        )
        .await
    }
}

/// Brick variables plus the configuration of each selected model
pub fn compose_env(app: &ArduinoApp, catalog: &Catalog) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for brick in &app.descriptor.bricks {
        env.extend(brick.variables.clone());
        if let Some(model) = brick.model.as_deref().and_then(|m| catalog.get_model_by_id(m)) {
            env.extend(model.model_configuration.clone());
        }
    }
    env
}

/// Reports compose output as info lines and pull progress as percentages
struct PullProgressSink<'a> {
    emitter: &'a Emitter,
    parser: Mutex<DockerProgressParser>,
}

impl<'a> PullProgressSink<'a> {
    fn new(emitter: &'a Emitter, history_size: usize) -> Self {
        Self {
            emitter,
            parser: Mutex::new(DockerProgressParser::new(history_size)),
        }
    }
}

#[async_trait]
impl LineSink for PullProgressSink<'_> {
    async fn line(&self, line: String) {
        let progress = self
            .parser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .parse(&line);
        if let Some(progress) = progress {
            let _ = self.emitter.progress(progress as f32).await;
        }
        let _ = self.emitter.info(line).await;
    }
}
