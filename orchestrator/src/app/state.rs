//! Orchestrator state: the services every command works with

use std::sync::Arc;

use tracing::info;

use crate::app::options::OrchestratorOptions;
use crate::apps::id::AppIdResolver;
use crate::apps::manager::AppManager;
use crate::bricks::service::BrickService;
use crate::catalog::CatalogHandle;
use crate::deploy::docker::DockerCli;
use crate::deploy::lifecycle::Lifecycle;
use crate::deploy::runtime::ContainerRuntime;
use crate::deploy::sketch::{ArduinoCli, SketchToolchain};
use crate::errors::Result;

/// Main orchestrator state
pub struct AppState {
    /// Lifecycle engine
    pub lifecycle: Lifecycle,

    /// App store operations
    pub apps: AppManager,

    /// Catalog bricks and brick instances
    pub bricks: BrickService,
}

impl AppState {
    /// Initialize state backed by the docker and arduino-cli binaries
    pub async fn init(options: &OrchestratorOptions) -> Result<Self> {
        Self::init_with(
            options,
            Arc::new(DockerCli::default()),
            Arc::new(ArduinoCli::default()),
        )
        .await
    }

    /// Initialize state over the given runtime and toolchain
    pub async fn init_with(
        options: &OrchestratorOptions,
        runtime: Arc<dyn ContainerRuntime>,
        toolchain: Arc<dyn SketchToolchain>,
    ) -> Result<Self> {
        info!("Initializing orchestrator state...");

        let layout = &options.layout;
        layout.setup().await?;

        let catalog = Arc::new(CatalogHandle::load(layout.assets_dir().path()).await?);
        if let Some(version) = catalog.current().version() {
            info!(version = %version, "catalog loaded");
        }

        let resolver = Arc::new(AppIdResolver::new(
            layout.apps_dir().path(),
            layout.examples_dir().path(),
        ));

        let lifecycle = Lifecycle::new(
            runtime,
            toolchain,
            catalog.clone(),
            resolver.clone(),
            options.lifecycle.clone(),
        );
        let apps = AppManager::new(lifecycle.clone(), layout.clone());
        let bricks = BrickService::new(catalog, resolver);

        Ok(Self {
            lifecycle,
            apps,
            bricks,
        })
    }
}
