//! Orchestrator configuration options

use std::time::Duration;

use tracing::debug;

use crate::deploy::lifecycle::LifecycleOptions;
use crate::deploy::sketch::SketchTarget;
use crate::errors::Result;
use crate::logs::LogOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::status_poller;

pub const PYTHON_IMAGE_REPOSITORY: &str = "app-bricks/python-apps-base";
pub const PYTHON_IMAGE_TAG: &str = "0.5.0";

/// Main orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Lifecycle engine configuration
    pub lifecycle: LifecycleOptions,

    /// Logging configuration
    pub logs: LogOptions,

    /// Status poller options (daemon mode)
    pub status_poller: status_poller::Options,

    /// Start the default app when the daemon boots
    pub start_default_app: bool,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl OrchestratorOptions {
    /// Options for `layout`, read from its settings file when present
    pub async fn load(layout: StorageLayout) -> Result<Self> {
        let file = layout.settings_file();
        let settings = if file.exists().await {
            debug!(path = %file.path().display(), "reading settings");
            file.read_json::<Settings>().await?
        } else {
            Settings::default()
        };
        Ok(Self::from_settings(layout, settings.with_env_overrides()))
    }

    pub fn from_settings(layout: StorageLayout, settings: Settings) -> Self {
        let python_image = settings.python_image.clone().unwrap_or_else(|| {
            format!(
                "{}{}:{}",
                settings.registry_base, PYTHON_IMAGE_REPOSITORY, PYTHON_IMAGE_TAG
            )
        });

        let lifecycle = LifecycleOptions {
            python_image,
            router_socket: settings.router_socket.clone(),
            sketch_target: SketchTarget {
                fqbn: settings.sketch_fqbn.clone(),
                port: settings.sketch_port.clone(),
            },
            ..Default::default()
        };

        let logs = LogOptions {
            log_level: settings.log_level.clone(),
            stdout: true,
            log_dir: Some(layout.logs_dir().path().to_path_buf()),
            json_format: settings.json_logs,
        };

        let status_poller = status_poller::Options {
            interval: Duration::from_secs(settings.status_poll_interval_secs.max(1)),
            ..Default::default()
        };

        Self {
            layout,
            lifecycle,
            logs,
            status_poller,
            start_default_app: settings.start_default_app,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
