//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

pub const REGISTRY_BASE_ENV: &str = "DOCKER_REGISTRY_BASE";
pub const PYTHON_IMAGE_ENV: &str = "DOCKER_PYTHON_BASE_IMAGE";
pub const ROUTER_SOCKET_ENV: &str = "ARDUINO_ROUTER_SOCKET";

/// Orchestrator settings, read from `settings.json` in the data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Registry prefix for the base python image
    #[serde(default = "default_registry_base")]
    pub registry_base: String,

    /// Full base python image reference; overrides `registry_base`
    #[serde(default)]
    pub python_image: Option<String>,

    /// Router socket bound into the main service when present on the host
    #[serde(default = "default_router_socket")]
    pub router_socket: PathBuf,

    /// Status polling interval in seconds (daemon mode)
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_secs: u64,

    /// Start the default app when the daemon boots
    #[serde(default = "default_true")]
    pub start_default_app: bool,

    /// Board used for sketch compile/upload; discovered when absent
    #[serde(default)]
    pub sketch_fqbn: Option<String>,

    #[serde(default)]
    pub sketch_port: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_registry_base() -> String {
    "ghcr.io/arduino/".to_string()
}

fn default_router_socket() -> PathBuf {
    PathBuf::from("/var/run/arduino-router.sock")
}

fn default_status_poll_interval() -> u64 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            registry_base: default_registry_base(),
            python_image: None,
            router_socket: default_router_socket(),
            status_poll_interval_secs: default_status_poll_interval(),
            start_default_app: true,
            sketch_fqbn: None,
            sketch_port: None,
        }
    }
}

impl Settings {
    /// Apply environment overrides on top of the file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base) = non_empty_env(REGISTRY_BASE_ENV) {
            self.registry_base = base;
        }
        if let Some(image) = non_empty_env(PYTHON_IMAGE_ENV) {
            self.python_image = Some(image);
        }
        if let Some(socket) = non_empty_env(ROUTER_SOCKET_ENV) {
            self.router_socket = PathBuf::from(socket);
        }
        self
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}
