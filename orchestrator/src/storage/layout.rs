//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub const APPS_DIR_ENV: &str = "ARDUINO_APP_CLI__APPS_DIR";
pub const DATA_DIR_ENV: &str = "ARDUINO_APP_CLI__DATA_DIR";

/// Storage layout for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Root of the user apps ("user" namespace)
    pub apps_dir: PathBuf,

    /// Orchestrator data: examples, catalog assets, default app, settings
    pub data_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(apps_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve the layout from the environment, falling back to the home
    /// directory defaults
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let home = dirs::home_dir();
        let from_env_or_home = |var: &str, rel: &str| -> Result<PathBuf, OrchestratorError> {
            match std::env::var_os(var) {
                Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
                _ => home.as_ref().map(|h| h.join(rel)).ok_or_else(|| {
                    OrchestratorError::ConfigError(format!(
                        "{} is not set and no home directory is available",
                        var
                    ))
                }),
            }
        };

        Ok(Self::new(
            from_env_or_home(APPS_DIR_ENV, "ArduinoApps")?,
            from_env_or_home(DATA_DIR_ENV, ".local/share/arduino-app-cli")?,
        ))
    }

    pub fn apps_dir(&self) -> Dir {
        Dir::new(&self.apps_dir)
    }

    /// Root of the read-only example apps ("examples" namespace)
    pub fn examples_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("examples"))
    }

    /// Versioned catalog asset bundles, one directory per release
    pub fn assets_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("assets"))
    }

    pub fn default_app_file(&self) -> File {
        File::new(self.data_dir.join("default.app"))
    }

    pub fn settings_file(&self) -> File {
        File::new(self.data_dir.join("settings.json"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.data_dir.join("logs"))
    }

    /// Create the directories the orchestrator expects to exist
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        self.apps_dir().create().await?;
        self.examples_dir().create().await?;
        self.assets_dir().create().await?;
        Ok(())
    }
}
