//! Loaded runtime view of an app directory

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::apps::descriptor::AppDescriptor;
use crate::errors::{OrchestratorError, Result};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub const DESCRIPTOR_FILE: &str = "app.yaml";
pub const LEGACY_DESCRIPTOR_FILE: &str = "app.yml";
pub const CACHE_DIR: &str = ".cache";

/// Relative path of a brick's directory for a namespace-qualified id:
/// `arduino:object_detection` lives under `arduino/object_detection`.
/// Ids that would leave that directory are rejected.
pub fn brick_rel_path(brick_id: &str) -> Result<PathBuf> {
    let invalid = || OrchestratorError::InvalidApp(format!("invalid brick id {:?}", brick_id));
    let (namespace, name) = brick_id.split_once(':').ok_or_else(invalid)?;
    for segment in [namespace, name] {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains(['/', '\\', ':'])
        {
            return Err(invalid());
        }
    }
    Ok([namespace, name].iter().collect())
}

#[derive(Debug, Clone)]
pub struct ArduinoApp {
    pub full_path: PathBuf,
    pub descriptor: AppDescriptor,
    pub main_python_file: Option<PathBuf>,
    /// Sketch directory (the one holding `sketch.ino`)
    pub main_sketch_path: Option<PathBuf>,
    descriptor_file: File,
}

impl ArduinoApp {
    /// Load an app from its directory and make sure `.cache` exists
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let dir = Dir::new(path.as_ref());
        if !dir.exists().await {
            return Err(OrchestratorError::AppNotFound(path.as_ref().to_path_buf()));
        }
        let full_path = tokio::fs::canonicalize(dir.path()).await?;
        let dir = Dir::new(&full_path);

        let mut descriptor_file = dir.file(DESCRIPTOR_FILE);
        if !descriptor_file.exists().await {
            let legacy = dir.file(LEGACY_DESCRIPTOR_FILE);
            if !legacy.exists().await {
                return Err(OrchestratorError::InvalidApp(format!(
                    "descriptor file {} not found in {}",
                    DESCRIPTOR_FILE,
                    full_path.display()
                )));
            }
            descriptor_file = legacy;
        }
        let descriptor = AppDescriptor::parse(&descriptor_file.read_string().await?)?;

        let python = dir.subdir("python").file("main.py");
        let main_python_file = python.exists().await.then(|| python.path().to_path_buf());

        let sketch_dir = dir.subdir("sketch");
        let main_sketch_path = sketch_dir
            .file("sketch.ino")
            .exists()
            .await
            .then(|| sketch_dir.path().to_path_buf());

        if main_python_file.is_none() && main_sketch_path.is_none() {
            return Err(OrchestratorError::InvalidApp(format!(
                "{} has neither python/main.py nor sketch/sketch.ino",
                full_path.display()
            )));
        }

        let app = Self {
            full_path,
            descriptor,
            main_python_file,
            main_sketch_path,
            descriptor_file,
        };
        app.cache_dir().create().await?;
        debug!(app = %app.full_path.display(), "app loaded");
        Ok(app)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Validate and atomically rewrite the descriptor
    pub async fn save(&self) -> Result<()> {
        self.descriptor.validate()?;
        self.descriptor_file
            .write_atomic(self.descriptor.to_yaml()?.as_bytes())
            .await
    }

    pub fn descriptor_file(&self) -> &File {
        &self.descriptor_file
    }

    pub fn dir(&self) -> Dir {
        Dir::new(&self.full_path)
    }

    /// Provisioning state directory
    pub fn cache_dir(&self) -> Dir {
        self.dir().subdir(CACHE_DIR)
    }

    pub fn sketch_build_dir(&self) -> Dir {
        self.cache_dir().subdir("sketch")
    }

    pub fn app_compose_file(&self) -> File {
        self.cache_dir().file("app-compose.yaml")
    }

    pub fn app_compose_overrides_file(&self) -> File {
        self.cache_dir().file("app-compose-overrides.yaml")
    }

    pub fn compose_dir(&self) -> Dir {
        self.cache_dir().subdir("compose")
    }

    /// Materialized compose fragment of a brick, which may not exist yet
    pub fn brick_compose_file(&self, brick_id: &str) -> Result<File> {
        Ok(File::new(
            self.compose_dir()
                .path()
                .join(brick_rel_path(brick_id)?)
                .join("brick_compose.yaml"),
        ))
    }
}
