//! Static asset store: one versioned catalog bundle on disk
//!
//! ```text
//! {base}/bricks-list.yaml
//! {base}/models-list.yaml
//! {base}/compose/{namespace}/{brick}/brick_compose.yaml
//! {base}/docs/{namespace}/{brick}/README.md
//! ```

use std::path::{Path, PathBuf};

use crate::apps::arduino_app::brick_rel_path;
use crate::errors::{OrchestratorError, Result};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticStore {
    base_dir: PathBuf,
}

impl StaticStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn bricks_list_file(&self) -> File {
        File::new(self.base_dir.join("bricks-list.yaml"))
    }

    pub fn models_list_file(&self) -> File {
        File::new(self.base_dir.join("models-list.yaml"))
    }

    pub fn compose_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("compose"))
    }

    pub fn brick_compose_file(&self, brick_id: &str) -> Result<File> {
        Ok(File::new(
            self.compose_dir()
                .path()
                .join(qualified_path(brick_id)?)
                .join("brick_compose.yaml"),
        ))
    }

    /// README of a brick, `None` when the bundle ships no docs for it
    pub async fn brick_readme(&self, brick_id: &str) -> Result<Option<String>> {
        let readme = File::new(
            self.base_dir
                .join("docs")
                .join(qualified_path(brick_id)?)
                .join("README.md"),
        );
        if !readme.exists().await {
            return Ok(None);
        }
        Ok(Some(readme.read_string().await?))
    }

    /// Replace `dst` with a copy of the bundle's compose fragments
    pub async fn save_compose_folder_to(&self, dst: &Dir) -> Result<()> {
        dst.delete().await?;
        if !self.compose_dir().exists().await {
            return dst.create().await;
        }
        self.compose_dir().copy_to(dst, &[]).await
    }
}

fn qualified_path(brick_id: &str) -> Result<PathBuf> {
    brick_rel_path(brick_id).map_err(|_| OrchestratorError::BrickNotFound(brick_id.to_string()))
}
