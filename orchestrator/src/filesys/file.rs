//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::Result;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn read_string(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        let contents = self.read_string().await?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub async fn read_yaml<T: DeserializeOwned>(&self) -> Result<T> {
        let contents = self.read_string().await?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Serialize `value` as YAML and replace the file atomically
    pub async fn write_yaml<T: Serialize>(&self, value: &T) -> Result<()> {
        let contents = serde_yaml::to_string(value)?;
        self.write_atomic(contents.as_bytes()).await
    }

    /// Write to a sibling temporary file, sync it, then rename over the target.
    ///
    /// Readers observe either the previous content or the new content, never a
    /// partially written file. The temporary file lives in the same directory
    /// so the rename never crosses a filesystem boundary.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}
