//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::errors::{OrchestratorError, Result};
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<()> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List subdirectories, sorted by path
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// List entry names, sorted
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Recursively copy this directory into `dst`, skipping top-level entries
    /// whose names appear in `exclude`. Existing files in `dst` are overwritten.
    pub async fn copy_to(&self, dst: &Dir, exclude: &[&str]) -> Result<()> {
        let src = self.path.clone();
        let dst = dst.path.clone();
        let exclude: Vec<String> = exclude.iter().map(|name| name.to_string()).collect();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst, &exclude))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("copy task failed: {e}")))?
    }

    /// Rename this directory, failing if the destination exists
    pub async fn rename_to(&self, dst: &Dir) -> Result<()> {
        if fs::metadata(dst.path()).await.is_ok() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.path().display()),
            )
            .into());
        }
        fs::rename(&self.path, dst.path()).await?;
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path, exclude: &[String]) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|entry| {
        entry.depth() != 1 || !exclude.iter().any(|name| entry.file_name() == name.as_str())
    });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            let _ = std::fs::remove_file(&target);
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target)?;
            #[cfg(not(unix))]
            let _ = link;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
