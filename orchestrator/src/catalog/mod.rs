//! Brick and model catalog
//!
//! A [`Catalog`] is built from one asset bundle and never mutated afterwards.
//! Components receive it explicitly; [`CatalogHandle::reload`] swaps in a
//! freshly loaded instance for subsequent callers.

pub mod bricks;
pub mod models;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::catalog::bricks::{Brick, BricksIndex};
use crate::catalog::models::{AiModel, ModelsIndex};
use crate::catalog::store::StaticStore;
use crate::errors::{OrchestratorError, Result};
use crate::filesys::dir::Dir;

#[derive(Debug, Clone)]
pub struct Catalog {
    version: Option<semver::Version>,
    store: StaticStore,
    bricks: BricksIndex,
    models: ModelsIndex,
}

impl Catalog {
    /// Load the bundle rooted at `base_dir`. A missing models list yields an
    /// empty models index; a missing bricks list is an error.
    pub async fn load(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = StaticStore::new(base_dir);
        let bricks_file = store.bricks_list_file();
        if !bricks_file.exists().await {
            return Err(OrchestratorError::CatalogError(format!(
                "{} not found",
                bricks_file.path().display()
            )));
        }
        let bricks = BricksIndex::parse(&bricks_file.read_string().await?)?;

        let models_file = store.models_list_file();
        let models = if models_file.exists().await {
            ModelsIndex::parse(&models_file.read_string().await?)?
        } else {
            ModelsIndex::default()
        };

        let version = store
            .base_dir()
            .file_name()
            .and_then(|n| parse_version(&n.to_string_lossy()));

        Ok(Self {
            version,
            store,
            bricks,
            models,
        })
    }

    /// Load the highest semver version directory under `assets_dir`
    pub async fn load_latest(assets_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = Dir::new(assets_dir.as_ref());
        let latest = dir
            .list_dirs()
            .await?
            .into_iter()
            .filter_map(|path| {
                let version = parse_version(&path.file_name()?.to_string_lossy())?;
                Some((version, path))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b));

        let Some((version, path)) = latest else {
            return Err(OrchestratorError::CatalogError(format!(
                "no versioned asset bundle in {}",
                dir.path().display()
            )));
        };
        info!(version = %version, "loading catalog");
        Self::load(path).await
    }

    /// In-memory catalog, mostly useful for tests and dynamic indexes
    pub fn from_parts(store: StaticStore, bricks: BricksIndex, models: ModelsIndex) -> Self {
        Self {
            version: None,
            store,
            bricks,
            models,
        }
    }

    pub fn version(&self) -> Option<&semver::Version> {
        self.version.as_ref()
    }

    pub fn store(&self) -> &StaticStore {
        &self.store
    }

    pub fn bricks(&self) -> &BricksIndex {
        &self.bricks
    }

    pub fn models(&self) -> &ModelsIndex {
        &self.models
    }

    pub fn find_brick_by_id(&self, id: &str) -> Option<&Brick> {
        self.bricks.find_brick_by_id(id)
    }

    pub fn get_model_by_id(&self, id: &str) -> Option<&AiModel> {
        self.models.get_model_by_id(id)
    }

    pub fn get_models_by_brick(&self, brick_id: &str) -> Vec<&AiModel> {
        self.models.get_models_by_brick(brick_id)
    }
}

fn parse_version(name: &str) -> Option<semver::Version> {
    semver::Version::parse(name.trim_start_matches('v')).ok()
}

/// Shared, explicitly reloadable access to the current catalog
#[derive(Debug)]
pub struct CatalogHandle {
    assets_dir: Option<PathBuf>,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub async fn load(assets_dir: impl Into<PathBuf>) -> Result<Self> {
        let assets_dir = assets_dir.into();
        let catalog = Catalog::load_latest(&assets_dir).await?;
        Ok(Self {
            assets_dir: Some(assets_dir),
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// A handle over a fixed catalog; `reload` keeps it as is
    pub fn fixed(catalog: Catalog) -> Self {
        Self {
            assets_dir: None,
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn current(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the newest asset bundle. Operations already holding the previous
    /// catalog keep using it.
    pub async fn reload(&self) -> Result<Arc<Catalog>> {
        let Some(assets_dir) = &self.assets_dir else {
            warn!("catalog has no asset directory, reload skipped");
            return Ok(self.current());
        };
        let catalog = Arc::new(Catalog::load_latest(assets_dir).await?);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = catalog.clone();
        Ok(catalog)
    }
}
