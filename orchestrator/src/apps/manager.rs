//! App store operations over the user and examples roots

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::apps::arduino_app::{ArduinoApp, CACHE_DIR, DESCRIPTOR_FILE, LEGACY_DESCRIPTOR_FILE};
use crate::apps::descriptor::{AppDescriptor, BrickInstance};
use crate::apps::generator::{generate_app, GenerateOptions};
use crate::apps::id::{AppId, Namespace};
use crate::deploy::lifecycle::Lifecycle;
use crate::deploy::status::Status;
use crate::errors::{OrchestratorError, Result};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::utils::slugify;

const SCAN_SKIP: [&str; 3] = [CACHE_DIR, "python", "sketch"];
const CLONE_SKIP: [&str; 2] = [CACHE_DIR, "data"];
const MAX_COPY_SUFFIX: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct ListAppsRequest {
    pub show_apps: bool,
    pub show_examples: bool,
    pub only_default: bool,
    pub status: Option<Status>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub id: AppId,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub status: Status,
    pub example: bool,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenAppInfo {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListAppsResult {
    pub apps: Vec<AppInfo>,
    pub broken_apps: Vec<BrokenAppInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppBrickSummary {
    pub id: String,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppDetails {
    pub id: AppId,
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub icon: Option<String>,
    pub status: Status,
    pub example: bool,
    pub default: bool,
    pub bricks: Vec<AppBrickSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateAppRequest {
    pub name: String,
    pub icon: Option<String>,
    pub bricks: Vec<String>,
    pub skip_python: bool,
    pub skip_sketch: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EditAppRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub default: Option<bool>,
}

/// Every directory under `root` holding an app descriptor, in path order.
/// Descriptor directories are not descended into.
pub async fn find_app_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !Dir::new(root).exists().await {
        return Ok(Vec::new());
    }
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_app_dirs(&root))
        .await
        .map_err(|e| OrchestratorError::Internal(format!("app scan task failed: {e}")))?
}

fn scan_app_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || (entry.file_type().is_dir()
                    && !SCAN_SKIP.iter().any(|skip| entry.file_name() == *skip))
        });

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if path.join(DESCRIPTOR_FILE).is_file() || path.join(LEGACY_DESCRIPTOR_FILE).is_file() {
            found.push(path.to_path_buf());
            walker.skip_current_dir();
        }
    }
    found.sort();
    Ok(found)
}

/// App store: list, inspect, create, clone, edit and pick the default app
#[derive(Clone)]
pub struct AppManager {
    lifecycle: Lifecycle,
    layout: StorageLayout,
}

impl AppManager {
    pub fn new(lifecycle: Lifecycle, layout: StorageLayout) -> Self {
        Self { lifecycle, layout }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn load(&self, id: &AppId) -> Result<ArduinoApp> {
        ArduinoApp::load(self.lifecycle.resolver().to_path(id)).await
    }

    /// Load an app from a printable id, a token or a path
    pub async fn resolve(&self, input: &str) -> Result<ArduinoApp> {
        let id = self.lifecycle.resolver().resolve(input)?;
        self.load(&id).await
    }

    pub fn id_of(&self, app: &ArduinoApp) -> Result<AppId> {
        self.lifecycle.resolver().from_path(&app.full_path)
    }

    async fn statuses(&self, cancel: &CancellationToken) -> HashMap<AppId, Status> {
        match self.lifecycle.status_reporter().snapshot(cancel).await {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!("unable to get app statuses: {}", e);
                HashMap::new()
            }
        }
    }

    pub async fn list(&self, req: &ListAppsRequest, cancel: &CancellationToken) -> Result<ListAppsResult> {
        let statuses = self.statuses(cancel).await;
        let default_app = self.default_app_path().await;

        let mut roots = Vec::new();
        if req.show_examples {
            roots.push(self.layout.examples_dir());
        }
        if req.show_apps {
            roots.push(self.layout.apps_dir());
        }

        let mut result = ListAppsResult::default();
        for root in roots {
            for path in find_app_dirs(root.path()).await? {
                let app = match ArduinoApp::load(&path).await {
                    Ok(app) => app,
                    Err(e) => {
                        result.broken_apps.push(BrokenAppInfo {
                            name: dir_name(&path),
                            error: format!("unable to parse the app.yaml: {}", e),
                        });
                        continue;
                    }
                };

                let is_default = default_app.as_deref() == Some(app.full_path.as_path());
                if req.only_default && !is_default {
                    continue;
                }
                let id = self.id_of(&app)?;
                let status = statuses.get(&id).copied().unwrap_or(Status::Stopped);
                if req.status.is_some_and(|wanted| wanted != status) {
                    continue;
                }

                result.apps.push(AppInfo {
                    example: id.is_example(),
                    id,
                    name: app.descriptor.name.clone(),
                    description: app.descriptor.description.clone(),
                    icon: app.descriptor.icon.clone(),
                    status,
                    default: is_default,
                });
            }
        }
        Ok(result)
    }

    pub async fn details(&self, app: &ArduinoApp, cancel: &CancellationToken) -> Result<AppDetails> {
        let id = self.id_of(app)?;
        let status = match self.lifecycle.status_reporter().status_of(&id, cancel).await {
            Ok(status) => status,
            Err(e) => {
                warn!(app = %app.full_path.display(), "unable to get app status: {}", e);
                Status::Stopped
            }
        };
        let default_app = self.default_app_path().await;
        let catalog = self.lifecycle.catalog().current();

        Ok(AppDetails {
            example: id.is_example(),
            id,
            name: app.descriptor.name.clone(),
            path: app.full_path.clone(),
            description: app.descriptor.description.clone(),
            icon: app.descriptor.icon.clone(),
            status,
            default: default_app.as_deref() == Some(app.full_path.as_path()),
            bricks: app
                .descriptor
                .bricks
                .iter()
                .map(|b| match catalog.find_brick_by_id(&b.id) {
                    Some(brick) => AppBrickSummary {
                        id: b.id.clone(),
                        name: brick.name.clone(),
                        category: brick.category.clone(),
                    },
                    None => {
                        warn!(brick = %b.id, app = %app.full_path.display(), "brick not found in catalog");
                        AppBrickSummary {
                            id: b.id.clone(),
                            name: String::new(),
                            category: String::new(),
                        }
                    }
                })
                .collect(),
        })
    }

    /// Generate a new user app in a directory named after the slug of its name
    pub async fn create(&self, req: CreateAppRequest) -> Result<AppId> {
        if req.skip_python && req.skip_sketch {
            return Err(OrchestratorError::InvalidApp(
                "cannot skip both python and sketch".to_string(),
            ));
        }
        let descriptor = AppDescriptor {
            name: req.name.trim().to_string(),
            icon: req.icon.filter(|i| !i.is_empty()),
            bricks: req.bricks.into_iter().map(BrickInstance::new).collect(),
            ..Default::default()
        };
        descriptor.validate()?;

        let catalog = self.lifecycle.catalog().current();
        if let Some(missing) = descriptor
            .bricks
            .iter()
            .find(|b| catalog.find_brick_by_id(&b.id).is_none())
        {
            return Err(OrchestratorError::BrickNotFound(missing.id.clone()));
        }

        let base = self.user_app_dir(&descriptor.name)?;
        if base.exists().await {
            return Err(OrchestratorError::AlreadyExists(base.path().display().to_string()));
        }

        let options = GenerateOptions {
            skip_sketch: req.skip_sketch,
            skip_python: req.skip_python,
        };
        generate_app(&base, &descriptor, options).await?;
        info!(app = %base.path().display(), "app created");
        self.lifecycle.resolver().from_path(base.path())
    }

    /// Copy an app into the user root. Without a name the copy is called
    /// `{source}-copy{N}`; with one, the slug of the name.
    pub async fn clone_app(&self, from: &AppId, name: Option<String>, icon: Option<String>) -> Result<AppId> {
        let source = Dir::new(self.lifecycle.resolver().to_path(from));
        if !source.exists().await {
            return Err(OrchestratorError::AppNotFound(source.path().to_path_buf()));
        }
        if !source.file(DESCRIPTOR_FILE).exists().await && !source.file(LEGACY_DESCRIPTOR_FILE).exists().await {
            return Err(OrchestratorError::InvalidApp(format!(
                "{} has no app descriptor",
                source.path().display()
            )));
        }

        let name = name.filter(|n| !n.trim().is_empty());
        let icon = icon.filter(|i| !i.is_empty());
        let dst = match &name {
            Some(name) => {
                let dst = self.user_app_dir(name)?;
                if dst.exists().await {
                    return Err(OrchestratorError::AlreadyExists(dst.path().display().to_string()));
                }
                dst
            }
            None => self.free_copy_dir(&dir_name(source.path())).await?,
        };

        if let Err(e) = self.copy_app(&source, &dst, name, icon).await {
            if let Err(cleanup) = dst.delete().await {
                warn!(path = %dst.path().display(), "failed to remove partial clone: {}", cleanup);
            }
            return Err(e);
        }
        info!(from = %from, to = %dst.path().display(), "app cloned");
        self.lifecycle.resolver().from_path(dst.path())
    }

    async fn copy_app(&self, source: &Dir, dst: &Dir, name: Option<String>, icon: Option<String>) -> Result<()> {
        source.copy_to(dst, &CLONE_SKIP).await?;
        if name.is_none() && icon.is_none() {
            return Ok(());
        }

        let mut descriptor_file = dst.file(DESCRIPTOR_FILE);
        if !descriptor_file.exists().await {
            descriptor_file = dst.file(LEGACY_DESCRIPTOR_FILE);
        }
        let mut descriptor = AppDescriptor::parse(&descriptor_file.read_string().await?)?;
        if let Some(name) = name {
            descriptor.name = name;
        }
        if icon.is_some() {
            descriptor.icon = icon;
        }
        descriptor.validate()?;
        descriptor_file
            .write_atomic(descriptor.to_yaml()?.as_bytes())
            .await
    }

    async fn free_copy_dir(&self, base_name: &str) -> Result<Dir> {
        let apps = self.layout.apps_dir();
        for i in 0..MAX_COPY_SUFFIX {
            let candidate = apps.subdir(&format!("{}-copy{}", base_name, i));
            if !candidate.exists().await {
                return Ok(candidate);
            }
        }
        Err(OrchestratorError::AlreadyExists(format!(
            "{}-copy0..{} in {}",
            base_name,
            MAX_COPY_SUFFIX - 1,
            apps.path().display()
        )))
    }

    /// Apply the requested changes and return the reloaded app. A new name
    /// also renames the app directory.
    pub async fn edit(&self, mut app: ArduinoApp, req: EditAppRequest) -> Result<ArduinoApp> {
        let was_default = self.default_app_path().await.as_deref() == Some(app.full_path.as_path());

        let new_dir = match &req.name {
            Some(name) => {
                let parent = app.full_path.parent().ok_or_else(|| {
                    OrchestratorError::InvalidApp(format!("{} has no parent", app.full_path.display()))
                })?;
                let dir = Dir::new(parent.join(slugify(name)?));
                if dir.path() == app.full_path {
                    None
                } else if dir.exists().await {
                    return Err(OrchestratorError::AlreadyExists(dir.path().display().to_string()));
                } else {
                    Some(dir)
                }
            }
            None => None,
        };

        if let Some(name) = req.name {
            app.descriptor.name = name;
        }
        if let Some(icon) = req.icon {
            app.descriptor.icon = Some(icon).filter(|i| !i.is_empty());
        }
        if let Some(description) = req.description {
            app.descriptor.description = description;
        }
        app.save().await?;

        let app = match new_dir {
            Some(dir) => {
                app.dir().rename_to(&dir).await?;
                debug!(from = %app.full_path.display(), to = %dir.path().display(), "app renamed");
                ArduinoApp::load(dir.path()).await?
            }
            None => app,
        };

        match req.default {
            Some(true) => self.set_default_app(Some(&app)).await?,
            Some(false) if was_default => self.set_default_app(None).await?,
            // keep the default pointing at the renamed directory
            None if was_default => self.set_default_app(Some(&app)).await?,
            _ => {}
        }
        Ok(app)
    }

    /// Record (or clear) the app started on boot
    pub async fn set_default_app(&self, app: Option<&ArduinoApp>) -> Result<()> {
        let file = self.layout.default_app_file();
        match app {
            Some(app) => {
                file.write_atomic(app.full_path.to_string_lossy().as_bytes())
                    .await
            }
            None => {
                if let Err(e) = file.delete().await {
                    warn!(path = %file.path().display(), "failed to remove default app file: {}", e);
                }
                Ok(())
            }
        }
    }

    /// The default app, if one is set. A blank or stale default file is
    /// removed.
    pub async fn default_app(&self) -> Result<Option<ArduinoApp>> {
        let file = self.layout.default_app_file();
        if !file.exists().await {
            return Ok(None);
        }
        let contents = file.read_string().await?;
        let path = contents.trim();
        if path.is_empty() {
            warn!(path = %file.path().display(), "default app file is empty");
            file.delete().await?;
            return Ok(None);
        }
        match ArduinoApp::load(path).await {
            Ok(app) => Ok(Some(app)),
            Err(e) => {
                warn!(app = path, "default app is not valid: {}", e);
                file.delete().await?;
                Err(e)
            }
        }
    }

    async fn default_app_path(&self) -> Option<PathBuf> {
        match self.default_app().await {
            Ok(app) => app.map(|a| a.full_path),
            Err(e) => {
                warn!("unable to get default app: {}", e);
                None
            }
        }
    }

    /// Start the default app unless it is already running
    pub async fn start_default_app(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(app) = self.default_app().await? else {
            debug!("no default app set");
            return Ok(());
        };
        let id = self.id_of(&app)?;
        if self.lifecycle.status_reporter().status_of(&id, cancel).await? == Status::Running {
            return Ok(());
        }
        info!(app = %id, "starting default app");
        self.lifecycle.start(app).wait().await
    }

    fn user_app_dir(&self, name: &str) -> Result<Dir> {
        Ok(self.layout.apps_dir().subdir(&slugify(name)?))
    }

    /// Root directory of a namespace
    pub fn root(&self, namespace: Namespace) -> &Path {
        self.lifecycle.resolver().root(namespace)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
