//! Compose project assembly
//!
//! Builds `.cache/app-compose.yaml` for an app from the brick fragments
//! materialized in `.cache/compose`, plus `.cache/app-compose-overrides.yaml`
//! when bricks need host devices. Output depends only on the app, the
//! catalog, the host profile and the fragments on disk, so repeated runs
//! write identical files.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apps::arduino_app::ArduinoApp;
use crate::apps::id::AppIdResolver;
use crate::catalog::Catalog;
use crate::deploy::runtime::{ComposeProject, ContainerRuntime, APP_LABEL, APP_PATH_LABEL};
use crate::errors::{OrchestratorError, Result};
use crate::filesys::file::File;
use crate::utils::slugify;

pub const MAIN_SERVICE: &str = "main";
const APP_MOUNT: &str = "/app";
const ROUTER_SOCKET_MOUNT: &str = "/var/run/arduino-router.sock";
const ROUTER_HOST: &str = "msgpack-rpc-router:host-gateway";
const ENTRYPOINT: &str = "/run.sh";
const EXTRA_GROUPS: [&str; 3] = ["dialout", "video", "audio"];

/// Host facts baked into the generated main service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostProfile {
    /// `uid:gid` the main service runs as; `None` off Linux
    pub user: Option<String>,
    /// Device nodes passed through to containers
    pub devices: Vec<String>,
    /// Router socket, when present on the host
    pub router_socket: Option<PathBuf>,
}

impl HostProfile {
    pub async fn probe(router_socket: &Path) -> Self {
        let router_socket = tokio::fs::try_exists(router_socket)
            .await
            .unwrap_or(false)
            .then(|| router_socket.to_path_buf());
        Self {
            user: current_user(),
            devices: host_devices(Path::new("/dev")).await,
            router_socket,
        }
    }
}

#[cfg(target_os = "linux")]
pub fn current_user() -> Option<String> {
    use nix::unistd::{getgid, getuid};
    Some(format!("{}:{}", getuid(), getgid()))
}

#[cfg(not(target_os = "linux"))]
pub fn current_user() -> Option<String> {
    None
}

/// Camera nodes (`videoN`) in name order, then `/dev/snd` when any sound
/// device exists
pub async fn host_devices(dev_dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dev_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dev_dir.display(), "cannot list devices: {}", e);
            return Vec::new();
        }
    };

    let mut video = Vec::new();
    let mut sound = false;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("video") {
            video.push(dev_dir.join(&name).to_string_lossy().into_owned());
        } else if name.starts_with("snd") {
            sound = true;
        }
    }
    video.sort();
    if sound {
        video.push(dev_dir.join("snd").to_string_lossy().into_owned());
    }
    video
}

#[derive(Debug, Serialize)]
struct Volume {
    #[serde(rename = "type")]
    kind: &'static str,
    source: String,
    target: String,
}

#[derive(Debug, Serialize)]
struct MainService {
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    volumes: Vec<Volume>,
    devices: Vec<String>,
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    group_add: Vec<String>,
    entrypoint: String,
    extra_hosts: Vec<String>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct MainCompose {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<BTreeMap<String, MainService>>,
}

#[derive(Debug, Serialize)]
struct DeviceOverride {
    devices: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OverrideCompose {
    services: BTreeMap<String, DeviceOverride>,
}

/// Everything the assembly reads besides the app itself
pub struct ComposeAssembly<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub catalog: &'a Catalog,
    pub resolver: &'a AppIdResolver,
    pub host: &'a HostProfile,
    pub python_image: &'a str,
}

impl ComposeAssembly<'_> {
    /// Write the main compose file (and the device override when needed)
    pub async fn generate(&self, app: &ArduinoApp, cancel: &CancellationToken) -> Result<ComposeProject> {
        self.try_generate(app, cancel).await.map_err(|e| match e {
            OrchestratorError::OperationCanceled | OrchestratorError::ComposeAssemblyFailed(_) => e,
            other => OrchestratorError::ComposeAssemblyFailed(other.to_string()),
        })
    }

    async fn try_generate(&self, app: &ArduinoApp, cancel: &CancellationToken) -> Result<ComposeProject> {
        let mut fragments = Vec::new();
        for brick in &app.descriptor.bricks {
            let fragment = app.brick_compose_file(&brick.id)?;
            if fragment.exists().await {
                debug!(brick = %brick.id, path = %fragment.path().display(), "brick compose file found");
                fragments.push((brick.id.as_str(), fragment));
            } else {
                debug!(brick = %brick.id, path = %fragment.path().display(), "brick compose file not found");
            }
        }

        let main_file = app.app_compose_file();
        let mut document = MainCompose {
            name: self.project_name(app)?,
            include: fragments
                .iter()
                .map(|(_, f)| f.path().to_string_lossy().into_owned())
                .collect(),
            services: None,
        };

        // services defined by the fragments, as compose resolves them
        let depends_on = if document.include.is_empty() {
            Vec::new()
        } else {
            main_file.write_yaml(&document).await?;
            let services = self
                .runtime
                .compose_services(&ComposeProject::new(main_file.path()), cancel)
                .await?;
            dependencies(services)
        };

        document.services = Some(BTreeMap::from([(
            MAIN_SERVICE.to_string(),
            self.main_service(app, depends_on),
        )]));
        main_file.write_yaml(&document).await?;
        info!(app = %app.full_path.display(), compose_file = %main_file.path().display(), "compose file for the app created");

        let mut project = ComposeProject::new(main_file.path());
        project.override_file = self.write_overrides(app, &fragments).await?;
        Ok(project)
    }

    fn project_name(&self, app: &ArduinoApp) -> Result<String> {
        let id = self.resolver.from_path(&app.full_path)?;
        let slug = slugify(id.relative())?;
        Ok(if id.is_example() {
            format!("examples-{}", slug)
        } else {
            slug
        })
    }

    fn main_service(&self, app: &ArduinoApp, depends_on: Vec<String>) -> MainService {
        let app_path = app.full_path.to_string_lossy().into_owned();

        let mut volumes = vec![Volume {
            kind: "bind",
            source: app_path.clone(),
            target: APP_MOUNT.to_string(),
        }];
        if let Some(socket) = &self.host.router_socket {
            volumes.push(Volume {
                kind: "bind",
                source: socket.to_string_lossy().into_owned(),
                target: ROUTER_SOCKET_MOUNT.to_string(),
            });
        }

        let app_ports = app.descriptor.ports.iter().map(u16::to_string);
        let brick_ports = app
            .descriptor
            .bricks
            .iter()
            .filter_map(|b| self.catalog.find_brick_by_id(&b.id))
            .flat_map(|b| b.ports.iter().cloned());
        let mut seen = HashSet::new();
        let ports = app_ports
            .chain(brick_ports)
            .map(|p| format!("{p}:{p}"))
            .filter(|p| seen.insert(p.clone()))
            .collect();

        MainService {
            image: self.python_image.to_string(),
            depends_on,
            volumes,
            devices: self.host.devices.clone(),
            ports,
            user: self.host.user.clone(),
            group_add: EXTRA_GROUPS.iter().map(|g| g.to_string()).collect(),
            entrypoint: ENTRYPOINT.to_string(),
            extra_hosts: vec![ROUTER_HOST.to_string()],
            labels: BTreeMap::from([
                (APP_LABEL.to_string(), "true".to_string()),
                (APP_PATH_LABEL.to_string(), app_path),
            ]),
        }
    }

    /// Device passthrough for the services of bricks that need it. A stale
    /// override from a previous run is removed when none applies.
    async fn write_overrides(&self, app: &ArduinoApp, fragments: &[(&str, File)]) -> Result<Option<PathBuf>> {
        let file = app.app_compose_overrides_file();
        let mut services = BTreeMap::new();

        if !self.host.devices.is_empty() {
            for (brick_id, fragment) in fragments {
                let needs_devices = self
                    .catalog
                    .find_brick_by_id(brick_id)
                    .is_some_and(|b| b.require_devices);
                if !needs_devices {
                    continue;
                }
                for service in fragment_services(fragment).await? {
                    services.insert(
                        service,
                        DeviceOverride {
                            devices: self.host.devices.clone(),
                        },
                    );
                }
            }
        }

        if services.is_empty() {
            file.delete().await?;
            return Ok(None);
        }
        file.write_yaml(&OverrideCompose { services }).await?;
        Ok(Some(file.path().to_path_buf()))
    }
}

/// Sorted, deduplicated, without the main service
fn dependencies(services: Vec<String>) -> Vec<String> {
    services
        .into_iter()
        .filter(|s| s != MAIN_SERVICE)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Compose project of an app that was provisioned before, if any
pub async fn existing_project(app: &ArduinoApp) -> Option<ComposeProject> {
    let main_file = app.app_compose_file();
    if !main_file.exists().await {
        return None;
    }
    let overrides = app.app_compose_overrides_file();
    let mut project = ComposeProject::new(main_file.path());
    if overrides.exists().await {
        project.override_file = Some(overrides.path().to_path_buf());
    }
    Some(project)
}

async fn read_fragment(fragment: &File) -> Result<Value> {
    Ok(serde_yaml::from_str(&fragment.read_string().await?)?)
}

/// Names of the services a brick fragment defines
pub async fn fragment_services(fragment: &File) -> Result<Vec<String>> {
    let doc = read_fragment(fragment).await?;
    Ok(doc
        .get("services")
        .and_then(Value::as_mapping)
        .map(|services| {
            services
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

/// Images referenced by a brick fragment, with `${VAR}` references resolved
/// against `env`
pub async fn fragment_images(fragment: &File, env: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let doc = read_fragment(fragment).await?;
    let Some(services) = doc.get("services").and_then(Value::as_mapping) else {
        return Ok(Vec::new());
    };
    Ok(services
        .values()
        .filter_map(|service| service.get("image")?.as_str())
        .map(|image| interpolate(image, env))
        .collect())
}

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}").expect("variable regex is valid")
});

/// Compose-style `${NAME}`, `${NAME-default}` and `${NAME:-default}`
fn interpolate(value: &str, env: &BTreeMap<String, String>) -> String {
    VARIABLE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let current = env.get(&caps[1]);
            let default = caps.get(3).map_or("", |m| m.as_str());
            match (current, caps.get(2).map(|m| m.as_str())) {
                (Some(v), Some(":-")) if v.is_empty() => default.to_string(),
                (Some(v), _) => v.clone(),
                (None, _) => default.to_string(),
            }
        })
        .into_owned()
}
