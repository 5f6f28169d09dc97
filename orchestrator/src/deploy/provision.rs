//! App provisioning: images, brick fragments and the generated compose project

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::apps::arduino_app::ArduinoApp;
use crate::apps::id::AppIdResolver;
use crate::catalog::Catalog;
use crate::deploy::compose::{fragment_images, ComposeAssembly, HostProfile};
use crate::deploy::runtime::{ComposeProject, ContainerRuntime, RunSpec};
use crate::deploy::stream::LineSink;
use crate::errors::Result;

const ARDUINO_NAMESPACE: &str = "arduino:";

/// Result of a successful provisioning run
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub project: ComposeProject,
    /// Catalog the project was generated against; the app's own index after
    /// dynamic provisioning
    pub catalog: Arc<Catalog>,
}

pub struct Provisioner<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub catalog: Arc<Catalog>,
    pub resolver: &'a AppIdResolver,
    pub host: &'a HostProfile,
    pub python_image: &'a str,
    pub trusted_registries: &'a [String],
}

impl Provisioner<'_> {
    pub async fn provision(
        &self,
        app: &ArduinoApp,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<Provisioned> {
        let started = Instant::now();
        let mut pulled: HashSet<String> = self.runtime.list_images(cancel).await?.into_iter().collect();

        if !pulled.contains(self.python_image) {
            info!(image = self.python_image, "pulling base image");
            self.runtime.pull_image(self.python_image, sink, cancel).await?;
            pulled.insert(self.python_image.to_string());
        }

        let catalog = if self.needs_dynamic_provisioning(app) {
            self.dynamic_provisioning(app, sink, cancel).await?
        } else {
            debug!(app = %app.full_path.display(), "static provisioning");
            self.catalog
                .store()
                .save_compose_folder_to(&app.compose_dir())
                .await?;
            self.catalog.clone()
        };

        let assembly = ComposeAssembly {
            runtime: self.runtime,
            catalog: &catalog,
            resolver: self.resolver,
            host: self.host,
            python_image: self.python_image,
        };
        let project = assembly.generate(app, cancel).await?;

        for image in self.extra_images(app).await? {
            if pulled.contains(&image) {
                continue;
            }
            info!(image = %image, "pulling brick image");
            self.runtime.pull_image(&image, sink, cancel).await?;
            pulled.insert(image);
        }

        info!(
            app = %app.full_path.display(),
            duration = ?started.elapsed(),
            "provisioning done"
        );
        Ok(Provisioned { project, catalog })
    }

    /// Third-party bricks, or a base image the bundled catalog was not built
    /// for, need the base image to generate the app's fragments and index
    pub fn needs_dynamic_provisioning(&self, app: &ArduinoApp) -> bool {
        let third_party = app
            .descriptor
            .bricks
            .iter()
            .any(|b| !b.id.starts_with(ARDUINO_NAMESPACE));
        let version_mismatch = match (self.catalog.version(), image_tag(self.python_image)) {
            (Some(version), Some(tag)) => tag.trim_start_matches('v') != version.to_string(),
            _ => false,
        };
        third_party || version_mismatch
    }

    async fn dynamic_provisioning(
        &self,
        app: &ArduinoApp,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> Result<Arc<Catalog>> {
        info!(app = %app.full_path.display(), image = self.python_image, "dynamic provisioning");
        let spec = RunSpec {
            image: self.python_image.to_string(),
            entrypoint: vec!["/run.sh".to_string(), "provision".to_string()],
            user: self.host.user.clone(),
            binds: vec![format!("{}:/app", app.full_path.display())],
        };
        self.runtime.run_container(&spec, sink, cancel).await?;
        Ok(Arc::new(Catalog::load(app.cache_dir().path()).await?))
    }

    /// Trusted-registry images referenced by the app's brick fragments
    async fn extra_images(&self, app: &ArduinoApp) -> Result<BTreeSet<String>> {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        let mut images = BTreeSet::new();
        for brick in &app.descriptor.bricks {
            let fragment = app.brick_compose_file(&brick.id)?;
            if !fragment.exists().await {
                continue;
            }
            for image in fragment_images(&fragment, &env).await? {
                if image != self.python_image
                    && self
                        .trusted_registries
                        .iter()
                        .any(|prefix| image.starts_with(prefix.as_str()))
                {
                    images.insert(image);
                }
            }
        }
        Ok(images)
    }
}

/// Tag of an image reference, ignoring registry ports and digests
fn image_tag(image: &str) -> Option<&str> {
    let image = image.split('@').next()?;
    let name = image.rsplit('/').next()?;
    name.split_once(':').map(|(_, tag)| tag)
}
