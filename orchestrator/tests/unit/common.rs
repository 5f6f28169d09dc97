//! Throwaway app roots and catalog

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use app_orchestrator::apps::arduino_app::ArduinoApp;
use app_orchestrator::apps::descriptor::AppDescriptor;
use app_orchestrator::apps::generator::{generate_app, GenerateOptions};
use app_orchestrator::apps::id::AppIdResolver;
use app_orchestrator::catalog::bricks::BricksIndex;
use app_orchestrator::catalog::models::ModelsIndex;
use app_orchestrator::catalog::store::StaticStore;
use app_orchestrator::catalog::{Catalog, CatalogHandle};
use app_orchestrator::deploy::compose::HostProfile;
use app_orchestrator::deploy::lifecycle::{Lifecycle, LifecycleOptions};
use app_orchestrator::deploy::runtime::ContainerRuntime;
use app_orchestrator::deploy::sketch::SketchToolchain;
use app_orchestrator::filesys::dir::Dir;
use app_orchestrator::storage::layout::StorageLayout;

use crate::fakes::FakeToolchain;

pub const PYTHON_IMAGE: &str = "ghcr.io/arduino/app-bricks/python-apps-base:0.5.0";

pub const BRICKS: &str = r#"
bricks:
- id: arduino:dbstorage
  name: Database Storage
  category: storage
  require_container: true
  variables:
  - name: DB_PASSWORD
    description: database password
  - name: DB_NAME
    default_value: apps
- id: arduino:object_detection
  name: Object Detection
  category: video
  require_model: true
  model_name: yolox-object-detection
  ports: [7000]
- id: arduino:camera_runner
  name: Camera Runner
  category: video
  require_container: true
  require_devices: true
"#;

pub const MODELS: &str = r#"
models:
- yolox-object-detection:
    name: General purpose object detection
    runner: brick
    bricks: [arduino:object_detection]
    model_configuration:
      EI_OBJ_DETECTION_MODEL: /models/yolox
- face-detection:
    name: Face detection
    runner: brick
    bricks: [arduino:object_detection]
"#;

pub struct Workspace {
    pub tmp: TempDir,
    pub layout: StorageLayout,
}

impl Workspace {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().join("apps"), tmp.path().join("data"));
        layout.setup().await.unwrap();
        Self { tmp, layout }
    }

    pub fn apps_root(&self) -> PathBuf {
        self.layout.apps_dir.clone()
    }

    pub fn resolver(&self) -> AppIdResolver {
        AppIdResolver::new(self.layout.apps_dir().path(), self.layout.examples_dir().path())
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::from_parts(
            StaticStore::new(self.tmp.path().join("store")),
            BricksIndex::parse(BRICKS).unwrap(),
            ModelsIndex::parse(MODELS).unwrap(),
        )
    }

    /// Generate an app under the user root
    pub async fn app(&self, dir: &str, descriptor: AppDescriptor, options: GenerateOptions) -> ArduinoApp {
        let base = Dir::new(self.apps_root().join(dir));
        generate_app(&base, &descriptor, options).await.unwrap();
        ArduinoApp::load(base.path()).await.unwrap()
    }

    /// Generate a python app under the examples root
    pub async fn example_app(&self, dir: &str, descriptor: AppDescriptor) -> ArduinoApp {
        let base = self.layout.examples_dir().subdir(dir);
        let options = GenerateOptions {
            skip_sketch: true,
            ..Default::default()
        };
        generate_app(&base, &descriptor, options).await.unwrap();
        ArduinoApp::load(base.path()).await.unwrap()
    }

    pub async fn python_app(&self, dir: &str, descriptor: AppDescriptor) -> ArduinoApp {
        let options = GenerateOptions {
            skip_sketch: true,
            ..Default::default()
        };
        self.app(dir, descriptor, options).await
    }

    pub fn lifecycle(&self, runtime: Arc<dyn ContainerRuntime>) -> Lifecycle {
        self.lifecycle_with(runtime, Arc::new(FakeToolchain::default()))
    }

    pub fn lifecycle_with(&self, runtime: Arc<dyn ContainerRuntime>, toolchain: Arc<dyn SketchToolchain>) -> Lifecycle {
        let options = LifecycleOptions {
            python_image: PYTHON_IMAGE.to_string(),
            host: Some(HostProfile::default()),
            ..Default::default()
        };
        Lifecycle::new(
            runtime,
            toolchain,
            Arc::new(CatalogHandle::fixed(self.catalog())),
            Arc::new(self.resolver()),
            options,
        )
    }
}

pub fn descriptor(name: &str) -> AppDescriptor {
    AppDescriptor {
        name: name.to_string(),
        ..Default::default()
    }
}

pub async fn read(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap()
}
