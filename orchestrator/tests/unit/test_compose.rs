//! Compose assembly tests

use app_orchestrator::apps::descriptor::BrickInstance;
use app_orchestrator::deploy::compose::{ComposeAssembly, HostProfile};
use app_orchestrator::deploy::runtime::{APP_LABEL, APP_PATH_LABEL};
use app_orchestrator::filesys::file::File;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::common::{descriptor, read, Workspace, PYTHON_IMAGE};
use crate::fakes::FakeRuntime;

const DB_FRAGMENT: &str = r#"
services:
  dbstorage:
    image: ghcr.io/arduino/app-bricks/dbstorage:0.5.0
"#;

#[tokio::test]
async fn test_assembly_is_deterministic() {
    let ws = Workspace::new().await;
    let mut desc = descriptor("Weather station");
    desc.ports = vec![8080];
    desc.bricks = vec![
        BrickInstance::new("arduino:object_detection"),
        BrickInstance::new("arduino:dbstorage"),
    ];
    let app = ws.python_app("weather", desc).await;
    File::new(app.brick_compose_file("arduino:dbstorage").unwrap().path())
        .write_atomic(DB_FRAGMENT.as_bytes())
        .await
        .unwrap();

    let runtime = FakeRuntime {
        services: vec!["main".to_string(), "dbstorage".to_string(), "dbstorage".to_string()],
        ..Default::default()
    };
    let catalog = ws.catalog();
    let resolver = ws.resolver();
    let host = HostProfile {
        user: Some("1000:1000".to_string()),
        ..Default::default()
    };
    let assembly = ComposeAssembly {
        runtime: &runtime,
        catalog: &catalog,
        resolver: &resolver,
        host: &host,
        python_image: PYTHON_IMAGE,
    };
    let cancel = CancellationToken::new();

    let project = assembly.generate(&app, &cancel).await.unwrap();
    let first = read(&project.main_file).await;
    assembly.generate(&app, &cancel).await.unwrap();
    let second = read(&project.main_file).await;
    assert_eq!(first, second);
    assert_eq!(project.override_file, None);

    let doc: Value = serde_yaml::from_str(&first).unwrap();
    assert_eq!(doc["name"].as_str(), Some("weather"));
    assert_eq!(doc["include"].as_sequence().map(Vec::len), Some(1));

    let main = &doc["services"]["main"];
    assert_eq!(main["image"].as_str(), Some(PYTHON_IMAGE));
    assert_eq!(main["depends_on"], serde_yaml::from_str::<Value>("[dbstorage]").unwrap());
    assert_eq!(
        main["ports"],
        serde_yaml::from_str::<Value>(r#"["8080:8080", "7000:7000"]"#).unwrap()
    );
    assert_eq!(main["user"].as_str(), Some("1000:1000"));
    assert_eq!(main["labels"][APP_LABEL].as_str(), Some("true"));
    assert_eq!(
        main["labels"][APP_PATH_LABEL].as_str(),
        Some(app.full_path.to_string_lossy().as_ref())
    );
}

#[tokio::test]
async fn test_missing_fragments_skip_introspection() {
    let ws = Workspace::new().await;
    let mut desc = descriptor("No fragments");
    desc.bricks = vec![BrickInstance::new("arduino:dbstorage")];
    let app = ws.python_app("no-fragments", desc).await;

    let runtime = FakeRuntime::default();
    let catalog = ws.catalog();
    let resolver = ws.resolver();
    let host = HostProfile::default();
    let assembly = ComposeAssembly {
        runtime: &runtime,
        catalog: &catalog,
        resolver: &resolver,
        host: &host,
        python_image: PYTHON_IMAGE,
    };

    let project = assembly.generate(&app, &CancellationToken::new()).await.unwrap();
    assert!(runtime.calls().is_empty());

    let doc: Value = serde_yaml::from_str(&read(&project.main_file).await).unwrap();
    assert!(doc["services"]["main"]["depends_on"].is_null());
    assert!(doc["services"]["main"]["user"].is_null());
}

#[tokio::test]
async fn test_device_override_for_bricks_requiring_devices() {
    let ws = Workspace::new().await;
    let mut desc = descriptor("Camera");
    desc.bricks = vec![
        BrickInstance::new("arduino:camera_runner"),
        BrickInstance::new("arduino:dbstorage"),
    ];
    let app = ws.python_app("camera", desc).await;
    File::new(app.brick_compose_file("arduino:camera_runner").unwrap().path())
        .write_atomic(b"services:\n  camera-runner:\n    image: ghcr.io/arduino/app-bricks/camera:0.5.0\n")
        .await
        .unwrap();
    File::new(app.brick_compose_file("arduino:dbstorage").unwrap().path())
        .write_atomic(DB_FRAGMENT.as_bytes())
        .await
        .unwrap();

    let runtime = FakeRuntime::default();
    let catalog = ws.catalog();
    let resolver = ws.resolver();
    let with_camera = HostProfile {
        devices: vec!["/dev/video0".to_string()],
        ..Default::default()
    };
    let assembly = ComposeAssembly {
        runtime: &runtime,
        catalog: &catalog,
        resolver: &resolver,
        host: &with_camera,
        python_image: PYTHON_IMAGE,
    };
    let cancel = CancellationToken::new();

    let project = assembly.generate(&app, &cancel).await.unwrap();
    let override_file = project.override_file.clone().unwrap();
    let overrides: Value = serde_yaml::from_str(&read(&override_file).await).unwrap();
    let expected: Value =
        serde_yaml::from_str("services:\n  camera-runner:\n    devices:\n    - /dev/video0\n").unwrap();
    assert_eq!(overrides, expected);

    let doc: Value = serde_yaml::from_str(&read(&project.main_file).await).unwrap();
    assert_eq!(
        doc["services"]["main"]["devices"],
        serde_yaml::from_str::<Value>("[/dev/video0]").unwrap()
    );

    // no devices on the host: the stale override goes away
    let without_camera = HostProfile::default();
    let assembly = ComposeAssembly {
        host: &without_camera,
        ..assembly
    };
    let project = assembly.generate(&app, &cancel).await.unwrap();
    assert_eq!(project.override_file, None);
    assert!(!override_file.exists());
}

#[tokio::test]
async fn test_project_name_transliterates_app_dir() {
    let ws = Workspace::new().await;
    let runtime = FakeRuntime::default();
    let catalog = ws.catalog();
    let resolver = ws.resolver();
    let host = HostProfile::default();
    let assembly = ComposeAssembly {
        runtime: &runtime,
        catalog: &catalog,
        resolver: &resolver,
        host: &host,
        python_image: PYTHON_IMAGE,
    };
    let cancel = CancellationToken::new();

    let mut names = Vec::new();
    for dir in ["café", "日本", "中国"] {
        let app = ws.python_app(dir, descriptor(dir)).await;
        let project = assembly.generate(&app, &cancel).await.unwrap();
        let doc: Value = serde_yaml::from_str(&read(&project.main_file).await).unwrap();
        names.push(doc["name"].as_str().unwrap().to_string());
    }
    assert_eq!(names[0], "cafe");
    for name in &names {
        assert!(!name.is_empty());
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'), "{}", name);
    }
    assert_ne!(names[1], names[2]);
}
