//! App store tests

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use app_orchestrator::apps::arduino_app::ArduinoApp;
use app_orchestrator::apps::manager::{AppManager, CreateAppRequest, EditAppRequest, ListAppsRequest};
use app_orchestrator::deploy::runtime::{ContainerState, ContainerSummary};
use app_orchestrator::deploy::status::Status;
use app_orchestrator::errors::OrchestratorError;
use app_orchestrator::filesys::file::File;

use crate::common::{descriptor, Workspace};
use crate::fakes::FakeRuntime;

fn manager(ws: &Workspace, runtime: Arc<FakeRuntime>) -> AppManager {
    AppManager::new(ws.lifecycle(runtime), ws.layout.clone())
}

fn create(name: &str) -> CreateAppRequest {
    CreateAppRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_and_list() {
    let ws = Workspace::new().await;
    let runtime = Arc::new(FakeRuntime::default());
    let apps = manager(&ws, runtime.clone());

    let id = apps.create(create("My Weather App")).await.unwrap();
    assert_eq!(id.to_string(), "user:my-weather-app");

    let duplicate = apps.create(create("My Weather App")).await;
    assert!(matches!(duplicate, Err(OrchestratorError::AlreadyExists(_))));

    let both_skipped = CreateAppRequest {
        skip_python: true,
        skip_sketch: true,
        ..create("Nothing")
    };
    assert!(matches!(apps.create(both_skipped).await, Err(OrchestratorError::InvalidApp(_))));

    // a directory with a broken descriptor is reported, not fatal
    File::new(ws.apps_root().join("broken/app.yaml"))
        .write_atomic(b"name: [unclosed")
        .await
        .unwrap();

    let app = apps.load(&id).await.unwrap();
    runtime.containers.lock().unwrap().push(ContainerSummary {
        id: "c1".to_string(),
        state: ContainerState::Running,
        app_path: Some(app.full_path.clone()),
    });

    let cancel = CancellationToken::new();
    let req = ListAppsRequest {
        show_apps: true,
        show_examples: true,
        ..Default::default()
    };
    let listed = apps.list(&req, &cancel).await.unwrap();
    assert_eq!(listed.apps.len(), 1);
    assert_eq!(listed.apps[0].name, "My Weather App");
    assert_eq!(listed.apps[0].status, Status::Running);
    assert_eq!(listed.broken_apps.len(), 1);
    assert_eq!(listed.broken_apps[0].name, "broken");

    let stopped_only = ListAppsRequest {
        status: Some(Status::Stopped),
        ..req
    };
    assert!(apps.list(&stopped_only, &cancel).await.unwrap().apps.is_empty());
}

#[tokio::test]
async fn test_clone_naming() {
    let ws = Workspace::new().await;
    let apps = manager(&ws, Arc::new(FakeRuntime::default()));
    let source = apps.create(create("Blink")).await.unwrap();
    let source_app = apps.load(&source).await.unwrap();
    File::new(source_app.cache_dir().path().join("app-compose.yaml"))
        .write_atomic(b"name: blink\n")
        .await
        .unwrap();

    let first = apps.clone_app(&source, None, None).await.unwrap();
    let second = apps.clone_app(&source, None, None).await.unwrap();
    assert_eq!(first.to_string(), "user:blink-copy0");
    assert_eq!(second.to_string(), "user:blink-copy1");

    let copy = apps.load(&first).await.unwrap();
    assert_eq!(copy.descriptor.name, "Blink");
    assert!(!copy.app_compose_file().exists().await);

    let named = apps
        .clone_app(&source, Some("Blink Fast".to_string()), None)
        .await
        .unwrap();
    assert_eq!(named.to_string(), "user:blink-fast");
    assert_eq!(apps.load(&named).await.unwrap().descriptor.name, "Blink Fast");

    let collision = apps.clone_app(&source, Some("Blink Fast".to_string()), None).await;
    assert!(matches!(collision, Err(OrchestratorError::AlreadyExists(_))));
}

#[tokio::test]
async fn test_edit_renames_and_keeps_default() {
    let ws = Workspace::new().await;
    let apps = manager(&ws, Arc::new(FakeRuntime::default()));
    let id = apps.create(create("Old Name")).await.unwrap();
    let app = apps.load(&id).await.unwrap();
    apps.set_default_app(Some(&app)).await.unwrap();

    let edit = EditAppRequest {
        name: Some("New Name".to_string()),
        description: Some("renamed".to_string()),
        ..Default::default()
    };
    let edited = apps.edit(app, edit).await.unwrap();
    assert!(edited.full_path.ends_with("new-name"));
    assert_eq!(edited.descriptor.description, "renamed");

    let reloaded = ArduinoApp::load(&edited.full_path).await.unwrap();
    assert_eq!(reloaded.descriptor.name, "New Name");

    let default_app = apps.default_app().await.unwrap().unwrap();
    assert_eq!(default_app.full_path, edited.full_path);
}

#[tokio::test]
async fn test_stale_default_is_cleared() {
    let ws = Workspace::new().await;
    let apps = manager(&ws, Arc::new(FakeRuntime::default()));

    assert!(apps.default_app().await.unwrap().is_none());

    let file = ws.layout.default_app_file();
    file.write_atomic(b"  \n").await.unwrap();
    assert!(apps.default_app().await.unwrap().is_none());
    assert!(!file.exists().await);

    file.write_atomic(b"/no/such/app").await.unwrap();
    assert!(apps.default_app().await.is_err());
    assert!(!file.exists().await);
}

#[tokio::test]
async fn test_details_reports_bricks() {
    let ws = Workspace::new().await;
    let apps = manager(&ws, Arc::new(FakeRuntime::default()));
    let req = CreateAppRequest {
        bricks: vec!["arduino:dbstorage".to_string()],
        ..create("Db")
    };
    let id = apps.create(req).await.unwrap();
    let app = apps.load(&id).await.unwrap();

    let details = apps.details(&app, &CancellationToken::new()).await.unwrap();
    assert_eq!(details.id, id);
    assert_eq!(details.status, Status::Stopped);
    assert!(!details.default);
    assert_eq!(details.bricks.len(), 1);
    assert_eq!(details.bricks[0].name, "Database Storage");

    let unknown = CreateAppRequest {
        bricks: vec!["arduino:nope".to_string()],
        ..create("Unknown")
    };
    assert!(matches!(apps.create(unknown).await, Err(OrchestratorError::BrickNotFound(_))));
}

#[tokio::test]
async fn test_generated_app_is_loadable() {
    let ws = Workspace::new().await;
    let app = ws.python_app("plain", descriptor("Plain")).await;
    assert!(app.main_python_file.is_some());
    assert!(app.main_sketch_path.is_none());
}

#[tokio::test]
async fn test_create_transliterates_name() {
    let ws = Workspace::new().await;
    let apps = manager(&ws, Arc::new(FakeRuntime::default()));

    let id = apps.create(create("Café Météo")).await.unwrap();
    assert_eq!(id.to_string(), "user:cafe-meteo");
    assert_eq!(apps.load(&id).await.unwrap().descriptor.name, "Café Météo");

    let nothing_left = apps.create(create("!!!")).await;
    assert!(matches!(nothing_left, Err(OrchestratorError::InvalidApp(_))));
}
