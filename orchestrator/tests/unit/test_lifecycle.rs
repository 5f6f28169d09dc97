//! Lifecycle engine tests over a fake runtime

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use app_orchestrator::apps::descriptor::BrickInstance;
use app_orchestrator::apps::generator::GenerateOptions;
use app_orchestrator::apps::id::AppId;
use app_orchestrator::deploy::runtime::{ContainerState, ContainerSummary};
use app_orchestrator::deploy::status::Status;
use app_orchestrator::deploy::stream::StreamMessage;
use app_orchestrator::errors::OrchestratorError;
use app_orchestrator::filesys::file::File;

use crate::common::{descriptor, read, Workspace, PYTHON_IMAGE};
use crate::fakes::{FakeRuntime, FakeToolchain};

#[tokio::test]
async fn test_start_python_app() {
    let ws = Workspace::new().await;
    let app = ws.python_app("weather", descriptor("Weather")).await;
    let runtime = Arc::new(FakeRuntime::default());
    let lifecycle = ws.lifecycle(runtime.clone());

    let messages: Vec<StreamMessage> = lifecycle.start(app.clone()).collect().await;
    let last = messages.last().unwrap();
    assert!(matches!(last, StreamMessage::Progress(p) if p.progress == 100.0 && p.name == "user:weather"));
    assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);

    assert_eq!(runtime.calls(), vec![format!("pull {}", PYTHON_IMAGE), "up".to_string()]);
    assert!(app.app_compose_file().exists().await);
}

#[tokio::test]
async fn test_start_flashes_sketch() {
    let ws = Workspace::new().await;
    let app = ws
        .app("blink", descriptor("Blink"), GenerateOptions { skip_python: true, ..Default::default() })
        .await;
    let runtime = Arc::new(FakeRuntime::default());
    let toolchain = Arc::new(FakeToolchain::default());
    let lifecycle = ws.lifecycle_with(runtime.clone(), toolchain.clone());

    lifecycle.start(app.clone()).wait().await.unwrap();

    let calls = toolchain.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("compile arduino:zephyr:unoq"));
    assert!(calls[1].starts_with("upload arduino:zephyr:unoq"));
    // sketch only, no containers involved
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_streams_named_by_app_id() {
    let ws = Workspace::new().await;
    let user = ws.python_app("weather", descriptor("Weather")).await;
    let example = ws.example_app("weather", descriptor("Weather")).await;
    let runtime = Arc::new(FakeRuntime::with_images(&[PYTHON_IMAGE]));
    let lifecycle = ws.lifecycle(runtime);

    let mut names = Vec::new();
    for app in [user, example] {
        let messages: Vec<StreamMessage> = lifecycle.stop(app).collect().await;
        match messages.last() {
            Some(StreamMessage::Progress(p)) => names.push(p.name.clone()),
            other => panic!("unexpected terminal message {:?}", other),
        }
    }
    assert_eq!(names, vec!["user:weather", "examples:weather"]);
}

#[tokio::test]
async fn test_stop_survives_failed_empty_sketch_flash() {
    let ws = Workspace::new().await;
    let app = ws
        .app("blink", descriptor("Blink"), GenerateOptions { skip_python: true, ..Default::default() })
        .await;
    let toolchain = Arc::new(FakeToolchain {
        fail_upload: true,
        ..Default::default()
    });
    let lifecycle = ws.lifecycle_with(Arc::new(FakeRuntime::default()), toolchain.clone());

    let messages: Vec<StreamMessage> = lifecycle.stop(app).collect().await;
    assert!(matches!(messages.last(), Some(StreamMessage::Progress(p)) if p.progress == 100.0));
    assert!(!messages.iter().any(|m| matches!(m, StreamMessage::Error(_))));

    let calls = toolchain.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].starts_with("upload") && calls[1].contains("empty_sketch"));
}

#[tokio::test]
async fn test_failed_stop_keeps_app_directory() {
    let ws = Workspace::new().await;
    let app = ws.python_app("sticky", descriptor("Sticky")).await;
    let runtime = Arc::new(FakeRuntime {
        fail_compose_stop: true,
        ..FakeRuntime::with_images(&[PYTHON_IMAGE])
    });
    let lifecycle = ws.lifecycle(runtime.clone());
    lifecycle.provision(app.clone()).await.unwrap();

    let dir = app.full_path.clone();
    let result = lifecycle.delete(app).await;
    assert!(matches!(result, Err(OrchestratorError::RuntimeOperationFailed(_))));
    assert!(dir.join("app.yaml").exists());
    assert_eq!(runtime.calls().last().map(String::as_str), Some("stop 5"));
}

#[tokio::test]
async fn test_only_trusted_brick_images_pulled() {
    let ws = Workspace::new().await;
    let mut desc = descriptor("Db");
    desc.bricks = vec![BrickInstance::new("arduino:dbstorage")];
    let app = ws.python_app("db", desc).await;
    File::new(ws.tmp.path().join("store/compose/arduino/dbstorage/brick_compose.yaml"))
        .write_atomic(
            br#"
services:
  dbstorage:
    image: influxdb:2.7
  helper:
    image: ghcr.io/arduino/app-bricks/helper:${HELPER_TAG:-1.0}
  sidecar:
    image: docker.io/someone/sidecar:latest
"#,
        )
        .await
        .unwrap();

    let runtime = Arc::new(FakeRuntime::with_images(&[PYTHON_IMAGE]));
    let lifecycle = ws.lifecycle(runtime.clone());
    lifecycle.provision(app).await.unwrap();

    assert_eq!(
        runtime.calls(),
        vec![
            "services".to_string(),
            "pull ghcr.io/arduino/app-bricks/helper:1.0".to_string(),
            "pull influxdb:2.7".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_third_party_brick_uses_dynamic_index() {
    let ws = Workspace::new().await;
    let mut desc = descriptor("Sensor");
    desc.bricks = vec![BrickInstance::new("acme:sensor")];
    let app = ws.python_app("sensor", desc).await;

    let runtime = Arc::new(FakeRuntime {
        services: vec!["sensor".to_string()],
        provision_output: vec![
            (
                ".cache/bricks-list.yaml".to_string(),
                "bricks:\n- id: acme:sensor\n  name: Sensor\n  ports: [9000]\n".to_string(),
            ),
            (
                ".cache/compose/acme/sensor/brick_compose.yaml".to_string(),
                "services:\n  sensor:\n    image: ghcr.io/arduino/acme-sensor:1.0\n".to_string(),
            ),
        ],
        ..FakeRuntime::with_images(&[PYTHON_IMAGE])
    });
    let lifecycle = ws.lifecycle(runtime.clone());
    lifecycle.provision(app.clone()).await.unwrap();

    assert_eq!(
        runtime.calls(),
        vec![
            format!("run {}", PYTHON_IMAGE),
            "services".to_string(),
            "pull ghcr.io/arduino/acme-sensor:1.0".to_string(),
        ]
    );
    let doc: serde_yaml::Value = serde_yaml::from_str(&read(app.app_compose_file().path()).await).unwrap();
    let main = &doc["services"]["main"];
    assert_eq!(main["ports"], serde_yaml::from_str::<serde_yaml::Value>(r#"["9000:9000"]"#).unwrap());
    assert_eq!(main["depends_on"], serde_yaml::from_str::<serde_yaml::Value>("[sensor]").unwrap());
}

#[tokio::test]
async fn test_stop_never_started_app() {
    let ws = Workspace::new().await;
    let app = ws.python_app("idle", descriptor("Idle")).await;
    let runtime = Arc::new(FakeRuntime::with_images(&[PYTHON_IMAGE]));
    let lifecycle = ws.lifecycle(runtime.clone());

    lifecycle.stop(app).wait().await.unwrap();
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_delete_stops_then_removes() {
    let ws = Workspace::new().await;
    let app = ws.python_app("gone", descriptor("Gone")).await;
    let runtime = Arc::new(FakeRuntime::with_images(&[PYTHON_IMAGE]));
    let lifecycle = ws.lifecycle(runtime.clone());

    lifecycle.provision(app.clone()).await.unwrap();
    let dir = app.full_path.clone();
    lifecycle.delete(app).await.unwrap();

    assert!(!dir.exists());
    assert_eq!(runtime.calls().last().map(String::as_str), Some("stop 5"));
}

#[tokio::test]
async fn test_dropping_start_stream_terminates_runtime_call() {
    let ws = Workspace::new().await;
    let app = ws.python_app("hang", descriptor("Hang")).await;
    let runtime = Arc::new(FakeRuntime {
        hang_compose_up: true,
        ..FakeRuntime::with_images(&[PYTHON_IMAGE])
    });
    let started = runtime.compose_up_started.clone();
    let dropped = runtime.compose_up_dropped.clone();
    let lifecycle = ws.lifecycle(runtime.clone());

    let mut stream = lifecycle.start(app);
    let mut infos = 0;
    let waiting = started.notified();
    tokio::pin!(waiting);
    loop {
        tokio::select! {
            _ = &mut waiting => break,
            message = stream.next() => match message {
                Some(StreamMessage::Info(_)) => infos += 1,
                Some(other) => panic!("unexpected message {:?}", other),
                None => panic!("stream ended early"),
            },
        }
    }
    assert!(infos >= 1);
    assert!(!dropped.load(Ordering::SeqCst));

    drop(stream);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("runtime call still running after the stream was dropped");
}

#[tokio::test]
async fn test_status_from_containers() {
    let ws = Workspace::new().await;
    let running = ws.python_app("running", descriptor("Running")).await;
    let runtime = Arc::new(FakeRuntime::default());
    runtime.containers.lock().unwrap().extend([
        ContainerSummary {
            id: "c1".to_string(),
            state: ContainerState::Running,
            app_path: Some(running.full_path.clone()),
        },
        ContainerSummary {
            id: "c2".to_string(),
            state: ContainerState::Exited,
            app_path: Some(running.full_path.clone()),
        },
        ContainerSummary {
            id: "c3".to_string(),
            state: ContainerState::Dead,
            app_path: Some("/somewhere/else".into()),
        },
    ]);
    let lifecycle = ws.lifecycle(runtime);
    let cancel = CancellationToken::new();

    let running_id: AppId = "user:running".parse().unwrap();
    let idle_id: AppId = "user:idle".parse().unwrap();
    let statuses = lifecycle
        .status_reporter()
        .status(&[running_id.clone(), idle_id.clone()], &cancel)
        .await
        .unwrap();
    assert_eq!(statuses[0].status, Status::Running);
    assert_eq!(statuses[1].status, Status::Stopped);
}

#[test]
fn test_status_mapping_is_total() {
    for state in ContainerState::ALL {
        let status = Status::from(state);
        let expected = match state {
            ContainerState::Running => Status::Running,
            ContainerState::Restarting => Status::Starting,
            ContainerState::Removing => Status::Stopping,
            ContainerState::Created | ContainerState::Exited | ContainerState::Paused => Status::Stopped,
            ContainerState::Dead => Status::Failed,
        };
        assert_eq!(status, expected, "{:?}", state);
    }
}
