//! App id addressing tests

use app_orchestrator::apps::id::{AppId, Namespace};
use app_orchestrator::apps::manager::find_app_dirs;
use app_orchestrator::errors::OrchestratorError;
use tokio_test::{assert_err, assert_ok};

use crate::common::{descriptor, Workspace};

#[tokio::test]
async fn test_discovered_paths_round_trip() {
    let ws = Workspace::new().await;
    ws.python_app("weather", descriptor("Weather")).await;
    ws.python_app("lab/nested/blink", descriptor("Blink")).await;
    let resolver = ws.resolver();

    let paths = find_app_dirs(&ws.apps_root()).await.unwrap();
    assert_eq!(paths.len(), 2);
    for path in paths {
        let id = assert_ok!(resolver.from_path(&path));
        assert!(id.is_app());
        assert_eq!(resolver.to_path(&id), std::fs::canonicalize(&path).unwrap());
        assert_eq!(resolver.from_path(resolver.to_path(&id)).unwrap(), id);
        assert_eq!(AppId::from_token(&id.token()).unwrap(), id);
    }
}

#[tokio::test]
async fn test_scan_skips_code_dirs_and_links() {
    let ws = Workspace::new().await;
    ws.python_app("weather", descriptor("Weather")).await;
    // descriptors under skipped directories do not make apps
    ws.python_app("lab/python/helper", descriptor("Helper")).await;
    ws.python_app("lab/.cache/stale", descriptor("Stale")).await;
    #[cfg(unix)]
    std::os::unix::fs::symlink(ws.apps_root(), ws.apps_root().join("lab/loop")).unwrap();

    let paths = find_app_dirs(&ws.apps_root()).await.unwrap();
    assert_eq!(paths, vec![ws.apps_root().join("weather")]);

    let missing = find_app_dirs(&ws.tmp.path().join("nowhere")).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_nested_id_keeps_segments() {
    let ws = Workspace::new().await;
    let app = ws.python_app("lab/nested/blink", descriptor("Blink")).await;
    let id = ws.resolver().from_path(&app.full_path).unwrap();
    assert_eq!(id.to_string(), "user:lab/nested/blink");
    assert_eq!(id.namespace(), Namespace::User);
}

#[tokio::test]
async fn test_paths_outside_roots_rejected() {
    let ws = Workspace::new().await;
    let resolver = ws.resolver();

    for path in [ws.tmp.path().join("elsewhere"), ws.tmp.path().join("apps/../data")] {
        assert!(matches!(
            resolver.from_path(&path),
            Err(OrchestratorError::InvalidId(_))
        ));
    }
    // a root itself is not an app
    assert_err!(resolver.from_path(ws.apps_root()));
}

#[test]
fn test_escaping_ids_rejected() {
    for input in ["user:../etc", "user:a/../../b", "examples:", "other:app", "user:a//b"] {
        assert!(input.parse::<AppId>().is_err(), "{} should be rejected", input);
    }
}
