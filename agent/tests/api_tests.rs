//! HTTP surface: authentication, target lookup and job lifecycle.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use backup_agent::backup::{BackupSettings, BackupWorkflow};
use backup_agent::config::{AgentConfig, TargetConfig};
use backup_agent::operation_tracker::BackupOperation;
use backup_agent::types::JobStatus;
use backup_agent::{build_router, AppState};
use common::populate_data_dir;
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const API_KEY: &str = "test-key";

struct TestAgent {
    app: Router,
    state: Arc<AppState>,
    root: TempDir,
    _data: TempDir,
}

fn spawn_agent() -> TestAgent {
    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    populate_data_dir(&data.path().join("registry"));

    let mut config = AgentConfig {
        api_key: API_KEY.to_string(),
        backup_path: root.path().to_path_buf(),
        ..AgentConfig::default()
    };
    config.targets.insert(
        "registry".to_string(),
        TargetConfig {
            path: data.path().join("registry"),
            excludes: vec!["@registry.tmp".to_string()],
            strategy: None,
        },
    );

    let settings = config.backup_settings("tar".to_string()).unwrap();
    let state = Arc::new(AppState::new(config, BackupWorkflow::with_defaults(settings)));

    TestAgent {
        app: build_router(state.clone()),
        state,
        root,
        _data: data,
    }
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", API_KEY));

    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn wait_for_job(app: &Router, job_id: &str) -> Value {
    for _ in 0..100 {
        let (_, body) = call(app, request("GET", &format!("/job/{}", job_id), None)).await;
        if body["job_status"] != "Running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_requests_without_key_are_rejected() {
    let agent = spawn_agent();
    let req = Request::builder()
        .method("GET")
        .uri("/targets")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();

    let (status, _) = call(&agent.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_targets_are_listed() {
    let agent = spawn_agent();

    let (status, body) = call(&agent.app, request("GET", "/targets", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["name"], "registry");
    assert_eq!(body["data"][0]["strategy"], "tar");
}

#[tokio::test]
async fn test_exclude_args_for_target() {
    let agent = spawn_agent();

    let (_, body) = call(
        &agent.app,
        request(
            "POST",
            "/backup/excludes",
            Some(serde_json::json!({ "target": "registry" })),
        ),
    )
    .await;

    assert_eq!(
        body["data"]["args"],
        serde_json::json!(["--exclude=lost+found", "--exclude=./@registry.tmp"])
    );
}

#[tokio::test]
async fn test_unknown_target_is_an_error_response() {
    let agent = spawn_agent();

    let (status, body) = call(
        &agent.app,
        request(
            "POST",
            "/backup/dump",
            Some(serde_json::json!({ "target": "uploads" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("uploads"));
}

#[tokio::test]
async fn test_dump_then_restore_jobs_complete() {
    let agent = spawn_agent();
    let target = serde_json::json!({ "target": "registry" });

    let (_, started) = call(
        &agent.app,
        request("POST", "/backup/dump", Some(target.clone())),
    )
    .await;
    assert_eq!(started["success"], true);
    let job = wait_for_job(&agent.app, started["job_id"].as_str().unwrap()).await;
    assert_eq!(job["job_status"], "Completed", "dump job: {}", job);
    assert!(agent.root.path().join("registry.tar.gz").is_file());

    let (_, started) = call(&agent.app, request("POST", "/backup/restore", Some(target))).await;
    let job = wait_for_job(&agent.app, started["job_id"].as_str().unwrap()).await;
    assert_eq!(job["job_status"], "Completed", "restore job: {}", job);
    assert!(agent.root.path().join("tmp").is_dir());

    let (_, busy) = call(&agent.app, request("GET", "/operations/busy", None)).await;
    assert_eq!(busy["data"]["total_busy"], 0);
}

#[tokio::test]
async fn test_failed_restore_job_reports_error() {
    let agent = spawn_agent();
    // no dump has been taken, so there is nothing to restore from
    assert!(fs::read_dir(agent.root.path()).unwrap().next().is_none());

    let (_, started) = call(
        &agent.app,
        request(
            "POST",
            "/backup/restore",
            Some(serde_json::json!({ "target": "registry" })),
        ),
    )
    .await;
    let job = wait_for_job(&agent.app, started["job_id"].as_str().unwrap()).await;

    assert_eq!(job["job_status"], "Failed");
    assert_eq!(job["success"], false);
    assert!(job["error"].as_str().unwrap().contains("Snapshot not found"));
}

#[tokio::test]
async fn test_second_operation_on_busy_target_is_rejected() {
    let agent = spawn_agent();
    agent
        .state
        .operation_tracker
        .try_start_operation("registry", BackupOperation::Restore)
        .await
        .unwrap();

    for uri in ["/backup/dump", "/backup/restore"] {
        let (status, body) = call(
            &agent.app,
            request("POST", uri, Some(serde_json::json!({ "target": "registry" }))),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false, "{} on a busy target: {}", uri, body);
        assert!(body["error"].as_str().unwrap().contains("busy with 'restore'"));
        assert!(body.get("job_id").is_none());
    }

    let (_, busy) = call(&agent.app, request("GET", "/operations/busy", None)).await;
    assert_eq!(busy["data"]["busy_targets"]["registry"], "restore");
}

#[tokio::test]
async fn test_cleanup_keeps_target_with_running_job_locked() {
    let agent = spawn_agent();
    agent
        .state
        .operation_tracker
        .try_start_operation("registry", BackupOperation::Restore)
        .await
        .unwrap();
    agent
        .state
        .job_manager
        .create_job(BackupOperation::Restore, "registry")
        .await;

    let (_, cleaned) = call(
        &agent.app,
        request(
            "POST",
            "/operations/cleanup",
            Some(serde_json::json!({ "max_hours": 0 })),
        ),
    )
    .await;
    assert_eq!(cleaned["data"]["cleaned_operations"], 0);

    let (_, body) = call(
        &agent.app,
        request(
            "POST",
            "/backup/restore",
            Some(serde_json::json!({ "target": "registry" })),
        ),
    )
    .await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_panicking_operation_fails_job_and_releases_target() {
    let agent = spawn_agent();

    let job_id = agent
        .state
        .execute_async_operation("registry", BackupOperation::Restore, || async {
            let crashed = true;
            if crashed {
                panic!("unpacker crashed");
            }
            Ok::<_, anyhow::Error>(Value::Null)
        })
        .await
        .unwrap();

    let mut job = agent.state.job_manager.get_job_status(&job_id).await.unwrap();
    for _ in 0..100 {
        let busy = agent.state.operation_tracker.is_busy("registry").await;
        if job.status != JobStatus::Running && !busy {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        job = agent.state.job_manager.get_job_status(&job_id).await.unwrap();
    }

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("restore aborted"));
    assert!(!agent.state.operation_tracker.is_busy("registry").await);
}

#[tokio::test]
async fn test_unknown_job() {
    let agent = spawn_agent();

    let (_, body) = call(&agent.app, request("GET", "/job/nope", None)).await;

    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_cleanup_endpoint() {
    let agent = spawn_agent();

    let (_, body) = call(
        &agent.app,
        request(
            "POST",
            "/operations/cleanup",
            Some(serde_json::json!({ "max_hours": 1 })),
        ),
    )
    .await;

    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["max_hours"], 1);
}

#[test]
fn test_settings_built_from_agent_config() {
    let config = AgentConfig::default();
    let settings = config.backup_settings("tar".to_string()).unwrap();
    assert_eq!(settings, BackupSettings::new("/var/backups/data"));
}
