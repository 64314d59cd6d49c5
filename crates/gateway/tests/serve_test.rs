//! Auxiliary HTTP surface driven in-process, including the workspace
//! file server's traversal defenses.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use zeus_core::Config;
use zeus_gateway::Gateway;

fn test_gateway(workspace: &std::path::Path) -> std::sync::Arc<Gateway> {
    let mut config = Config::from_env();
    config.storage.workspace_dir = workspace.to_path_buf();
    config.storage.prompts_dir = workspace.join("prompts");
    config.storage.runtime_dir = workspace.join("run");
    Gateway::new(config, support::StubLauncher::new())
}

#[tokio::test]
async fn serve_reads_workspace_files_and_blocks_traversal() {
    let parent = tempfile::tempdir().unwrap();
    let workspace = parent.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("known.txt"), "artifact contents").unwrap();
    std::fs::write(parent.path().join("secret"), "leak").unwrap();

    let app = zeus_gateway::http::router(test_gateway(&workspace));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/serve/known.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"artifact contents");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/serve/../secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/serve/missing.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_status_endpoints_respond() {
    let dir = tempfile::tempdir().unwrap();
    let app = zeus_gateway::http::router(test_gateway(dir.path()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["workers"], 0);

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let status: Value = serde_json::from_slice(&body).unwrap();
    assert!(status["sessionId"].as_str().is_some());
    assert_eq!(status["clients"], 0);
}

#[tokio::test]
async fn processes_endpoint_filters_by_provider() {
    let dir = tempfile::tempdir().unwrap();
    let gw = test_gateway(dir.path());
    gw.registry
        .insert(zeus_core::Worker::new("gemini", 4000, None))
        .await;
    gw.registry
        .insert(zeus_core::Worker::new("claude", 4001, None))
        .await;

    let app = zeus_gateway::http::router(gw);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/processes?provider=gemini")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let processes: Value = serde_json::from_slice(&body).unwrap();
    let list = processes["processes"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["provider"], "gemini");
}

#[tokio::test]
async fn logs_endpoint_404s_unknown_workers() {
    let dir = tempfile::tempdir().unwrap();
    let app = zeus_gateway::http::router(test_gateway(dir.path()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/logs/zeus-gemini-9999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn config_get_returns_provider_summary() {
    let dir = tempfile::tempdir().unwrap();
    let app = zeus_gateway::http::router(test_gateway(dir.path()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/config/gemini")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let config: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(config["name"], "gemini");
    assert!(config["envKeys"].as_array().is_some());
}
