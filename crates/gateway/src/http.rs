//! Auxiliary request/response surface: health, status, fleet and config
//! introspection, worker logs, and path-traversal-safe reads from the
//! shared workspace. Permissive CORS on everything, mirroring the
//! stream endpoint's openness.

use std::path::{Component, Path as StdPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::warn;

use zeus_core::ProviderPatch;

use crate::state::Gateway;
use crate::supervisor::{self, SpawnOptions};
use crate::ws;

pub fn router(gw: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/providers", get(providers))
        .route("/processes", get(processes))
        .route("/logs/{worker_id}", get(logs))
        .route("/config/{provider}", get(get_config).post(update_config))
        .route("/serve/{*path}", get(serve_file))
        .layer(CorsLayer::permissive())
        .with_state(gw)
}

#[derive(Deserialize)]
struct ProviderQuery {
    provider: Option<String>,
}

#[derive(Deserialize)]
struct TailQuery {
    tail: Option<usize>,
}

async fn health(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": gw.started_at.elapsed().as_secs(),
        "workers": gw.registry.count().await,
        "clients": gw.hub.client_count().await,
    }))
}

async fn status(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    Json(gw.status_snapshot().await)
}

async fn providers(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    let mut providers = Vec::new();
    for cfg in gw.store.all().await {
        let workers = gw.registry.list(Some(&cfg.name)).await.len();
        let mut summary = cfg.summary();
        summary["workers"] = json!(workers);
        providers.push(summary);
    }
    Json(json!({ "providers": providers }))
}

async fn processes(
    State(gw): State<Arc<Gateway>>,
    Query(query): Query<ProviderQuery>,
) -> Json<Value> {
    let workers = gw.registry.list(query.provider.as_deref()).await;
    Json(json!({ "processes": workers }))
}

async fn logs(
    State(gw): State<Arc<Gateway>>,
    Path(worker_id): Path<String>,
    Query(query): Query<TailQuery>,
) -> Response {
    if gw.registry.get(&worker_id).await.is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Worker not found: {worker_id}") })),
        )
            .into_response();
    }
    let logs = gw.launcher.logs(&worker_id, query.tail.unwrap_or(100)).await;
    Json(json!({ "processId": worker_id, "logs": logs })).into_response()
}

async fn get_config(State(gw): State<Arc<Gateway>>, Path(provider): Path<String>) -> Json<Value> {
    Json(gw.store.get(&provider).await.summary())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
    system_prompt: Option<String>,
    default_model: Option<String>,
    auto_spawn: Option<bool>,
    #[serde(default)]
    restart: bool,
}

/// Apply a provider patch. With `restart: true`, every worker whose
/// runtime depends on the change is stopped and re-spawned so the new
/// prompt file takes effect.
async fn update_config(
    State(gw): State<Arc<Gateway>>,
    Path(provider): Path<String>,
    Json(body): Json<ConfigUpdate>,
) -> Response {
    let restart = body.restart;
    let patch = ProviderPatch {
        system_prompt: body.system_prompt,
        default_model: body.default_model,
        auto_spawn: body.auto_spawn,
    };
    let (cfg, affected) = match gw.store.update(&provider, patch, &gw.registry).await {
        Ok(result) => result,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let mut restarted = Vec::new();
    if restart {
        for worker_id in &affected {
            supervisor::stop(&gw, worker_id).await;
            match supervisor::start(&gw, &provider, SpawnOptions::default()).await {
                Ok(worker) => {
                    supervisor::activate(&gw, &worker.id).await;
                    restarted.push(worker_id.clone());
                }
                Err(e) => {
                    warn!(provider = %provider, worker = %worker_id, error = %e,
                        "re-spawn after config update failed");
                }
            }
        }
    }

    Json(json!({
        "provider": provider,
        "config": cfg.summary(),
        "affectedWorkers": affected,
        "restartedContainers": restarted,
    }))
    .into_response()
}

// ── Workspace file serving ───────────────────────────────────────────

async fn serve_file(State(gw): State<Arc<Gateway>>, Path(path): Path<String>) -> Response {
    match read_workspace_file(&gw.config.storage.workspace_dir, &path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, content_type_for(&path))],
            bytes,
        )
            .into_response(),
        Err(ServeError::Forbidden) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "path escapes the workspace" })),
        )
            .into_response(),
        Err(ServeError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not found" })),
        )
            .into_response(),
    }
}

pub(crate) enum ServeError {
    Forbidden,
    NotFound,
}

/// Read a file from the workspace, refusing any path that resolves
/// outside it. Dot-dot segments are rejected outright; canonicalization
/// then catches symlinks whose targets leave the workspace even though
/// the request path itself stays inside.
pub(crate) async fn read_workspace_file(
    root: &StdPath,
    relative: &str,
) -> Result<Vec<u8>, ServeError> {
    let rel = PathBuf::from(relative);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ServeError::Forbidden);
    }

    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| ServeError::NotFound)?;
    let resolved = tokio::fs::canonicalize(root.join(&rel))
        .await
        .map_err(|_| ServeError::NotFound)?;
    if !resolved.starts_with(&root) {
        return Err(ServeError::Forbidden);
    }
    tokio::fs::read(&resolved)
        .await
        .map_err(|_| ServeError::NotFound)
}

fn content_type_for(path: &str) -> &'static str {
    match StdPath::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
    {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" | "md" | "log" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
