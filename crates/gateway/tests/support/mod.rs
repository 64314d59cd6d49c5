//! Shared harness for gateway integration tests.
//!
//! The gateway runs on an ephemeral port with a [`StubLauncher`] whose
//! "workers" are in-process axum servers speaking the full worker
//! contract (health/status surface, `/ws` stream, `connected` hello,
//! chat terminated by `done`), so lifecycle scenarios run without any
//! external binaries.

// Each test binary uses a subset of this harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use zeus_core::{Config, GatewayError};
use zeus_gateway::launcher::{LaunchSpec, WorkerLauncher};
use zeus_gateway::Gateway;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

// ── Stub worker ──────────────────────────────────────────────────────

struct StubWorker {
    handle: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

/// Trait-seam launcher whose workers are in-process servers.
pub struct StubLauncher {
    workers: Mutex<HashMap<String, StubWorker>>,
}

impl StubLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl WorkerLauncher for StubLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(("127.0.0.1", spec.host_port))
            .await
            .map_err(|e| GatewayError::Launch(e.to_string()))?;
        let app = stub_worker_app(spec.clone());
        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = alive.clone();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
            task_alive.store(false, Ordering::SeqCst);
        });
        self.workers
            .lock()
            .await
            .insert(spec.worker_id.clone(), StubWorker { handle, alive });
        Ok(())
    }

    async fn stop(&self, worker_id: &str, _grace: Duration) {
        if let Some(worker) = self.workers.lock().await.remove(worker_id) {
            worker.handle.abort();
            worker.alive.store(false, Ordering::SeqCst);
        }
    }

    async fn is_alive(&self, worker_id: &str) -> bool {
        self.workers
            .lock()
            .await
            .get(worker_id)
            .map(|w| w.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn logs(&self, worker_id: &str, tail: usize) -> Vec<String> {
        let _ = tail;
        if self.workers.lock().await.contains_key(worker_id) {
            vec![format!("{worker_id}: stub worker ready")]
        } else {
            Vec::new()
        }
    }

    async fn cleanup_stale(&self) -> Result<usize, GatewayError> {
        Ok(0)
    }
}

fn stub_worker_app(spec: LaunchSpec) -> Router {
    let spec = Arc::new(spec);
    Router::new()
        .route("/health", get(stub_health))
        .route("/status", get(stub_status))
        .route("/ws", get(stub_ws))
        .with_state(spec)
}

async fn stub_health() -> Json<Value> {
    Json(json!({ "status": "ok", "ready": true, "authenticated": true, "uptime": 1.0 }))
}

async fn stub_status(State(spec): State<Arc<LaunchSpec>>) -> Json<Value> {
    Json(json!({
        "model": spec.model.clone().unwrap_or_else(|| "stub-default".into()),
        "availableModels": ["stub-default", "stub-mini"],
        "sessionId": "stub-session",
    }))
}

async fn stub_ws(ws: WebSocketUpgrade, State(spec): State<Arc<LaunchSpec>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stub_stream(socket, spec))
}

async fn stub_stream(mut socket: WebSocket, spec: Arc<LaunchSpec>) {
    let hello = json!({
        "type": "connected",
        "payload": {
            "name": spec.worker_id,
            "sessionId": "stub-session",
            "model": spec.model.clone().unwrap_or_else(|| "stub-default".into()),
            "availableModels": ["stub-default", "stub-mini"],
            "ready": true,
            "authenticated": true,
        },
    });
    if socket
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else { continue };
        let frame: Value = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        let kind = frame["type"].as_str().unwrap_or("");
        let payload = frame["payload"].clone();

        let replies: Vec<Value> = match kind {
            "chat" => {
                let text_in = payload["text"].as_str().unwrap_or("");
                vec![
                    json!({ "type": "content", "payload": { "text": format!("echo: {text_in}") } }),
                    json!({ "type": "done", "payload": {} }),
                ]
            }
            "ping" => vec![json!({ "type": "pong", "payload": {} })],
            "set_model" => {
                vec![json!({ "type": "model_changed", "payload": { "model": payload["model"] } })]
            }
            "set_system_prompt" => vec![json!({
                "type": "system_prompt_changed",
                "payload": { "prompt": payload["prompt"] },
            })],
            "get_system_prompt" => vec![json!({
                "type": "system_prompt",
                "payload": { "prompt": "" },
            })],
            other => vec![json!({ "type": "ack", "payload": { "command": other } })],
        };

        for reply in replies {
            if socket
                .send(Message::Text(reply.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

// ── Gateway harness ──────────────────────────────────────────────────

pub struct TestGateway {
    pub gw: Arc<Gateway>,
    pub addr: SocketAddr,
    pub workspace: tempfile::TempDir,
}

/// Start a gateway on an ephemeral port. `port_low` gives each test its
/// own worker-port slice so parallel tests never collide.
pub async fn start_gateway(port_low: u16, auto_spawn: &[&str]) -> TestGateway {
    let workspace = tempfile::tempdir().expect("workspace tempdir");

    let mut config = Config::from_env();
    config.server.host = "127.0.0.1".into();
    config.fleet.port_low = port_low;
    config.fleet.port_high = port_low + 8;
    config.storage.workspace_dir = workspace.path().to_path_buf();
    config.storage.prompts_dir = workspace.path().join("prompts");
    config.storage.runtime_dir = workspace.path().join("run");
    config.auto_spawn = auto_spawn.iter().map(|s| s.to_string()).collect();

    let gw = Gateway::new(config, StubLauncher::new());

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let serve_gw = gw.clone();
    tokio::spawn(async move {
        let _ = zeus_gateway::gateway::serve(serve_gw, listener).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestGateway {
        gw,
        addr,
        workspace,
    }
}

// ── WebSocket test client ────────────────────────────────────────────

pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    pub client_id: String,
}

impl TestClient {
    /// Connect and consume the `connected` hello.
    pub async fn connect(addr: SocketAddr) -> Self {
        let (stream, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("client connect");
        let mut client = Self {
            stream,
            client_id: String::new(),
        };
        let hello = client.recv().await;
        assert_eq!(hello["type"], "connected");
        client.client_id = hello["payload"]["clientId"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        client
    }

    pub async fn send(&mut self, frame: Value) {
        self.stream
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .expect("client send");
    }

    /// Next text frame, parsed.
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("stream error");
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("frame is JSON");
            }
        }
    }

    /// Skip frames until one of the given type arrives.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}
