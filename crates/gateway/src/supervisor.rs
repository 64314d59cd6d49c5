//! Worker lifecycle supervision.
//!
//! Each worker is owned here from spawn to reap: prompt materialization,
//! port acquisition, process launch, readiness polling, the persistent
//! bidirectional stream, and the graceful-then-forceful stop. The router
//! writes on the outbound side; inbound events flow through the fanout.
//!
//! `start` parks the connected stream until `activate` is called, so the
//! caller can emit its `spawned` reply before the worker's first event
//! can reach any client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use zeus_core::{Envelope, GatewayError, HealthState, LifecycleEvent, Worker, WorkerStatus};

use crate::fanout;
use crate::health;
use crate::launcher::LaunchSpec;
use crate::state::Gateway;

type WorkerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub model: Option<String>,
    pub port: Option<u16>,
}

// ── Fleet: per-worker stream handles ─────────────────────────────────

struct Pending {
    stream: WorkerStream,
    rx: mpsc::UnboundedReceiver<String>,
}

struct WorkerHandle {
    outbound: mpsc::UnboundedSender<String>,
    pending: Option<Pending>,
    stopping: Arc<AtomicBool>,
}

/// Holds the live stream handles for every supervised worker.
pub struct Fleet {
    handles: Mutex<HashMap<String, WorkerHandle>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    async fn register(
        &self,
        worker_id: &str,
        outbound: mpsc::UnboundedSender<String>,
        stream: WorkerStream,
        rx: mpsc::UnboundedReceiver<String>,
    ) {
        self.handles.lock().await.insert(
            worker_id.to_string(),
            WorkerHandle {
                outbound,
                pending: Some(Pending { stream, rx }),
                stopping: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    async fn take_pending(
        &self,
        worker_id: &str,
    ) -> Option<(WorkerStream, mpsc::UnboundedReceiver<String>, Arc<AtomicBool>)> {
        let mut handles = self.handles.lock().await;
        let handle = handles.get_mut(worker_id)?;
        let pending = handle.pending.take()?;
        Some((pending.stream, pending.rx, handle.stopping.clone()))
    }

    async fn remove(&self, worker_id: &str) {
        self.handles.lock().await.remove(worker_id);
    }

    async fn mark_stopping(&self, worker_id: &str) {
        if let Some(handle) = self.handles.lock().await.get(worker_id) {
            handle.stopping.store(true, Ordering::SeqCst);
        }
    }

    /// Enqueue a frame on the worker's outbound stream.
    pub async fn send(&self, worker_id: &str, frame: String) -> Result<(), GatewayError> {
        let handles = self.handles.lock().await;
        let handle = handles
            .get(worker_id)
            .ok_or_else(|| GatewayError::NotConnected(worker_id.to_string()))?;
        handle
            .outbound
            .send(frame)
            .map_err(|_| GatewayError::NotConnected(worker_id.to_string()))
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

// ── Lifecycle operations ─────────────────────────────────────────────

/// Spawn a worker and bring it to running/healthy.
///
/// On any failure the port is released and the registry entry removed,
/// so a failed spawn leaves no trace.
pub async fn start(
    gw: &Arc<Gateway>,
    provider: &str,
    opts: SpawnOptions,
) -> Result<Worker, GatewayError> {
    let pcfg = gw.store.get(provider).await;
    gw.store.materialize(provider).await?;

    let port = match opts.port {
        Some(port) => {
            gw.ports.claim(port).await?;
            port
        }
        None => gw.ports.reserve().await?,
    };
    let worker_id = Worker::worker_id(provider, port);
    gw.ports.assign(port, &worker_id).await;

    let requested_model = opts.model.or_else(|| pcfg.default_model.clone());
    let spec = LaunchSpec {
        worker_id: worker_id.clone(),
        provider: provider.to_string(),
        command: pcfg.command.clone(),
        host_port: port,
        inner_port: pcfg.default_inner_port,
        model: requested_model.clone(),
        workspace_dir: gw.config.storage.workspace_dir.clone(),
        prompts_dir: gw.config.storage.prompts_dir.clone(),
        env: pcfg
            .env_keys
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect(),
        debug: gw.config.debug,
    };

    gw.registry
        .insert(Worker::new(provider, port, requested_model))
        .await;

    if let Err(e) = gw.launcher.launch(&spec).await {
        abort_start(gw, &worker_id, port).await;
        return Err(e);
    }

    let report = match wait_ready(gw, &worker_id, port).await {
        Ok(report) => report,
        Err(e) => {
            warn!(worker = %worker_id, error = %e, "worker failed readiness, stopping");
            gw.launcher.stop(&worker_id, Duration::ZERO).await;
            abort_start(gw, &worker_id, port).await;
            return Err(e);
        }
    };

    let stream = match connect(port, gw.config.fleet.spawn_deadline).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(worker = %worker_id, error = %e, "worker stream connect failed, stopping");
            gw.launcher.stop(&worker_id, Duration::ZERO).await;
            abort_start(gw, &worker_id, port).await;
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    gw.fleet.register(&worker_id, tx, stream, rx).await;

    let worker = gw
        .registry
        .update(&worker_id, |w| {
            w.status = WorkerStatus::Running;
            w.health = HealthState::Healthy;
            if report.model.is_some() {
                w.model = report.model.clone();
            }
            if !report.available_models.is_empty() {
                w.available_models = report.available_models.clone();
            }
        })
        .await
        .ok_or_else(|| GatewayError::WorkerNotFound(worker_id.clone()))?;

    gw.pools.recompute(provider, &gw.registry).await;
    gw.registry.emit(LifecycleEvent::Started {
        worker: worker.clone(),
    });
    info!(worker = %worker_id, provider, port, "worker started");
    Ok(worker)
}

/// Start pumping the worker's stream. Safe to call once per worker;
/// subsequent calls are no-ops.
pub async fn activate(gw: &Arc<Gateway>, worker_id: &str) {
    let Some((stream, mut rx, stopping)) = gw.fleet.take_pending(worker_id).await else {
        return;
    };
    let (mut sink, read) = stream.split();

    let writer_id = worker_id.to_string();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                debug!(worker = %writer_id, "worker outbound stream closed");
                break;
            }
        }
    });

    let gw = gw.clone();
    let worker_id = worker_id.to_string();
    tokio::spawn(async move {
        read_loop(gw, worker_id, read, stopping).await;
    });
}

/// Graceful stop with the configured grace window. Idempotent.
pub async fn stop(gw: &Arc<Gateway>, worker_id: &str) {
    gw.fleet.mark_stopping(worker_id).await;
    gw.launcher.stop(worker_id, gw.config.fleet.stop_grace).await;
    cleanup(gw, worker_id, Terminal::Stopped).await;
}

/// Stop every live worker in parallel (gateway shutdown).
pub async fn stop_all(gw: &Arc<Gateway>) {
    let ids: Vec<String> = gw
        .registry
        .list(None)
        .await
        .into_iter()
        .map(|w| w.id)
        .collect();
    futures::future::join_all(ids.iter().map(|id| stop(gw, id))).await;
}

/// Terminal cleanup for a worker whose process died underneath us.
pub async fn reap_dead(gw: &Arc<Gateway>, worker_id: &str, was_healthy: bool) {
    gw.fleet.mark_stopping(worker_id).await;
    gw.launcher.stop(worker_id, Duration::ZERO).await;
    let terminal = if was_healthy {
        Terminal::Failed
    } else {
        Terminal::Stopped
    };
    cleanup(gw, worker_id, terminal).await;
}

/// Write a framed envelope to the worker's outbound stream.
pub async fn send(gw: &Gateway, worker_id: &str, frame: String) -> Result<(), GatewayError> {
    gw.fleet.send(worker_id, frame).await
}

// ── Internals ────────────────────────────────────────────────────────

enum Terminal {
    Stopped,
    Failed,
}

async fn cleanup(gw: &Arc<Gateway>, worker_id: &str, terminal: Terminal) {
    gw.fleet.remove(worker_id).await;
    gw.hub.clear_affinity_to(worker_id).await;
    if let Some(worker) = gw.registry.remove(worker_id).await {
        gw.ports.release(worker.port).await;
        gw.pools.recompute(&worker.provider, &gw.registry).await;
        let event = match terminal {
            Terminal::Stopped => LifecycleEvent::Stopped {
                worker_id: worker.id.clone(),
                provider: worker.provider.clone(),
            },
            Terminal::Failed => LifecycleEvent::Failed {
                worker_id: worker.id.clone(),
                provider: worker.provider.clone(),
            },
        };
        gw.registry.emit(event);
        info!(worker = %worker_id, port = worker.port, "worker removed");
    }
}

async fn abort_start(gw: &Arc<Gateway>, worker_id: &str, port: u16) {
    gw.fleet.remove(worker_id).await;
    gw.registry.remove(worker_id).await;
    gw.ports.release(port).await;
}

/// Poll the worker's health endpoint until it reports ready or the
/// spawn deadline fires. Backoff doubles from 200 ms, capped at 2 s.
async fn wait_ready(
    gw: &Gateway,
    worker_id: &str,
    port: u16,
) -> Result<health::StatusReport, GatewayError> {
    let deadline = Instant::now() + gw.config.fleet.spawn_deadline;
    let mut backoff = Duration::from_millis(200);
    loop {
        if let Ok(report) = health::probe_health(&gw.http, port, gw.config.fleet.probe_timeout).await
        {
            if report.ready {
                // The status surface carries model details the health
                // endpoint omits; tolerate its absence.
                return Ok(health::probe_status(&gw.http, port, gw.config.fleet.probe_timeout)
                    .await
                    .unwrap_or_default());
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(GatewayError::SpawnTimeout(
                worker_id.to_string(),
                gw.config.fleet.spawn_deadline,
            ));
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
}

async fn connect(port: u16, timeout: Duration) -> Result<WorkerStream, GatewayError> {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let connect = connect_async(url.as_str());
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(GatewayError::Stream(e.to_string())),
        Err(_) => Err(GatewayError::Stream(format!("connect to {url} timed out"))),
    }
}

async fn read_loop(
    gw: Arc<Gateway>,
    worker_id: String,
    mut read: SplitStream<WorkerStream>,
    stopping: Arc<AtomicBool>,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                handle_worker_frame(&gw, &worker_id, text.as_str()).await;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    if stopping.load(Ordering::SeqCst) {
        return; // a stop is already tearing this worker down
    }
    warn!(worker = %worker_id, "worker stream closed unexpectedly");
    gw.launcher.stop(&worker_id, Duration::ZERO).await;
    cleanup(&gw, &worker_id, Terminal::Stopped).await;
}

async fn handle_worker_frame(gw: &Arc<Gateway>, worker_id: &str, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(worker = %worker_id, error = %e, "unparseable worker frame");
            return;
        }
    };

    // The initial hello carries the model inventory; cache it for later
    // list_models / status queries.
    if envelope.kind == "connected" {
        let params = envelope.params();
        gw.registry
            .update(worker_id, |w| {
                if let Some(model) = params.get("model").and_then(|v| v.as_str()) {
                    w.model = Some(model.to_string());
                }
                if let Some(models) = params.get("availableModels").and_then(|v| v.as_array()) {
                    w.available_models = models
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect();
                }
            })
            .await;
    }

    if let Some(worker) = gw.registry.get(worker_id).await {
        fanout::deliver(gw, &worker, &envelope, text).await;
    }
}
