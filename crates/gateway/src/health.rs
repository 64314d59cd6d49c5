//! Worker health probing and the periodic monitor.
//!
//! Probes are independent per worker and spawned as their own tasks, so
//! one slow endpoint never delays the rest of the sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zeus_core::{GatewayError, HealthState, LifecycleEvent, Worker, WorkerStatus};

use crate::state::Gateway;
use crate::supervisor;

/// Shape of the worker's `/health` response.
#[derive(Debug, Default, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub uptime: f64,
}

/// Shape of the worker's `/status` response; all fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub model: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    pub session_id: Option<String>,
}

pub async fn probe_health(
    http: &reqwest::Client,
    port: u16,
    timeout: Duration,
) -> Result<HealthReport, GatewayError> {
    let url = format!("http://127.0.0.1:{port}/health");
    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::Probe(e.to_string()))?;
    if !response.status().is_success() {
        return Err(GatewayError::Probe(format!(
            "health endpoint returned {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| GatewayError::Probe(e.to_string()))
}

pub async fn probe_status(
    http: &reqwest::Client,
    port: u16,
    timeout: Duration,
) -> Result<StatusReport, GatewayError> {
    let url = format!("http://127.0.0.1:{port}/status");
    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::Probe(e.to_string()))?;
    response
        .json()
        .await
        .map_err(|e| GatewayError::Probe(e.to_string()))
}

/// Run the periodic monitor until the gateway's shutdown notify fires.
pub fn spawn_monitor(gw: Arc<Gateway>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gw.config.fleet.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // workers start healthy; skip the immediate tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for worker in gw.registry.list(None).await {
                        let gw = gw.clone();
                        tokio::spawn(async move {
                            probe_one(&gw, worker).await;
                        });
                    }
                }
                _ = gw.shutdown.notified() => {
                    debug!("health monitor stopping");
                    break;
                }
            }
        }
    })
}

/// One probe cycle for one worker: process liveness, then the health
/// endpoint with a short timeout.
async fn probe_one(gw: &Arc<Gateway>, worker: Worker) {
    if worker.status == WorkerStatus::Starting {
        return; // the supervisor's readiness poll owns this phase
    }

    if !gw.launcher.is_alive(&worker.id).await {
        warn!(worker = %worker.id, "worker process is gone");
        supervisor::reap_dead(gw, &worker.id, worker.health == HealthState::Healthy).await;
        return;
    }

    let healthy = matches!(
        probe_health(&gw.http, worker.port, gw.config.fleet.probe_timeout).await,
        Ok(report) if report.ready
    );

    match (healthy, worker.health) {
        (true, HealthState::Healthy) => {}
        (true, _) => {
            info!(worker = %worker.id, "worker recovered");
            gw.registry
                .update(&worker.id, |w| {
                    w.status = WorkerStatus::Running;
                    w.health = HealthState::Healthy;
                })
                .await;
            gw.pools.recompute(&worker.provider, &gw.registry).await;
        }
        (false, HealthState::Healthy) => {
            warn!(worker = %worker.id, "health probe failed, degrading worker");
            gw.registry
                .update(&worker.id, |w| {
                    w.status = WorkerStatus::Degraded;
                    w.health = HealthState::Unhealthy;
                })
                .await;
            gw.pools.recompute(&worker.provider, &gw.registry).await;
            gw.registry.emit(LifecycleEvent::Failed {
                worker_id: worker.id.clone(),
                provider: worker.provider.clone(),
            });
        }
        (false, _) => {
            gw.registry
                .update(&worker.id, |w| {
                    w.status = WorkerStatus::Degraded;
                    w.health = HealthState::Unhealthy;
                })
                .await;
            gw.pools.recompute(&worker.provider, &gw.registry).await;
        }
    }
}
