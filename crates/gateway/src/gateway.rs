//! Facade wiring and the gateway's run loop.
//!
//! Start sequence: clear stale worker artifacts, start the health
//! monitor and lifecycle logger, bind, accept. Stop sequence: stop
//! accepting, tell connected clients why, stop the monitor, stop every
//! worker in parallel.

use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use zeus_core::protocol::frame;
use zeus_core::LifecycleEvent;

use crate::health;
use crate::http;
use crate::state::Gateway;
use crate::supervisor;

/// Bind the configured address and serve until a shutdown signal.
pub async fn run(gw: Arc<Gateway>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", gw.config.server.host, gw.config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("gateway listening on {addr}");
    serve(gw, listener).await
}

/// Serve on an already-bound listener (tests bind on an ephemeral port).
pub async fn serve(gw: Arc<Gateway>, listener: TcpListener) -> anyhow::Result<()> {
    match gw.launcher.cleanup_stale().await {
        Ok(0) => {}
        Ok(cleared) => info!(cleared, "cleared stale worker artifacts"),
        Err(e) => warn!(error = %e, "stale-artifact cleanup failed"),
    }

    health::spawn_monitor(gw.clone());
    spawn_lifecycle_logger(gw.clone());

    let app = http::router(gw.clone());
    // The stop sequence runs inside the shutdown future: client read
    // loops exit on the notify, so the serve drain actually completes
    // instead of waiting on long-lived WebSockets.
    let signal_gw = gw.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = signal_gw.shutdown.notified() => {}
            }
            shutdown(&signal_gw).await;
        })
        .await?;
    Ok(())
}

/// Idempotent graceful stop: notify clients, stop the monitor, reap the
/// whole fleet in parallel.
pub async fn shutdown(gw: &Arc<Gateway>) {
    info!("gateway stopping");
    gw.hub
        .broadcast(&frame("shutdown", json!({ "reason": "gateway stopping" })))
        .await;
    gw.shutdown.notify_waiters();
    supervisor::stop_all(gw).await;
    info!("gateway stopped");
}

fn spawn_lifecycle_logger(gw: Arc<Gateway>) {
    let mut events = gw.registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LifecycleEvent::Started { worker }) => {
                    info!(worker = %worker.id, provider = %worker.provider, port = worker.port,
                        "lifecycle: worker started");
                }
                Ok(LifecycleEvent::Stopped {
                    worker_id,
                    provider,
                }) => {
                    info!(worker = %worker_id, provider = %provider, "lifecycle: worker stopped");
                }
                Ok(LifecycleEvent::Failed {
                    worker_id,
                    provider,
                }) => {
                    warn!(worker = %worker_id, provider = %provider, "lifecycle: worker failed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
