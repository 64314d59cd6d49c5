//! Inbound envelope dispatch.
//!
//! Every client frame lands here, parses into a [`ClientCommand`], and
//! runs against the gateway state. Every failure mode is surfaced to the
//! originating client as an `error` frame; nothing escapes to tear down
//! the connection or the process.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use zeus_core::protocol::{error_frame, error_frame_with_hint, frame};
use zeus_core::{ClientCommand, Envelope, GatewayError, Worker};

use crate::hub::SubKind;
use crate::state::Gateway;
use crate::supervisor::{self, SpawnOptions};

pub async fn dispatch(gw: &Arc<Gateway>, client_id: &str, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            gw.hub.send_to(client_id, error_frame(e.to_string())).await;
            return;
        }
    };
    debug!(client = %client_id, kind = %envelope.kind, "client command");

    match ClientCommand::from_envelope(&envelope) {
        Ok(command) => handle(gw, client_id, command, envelope).await,
        Err(e) => {
            gw.hub.send_to(client_id, error_frame(e.to_string())).await;
        }
    }
}

async fn handle(gw: &Arc<Gateway>, client_id: &str, command: ClientCommand, envelope: Envelope) {
    match command {
        ClientCommand::Ping => {
            let reply = frame("pong", json!({ "timestamp": Utc::now().timestamp_millis() }));
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::Status => {
            let reply = frame("status", gw.status_snapshot().await);
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::ListProcesses { provider } => {
            let workers = gw.registry.list(provider.as_deref()).await;
            let reply = frame("processes", json!({ "processes": workers }));
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::ListProviders => {
            let mut providers = Vec::new();
            for cfg in gw.store.all().await {
                let workers = gw.registry.list(Some(&cfg.name)).await.len();
                let mut summary = cfg.summary();
                summary["workers"] = json!(workers);
                providers.push(summary);
            }
            let reply = frame("providers", json!({ "providers": providers }));
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::ListModels { provider } => {
            let configs = match provider {
                Some(p) => vec![gw.store.get(&p).await],
                None => gw.store.all().await,
            };
            let mut models = serde_json::Map::new();
            for cfg in configs {
                let mut known: Vec<String> = Vec::new();
                if let Some(model) = &cfg.default_model {
                    known.push(model.clone());
                }
                for worker in gw.registry.list(Some(&cfg.name)).await {
                    for model in worker.available_models {
                        if !known.contains(&model) {
                            known.push(model);
                        }
                    }
                }
                models.insert(cfg.name, json!(known));
            }
            let reply = frame("models", json!({ "models": models }));
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::ListSubscriptions => {
            let (processes, providers) = gw.hub.subscriptions_of(client_id).await;
            let reply = frame(
                "subscriptions",
                json!({ "processes": processes, "providers": providers }),
            );
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::Spawn {
            provider,
            model,
            port,
        } => {
            gw.hub
                .send_to(client_id, frame("spawning", json!({ "provider": provider })))
                .await;
            match supervisor::start(gw, &provider, SpawnOptions { model, port }).await {
                Ok(worker) => {
                    // Reply before the pump starts so `spawned` precedes
                    // anything the new worker can emit to this client.
                    gw.hub
                        .send_to(client_id, frame("spawned", json!({ "worker": worker })))
                        .await;
                    supervisor::activate(gw, &worker.id).await;
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "spawn failed");
                    let reply = error_frame(format!("Failed to spawn {provider} worker: {e}"));
                    gw.hub.send_to(client_id, reply).await;
                }
            }
        }
        ClientCommand::Stop {
            process_id,
            provider,
        } => handle_stop(gw, client_id, process_id, provider).await,
        ClientCommand::Scale { provider, count } => {
            handle_scale(gw, client_id, provider, count).await;
        }
        ClientCommand::Chat {
            provider,
            process_id,
        } => handle_chat(gw, client_id, provider, process_id, &envelope).await,
        ClientCommand::Subscribe {
            process_id,
            provider,
        } => {
            if let Some(id) = process_id {
                if gw.registry.get(&id).await.is_none() {
                    let reply = error_frame(GatewayError::WorkerNotFound(id).to_string());
                    gw.hub.send_to(client_id, reply).await;
                    return;
                }
                gw.hub.add_sub(client_id, SubKind::Worker, &id).await;
                gw.hub
                    .send_to(client_id, frame("subscribed", json!({ "processId": id })))
                    .await;
            } else if let Some(p) = provider {
                gw.hub.add_sub(client_id, SubKind::Provider, &p).await;
                gw.hub
                    .send_to(client_id, frame("subscribed", json!({ "provider": p })))
                    .await;
            }
        }
        ClientCommand::Unsubscribe {
            process_id,
            provider,
            all,
        } => {
            if all {
                let (processes, providers) = gw.hub.remove_all_subs(client_id).await;
                let reply = frame(
                    "unsubscribed",
                    json!({ "all": true, "processes": processes, "providers": providers }),
                );
                gw.hub.send_to(client_id, reply).await;
            } else if let Some(id) = process_id {
                gw.hub.remove_sub(client_id, SubKind::Worker, &id).await;
                gw.hub
                    .send_to(client_id, frame("unsubscribed", json!({ "processId": id })))
                    .await;
            } else if let Some(p) = provider {
                gw.hub.remove_sub(client_id, SubKind::Provider, &p).await;
                gw.hub
                    .send_to(client_id, frame("unsubscribed", json!({ "provider": p })))
                    .await;
            }
        }
        ClientCommand::SetModel { process_id, .. } => {
            forward_to(gw, client_id, &process_id, &envelope).await;
        }
        ClientCommand::GetLogs { process_id, tail } => {
            if gw.registry.get(&process_id).await.is_none() {
                let reply = error_frame(GatewayError::WorkerNotFound(process_id).to_string());
                gw.hub.send_to(client_id, reply).await;
                return;
            }
            let logs = gw.launcher.logs(&process_id, tail.unwrap_or(100)).await;
            let reply = frame("logs", json!({ "processId": process_id, "logs": logs }));
            gw.hub.send_to(client_id, reply).await;
        }
        ClientCommand::Forward {
            process_id,
            provider,
        } => {
            let target = match (process_id, provider) {
                (Some(id), _) => id,
                (None, Some(p)) => match gw.pools.pick(&p).await {
                    Some(id) => id,
                    None => {
                        let reply =
                            error_frame(GatewayError::NoHealthyWorkers(p).to_string());
                        gw.hub.send_to(client_id, reply).await;
                        return;
                    }
                },
                (None, None) => {
                    let reply = error_frame(
                        GatewayError::MissingField("processId or provider").to_string(),
                    );
                    gw.hub.send_to(client_id, reply).await;
                    return;
                }
            };
            forward_to(gw, client_id, &target, &envelope).await;
        }
    }
}

/// Affinity-mark the client and relay the envelope to a worker; the
/// worker's reply travels back through the fanout's affinity path.
async fn forward_to(gw: &Arc<Gateway>, client_id: &str, worker_id: &str, envelope: &Envelope) {
    if gw.registry.get(worker_id).await.is_none() {
        let reply = error_frame(GatewayError::WorkerNotFound(worker_id.to_string()).to_string());
        gw.hub.send_to(client_id, reply).await;
        return;
    }
    gw.hub
        .set_current_worker(client_id, Some(worker_id.to_string()))
        .await;
    if let Err(e) = supervisor::send(gw, worker_id, envelope.forward_frame()).await {
        gw.hub.set_current_worker(client_id, None).await;
        let reply = error_frame_with_hint(
            format!("Failed to reach worker: {e}"),
            json!({ "type": "retry", "message": "the worker may still be starting" }),
        );
        gw.hub.send_to(client_id, reply).await;
    }
}

async fn handle_stop(
    gw: &Arc<Gateway>,
    client_id: &str,
    process_id: Option<String>,
    provider: Option<String>,
) {
    if let Some(id) = process_id {
        if gw.registry.get(&id).await.is_none() {
            let reply = error_frame(GatewayError::WorkerNotFound(id).to_string());
            gw.hub.send_to(client_id, reply).await;
            return;
        }
        supervisor::stop(gw, &id).await;
        gw.hub
            .send_to(client_id, frame("stopped", json!({ "processId": id })))
            .await;
    } else if let Some(p) = provider {
        let ids: Vec<String> = gw
            .registry
            .list(Some(&p))
            .await
            .into_iter()
            .map(|w| w.id)
            .collect();
        futures::future::join_all(ids.iter().map(|id| supervisor::stop(gw, id))).await;
        let reply = frame("stopped", json!({ "provider": p, "count": ids.len() }));
        gw.hub.send_to(client_id, reply).await;
    }
}

async fn handle_scale(gw: &Arc<Gateway>, client_id: &str, provider: String, count: usize) {
    let current = gw.registry.list(Some(&provider)).await;
    let previous = current.len();

    if count > previous {
        for _ in previous..count {
            match supervisor::start(gw, &provider, SpawnOptions::default()).await {
                Ok(worker) => supervisor::activate(gw, &worker.id).await,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "scale-up spawn failed");
                    let reply = error_frame(format!("Failed to scale {provider}: {e}"));
                    gw.hub.send_to(client_id, reply).await;
                    break;
                }
            }
        }
    } else if count < previous {
        // Newest first, keeping the longest-lived workers warm.
        let excess: Vec<String> = current
            .iter()
            .rev()
            .take(previous - count)
            .map(|w| w.id.clone())
            .collect();
        futures::future::join_all(excess.iter().map(|id| supervisor::stop(gw, id))).await;
    }

    let now = gw.registry.list(Some(&provider)).await.len();
    let reply = frame(
        "scaled",
        json!({ "provider": provider, "previous": previous, "current": now }),
    );
    gw.hub.send_to(client_id, reply).await;
}

async fn handle_chat(
    gw: &Arc<Gateway>,
    client_id: &str,
    provider: Option<String>,
    process_id: Option<String>,
    envelope: &Envelope,
) {
    let worker = match resolve_chat_worker(gw, provider, process_id).await {
        Ok(worker) => worker,
        Err(reply) => {
            gw.hub.send_to(client_id, reply).await;
            return;
        }
    };

    gw.hub
        .set_current_worker(client_id, Some(worker.id.clone()))
        .await;
    if let Err(e) = supervisor::send(gw, &worker.id, envelope.forward_frame()).await {
        gw.hub.set_current_worker(client_id, None).await;
        let reply = error_frame_with_hint(
            format!("Failed to reach worker: {e}"),
            json!({ "type": "retry", "message": "the worker may still be starting" }),
        );
        gw.hub.send_to(client_id, reply).await;
    }
}

/// Pick a healthy worker for a chat, auto-spawning when the provider's
/// policy allows it. Errors come back as ready-to-send frames.
async fn resolve_chat_worker(
    gw: &Arc<Gateway>,
    provider: Option<String>,
    process_id: Option<String>,
) -> Result<Worker, String> {
    if let Some(id) = process_id {
        return gw
            .registry
            .get(&id)
            .await
            .ok_or_else(|| error_frame(GatewayError::WorkerNotFound(id).to_string()));
    }

    let provider = provider.expect("parser guarantees provider or processId");
    if let Some(id) = gw.pools.pick(&provider).await {
        if let Some(worker) = gw.registry.get(&id).await {
            return Ok(worker);
        }
    }

    let hint = json!({ "type": "spawn", "provider": provider });
    let cfg = gw.store.get(&provider).await;
    if !cfg.auto_spawn {
        return Err(error_frame_with_hint(
            GatewayError::NoHealthyWorkers(provider.clone()).to_string(),
            hint,
        ));
    }

    match supervisor::start(gw, &provider, SpawnOptions::default()).await {
        Ok(worker) => {
            supervisor::activate(gw, &worker.id).await;
            Ok(worker)
        }
        Err(e) => Err(error_frame_with_hint(
            format!("Failed to spawn {provider} worker: {e}"),
            hint,
        )),
    }
}
