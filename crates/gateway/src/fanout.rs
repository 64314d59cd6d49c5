//! Worker event delivery.
//!
//! Every worker event goes to at most three audiences, deduplicated in
//! this order: the client whose in-flight request is bound to the worker
//! (unwrapped, so its request/response view stays clean), subscribers of
//! the worker, and subscribers of the worker's provider (both wrapped as
//! `stream` envelopes). Terminal events clear affinity as they pass.

use std::collections::HashSet;

use serde_json::Value;

use zeus_core::protocol::{stream_frame, TERMINAL_EVENTS};
use zeus_core::{Envelope, Worker};

use crate::hub::ClientId;
use crate::state::Gateway;

pub async fn deliver(gw: &Gateway, worker: &Worker, envelope: &Envelope, raw: &str) {
    let mut served: HashSet<ClientId> = HashSet::new();
    let terminal = TERMINAL_EVENTS.contains(&envelope.kind.as_str());

    // 1. Affinity: the originating client gets the event as-is.
    for client in gw.hub.clients_bound_to(&worker.id).await {
        gw.hub.send_to(&client, raw.to_string()).await;
        if terminal {
            gw.hub.set_current_worker(&client, None).await;
        }
        served.insert(client);
    }

    let payload = Value::Object(envelope.params());

    // 2. Worker subscribers not already served.
    for client in gw.hub.worker_subscribers(&worker.id).await {
        if served.contains(&client) {
            continue;
        }
        gw.hub
            .send_to(
                &client,
                stream_frame(
                    "process",
                    &envelope.kind,
                    &payload,
                    &worker.provider,
                    &worker.id,
                    &worker.id,
                ),
            )
            .await;
        served.insert(client);
    }

    // 3. Provider subscribers not already served.
    for client in gw.hub.provider_subscribers(&worker.provider).await {
        if served.contains(&client) {
            continue;
        }
        gw.hub
            .send_to(
                &client,
                stream_frame(
                    "provider",
                    &envelope.kind,
                    &payload,
                    &worker.provider,
                    &worker.id,
                    &worker.id,
                ),
            )
            .await;
        served.insert(client);
    }
}
