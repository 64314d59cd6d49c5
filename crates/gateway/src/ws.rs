//! Client-facing bidirectional stream.
//!
//! One WebSocket per client. The reader feeds the router; a dedicated
//! writer task drains the client's channel to the sink, so all writes to
//! one client are serialized regardless of which component produced them.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use zeus_core::protocol::frame;

use crate::router;
use crate::state::Gateway;

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(gw): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, gw))
}

async fn handle_client(socket: WebSocket, gw: Arc<Gateway>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = gw.hub.attach(tx).await;
    info!(client = %client_id, "client connected");

    let hello = frame(
        "connected",
        json!({
            "sessionId": gw.session_id,
            "clientId": client_id,
            "providers": gw.provider_names().await,
        }),
    );
    gw.hub.send_to(&client_id, hello).await;

    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            if sender.send(Message::Text(outbound.into())).await.is_err() {
                break;
            }
        }
    });

    let shutdown = gw.shutdown.notified();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    router::dispatch(&gw, &client_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut shutdown => break,
        }
    }

    // Disconnect tears down subscriptions and affinity atomically.
    gw.hub.detach(&client_id).await;
    send_task.abort();
    info!(client = %client_id, "client disconnected");
}
