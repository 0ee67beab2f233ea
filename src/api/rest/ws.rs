use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::store::ns;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.order_events_tx.subscribe();

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize order event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}

/// Per-order change feed: streams the order's snapshots in write order
/// straight off the store subscription. Dropping the socket drops the
/// feed, which cancels the subscription.
pub async fn order_ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_order_socket(socket, state, id))
}

async fn handle_order_socket(socket: WebSocket, state: Arc<AppState>, order_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut feed = state.store.watch(ns::ORDERS, &order_id.to_string());

    info!(order_id = %order_id, "order watch connected");

    let send_task = tokio::spawn(async move {
        while let Some(change) = feed.next().await {
            let Some(bytes) = change.bytes else {
                break;
            };
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "order snapshot is not valid utf8");
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(order_id = %order_id, "order watch disconnected");
}
