use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::auth::resolve_user;
use crate::error::CoreError;
use crate::models::chat::ChatThread;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/:customer_id", get(get_thread))
        .route("/chat/:customer_id/messages", post(send_message))
        .route("/chat/:customer_id/read", post(mark_read))
}

async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<String>,
) -> Result<Json<ChatThread>, CoreError> {
    let thread = state.chat.thread(&customer_id).await?;
    Ok(Json(thread))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub body: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<ChatThread>, CoreError> {
    let sender = resolve_user(&state.store, &payload.sender_id).await?;
    let thread = state
        .chat
        .send_message(
            &customer_id,
            sender.id(),
            sender.name(),
            sender.actor(),
            &payload.body,
        )
        .await?;
    Ok(Json(thread))
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub reader_id: String,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<String>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<ChatThread>, CoreError> {
    let reader = resolve_user(&state.store, &payload.reader_id).await?;
    let thread = state.chat.mark_read(&customer_id, reader.actor()).await?;
    Ok(Json(thread))
}
