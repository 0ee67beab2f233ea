pub mod chat;
pub mod drivers;
pub mod orders;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::CoreError;
use crate::models::driver::Driver;
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::{ns, Connectivity};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(orders::router())
        .merge(drivers::router())
        .merge(chat::router())
        .merge(users::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .route("/orders/:id/ws", get(ws::order_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    orders: usize,
    drivers: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, CoreError> {
    let store = match *state.store.connectivity().borrow() {
        Connectivity::Connected => "connected",
        Connectivity::Degraded => "degraded",
    };

    let orders = state.store.list::<Order>(ns::ORDERS).await?.len();
    let drivers = state.store.list::<Driver>(ns::DRIVERS).await?.len();

    Ok(Json(HealthResponse {
        status: "ok",
        store,
        orders,
        drivers,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
