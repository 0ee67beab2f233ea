use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::resolve_user;
use crate::error::CoreError;
use crate::models::notification::NotificationRecord;
use crate::models::order::{Order, OrderDraft, OrderPhase, ScheduledOrder};
use crate::models::user::Actor;
use crate::state::AppState;
use crate::store::ns;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/transition", post(transition_order))
        .route("/orders/:id/reject", post(reject_assignment))
        .route("/orders/:id/notifications", get(list_notifications))
        .route(
            "/scheduled-orders",
            post(create_scheduled_order).get(list_scheduled_orders),
        )
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub draft: OrderDraft,
    /// Signal from the payment processor collaborator; orders without a
    /// completed payment are refused.
    pub payment_completed: bool,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, CoreError> {
    let order = state
        .lifecycle
        .create_order(payload.draft, payload.payment_completed)
        .await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, CoreError> {
    let found = state
        .store
        .get::<Order>(ns::ORDERS, &id.to_string())
        .await?
        .ok_or(CoreError::OrderNotFound(id))?;
    Ok(Json(found.value))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, CoreError> {
    let orders = state
        .store
        .list::<Order>(ns::ORDERS)
        .await?
        .into_iter()
        .map(|(_, versioned)| versioned.value)
        .collect();
    Ok(Json(orders))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub actor_id: String,
    pub target: OrderPhase,
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, CoreError> {
    let user = resolve_user(&state.store, &payload.actor_id).await?;
    let order = state
        .lifecycle
        .transition(id, user.actor(), payload.target)
        .await?;
    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub driver_id: String,
}

async fn reject_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Order>, CoreError> {
    let user = resolve_user(&state.store, &payload.driver_id).await?;
    if user.actor() != Actor::Driver {
        return Err(CoreError::BadRequest(format!(
            "{} is not a driver",
            payload.driver_id
        )));
    }

    let order = state
        .lifecycle
        .reject_assignment(id, &payload.driver_id)
        .await?;
    Ok(Json(order))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<NotificationRecord>>, CoreError> {
    let log = state
        .store
        .get::<Vec<NotificationRecord>>(ns::ORDER_NOTIFICATIONS, &id.to_string())
        .await?
        .map(|versioned| versioned.value)
        .unwrap_or_default();
    Ok(Json(log))
}

#[derive(Deserialize)]
pub struct ScheduleOrderRequest {
    pub scheduled_for: DateTime<Utc>,
    pub draft: OrderDraft,
    pub payment_completed: bool,
}

async fn create_scheduled_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScheduleOrderRequest>,
) -> Result<Json<ScheduledOrder>, CoreError> {
    if !payload.payment_completed {
        return Err(CoreError::BadRequest(
            "payment has not completed".to_string(),
        ));
    }
    let expected = payload.draft.subtotal + payload.draft.tip + payload.draft.delivery_fee;
    if payload.draft.total != expected {
        return Err(CoreError::TotalMismatch {
            expected,
            actual: payload.draft.total,
        });
    }

    let scheduled = ScheduledOrder {
        id: Uuid::new_v4(),
        scheduled_for: payload.scheduled_for,
        draft: payload.draft,
        created_at: Utc::now(),
    };
    state
        .store
        .put_if_version(
            ns::SCHEDULED_ORDERS,
            &scheduled.id.to_string(),
            &scheduled,
            None,
        )
        .await?;
    Ok(Json(scheduled))
}

async fn list_scheduled_orders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScheduledOrder>>, CoreError> {
    let scheduled = state
        .store
        .list::<ScheduledOrder>(ns::SCHEDULED_ORDERS)
        .await?
        .into_iter()
        .map(|(_, versioned)| versioned.value)
        .collect();
    Ok(Json(scheduled))
}
