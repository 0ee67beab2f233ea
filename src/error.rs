use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderPhase;
use crate::models::user::Actor;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderPhase, to: OrderPhase },

    #[error("{actor:?} may not move an order from {from:?} to {to:?}")]
    ActorNotAuthorized {
        actor: Actor,
        from: OrderPhase,
        to: OrderPhase,
    },

    #[error("no drivers available")]
    DriverUnavailable,

    #[error("no delivery token for user {0}")]
    NotificationUndeliverable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("inconsistent assignment: {0}")]
    InconsistentAssignment(String),

    #[error("order total {actual} does not equal subtotal + tip + delivery fee {expected}")]
    TotalMismatch { expected: i64, actual: i64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("corrupt record at {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::OrderNotFound(_) | CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidTransition { .. } | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::ActorNotAuthorized { .. } => StatusCode::FORBIDDEN,
            CoreError::DriverUnavailable | CoreError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CoreError::NotificationUndeliverable(_) => StatusCode::BAD_GATEWAY,
            CoreError::TotalMismatch { .. } | CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::InconsistentAssignment(_)
            | CoreError::Corrupt(_)
            | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
