use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::auth::{resolve_user, RoleRecord};
use crate::error::CoreError;
use crate::models::user::{Actor, User};
use crate::state::AppState;
use crate::store::ns;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/users", post(register_user))
        .route("/users/:id/token", put(register_token))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub secret: String,
}

/// Exchanges credentials for the resolved account: the identity
/// provider authenticates, then a single role-index lookup yields the
/// typed user instead of probing each role collection.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<User>, CoreError> {
    let user_id = state
        .identity
        .authenticate(&payload.user_id, &payload.secret)
        .await?;
    let user = resolve_user(&state.store, &user_id).await?;
    Ok(Json(user))
}

/// Profile document kept under `users/{id}`; the token field is what
/// the notification fallback chain reads first.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub role: Actor,
    #[serde(default)]
    pub fcm_token: String,
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub id: String,
    pub name: String,
    pub role: Actor,
    #[serde(default)]
    pub fcm_token: String,
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<Json<User>, CoreError> {
    if payload.id.trim().is_empty() {
        return Err(CoreError::BadRequest("id cannot be empty".to_string()));
    }
    if payload.name.trim().is_empty() {
        return Err(CoreError::BadRequest("name cannot be empty".to_string()));
    }

    state
        .store
        .put(
            ns::ROLES,
            &payload.id,
            &RoleRecord {
                role: payload.role,
                name: payload.name.clone(),
            },
        )
        .await?;
    state
        .store
        .put(
            ns::USERS,
            &payload.id,
            &UserRecord {
                name: payload.name.clone(),
                role: payload.role,
                fcm_token: payload.fcm_token,
            },
        )
        .await?;

    let user = resolve_user(&state.store, &payload.id).await?;
    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct RegisterTokenRequest {
    pub fcm_token: String,
}

async fn register_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<RegisterTokenRequest>,
) -> Result<Json<User>, CoreError> {
    let user = resolve_user(&state.store, &id).await?;

    let record = UserRecord {
        name: user.name().to_string(),
        role: user.actor(),
        fcm_token: payload.fcm_token,
    };
    state.store.put(ns::USERS, &id, &record).await?;

    Ok(Json(user))
}
