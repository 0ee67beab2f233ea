use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::RoleRecord;
use crate::error::CoreError;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::user::Actor;
use crate::state::AppState;
use crate::store::ns;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/location", patch(update_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub id: String,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub rating: f64,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, CoreError> {
    if payload.id.trim().is_empty() {
        return Err(CoreError::BadRequest("id cannot be empty".to_string()));
    }
    if payload.name.trim().is_empty() {
        return Err(CoreError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = Driver::new(payload.id, payload.name, payload.location, payload.rating);

    state
        .store
        .put_if_version(ns::DRIVERS, &driver.id, &driver, None)
        .await?;
    state
        .store
        .put(
            ns::ROLES,
            &driver.id,
            &RoleRecord {
                role: Actor::Driver,
                name: driver.name.clone(),
            },
        )
        .await?;

    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, CoreError> {
    let drivers = state
        .store
        .list::<Driver>(ns::DRIVERS)
        .await?
        .into_iter()
        .map(|(_, versioned)| versioned.value)
        .collect();
    Ok(Json(drivers))
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub is_available: bool,
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Driver>, CoreError> {
    let driver = state
        .lifecycle
        .update_driver(&id, |d| {
            d.is_available = payload.is_available;
        })
        .await?;
    Ok(Json(driver))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, CoreError> {
    let driver = state
        .lifecycle
        .update_driver(&id, |d| {
            d.location = Some(payload.location);
            d.location_updated_at = Some(Utc::now());
        })
        .await?;
    Ok(Json(driver))
}
