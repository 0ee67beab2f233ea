use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Driver record. Availability and location are written by the driver
/// client; the current-order linkage is written by the assignment
/// coordinator and the lifecycle machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub is_available: bool,
    pub current_order_id: Option<Uuid>,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub rejected_orders_count: u32,
    pub rating: f64,
    pub deliveries_completed: u32,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(id: String, name: String, location: Option<GeoPoint>, rating: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            is_available: true,
            current_order_id: None,
            location_updated_at: location.map(|_| now),
            location,
            rejected_orders_count: 0,
            rating: rating.clamp(0.0, 5.0),
            deliveries_completed: 0,
            updated_at: now,
        }
    }
}
