use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit copy of a notification accepted by the push gateway, kept under
/// the order it was sent for. Not a delivery guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub token_source: String,
    pub sent_at: DateTime<Utc>,
}
