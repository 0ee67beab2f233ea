use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Actor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Actor,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

/// One thread per customer. `last_message` and `unread_count` are
/// recomputed from message state on every write, never incremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub customer_id: String,
    pub messages: Vec<ChatMessage>,
    pub last_message: Option<String>,
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn new(customer_id: String, now: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            messages: Vec::new(),
            last_message: None,
            unread_count: 0,
            updated_at: now,
        }
    }

    /// Derives the denormalized snapshot fields from the message list.
    /// `unread_count` counts unread messages sent to the customer, not
    /// by the customer.
    pub fn refresh_snapshot(&mut self) {
        self.last_message = self.messages.last().map(|m| m.body.clone());
        self.unread_count = self
            .messages
            .iter()
            .filter(|m| !m.is_read && m.sender_role != Actor::Customer)
            .count() as u32;
    }
}
