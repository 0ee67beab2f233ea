use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::chat::{ChatMessage, ChatThread};
use crate::models::user::Actor;
use crate::store::{ns, StoreService};

const WRITE_ATTEMPTS: u32 = 3;

/// Chat threads keyed by customer. The thread snapshot (`last_message`,
/// `unread_count`) is recomputed from message state on every write so
/// concurrent sends and reads cannot make it drift.
#[derive(Clone)]
pub struct ChatService {
    store: StoreService,
}

impl ChatService {
    pub fn new(store: StoreService) -> Self {
        Self { store }
    }

    pub async fn thread(&self, customer_id: &str) -> Result<ChatThread, CoreError> {
        let found = self
            .store
            .get::<ChatThread>(ns::CHAT_THREADS, customer_id)
            .await?;
        Ok(found
            .map(|versioned| versioned.value)
            .unwrap_or_else(|| ChatThread::new(customer_id.to_string(), Utc::now())))
    }

    pub async fn send_message(
        &self,
        customer_id: &str,
        sender_id: &str,
        sender_name: &str,
        sender_role: Actor,
        body: &str,
    ) -> Result<ChatThread, CoreError> {
        if body.trim().is_empty() {
            return Err(CoreError::BadRequest(
                "message body cannot be empty".to_string(),
            ));
        }

        self.mutate(customer_id, |thread| {
            thread.messages.push(ChatMessage {
                id: Uuid::new_v4(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.to_string(),
                sender_role,
                body: body.to_string(),
                sent_at: Utc::now(),
                is_read: false,
            });
        })
        .await
    }

    /// Marks everything the reader has not sent as read.
    pub async fn mark_read(&self, customer_id: &str, reader: Actor) -> Result<ChatThread, CoreError> {
        self.mutate(customer_id, |thread| {
            for message in &mut thread.messages {
                if message.sender_role != reader {
                    message.is_read = true;
                }
            }
        })
        .await
    }

    async fn mutate<F>(&self, customer_id: &str, apply: F) -> Result<ChatThread, CoreError>
    where
        F: Fn(&mut ChatThread),
    {
        let mut attempt = 0u32;
        loop {
            let found = self
                .store
                .get::<ChatThread>(ns::CHAT_THREADS, customer_id)
                .await?;
            let (mut thread, version) = match found {
                Some(versioned) => (versioned.value, Some(versioned.version)),
                None => (ChatThread::new(customer_id.to_string(), Utc::now()), None),
            };

            apply(&mut thread);
            thread.refresh_snapshot();
            thread.updated_at = Utc::now();

            match self
                .store
                .put_if_version(ns::CHAT_THREADS, customer_id, &thread, version)
                .await
            {
                Ok(_) => return Ok(thread),
                Err(CoreError::Conflict(_)) if attempt < WRITE_ATTEMPTS => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }
}
