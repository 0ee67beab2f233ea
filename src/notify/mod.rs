use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::notification::NotificationRecord;
use crate::observability::metrics::Metrics;
use crate::store::{ns, StoreService};

/// Ordered token fallback chain; resolution stops at the first
/// non-empty token.
const TOKEN_NAMESPACES: [&str; 3] = [ns::USERS, ns::CUSTOMERS, ns::DEVICE_TOKENS];

const AUDIT_WRITE_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &Value,
    ) -> Result<(), CoreError>;
}

pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushGateway {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &Value,
    ) -> Result<(), CoreError> {
        let payload = json!({
            "to": token,
            "notification": {
                "title": title,
                "body": body,
                "sound": "default",
                "badge": 1,
            },
            "data": data,
            "priority": "high",
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CoreError::Internal(format!("push gateway request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Internal(format!(
                "push gateway returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Record shape shared by the token lookup paths; only the token field
/// matters here, other fields of the user document are ignored.
#[derive(Debug, Deserialize)]
struct TokenRecord {
    #[serde(default)]
    fcm_token: String,
}

/// Resolves a user to a delivery token and pushes a message. Stateless
/// per call; callers treat dispatch as fire-and-forget and a failed
/// dispatch never rolls back the state change that triggered it.
#[derive(Clone)]
pub struct Dispatcher {
    store: StoreService,
    gateway: Arc<dyn PushGateway>,
    metrics: Metrics,
    retry_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        store: StoreService,
        gateway: Arc<dyn PushGateway>,
        metrics: Metrics,
        retry_attempts: u32,
    ) -> Self {
        Self {
            store,
            gateway,
            metrics,
            retry_attempts,
        }
    }

    pub async fn notify(
        &self,
        order_id: Option<Uuid>,
        user_id: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<(), CoreError> {
        let Some((token, source)) = self.resolve_token(user_id).await? else {
            self.metrics
                .notifications_total
                .with_label_values(&["no_token"])
                .inc();
            return Err(CoreError::NotificationUndeliverable(user_id.to_string()));
        };

        let mut attempt = 0u32;
        loop {
            match self.gateway.push(&token, title, body, &data).await {
                Ok(()) => break,
                Err(err) if attempt < self.retry_attempts => {
                    warn!(user_id, attempt, error = %err, "push gateway call failed; retrying");
                    sleep(Duration::from_millis(100u64 << attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics
                        .notifications_total
                        .with_label_values(&["gateway_error"])
                        .inc();
                    return Err(err);
                }
            }
        }

        self.metrics
            .notifications_total
            .with_label_values(&["sent"])
            .inc();
        info!(user_id, token_source = source, title, "notification dispatched");

        if let Some(order_id) = order_id {
            self.append_audit(order_id, user_id, title, body, source)
                .await;
        }

        Ok(())
    }

    async fn resolve_token(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, &'static str)>, CoreError> {
        for namespace in TOKEN_NAMESPACES {
            if let Some(found) = self.store.get::<TokenRecord>(namespace, user_id).await? {
                let token = found.value.fcm_token;
                if !token.is_empty() {
                    return Ok(Some((token, namespace)));
                }
            }
        }
        Ok(None)
    }

    /// Appends the audit copy under the order's notification log. Audit
    /// loss is tolerable; contention past the attempt budget is logged
    /// and dropped.
    async fn append_audit(
        &self,
        order_id: Uuid,
        recipient_id: &str,
        title: &str,
        body: &str,
        token_source: &str,
    ) {
        let record = NotificationRecord {
            recipient_id: recipient_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            token_source: token_source.to_string(),
            sent_at: Utc::now(),
        };
        let id = order_id.to_string();

        for _ in 0..AUDIT_WRITE_ATTEMPTS {
            let result = self
                .store
                .get::<Vec<NotificationRecord>>(ns::ORDER_NOTIFICATIONS, &id)
                .await;

            let (mut log, version) = match result {
                Ok(Some(found)) => (found.value, Some(found.version)),
                Ok(None) => (Vec::new(), None),
                Err(err) => {
                    warn!(order_id = %id, error = %err, "failed to read notification log");
                    return;
                }
            };

            log.push(record.clone());
            match self
                .store
                .put_if_version(ns::ORDER_NOTIFICATIONS, &id, &log, version)
                .await
            {
                Ok(_) => return,
                Err(CoreError::Conflict(_)) => continue,
                Err(err) => {
                    warn!(order_id = %id, error = %err, "failed to append notification log");
                    return;
                }
            }
        }

        warn!(order_id = %id, "notification log contention; audit entry dropped");
    }
}
