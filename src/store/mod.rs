pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::error::CoreError;

/// Record namespaces. One namespace per top-level collection of the
/// shared store; records are addressed by `(namespace, id)`.
pub mod ns {
    pub const ORDERS: &str = "orders";
    pub const DRIVERS: &str = "drivers";
    pub const SCHEDULED_ORDERS: &str = "scheduled_orders";
    pub const USERS: &str = "users";
    pub const CUSTOMERS: &str = "customers";
    pub const DEVICE_TOKENS: &str = "device_tokens";
    pub const ROLES: &str = "roles";
    pub const CHAT_THREADS: &str = "chat_threads";
    pub const ORDER_NOTIFICATIONS: &str = "order_notifications";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// A single record change on a namespace feed. `bytes` is `None` when
/// the record was removed.
#[derive(Debug, Clone)]
pub struct Change {
    pub id: String,
    pub bytes: Option<Vec<u8>>,
    pub version: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict")]
    VersionConflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Low-level record store: conditional point writes, one-shot reads and
/// path-scoped change feeds. No multi-path transactions.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, ns: &str, id: &str) -> Result<Option<Versioned<Vec<u8>>>, StoreError>;

    /// Unconditional write; returns the new record version.
    async fn put(&self, ns: &str, id: &str, bytes: Vec<u8>) -> Result<u64, StoreError>;

    /// Conditional write. `expected == None` creates the record only if
    /// absent; `Some(v)` succeeds only if the current version is `v`.
    async fn put_if_version(
        &self,
        ns: &str,
        id: &str,
        bytes: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Removes a record, returning its payload. Under concurrent calls
    /// exactly one caller observes `Some`.
    async fn remove(&self, ns: &str, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn list(&self, ns: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StoreError>;

    /// Subscribes to changes of one record. Updates arrive in write
    /// order; dropping the feed cancels the subscription.
    fn watch(&self, ns: &str, id: &str) -> ChangeFeed;

    fn connectivity(&self) -> watch::Receiver<Connectivity>;
}

/// Cancellable handle over a record subscription.
pub struct ChangeFeed {
    rx: broadcast::Receiver<Change>,
    id_filter: Option<String>,
}

impl ChangeFeed {
    pub fn new(rx: broadcast::Receiver<Change>, id_filter: Option<String>) -> Self {
        Self { rx, id_filter }
    }

    /// Next change for the watched record, or `None` once the feed is
    /// closed. Lagged intervals are skipped with a warning; the caller
    /// re-reads to reconcile.
    pub async fn next(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    let matches = self
                        .id_filter
                        .as_deref()
                        .map_or(true, |id| id == change.id);
                    if matches {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged; snapshots dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn cancel(self) {}
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Typed facade over a [`StoreBackend`]: serde (de)serialization that
/// fails closed on malformed records, and bounded backoff on transient
/// store failures. Version conflicts are returned to the caller
/// immediately so it can re-read and reconcile.
#[derive(Clone)]
pub struct StoreService {
    backend: Arc<dyn StoreBackend>,
    retry: RetryPolicy,
}

impl StoreService {
    pub fn new(backend: Arc<dyn StoreBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        ns: &str,
        id: &str,
    ) -> Result<Option<Versioned<T>>, CoreError> {
        let found = self.retrying(|| self.backend.get(ns, id)).await?;
        match found {
            Some(versioned) => {
                let value = decode(ns, id, &versioned.value)?;
                Ok(Some(Versioned {
                    value,
                    version: versioned.version,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, ns: &str, id: &str, value: &T) -> Result<u64, CoreError> {
        let bytes = encode(ns, id, value)?;
        self.retrying(|| self.backend.put(ns, id, bytes.clone()))
            .await
    }

    pub async fn put_if_version<T: Serialize>(
        &self,
        ns: &str,
        id: &str,
        value: &T,
        expected: Option<u64>,
    ) -> Result<u64, CoreError> {
        let bytes = encode(ns, id, value)?;
        self.retrying(|| self.backend.put_if_version(ns, id, bytes.clone(), expected))
            .await
    }

    pub async fn remove<T: DeserializeOwned>(
        &self,
        ns: &str,
        id: &str,
    ) -> Result<Option<T>, CoreError> {
        let removed = self.retrying(|| self.backend.remove(ns, id)).await?;
        removed.map(|bytes| decode(ns, id, &bytes)).transpose()
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        ns: &str,
    ) -> Result<Vec<(String, Versioned<T>)>, CoreError> {
        let raw = self.retrying(|| self.backend.list(ns)).await?;
        raw.into_iter()
            .map(|(id, versioned)| {
                let value = decode(ns, &id, &versioned.value)?;
                Ok((
                    id,
                    Versioned {
                        value,
                        version: versioned.version,
                    },
                ))
            })
            .collect()
    }

    pub fn watch(&self, ns: &str, id: &str) -> ChangeFeed {
        self.backend.watch(ns, id)
    }

    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.backend.connectivity()
    }

    async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(StoreError::VersionConflict) => {
                    return Err(CoreError::Conflict("concurrent write".to_string()));
                }
                Err(StoreError::Unavailable(reason)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(CoreError::StoreUnavailable(reason));
                    }
                    let delay = self.retry.base_delay * 2u32.saturating_pow(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "store unavailable; backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn encode<T: Serialize>(ns: &str, id: &str, value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|err| CoreError::Internal(format!("encode {ns}/{id}: {err}")))
}

fn decode<T: DeserializeOwned>(ns: &str, id: &str, bytes: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|err| CoreError::Corrupt(format!("{ns}/{id}: {err}")))
}
