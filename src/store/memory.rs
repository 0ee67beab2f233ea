use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use async_trait::async_trait;

use crate::store::{Change, ChangeFeed, Connectivity, StoreBackend, StoreError, Versioned};

const FEED_CAPACITY: usize = 256;

/// In-process store backend: dashmap records with per-record versions
/// and per-namespace broadcast feeds. Production deployments point
/// [`StoreBackend`] at the managed realtime document store instead.
pub struct MemoryStore {
    records: DashMap<(String, String), Versioned<Vec<u8>>>,
    feeds: DashMap<String, broadcast::Sender<Change>>,
    connectivity_tx: watch::Sender<Connectivity>,
    connectivity_rx: watch::Receiver<Connectivity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Connected);
        Self {
            records: DashMap::new(),
            feeds: DashMap::new(),
            connectivity_tx,
            connectivity_rx,
        }
    }

    pub fn set_connectivity(&self, status: Connectivity) {
        self.connectivity_tx.send_replace(status);
    }

    fn publish(&self, ns: &str, id: &str, bytes: Option<Vec<u8>>, version: u64) {
        let sender = self
            .feeds
            .entry(ns.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone();
        let _ = sender.send(Change {
            id: id.to_string(),
            bytes,
            version,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, ns: &str, id: &str) -> Result<Option<Versioned<Vec<u8>>>, StoreError> {
        Ok(self
            .records
            .get(&(ns.to_string(), id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, ns: &str, id: &str, bytes: Vec<u8>) -> Result<u64, StoreError> {
        let version = match self.records.entry((ns.to_string(), id.to_string())) {
            Entry::Occupied(mut occupied) => {
                let next = occupied.get().version + 1;
                occupied.insert(Versioned {
                    value: bytes.clone(),
                    version: next,
                });
                next
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Versioned {
                    value: bytes.clone(),
                    version: 1,
                });
                1
            }
        };

        self.publish(ns, id, Some(bytes), version);
        Ok(version)
    }

    async fn put_if_version(
        &self,
        ns: &str,
        id: &str,
        bytes: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let version = match self.records.entry((ns.to_string(), id.to_string())) {
            Entry::Occupied(mut occupied) => match expected {
                Some(v) if occupied.get().version == v => {
                    let next = v + 1;
                    occupied.insert(Versioned {
                        value: bytes.clone(),
                        version: next,
                    });
                    next
                }
                _ => return Err(StoreError::VersionConflict),
            },
            Entry::Vacant(vacant) => match expected {
                None => {
                    vacant.insert(Versioned {
                        value: bytes.clone(),
                        version: 1,
                    });
                    1
                }
                Some(_) => return Err(StoreError::VersionConflict),
            },
        };

        self.publish(ns, id, Some(bytes), version);
        Ok(version)
    }

    async fn remove(&self, ns: &str, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let removed = self.records.remove(&(ns.to_string(), id.to_string()));
        Ok(removed.map(|(_, versioned)| {
            self.publish(ns, id, None, versioned.version);
            versioned.value
        }))
    }

    async fn list(&self, ns: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == ns)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    fn watch(&self, ns: &str, id: &str) -> ChangeFeed {
        let sender = self
            .feeds
            .entry(ns.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone();
        ChangeFeed::new(sender.subscribe(), Some(id.to_string()))
    }

    fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_version_creates_only_when_absent() {
        let store = MemoryStore::new();

        let v1 = store
            .put_if_version("orders", "a", b"one".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let second = store
            .put_if_version("orders", "a", b"two".to_vec(), None)
            .await;
        assert!(matches!(second, Err(StoreError::VersionConflict)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryStore::new();
        store.put("orders", "a", b"one".to_vec()).await.unwrap();
        let v2 = store.put("orders", "a", b"two".to_vec()).await.unwrap();
        assert_eq!(v2, 2);

        let stale = store
            .put_if_version("orders", "a", b"three".to_vec(), Some(1))
            .await;
        assert!(matches!(stale, Err(StoreError::VersionConflict)));

        let fresh = store
            .put_if_version("orders", "a", b"three".to_vec(), Some(2))
            .await
            .unwrap();
        assert_eq!(fresh, 3);
    }

    #[tokio::test]
    async fn remove_yields_payload_exactly_once() {
        let store = MemoryStore::new();
        store.put("scheduled", "s1", b"draft".to_vec()).await.unwrap();

        let first = store.remove("scheduled", "s1").await.unwrap();
        assert_eq!(first, Some(b"draft".to_vec()));

        let second = store.remove("scheduled", "s1").await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn watch_delivers_changes_in_write_order() {
        let store = MemoryStore::new();
        let mut feed = store.watch("orders", "a");

        store.put("orders", "a", b"one".to_vec()).await.unwrap();
        store.put("orders", "b", b"noise".to_vec()).await.unwrap();
        store.put("orders", "a", b"two".to_vec()).await.unwrap();

        let first = feed.next().await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.bytes.as_deref(), Some(b"one".as_ref()));

        let second = feed.next().await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.bytes.as_deref(), Some(b"two".as_ref()));
    }
}
