use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use super::{RemoteError, RemoteStore, StoreEntry};

/// A [`RemoteStore`] living entirely in process memory.
///
/// Entries expire after their TTL like they would in Redis. Expired entries are dropped when
/// they are read, and all of them are swept on every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Bytes, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, RemoteError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let values = keys
            .iter()
            .map(|key| match entries.get(key) {
                Some((value, deadline)) if *deadline > now => Some(value.clone()),
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            })
            .collect();
        Ok(values)
    }

    async fn set_many(&self, new_entries: Vec<StoreEntry>) -> Result<(), RemoteError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, deadline)| *deadline > now);
        for entry in new_entries {
            entries.insert(entry.key, (entry.value, now + entry.ttl));
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), RemoteError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store
            .set_many(vec![
                StoreEntry {
                    key: "short".into(),
                    value: Bytes::from_static(b"a"),
                    ttl: Duration::from_millis(30),
                },
                StoreEntry {
                    key: "long".into(),
                    value: Bytes::from_static(b"b"),
                    ttl: Duration::from_secs(60),
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let keys = ["short".to_string(), "long".to_string(), "none".to_string()];
        let values = store.get_many(&keys).await.unwrap();
        assert_eq!(values, vec![None, Some(Bytes::from_static(b"b")), None]);
        assert_eq!(store.len(), 1);

        store.delete_many(&keys[1..2]).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let store = MemoryStore::new();
        let expiring = (0..1000)
            .map(|i| StoreEntry {
                key: format!("key{i}"),
                value: Bytes::from_static(b"a"),
                ttl: Duration::from_millis(1),
            })
            .collect();
        store.set_many(expiring).await.unwrap();
        assert_eq!(store.entries.lock().unwrap().len(), 1000);

        tokio::time::sleep(Duration::from_millis(20)).await;

        // none of the expired keys is ever read again
        store
            .set_many(vec![StoreEntry {
                key: "other".into(),
                value: Bytes::from_static(b"b"),
                ttl: Duration::from_secs(60),
            }])
            .await
            .unwrap();
        assert_eq!(store.entries.lock().unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }
}
