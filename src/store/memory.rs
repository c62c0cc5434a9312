//! In-memory shared store
//!
//! DashMap-backed fake with the same TTL semantics as the Redis store.
//! Used by every unit test and by `memory://` development setups.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Error, Result};

use super::SharedStore;

#[derive(Clone, Debug)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory implementation of [`SharedStore`]
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, ValueEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an entry if its TTL has passed, mimicking Redis lazy expiry
    fn purge_if_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.purge_if_expired(key);
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let new_entry = ValueEntry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(new_entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(new_entry);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired() && entry.value == expected);
        Ok(removed.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.purge_if_expired(key);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current: i64 = occupied
                    .get()
                    .value
                    .parse()
                    .map_err(|_| Error::Cache(format!("non-numeric value at {}", key)))?;
                let next = current + 1;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ValueEntry {
                    value: "1".to_string(),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store.put("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_if_absent_blocks_second_writer() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.put_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.put_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_put_if_absent_succeeds_after_expiry() {
        let store = MemoryStore::new();

        assert!(store
            .put_if_absent("lock", "a", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store
            .put_if_absent("lock", "b", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete_requires_match() {
        let store = MemoryStore::new();
        store.put("k", "owner-1").await.unwrap();

        assert!(!store.compare_and_delete("k", "owner-2").await.unwrap());
        assert!(store.exists("k").await.unwrap());

        assert!(store.compare_and_delete("k", "owner-1").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_counts_up() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.incr("c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_expired_key_reads_as_absent() {
        let store = MemoryStore::new();
        store.put("k", "v").await.unwrap();
        store.expire("k", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }
}
