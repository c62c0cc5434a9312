//! Distributed lock over the shared store
//!
//! Lock tokens carry a random owner id and a TTL, so a crashed holder's lock
//! expires on its own and release never frees another owner's lock.
//! Acquisition retries with exponential backoff inside a hard time budget;
//! it never blocks indefinitely.

use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::SharedStore;

/// Lock tuning knobs
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL on the lock key; a dead holder frees the lock after this long
    pub ttl: Duration,

    /// Total acquisition budget before giving up
    pub wait_budget: Duration,

    /// Initial backoff delay between acquisition attempts
    pub retry_base: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            wait_budget: Duration::from_secs(5),
            retry_base: Duration::from_millis(100),
        }
    }
}

/// A held lock; must be passed back to [`LockManager::release`]
#[derive(Debug)]
pub struct HeldLock {
    key: String,
    token: String,
}

impl HeldLock {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Acquires and releases TTL-bounded locks in the shared store
pub struct LockManager {
    store: Arc<dyn SharedStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn SharedStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// Acquire the lock at `key`, retrying with exponential backoff until
    /// the wait budget is exhausted
    pub async fn acquire(&self, key: &str) -> Result<HeldLock> {
        let token = Uuid::new_v4().to_string();

        let backoff = ExponentialBackoff {
            initial_interval: self.config.retry_base,
            max_interval: self.config.retry_base * 16,
            max_elapsed_time: Some(self.config.wait_budget),
            ..Default::default()
        };

        let store = Arc::clone(&self.store);
        let ttl = self.config.ttl;

        retry(backoff, || {
            let store = Arc::clone(&store);
            let key = key.to_string();
            let token = token.clone();
            async move {
                match store.put_if_absent(&key, &token, ttl).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(backoff::Error::transient(Error::LockTimeout(key))),
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await?;

        debug!(key, "lock acquired");

        Ok(HeldLock {
            key: key.to_string(),
            token,
        })
    }

    /// Release a held lock, only if we still own it
    pub async fn release(&self, lock: HeldLock) -> Result<()> {
        let released = self
            .store
            .compare_and_delete(&lock.key, &lock.token)
            .await?;

        if released {
            debug!(key = %lock.key, "lock released");
        } else {
            // The TTL expired and someone else may hold the lock now.
            warn!(key = %lock.key, "lock already expired at release");
        }

        Ok(())
    }

    /// Check whether a lock is currently held by anyone
    pub async fn is_held(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn fast_config() -> LockConfig {
        LockConfig {
            ttl: Duration::from_secs(5),
            wait_budget: Duration::from_millis(200),
            retry_base: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(store, fast_config());

        let held = locks.acquire("lock:a").await.unwrap();
        assert!(locks.is_held("lock:a").await.unwrap());

        locks.release(held).await.unwrap();
        assert!(!locks.is_held("lock:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(Arc::clone(&store) as Arc<dyn SharedStore>, fast_config());

        let held = locks.acquire("lock:a").await.unwrap();

        let err = locks.acquire("lock:a").await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));

        locks.release(held).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let store = Arc::new(MemoryStore::new());
        let config = LockConfig {
            ttl: Duration::from_millis(20),
            ..fast_config()
        };
        let locks = LockManager::new(store, config);

        let _held = locks.acquire("lock:a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // TTL elapsed; a second owner gets the lock without manual release.
        let second = locks.acquire("lock:a").await.unwrap();
        locks.release(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_after_expiry_does_not_free_new_owner() {
        let store = Arc::new(MemoryStore::new());
        let config = LockConfig {
            ttl: Duration::from_millis(20),
            ..fast_config()
        };
        let locks = LockManager::new(store, config);

        let stale = locks.acquire("lock:a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = locks.acquire("lock:a").await.unwrap();

        // Stale owner releasing must not remove the fresh owner's lock.
        locks.release(stale).await.unwrap();
        assert!(locks.is_held("lock:a").await.unwrap());

        locks.release(fresh).await.unwrap();
    }
}
