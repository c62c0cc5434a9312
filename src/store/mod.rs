//! Shared key-value store abstraction
//!
//! Cross-instance state (nonce cache, nonce locks, breaker state) lives
//! behind this trait so the backing store is swappable: Redis in production,
//! an in-memory fake in tests and single-instance development.

pub mod lock;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use lock::{HeldLock, LockConfig, LockManager};
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Minimal shared store interface
///
/// `put_if_absent` and `compare_and_delete` must be atomic with respect to
/// other instances; everything else is plain read/write.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Set `key` to `value` with a TTL, only if the key does not exist.
    /// Returns true if the key was set.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `expected`.
    /// Returns true if the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn incr(&self, key: &str) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Build a store from a URL: `redis://...` or `memory://`
pub async fn connect(url: &str) -> Result<Arc<dyn SharedStore>> {
    if url.starts_with("memory://") {
        Ok(Arc::new(MemoryStore::new()))
    } else {
        Ok(Arc::new(RedisStore::connect(url).await?))
    }
}
