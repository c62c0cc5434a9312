//! Nonce management
//!
//! Allocates per-account transaction sequence numbers under a distributed,
//! TTL-bounded lock, synchronized against the ledger's authoritative count.
//! Handles accounts whose nonce advances outside this system by always
//! adopting the higher of cached and chain values at sync time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::NonceConfig;
use crate::error::{Error, Result};
use crate::ledger::{Address, LedgerClient};
use crate::store::{LockConfig, LockManager, SharedStore};

fn nonce_key(address: &Address) -> String {
    format!("nonce:{}", address.as_str())
}

fn lock_key(address: &Address) -> String {
    format!("nonce:lock:{}", address.as_str())
}

/// Cached nonce state for one account, stored as JSON in the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NonceRecord {
    cached_nonce: u64,
    last_synced_chain_nonce: u64,
    last_synced_at: DateTime<Utc>,
}

/// Diagnostic snapshot of an account's nonce state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceStatus {
    pub address: Address,
    pub cached_nonce: Option<u64>,
    pub chain_nonce: u64,
    pub lock_held: bool,
    pub in_sync: bool,
}

/// Allocates transaction nonces with cross-instance mutual exclusion
pub struct NonceManager {
    store: Arc<dyn SharedStore>,
    ledger: Arc<dyn LedgerClient>,
    locks: LockManager,
    sync_interval: chrono::Duration,
}

impl NonceManager {
    pub fn new(
        store: Arc<dyn SharedStore>,
        ledger: Arc<dyn LedgerClient>,
        config: &NonceConfig,
    ) -> Self {
        let lock_config = LockConfig {
            ttl: Duration::from_secs(config.lock_ttl_secs),
            wait_budget: Duration::from_millis(config.lock_wait_ms),
            retry_base: Duration::from_millis(config.lock_retry_base_ms),
        };

        info!(
            lock_ttl_secs = config.lock_ttl_secs,
            sync_interval_secs = config.sync_interval_secs,
            "nonce manager initialized"
        );

        Self {
            locks: LockManager::new(Arc::clone(&store), lock_config),
            store,
            ledger,
            sync_interval: chrono::Duration::seconds(config.sync_interval_secs as i64),
        }
    }

    /// Reserve the next nonce for an account.
    ///
    /// Acquires the account lock with bounded backoff; a timeout surfaces as
    /// a retryable error and the caller must rebuild the whole transaction,
    /// not just re-fetch a nonce.
    pub async fn reserve_nonce(&self, address: &Address) -> Result<u64> {
        let lock = self
            .locks
            .acquire(&lock_key(address))
            .await
            .map_err(|e| match e {
                Error::LockTimeout(_) => Error::NonceLockTimeout(address.to_string()),
                other => other,
            })?;

        let result = self.reserve_locked(address).await;

        if let Err(e) = self.locks.release(lock).await {
            warn!(address = %address, "failed to release nonce lock: {}", e);
        }

        result
    }

    async fn reserve_locked(&self, address: &Address) -> Result<u64> {
        let now = Utc::now();
        let record = self.load(address).await?;

        let (nonce, chain_nonce, synced_at) = match record {
            Some(record) if now - record.last_synced_at < self.sync_interval => (
                record.cached_nonce,
                record.last_synced_chain_nonce,
                record.last_synced_at,
            ),
            stale => {
                // Cache missing or stale: consult the chain and adopt the
                // higher value, covering nonces advanced outside this system.
                let chain_nonce = self.ledger.get_transaction_count(address).await?;
                let cached = stale.as_ref().map(|r| r.cached_nonce).unwrap_or(0);
                let adopted = cached.max(chain_nonce);

                if stale.is_some() && adopted != cached {
                    warn!(
                        address = %address,
                        cached,
                        chain_nonce,
                        "nonce cache behind chain, adopting chain value"
                    );
                }

                (adopted, chain_nonce, now)
            }
        };

        self.save(
            address,
            &NonceRecord {
                cached_nonce: nonce + 1,
                last_synced_chain_nonce: chain_nonce,
                last_synced_at: synced_at,
            },
        )
        .await?;

        debug!(address = %address, nonce, "nonce reserved");
        Ok(nonce)
    }

    /// Recover from a nonce-rejected submission: resync from the chain's
    /// authoritative count and return a corrected nonce for one retry
    pub async fn handle_nonce_error(&self, address: &Address, failed_nonce: u64) -> Result<u64> {
        warn!(address = %address, failed_nonce, "handling nonce rejection");

        let corrected = self.resync(address).await?;

        info!(
            address = %address,
            failed_nonce,
            corrected,
            "nonce cache resynchronized after rejection"
        );

        Ok(corrected)
    }

    /// Administrative forced resynchronization with the chain
    pub async fn reset_nonce(&self, address: &Address) -> Result<u64> {
        let nonce = self.resync(address).await?;
        warn!(address = %address, nonce, "nonce reset to chain state");
        Ok(nonce)
    }

    async fn resync(&self, address: &Address) -> Result<u64> {
        let lock = self
            .locks
            .acquire(&lock_key(address))
            .await
            .map_err(|e| match e {
                Error::LockTimeout(_) => Error::NonceLockTimeout(address.to_string()),
                other => other,
            })?;

        let result = async {
            let chain_nonce = self.ledger.get_transaction_count(address).await?;
            self.save(
                address,
                &NonceRecord {
                    cached_nonce: chain_nonce,
                    last_synced_chain_nonce: chain_nonce,
                    last_synced_at: Utc::now(),
                },
            )
            .await?;
            Ok(chain_nonce)
        }
        .await;

        if let Err(e) = self.locks.release(lock).await {
            warn!(address = %address, "failed to release nonce lock: {}", e);
        }

        result
    }

    /// Diagnostic view of cached vs chain state
    pub async fn get_status(&self, address: &Address) -> Result<NonceStatus> {
        let record = self.load(address).await?;
        let chain_nonce = self.ledger.get_transaction_count(address).await?;
        let lock_held = self.locks.is_held(&lock_key(address)).await?;

        let cached_nonce = record.map(|r| r.cached_nonce);

        Ok(NonceStatus {
            address: address.clone(),
            cached_nonce,
            chain_nonce,
            lock_held,
            in_sync: cached_nonce == Some(chain_nonce),
        })
    }

    /// Drop all cached state for an account. Administrative and destructive:
    /// the next reservation re-reads the chain.
    pub async fn clear(&self, address: &Address) -> Result<()> {
        self.store.delete(&nonce_key(address)).await?;
        self.store.delete(&lock_key(address)).await?;
        warn!(address = %address, "cleared nonce state");
        Ok(())
    }

    async fn load(&self, address: &Address) -> Result<Option<NonceRecord>> {
        match self.store.get(&nonce_key(address)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, address: &Address, record: &NonceRecord) -> Result<()> {
        self.store
            .put(&nonce_key(address), &serde_json::to_string(record)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::store::MemoryStore;
    use std::collections::HashSet;

    fn test_address() -> Address {
        Address::parse("0xab5801a7d398351b8be11c439e05c5b3259aec9b").unwrap()
    }

    fn test_config() -> NonceConfig {
        NonceConfig {
            lock_ttl_secs: 5,
            lock_wait_ms: 2_000,
            lock_retry_base_ms: 5,
            sync_interval_secs: 60,
        }
    }

    fn manager_with_chain_nonce(nonce: u64) -> (Arc<NonceManager>, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_transaction_count(&test_address(), nonce);

        let manager = Arc::new(NonceManager::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            &test_config(),
        ));
        (manager, ledger)
    }

    #[tokio::test]
    async fn test_sequential_reservations_are_contiguous() {
        let (manager, _ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 7);
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 8);
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_are_distinct_and_contiguous() {
        let (manager, _ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            let address = address.clone();
            handles.push(tokio::spawn(
                async move { manager.reserve_nonce(&address).await },
            ));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap().unwrap());
        }

        let distinct: HashSet<u64> = nonces.iter().copied().collect();
        assert_eq!(distinct.len(), 10);

        nonces.sort_unstable();
        assert_eq!(nonces, (7..17).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_chain_query() {
        let (manager, ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        manager.reserve_nonce(&address).await.unwrap();
        manager.reserve_nonce(&address).await.unwrap();
        manager.reserve_nonce(&address).await.unwrap();

        // Only the first reservation needed the chain.
        assert_eq!(ledger.count_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_externally_advanced_nonce_is_adopted() {
        let ledger = Arc::new(MockLedger::new());
        let address = test_address();
        ledger.set_transaction_count(&address, 7);

        let config = NonceConfig {
            sync_interval_secs: 0, // every reservation re-reads the chain
            ..test_config()
        };
        let manager = NonceManager::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            &config,
        );

        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 7);

        // Someone submitted externally: chain jumps past our cache.
        ledger.set_transaction_count(&address, 20);
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 20);
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 21);
    }

    #[tokio::test]
    async fn test_handle_nonce_error_resyncs_from_chain() {
        let (manager, ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        // Drift the cache ahead of the chain.
        for _ in 0..5 {
            manager.reserve_nonce(&address).await.unwrap();
        }

        ledger.set_transaction_count(&address, 9);
        let corrected = manager.handle_nonce_error(&address, 11).await.unwrap();
        assert_eq!(corrected, 9);

        // Cache now matches the chain's authoritative count.
        let status = manager.get_status(&address).await.unwrap();
        assert_eq!(status.cached_nonce, Some(9));
        assert!(status.in_sync);
    }

    #[tokio::test]
    async fn test_reset_nonce_returns_chain_value() {
        let (manager, ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        manager.reserve_nonce(&address).await.unwrap();
        ledger.set_transaction_count(&address, 42);

        assert_eq!(manager.reset_nonce(&address).await.unwrap(), 42);
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_status_reports_lock_and_sync() {
        let (manager, _ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        let status = manager.get_status(&address).await.unwrap();
        assert_eq!(status.cached_nonce, None);
        assert_eq!(status.chain_nonce, 7);
        assert!(!status.lock_held);
        assert!(!status.in_sync);
    }

    #[tokio::test]
    async fn test_clear_forces_chain_reread() {
        let (manager, ledger) = manager_with_chain_nonce(7);
        let address = test_address();

        manager.reserve_nonce(&address).await.unwrap();
        manager.clear(&address).await.unwrap();

        ledger.set_transaction_count(&address, 3);
        // Cleared cache: back to the (lower) chain value, not the old cache.
        assert_eq!(manager.reserve_nonce(&address).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_as_nonce_lock_timeout() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        let address = test_address();
        ledger.set_transaction_count(&address, 7);

        let config = NonceConfig {
            lock_wait_ms: 100,
            lock_retry_base_ms: 10,
            ..test_config()
        };
        let manager = NonceManager::new(
            Arc::clone(&store) as Arc<dyn SharedStore>,
            ledger,
            &config,
        );

        // Simulate another instance holding the lock past our wait budget.
        store
            .put_if_absent(
                &lock_key(&address),
                "other-instance",
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let err = manager.reserve_nonce(&address).await.unwrap_err();
        assert!(matches!(err, Error::NonceLockTimeout(_)));
        assert!(err.is_retryable());
    }
}
