//! Transaction submission
//!
//! Thin glue between the pieces a business handler needs: submit signed raw
//! bytes through the breaker-wrapped ledger client and record them for the
//! monitor. A nonce rejection resynchronizes the cache before surfacing, so
//! the caller can rebuild and retry exactly once with a corrected nonce.
//! Nothing here ever auto-retries a submission.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::ledger::{Address, LedgerClient};
use crate::monitor::types::{PendingTransactionRecord, TxStatus};
use crate::nonce::NonceManager;
use crate::storage::PendingTxStore;

/// Submits signed transactions and records them for reconciliation
pub struct TransactionSubmitter {
    nonces: Arc<NonceManager>,
    breaker: Arc<CircuitBreaker>,
    ledger: Arc<dyn LedgerClient>,
    pending: Arc<dyn PendingTxStore>,
}

impl TransactionSubmitter {
    pub fn new(
        nonces: Arc<NonceManager>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<dyn LedgerClient>,
        pending: Arc<dyn PendingTxStore>,
    ) -> Self {
        Self {
            nonces,
            breaker,
            ledger,
            pending,
        }
    }

    /// Submit a signed raw transaction built by the caller.
    ///
    /// On a nonce rejection the cache is resynchronized before the error is
    /// returned; the caller must rebuild the whole transaction with a fresh
    /// reservation rather than resubmitting the same bytes.
    pub async fn submit(
        &self,
        wallet_address: &Address,
        nonce: u64,
        raw_tx: &[u8],
    ) -> Result<PendingTransactionRecord> {
        let ledger = Arc::clone(&self.ledger);
        let outcome = self
            .breaker
            .call(|| async move { ledger.send_raw_transaction(raw_tx).await })
            .await;

        let tx_hash = match outcome {
            Ok(tx_hash) => tx_hash,
            Err(Error::Nonce { message, .. }) => {
                let corrected = self.nonces.handle_nonce_error(wallet_address, nonce).await?;
                return Err(Error::Nonce {
                    address: wallet_address.to_string(),
                    message: format!("{} (cache resynchronized, next nonce {})", message, corrected),
                });
            }
            Err(e) => return Err(e),
        };

        let record = PendingTransactionRecord {
            tx_id: Uuid::new_v4().to_string(),
            wallet_address: wallet_address.clone(),
            nonce,
            tx_hash,
            raw_tx: hex::encode(raw_tx),
            status: TxStatus::Pending,
            submitted_at: Utc::now(),
            confirmed_at: None,
            gas_used: None,
            detail: None,
        };

        self.pending.insert(&record).await?;

        info!(
            tx_id = %record.tx_id,
            tx_hash = %record.tx_hash,
            wallet = %wallet_address,
            nonce,
            "transaction submitted"
        );

        Ok(record)
    }

    /// Explicitly resubmit a stuck or failed transaction's original bytes.
    ///
    /// Administrative and deliberate: one resubmission per invocation,
    /// never triggered by the monitor.
    pub async fn retry_transaction(&self, tx_id: &str) -> Result<PendingTransactionRecord> {
        let mut record = self
            .pending
            .get(tx_id)
            .await?
            .ok_or_else(|| Error::BusinessLogic(format!("Unknown transaction: {}", tx_id)))?;

        if !matches!(record.status, TxStatus::Stuck | TxStatus::Failed) {
            return Err(Error::BusinessLogic(format!(
                "Transaction {} is {}; only stuck or failed transactions can be retried",
                tx_id,
                record.status.as_str()
            )));
        }

        let raw_tx = hex::decode(&record.raw_tx)
            .map_err(|_| Error::Serialization(format!("corrupt raw payload for {}", tx_id)))?;

        warn!(tx_id, "operator retry: resubmitting original payload");

        let ledger = Arc::clone(&self.ledger);
        let payload = raw_tx.clone();
        let tx_hash = self
            .breaker
            .call(|| async move { ledger.send_raw_transaction(&payload).await })
            .await?;

        record.tx_hash = tx_hash;
        record.status = TxStatus::Pending;
        record.submitted_at = Utc::now();
        record.confirmed_at = None;
        record.gas_used = None;
        record.detail = Some("resubmitted by operator".to_string());

        self.pending.update(&record).await?;

        info!(tx_id, tx_hash = %record.tx_hash, "transaction resubmitted");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, NonceConfig};
    use crate::ledger::mock::MockLedger;
    use crate::storage::memory::MemoryPendingTxStore;
    use crate::store::{MemoryStore, SharedStore};
    use std::sync::atomic::Ordering;

    struct Fixture {
        submitter: TransactionSubmitter,
        pending: Arc<MemoryPendingTxStore>,
        ledger: Arc<MockLedger>,
        nonces: Arc<NonceManager>,
    }

    fn test_address() -> Address {
        Address::parse("0xab5801a7d398351b8be11c439e05c5b3259aec9b").unwrap()
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        let pending = Arc::new(MemoryPendingTxStore::new());

        let nonces = Arc::new(NonceManager::new(
            Arc::clone(&store),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            &NonceConfig {
                lock_ttl_secs: 5,
                lock_wait_ms: 500,
                lock_retry_base_ms: 5,
                sync_interval_secs: 60,
            },
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            store,
            BreakerConfig {
                name: "test-ledger".to_string(),
                failure_threshold: 5,
                success_threshold: 2,
                timeout_secs: 30,
            },
        ));

        let submitter = TransactionSubmitter::new(
            Arc::clone(&nonces),
            breaker,
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            Arc::clone(&pending) as Arc<dyn PendingTxStore>,
        );

        Fixture {
            submitter,
            pending,
            ledger,
            nonces,
        }
    }

    #[tokio::test]
    async fn test_submit_records_pending_transaction() {
        let f = fixture();
        let address = test_address();

        let record = f
            .submitter
            .submit(&address, 7, b"signed-payload")
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.nonce, 7);
        assert_eq!(record.raw_tx, hex::encode(b"signed-payload"));

        let stored = f.pending.get(&record.tx_id).await.unwrap().unwrap();
        assert_eq!(stored.tx_hash, record.tx_hash);
        assert_eq!(f.ledger.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nonce_rejection_resyncs_and_surfaces() {
        let f = fixture();
        let address = test_address();
        f.ledger.set_transaction_count(&address, 12);
        f.ledger.reject_nonce_next(1);

        let err = f
            .submitter
            .submit(&address, 7, b"stale-nonce-payload")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Nonce { .. }));

        // Cache was resynchronized from the chain's count.
        let status = f.nonces.get_status(&address).await.unwrap();
        assert_eq!(status.cached_nonce, Some(12));

        // Nothing recorded for the rejected submission.
        assert_eq!(f.pending.counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_repeated_failures() {
        let f = fixture();
        let address = test_address();
        f.ledger.fail_next(5);

        for _ in 0..5 {
            let err = f.submitter.submit(&address, 1, b"x").await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)));
        }

        // Breaker open: rejected without a network attempt.
        let err = f.submitter.submit(&address, 1, b"x").await.unwrap_err();
        assert!(matches!(err, Error::CircuitBreakerOpen(_)));
        assert_eq!(f.ledger.send_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_resubmits_stuck_transaction() {
        let f = fixture();
        let address = test_address();

        let record = f.submitter.submit(&address, 7, b"payload").await.unwrap();

        let mut stuck = f.pending.get(&record.tx_id).await.unwrap().unwrap();
        stuck.status = TxStatus::Stuck;
        f.pending.update(&stuck).await.unwrap();

        let retried = f.submitter.retry_transaction(&record.tx_id).await.unwrap();
        assert_eq!(retried.status, TxStatus::Pending);
        assert_eq!(retried.detail.as_deref(), Some("resubmitted by operator"));
        assert_eq!(f.ledger.send_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_refuses_non_stuck_transactions() {
        let f = fixture();
        let address = test_address();

        let record = f.submitter.submit(&address, 7, b"payload").await.unwrap();

        // Still pending: not eligible.
        let err = f
            .submitter
            .retry_transaction(&record.tx_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BusinessLogic(_)));

        let mut confirmed = f.pending.get(&record.tx_id).await.unwrap().unwrap();
        confirmed.status = TxStatus::Confirmed;
        f.pending.update(&confirmed).await.unwrap();

        let err = f
            .submitter
            .retry_transaction(&record.tx_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BusinessLogic(_)));

        // Only the original submission hit the wire.
        assert_eq!(f.ledger.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_unknown_transaction_fails() {
        let f = fixture();
        let err = f.submitter.retry_transaction("no-such-tx").await.unwrap_err();
        assert!(matches!(err, Error::BusinessLogic(_)));
    }
}
