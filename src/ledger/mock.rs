//! Scripted ledger client for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{Address, TxHash, TxReceipt};
use super::LedgerClient;

/// In-memory [`LedgerClient`] with scripted responses and call counting
#[derive(Default)]
pub struct MockLedger {
    tx_counts: Mutex<HashMap<String, u64>>,
    receipts: Mutex<HashMap<String, TxReceipt>>,
    gas_price: Mutex<u128>,
    /// Remaining calls that should fail with a connection error
    fail_connection: AtomicU32,
    /// Remaining sends that should be rejected for nonce mismatch
    reject_nonce: AtomicU32,
    pub count_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    pub gas_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transaction_count(&self, address: &Address, count: u64) {
        self.tx_counts
            .lock()
            .unwrap()
            .insert(address.as_str().to_string(), count);
    }

    pub fn set_receipt(&self, tx_hash: &TxHash, receipt: TxReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(tx_hash.as_str().to_string(), receipt);
    }

    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.lock().unwrap() = price;
    }

    /// Make the next `n` calls fail with a connection error
    pub fn fail_next(&self, n: u32) {
        self.fail_connection.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` sends fail with a nonce rejection
    pub fn reject_nonce_next(&self, n: u32) {
        self.reject_nonce.store(n, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<()> {
        let remaining = self.fail_connection.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connection.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Connection("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_transaction_count(&self, address: &Address) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(*self
            .tx_counts
            .lock()
            .unwrap()
            .get(address.as_str())
            .unwrap_or(&0))
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<TxHash> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let rejects = self.reject_nonce.load(Ordering::SeqCst);
        if rejects > 0 {
            self.reject_nonce.store(rejects - 1, Ordering::SeqCst);
            return Err(Error::Nonce {
                address: String::new(),
                message: "nonce too low".to_string(),
            });
        }

        // Deterministic hash derived from the payload
        let mut digest = [0u8; 32];
        for (i, byte) in raw_tx.iter().enumerate() {
            digest[i % 32] ^= *byte;
        }
        TxHash::parse(&format!("0x{}", hex::encode(digest)))
    }

    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(tx_hash.as_str())
            .cloned())
    }

    async fn get_gas_price(&self) -> Result<u128> {
        self.gas_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(*self.gas_price.lock().unwrap())
    }
}
