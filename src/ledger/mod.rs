//! Ledger client
//!
//! Narrow RPC-style interface to the blockchain node. Everything this
//! service knows about the ledger goes through [`LedgerClient`], so tests
//! swap in a scripted mock and callers never see transport detail.

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpLedgerClient;
pub use types::{Address, TxHash, TxReceipt};

/// Narrow interface to the ledger node
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Authoritative transaction count (next nonce) for an account
    async fn get_transaction_count(&self, address: &Address) -> Result<u64>;

    /// Submit a signed raw transaction; returns its hash
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<TxHash>;

    /// Receipt for a mined transaction, `None` while still pending
    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>>;

    /// Current gas price in wei
    async fn get_gas_price(&self) -> Result<u128>;
}
