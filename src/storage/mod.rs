//! Relational storage
//!
//! Wallet, audit, transaction, alert, and error records live behind these
//! traits: Postgres in production, in-memory implementations in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alert::{AlertRecord, AlertSeverity, AlertStats, DeliveryAttempt};
use crate::custody::types::{ManagedWallet, WalletAuditLogEntry, WalletStatus};
use crate::error::{ErrorLogEntry, Result};
use crate::monitor::types::{PendingTransactionRecord, StatusCounts};

/// Persistence for managed wallets and their audit trail
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Insert a wallet together with its creation audit entry as one atomic
    /// unit: there is never a wallet row without a retrievable key, and
    /// never a key without its audit record.
    async fn insert_wallet(
        &self,
        wallet: &ManagedWallet,
        audit: &WalletAuditLogEntry,
    ) -> Result<()>;

    /// Find the active record for a wallet id
    async fn find_active(&self, wallet_id: &str) -> Result<Option<ManagedWallet>>;

    /// Find any record for a wallet id, preferring active, else the most
    /// recently created (rotated/revoked tombstones stay findable)
    async fn find_any(&self, wallet_id: &str) -> Result<Option<ManagedWallet>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: WalletStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn touch_last_used(&self, id: Uuid) -> Result<()>;

    async fn list(
        &self,
        status: Option<WalletStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ManagedWallet>>;

    async fn append_audit(&self, entry: &WalletAuditLogEntry) -> Result<()>;

    async fn list_audit(&self, wallet_id: &str, limit: i64) -> Result<Vec<WalletAuditLogEntry>>;
}

/// Persistence for submitted transaction records
#[async_trait]
pub trait PendingTxStore: Send + Sync {
    async fn insert(&self, record: &PendingTransactionRecord) -> Result<()>;

    async fn get(&self, tx_id: &str) -> Result<Option<PendingTransactionRecord>>;

    async fn update(&self, record: &PendingTransactionRecord) -> Result<()>;

    /// Pending records submitted before `cutoff`
    async fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingTransactionRecord>>;

    async fn counts(&self) -> Result<StatusCounts>;

    async fn failures_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

/// Persistence for delivered alerts and delivery attempts
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, record: &AlertRecord) -> Result<()>;

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    async fn recent(
        &self,
        severity: Option<AlertSeverity>,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertRecord>>;

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<AlertStats>;
}

/// Persistence for boundary-crossing errors
#[async_trait]
pub trait ErrorLogStore: Send + Sync {
    async fn insert(&self, entry: &ErrorLogEntry) -> Result<()>;
}
