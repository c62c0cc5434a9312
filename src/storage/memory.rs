//! In-memory storage implementations for tests and local development

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alert::{AlertRecord, AlertSeverity, AlertStats, DeliveryAttempt};
use crate::custody::types::{ManagedWallet, WalletAuditLogEntry, WalletStatus};
use crate::error::{Error, ErrorLogEntry, Result};
use crate::monitor::types::{PendingTransactionRecord, StatusCounts, TxStatus};

use super::{AlertStore, ErrorLogStore, PendingTxStore, WalletStore};

/// In-memory [`WalletStore`]
#[derive(Default)]
pub struct MemoryWalletStore {
    wallets: Mutex<Vec<ManagedWallet>>,
    audit: Mutex<Vec<WalletAuditLogEntry>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn insert_wallet(
        &self,
        wallet: &ManagedWallet,
        audit: &WalletAuditLogEntry,
    ) -> Result<()> {
        // Take both locks before mutating so the pair is atomic.
        let mut wallets = self.wallets.lock().unwrap();
        let mut audit_log = self.audit.lock().unwrap();

        let duplicate = wallets
            .iter()
            .any(|w| w.wallet_id == wallet.wallet_id && w.status == WalletStatus::Active);
        if duplicate {
            return Err(Error::WalletAlreadyExists(wallet.wallet_id.clone()));
        }

        wallets.push(wallet.clone());
        audit_log.push(audit.clone());
        Ok(())
    }

    async fn find_active(&self, wallet_id: &str) -> Result<Option<ManagedWallet>> {
        Ok(self
            .wallets
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.wallet_id == wallet_id && w.status == WalletStatus::Active)
            .cloned())
    }

    async fn find_any(&self, wallet_id: &str) -> Result<Option<ManagedWallet>> {
        let wallets = self.wallets.lock().unwrap();

        let active = wallets
            .iter()
            .find(|w| w.wallet_id == wallet_id && w.status == WalletStatus::Active);

        if let Some(wallet) = active {
            return Ok(Some(wallet.clone()));
        }

        Ok(wallets
            .iter()
            .filter(|w| w.wallet_id == wallet_id)
            .max_by_key(|w| w.created_at)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: WalletStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut wallets = self.wallets.lock().unwrap();
        let wallet = wallets
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| Error::WalletNotFound(id.to_string()))?;

        wallet.status = status;
        if rotated_at.is_some() {
            wallet.rotated_at = rotated_at;
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        let mut wallets = self.wallets.lock().unwrap();
        if let Some(wallet) = wallets.iter_mut().find(|w| w.id == id) {
            wallet.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list(
        &self,
        status: Option<WalletStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ManagedWallet>> {
        let wallets = self.wallets.lock().unwrap();
        let mut matched: Vec<ManagedWallet> = wallets
            .iter()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn append_audit(&self, entry: &WalletAuditLogEntry) -> Result<()> {
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, wallet_id: &str, limit: i64) -> Result<Vec<WalletAuditLogEntry>> {
        let audit = self.audit.lock().unwrap();
        let mut matched: Vec<WalletAuditLogEntry> = audit
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit as usize);
        Ok(matched)
    }
}

/// In-memory [`PendingTxStore`]
#[derive(Default)]
pub struct MemoryPendingTxStore {
    records: Mutex<Vec<PendingTransactionRecord>>,
}

impl MemoryPendingTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingTxStore for MemoryPendingTxStore {
    async fn insert(&self, record: &PendingTransactionRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get(&self, tx_id: &str) -> Result<Option<PendingTransactionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.tx_id == tx_id)
            .cloned())
    }

    async fn update(&self, record: &PendingTransactionRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let existing = records
            .iter_mut()
            .find(|r| r.tx_id == record.tx_id)
            .ok_or_else(|| Error::Database(format!("unknown transaction {}", record.tx_id)))?;
        *existing = record.clone();
        Ok(())
    }

    async fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingTransactionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == TxStatus::Pending && r.submitted_at < cutoff)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let records = self.records.lock().unwrap();
        let mut counts = StatusCounts::default();
        for record in records.iter() {
            match record.status {
                TxStatus::Pending => counts.pending += 1,
                TxStatus::Confirmed => counts.confirmed += 1,
                TxStatus::Failed => counts.failed += 1,
                TxStatus::Stuck => counts.stuck += 1,
            }
        }
        Ok(counts)
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == TxStatus::Failed && r.submitted_at >= since)
            .count() as i64)
    }
}

/// In-memory [`AlertStore`]
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<AlertRecord>>,
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded delivery attempts (test helper)
    pub fn attempts(&self) -> Vec<DeliveryAttempt> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        self.alerts.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.attempts.lock().unwrap().push(attempt.clone());
        Ok(())
    }

    async fn recent(
        &self,
        severity: Option<AlertSeverity>,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertRecord>> {
        let alerts = self.alerts.lock().unwrap();
        let mut matched: Vec<AlertRecord> = alerts
            .iter()
            .filter(|a| severity.is_none_or(|s| a.severity == s))
            .filter(|a| category.is_none_or(|c| a.category == c))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<AlertStats> {
        let alerts = self.alerts.lock().unwrap();
        let mut stats = AlertStats::default();

        for alert in alerts.iter().filter(|a| a.created_at >= since) {
            stats.total += alert.count;
            *stats
                .by_severity
                .entry(alert.severity.as_str().to_string())
                .or_default() += alert.count;
            *stats.by_category.entry(alert.category.clone()).or_default() += alert.count;
        }

        Ok(stats)
    }
}

/// In-memory [`ErrorLogStore`]
#[derive(Default)]
pub struct MemoryErrorLogStore {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl MemoryErrorLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorLogStore for MemoryErrorLogStore {
    async fn insert(&self, entry: &ErrorLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
