//! Postgres storage implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::alert::{AlertRecord, AlertSeverity, AlertStats, DeliveryAttempt};
use crate::custody::types::{
    AuditAction, AuditSeverity, ManagedWallet, WalletAuditLogEntry, WalletStatus,
};
use crate::error::{Error, ErrorLogEntry, Result};
use crate::ledger::{Address, TxHash};
use crate::monitor::types::{PendingTransactionRecord, StatusCounts, TxStatus};

use super::{AlertStore, ErrorLogStore, PendingTxStore, WalletStore};

/// Connect a pool and ensure the schema exists
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    init_schema(&pool).await?;
    info!("Connected relational store to postgres");

    Ok(pool)
}

async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wallets (
            id UUID PRIMARY KEY,
            wallet_id TEXT NOT NULL,
            address TEXT NOT NULL,
            encrypted_private_key TEXT NOT NULL,
            encryption_version TEXT NOT NULL,
            kms_key_id TEXT,
            metadata TEXT,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            rotated_at TIMESTAMPTZ,
            last_used_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One active record per wallet id; tombstones are unconstrained.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_wallets_active
         ON wallets (wallet_id) WHERE status = 'active'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wallet_audit_log (
            id BIGSERIAL PRIMARY KEY,
            wallet_id TEXT NOT NULL,
            action TEXT NOT NULL,
            severity TEXT NOT NULL,
            actor TEXT NOT NULL,
            detail TEXT,
            timestamp TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_wallet ON wallet_audit_log (wallet_id, timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_transactions (
            tx_id TEXT PRIMARY KEY,
            wallet_address TEXT NOT NULL,
            nonce BIGINT NOT NULL,
            tx_hash TEXT NOT NULL,
            raw_tx TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at TIMESTAMPTZ NOT NULL,
            confirmed_at TIMESTAMPTZ,
            gas_used BIGINT,
            detail TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pending_status
         ON pending_transactions (status, submitted_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL,
            category TEXT NOT NULL,
            data TEXT,
            occurrence_count BIGINT NOT NULL,
            delivered_channels TEXT[] NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts (severity, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_attempts (
            id BIGSERIAL PRIMARY KEY,
            alert_id UUID NOT NULL,
            channel TEXT NOT NULL,
            success BOOLEAN NOT NULL,
            error TEXT,
            attempted_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_log (
            error_id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            message TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            context TEXT,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    wallet_id: String,
    address: String,
    encrypted_private_key: String,
    encryption_version: String,
    kms_key_id: Option<String>,
    metadata: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
}

impl WalletRow {
    fn into_wallet(self) -> Result<ManagedWallet> {
        let status = WalletStatus::parse(&self.status)
            .ok_or_else(|| Error::Database(format!("unknown wallet status {}", self.status)))?;

        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(ManagedWallet {
            id: self.id,
            wallet_id: self.wallet_id,
            address: Address::parse(&self.address)?,
            encrypted_private_key: self.encrypted_private_key,
            encryption_version: self.encryption_version,
            kms_key_id: self.kms_key_id,
            metadata,
            status,
            created_at: self.created_at,
            rotated_at: self.rotated_at,
            last_used_at: self.last_used_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    wallet_id: String,
    action: String,
    severity: String,
    actor: String,
    detail: Option<String>,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self) -> Result<WalletAuditLogEntry> {
        let action = match self.action.as_str() {
            "create" => AuditAction::Create,
            "access" => AuditAction::Access,
            "rotate" => AuditAction::Rotate,
            "revoke" => AuditAction::Revoke,
            other => return Err(Error::Database(format!("unknown audit action {}", other))),
        };

        let severity = match self.severity.as_str() {
            "info" => AuditSeverity::Info,
            "high" => AuditSeverity::High,
            "critical" => AuditSeverity::Critical,
            other => return Err(Error::Database(format!("unknown audit severity {}", other))),
        };

        Ok(WalletAuditLogEntry {
            wallet_id: self.wallet_id,
            action,
            severity,
            actor: self.actor,
            detail: self.detail.as_deref().map(serde_json::from_str).transpose()?,
            timestamp: self.timestamp,
        })
    }
}

/// Postgres [`WalletStore`]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn insert_wallet(
        &self,
        wallet: &ManagedWallet,
        audit: &WalletAuditLogEntry,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO wallets
                (id, wallet_id, address, encrypted_private_key, encryption_version,
                 kms_key_id, metadata, status, created_at, rotated_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(wallet.id)
        .bind(&wallet.wallet_id)
        .bind(wallet.address.as_str())
        .bind(&wallet.encrypted_private_key)
        .bind(&wallet.encryption_version)
        .bind(&wallet.kms_key_id)
        .bind(wallet.metadata.as_ref().map(|m| m.to_string()))
        .bind(wallet.status.as_str())
        .bind(wallet.created_at)
        .bind(wallet.rotated_at)
        .bind(wallet.last_used_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(db) = &e {
                if db.code().as_deref() == Some("23505") {
                    return Err(Error::WalletAlreadyExists(wallet.wallet_id.clone()));
                }
            }
            return Err(e.into());
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_active(&self, wallet_id: &str) -> Result<Option<ManagedWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT * FROM wallets WHERE wallet_id = $1 AND status = 'active'",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WalletRow::into_wallet).transpose()
    }

    async fn find_any(&self, wallet_id: &str) -> Result<Option<ManagedWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT * FROM wallets WHERE wallet_id = $1
            ORDER BY (status = 'active') DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WalletRow::into_wallet).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: WalletStatus,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE wallets SET status = $2, rotated_at = COALESCE($3, rotated_at) WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(rotated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE wallets SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        status: Option<WalletStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ManagedWallet>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, WalletRow>(
                    "SELECT * FROM wallets WHERE status = $1
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WalletRow>(
                    "SELECT * FROM wallets ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(WalletRow::into_wallet).collect()
    }

    async fn append_audit(&self, entry: &WalletAuditLogEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_audit(&self, wallet_id: &str, limit: i64) -> Result<Vec<WalletAuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT wallet_id, action, severity, actor, detail, timestamp
             FROM wallet_audit_log WHERE wallet_id = $1
             ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}

async fn insert_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &WalletAuditLogEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO wallet_audit_log (wallet_id, action, severity, actor, detail, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&entry.wallet_id)
    .bind(entry.action.as_str())
    .bind(entry.severity.as_str())
    .bind(&entry.actor)
    .bind(entry.detail.as_ref().map(|d| d.to_string()))
    .bind(entry.timestamp)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct PendingTxRow {
    tx_id: String,
    wallet_address: String,
    nonce: i64,
    tx_hash: String,
    raw_tx: String,
    status: String,
    submitted_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    gas_used: Option<i64>,
    detail: Option<String>,
}

impl PendingTxRow {
    fn into_record(self) -> Result<PendingTransactionRecord> {
        let status = TxStatus::parse(&self.status)
            .ok_or_else(|| Error::Database(format!("unknown tx status {}", self.status)))?;

        Ok(PendingTransactionRecord {
            tx_id: self.tx_id,
            wallet_address: Address::parse(&self.wallet_address)?,
            nonce: self.nonce as u64,
            tx_hash: TxHash::parse(&self.tx_hash)?,
            raw_tx: self.raw_tx,
            status,
            submitted_at: self.submitted_at,
            confirmed_at: self.confirmed_at,
            gas_used: self.gas_used.map(|g| g as u64),
            detail: self.detail,
        })
    }
}

/// Postgres [`PendingTxStore`]
pub struct PgPendingTxStore {
    pool: PgPool,
}

impl PgPendingTxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingTxStore for PgPendingTxStore {
    async fn insert(&self, record: &PendingTransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_transactions
                (tx_id, wallet_address, nonce, tx_hash, raw_tx, status,
                 submitted_at, confirmed_at, gas_used, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.tx_id)
        .bind(record.wallet_address.as_str())
        .bind(record.nonce as i64)
        .bind(record.tx_hash.as_str())
        .bind(&record.raw_tx)
        .bind(record.status.as_str())
        .bind(record.submitted_at)
        .bind(record.confirmed_at)
        .bind(record.gas_used.map(|g| g as i64))
        .bind(&record.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, tx_id: &str) -> Result<Option<PendingTransactionRecord>> {
        let row = sqlx::query_as::<_, PendingTxRow>(
            "SELECT * FROM pending_transactions WHERE tx_id = $1",
        )
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PendingTxRow::into_record).transpose()
    }

    async fn update(&self, record: &PendingTransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pending_transactions
            SET tx_hash = $2, status = $3, submitted_at = $4, confirmed_at = $5,
                gas_used = $6, detail = $7
            WHERE tx_id = $1
            "#,
        )
        .bind(&record.tx_id)
        .bind(record.tx_hash.as_str())
        .bind(record.status.as_str())
        .bind(record.submitted_at)
        .bind(record.confirmed_at)
        .bind(record.gas_used.map(|g| g as i64))
        .bind(&record.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingTransactionRecord>> {
        let rows = sqlx::query_as::<_, PendingTxRow>(
            "SELECT * FROM pending_transactions
             WHERE status = 'pending' AND submitted_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PendingTxRow::into_record).collect()
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM pending_transactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "confirmed" => counts.confirmed = count,
                "failed" => counts.failed = count,
                "stuck" => counts.stuck = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pending_transactions
             WHERE status = 'failed' AND submitted_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    title: String,
    message: String,
    severity: String,
    category: String,
    data: Option<String>,
    occurrence_count: i64,
    delivered_channels: Vec<String>,
    created_at: DateTime<Utc>,
}

impl AlertRow {
    fn into_record(self) -> Result<AlertRecord> {
        let severity = AlertSeverity::parse(&self.severity)
            .ok_or_else(|| Error::Database(format!("unknown alert severity {}", self.severity)))?;

        Ok(AlertRecord {
            id: self.id,
            title: self.title,
            message: self.message,
            severity,
            category: self.category,
            data: self.data.as_deref().map(serde_json::from_str).transpose()?,
            count: self.occurrence_count,
            delivered_channels: self.delivered_channels,
            created_at: self.created_at,
        })
    }
}

/// Postgres [`AlertStore`]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, title, message, severity, category, data,
                 occurrence_count, delivered_channels, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.title)
        .bind(&record.message)
        .bind(record.severity.as_str())
        .bind(&record.category)
        .bind(record.data.as_ref().map(|d| d.to_string()))
        .bind(record.count)
        .bind(&record.delivered_channels)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_attempts (alert_id, channel, success, error, attempted_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(attempt.alert_id)
        .bind(&attempt.channel)
        .bind(attempt.success)
        .bind(&attempt.error)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(
        &self,
        severity: Option<AlertSeverity>,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertRecord>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE ($1::TEXT IS NULL OR severity = $1)
              AND ($2::TEXT IS NULL OR category = $2)
            ORDER BY created_at DESC LIMIT $3
            "#,
        )
        .bind(severity.map(|s| s.as_str().to_string()))
        .bind(category.map(|c| c.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertRow::into_record).collect()
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<AlertStats> {
        let by_severity: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, SUM(occurrence_count)::BIGINT FROM alerts
             WHERE created_at >= $1 GROUP BY severity",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let by_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, SUM(occurrence_count)::BIGINT FROM alerts
             WHERE created_at >= $1 GROUP BY category",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = AlertStats::default();
        for (severity, count) in by_severity {
            stats.total += count;
            stats.by_severity.insert(severity, count);
        }
        for (category, count) in by_category {
            stats.by_category.insert(category, count);
        }
        Ok(stats)
    }
}

/// Postgres [`ErrorLogStore`]
pub struct PgErrorLogStore {
    pool: PgPool,
}

impl PgErrorLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErrorLogStore for PgErrorLogStore {
    async fn insert(&self, entry: &ErrorLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_log (error_id, code, message, correlation_id, context, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&entry.error_id)
        .bind(&entry.code)
        .bind(&entry.message)
        .bind(&entry.correlation_id)
        .bind(entry.context.as_ref().map(|c| c.to_string()))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
