//! Wallet custody types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::Address;

/// Lifecycle state of a managed wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Rotated,
    Revoked,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Rotated => "rotated",
            WalletStatus::Revoked => "revoked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(WalletStatus::Active),
            "rotated" => Some(WalletStatus::Rotated),
            "revoked" => Some(WalletStatus::Revoked),
            _ => None,
        }
    }
}

/// A wallet under custody
///
/// The encrypted private key never leaves this record in persisted form;
/// records are tombstoned on rotate/revoke, never deleted.
#[derive(Debug, Clone)]
pub struct ManagedWallet {
    pub id: Uuid,
    pub wallet_id: String,
    pub address: Address,
    pub encrypted_private_key: String,
    pub encryption_version: String,
    pub kms_key_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Public projection of a wallet, safe to return to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub wallet_id: String,
    pub address: Address,
    pub status: WalletStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&ManagedWallet> for WalletInfo {
    fn from(wallet: &ManagedWallet) -> Self {
        Self {
            wallet_id: wallet.wallet_id.clone(),
            address: wallet.address.clone(),
            status: wallet.status,
            metadata: wallet.metadata.clone(),
            created_at: wallet.created_at,
            rotated_at: wallet.rotated_at,
            last_used_at: wallet.last_used_at,
        }
    }
}

/// Audited wallet operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Access,
    Rotate,
    Revoke,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Access => "access",
            AuditAction::Rotate => "rotate",
            AuditAction::Revoke => "revoke",
        }
    }
}

/// Audit entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    High,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::High => "high",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Append-only audit record; immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAuditLogEntry {
    pub wallet_id: String,
    pub action: AuditAction,
    pub severity: AuditSeverity,
    pub actor: String,
    pub detail: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl WalletAuditLogEntry {
    pub fn new(
        wallet_id: &str,
        action: AuditAction,
        severity: AuditSeverity,
        actor: &str,
        detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            action,
            severity,
            actor: actor.to_string(),
            detail,
            timestamp: Utc::now(),
        }
    }
}
