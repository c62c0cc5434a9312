//! Transaction record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{Address, TxHash};

/// Lifecycle of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    Stuck,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Stuck => "stuck",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TxStatus::Pending),
            "confirmed" => Some(TxStatus::Confirmed),
            "failed" => Some(TxStatus::Failed),
            "stuck" => Some(TxStatus::Stuck),
            _ => None,
        }
    }
}

/// A submitted transaction awaiting reconciliation
///
/// Created on submission; transitioned only by the monitor (or an explicit
/// administrative retry). The raw payload is retained so a retry resubmits
/// exactly what was signed, never a silently rebuilt transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransactionRecord {
    pub tx_id: String,
    pub wallet_address: Address,
    pub nonce: u64,
    pub tx_hash: TxHash,
    pub raw_tx: String,
    pub status: TxStatus,
    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub gas_used: Option<u64>,
    pub detail: Option<String>,
}

impl PendingTransactionRecord {
    /// Age in seconds relative to `now`
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.submitted_at).num_seconds()
    }
}

/// Transaction counts by status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub confirmed: i64,
    pub failed: i64,
    pub stuck: i64,
}
