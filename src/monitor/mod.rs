//! Transaction monitoring
//!
//! Periodically reconciles submitted transactions against ledger state:
//! flags stuck transactions, records confirmations and reverts, and watches
//! for gas price spikes. The monitor never resubmits anything on its own;
//! retry is an explicit administrative operation.

pub mod types;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertSeverity, AlertingService};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::storage::PendingTxStore;

pub use types::{PendingTransactionRecord, StatusCounts, TxStatus};

struct GasBaseline {
    price: u128,
    sampled_at: DateTime<Utc>,
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub stuck: usize,
    pub gas_spike: Option<f64>,
    pub skipped: bool,
}

/// Overall monitoring summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub timestamp: DateTime<Utc>,
    pub transactions: StatusCounts,
    pub recent_failures_24h: i64,
    pub gas_price_wei: Option<u128>,
    pub baseline_gas_price_wei: Option<u128>,
}

/// Reconciles pending transactions and watches gas pricing
pub struct TransactionMonitor {
    pending: Arc<dyn PendingTxStore>,
    ledger: Arc<dyn LedgerClient>,
    alerts: Arc<AlertingService>,
    config: MonitorConfig,
    gas_baseline: Mutex<Option<GasBaseline>>,
    /// A cycle never overlaps its own next run
    cycle_guard: tokio::sync::Mutex<()>,
}

impl TransactionMonitor {
    pub fn new(
        pending: Arc<dyn PendingTxStore>,
        ledger: Arc<dyn LedgerClient>,
        alerts: Arc<AlertingService>,
        config: MonitorConfig,
    ) -> Self {
        info!(
            pending_threshold_secs = config.pending_threshold_secs,
            gas_multiplier = config.gas_spike_threshold_multiplier,
            "transaction monitor initialized"
        );

        Self {
            pending,
            ledger,
            alerts,
            config,
            gas_baseline: Mutex::new(None),
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one complete monitoring cycle.
    ///
    /// If the previous cycle is still running this returns immediately with
    /// `skipped = true` rather than overlapping it.
    pub async fn run_monitoring_cycle(&self) -> Result<CycleReport> {
        let _guard = match self.cycle_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("previous monitoring cycle still running, skipping");
                return Ok(CycleReport {
                    skipped: true,
                    ..CycleReport::default()
                });
            }
        };

        debug!("running transaction monitoring cycle");

        let mut report = self.check_pending_transactions().await.unwrap_or_else(|e| {
            error!("error checking pending transactions: {}", e);
            CycleReport::default()
        });

        match self.check_gas_price().await {
            Ok(spike) => report.gas_spike = spike,
            Err(e) => error!("error checking gas price: {}", e),
        }

        // Aggregation windows that elapsed since the last cycle get
        // delivered here.
        if let Err(e) = self.alerts.flush_due().await {
            error!("error flushing alerts: {}", e);
        }

        match self.summary().await {
            Ok(summary) => info!(
                pending = summary.transactions.pending,
                stuck = summary.transactions.stuck,
                failed = summary.transactions.failed,
                confirmed = summary.transactions.confirmed,
                "monitoring summary"
            ),
            Err(e) => error!("error building monitoring summary: {}", e),
        }

        Ok(report)
    }

    /// Run cycles on the configured interval until cancelled
    pub async fn run_forever(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cycle_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_monitoring_cycle().await {
                error!("monitoring cycle failed: {}", e);
            }
        }
    }

    /// Reconcile pending transactions older than the threshold.
    ///
    /// Receipt queries are independent reads, so they run with bounded
    /// parallelism inside the cycle.
    async fn check_pending_transactions(&self) -> Result<CycleReport> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.pending_threshold_secs as i64);
        let overdue = self.pending.list_pending_older_than(cutoff).await?;

        if overdue.is_empty() {
            return Ok(CycleReport::default());
        }

        let results = stream::iter(overdue.into_iter().map(|tx| {
            let ledger = Arc::clone(&self.ledger);
            async move {
                let receipt = ledger.get_transaction_receipt(&tx.tx_hash).await;
                (tx, receipt)
            }
        }))
        .buffer_unordered(self.config.receipt_concurrency)
        .collect::<Vec<_>>()
        .await;

        let now = Utc::now();
        let mut report = CycleReport {
            checked: results.len(),
            ..CycleReport::default()
        };

        for (mut tx, receipt) in results {
            match receipt {
                Ok(Some(r)) if r.status => {
                    tx.status = TxStatus::Confirmed;
                    tx.confirmed_at = Some(now);
                    tx.gas_used = Some(r.gas_used);
                    self.pending.update(&tx).await?;
                    report.confirmed += 1;
                    info!(tx_id = %tx.tx_id, block = r.block_number, "transaction confirmed");
                }
                Ok(Some(r)) => {
                    tx.status = TxStatus::Failed;
                    tx.detail = Some("reverted on chain".to_string());
                    tx.gas_used = Some(r.gas_used);
                    self.pending.update(&tx).await?;
                    report.failed += 1;
                    error!(tx_id = %tx.tx_id, "transaction reverted on chain");

                    self.raise(
                        Alert::new(
                            &format!("Transaction Failed: {}", tx.tx_id),
                            &format!(
                                "Transaction {} from {} reverted on chain",
                                tx.tx_id, tx.wallet_address
                            ),
                            AlertSeverity::Error,
                            "transaction_failed",
                        )
                        .with_data(json!({
                            "tx_id": tx.tx_id,
                            "tx_hash": tx.tx_hash.as_str(),
                            "wallet_address": tx.wallet_address.as_str(),
                            "nonce": tx.nonce,
                        })),
                    )
                    .await;
                }
                Ok(None) => {
                    let age_mins = tx.age_secs(now) as f64 / 60.0;
                    tx.status = TxStatus::Stuck;
                    self.pending.update(&tx).await?;
                    report.stuck += 1;
                    warn!(
                        tx_id = %tx.tx_id,
                        age_mins,
                        "transaction stuck without receipt"
                    );

                    self.raise(
                        Alert::new(
                            &format!("Transaction Pending: {}", tx.tx_id),
                            &format!(
                                "Transaction {} has been pending for {:.1} minutes",
                                tx.tx_id, age_mins
                            ),
                            self.pending_severity(tx.age_secs(now)),
                            "transaction_pending",
                        )
                        .with_data(json!({
                            "tx_id": tx.tx_id,
                            "tx_hash": tx.tx_hash.as_str(),
                            "wallet_address": tx.wallet_address.as_str(),
                            "nonce": tx.nonce,
                            "age_minutes": age_mins,
                        })),
                    )
                    .await;
                }
                Err(e) => {
                    // Leave the record pending; next cycle retries the read.
                    warn!(tx_id = %tx.tx_id, "receipt query failed: {}", e);
                }
            }
        }

        Ok(report)
    }

    /// Escalate with age: warning by default, error past 3x the threshold,
    /// critical past 6x
    fn pending_severity(&self, age_secs: i64) -> AlertSeverity {
        let threshold = self.config.pending_threshold_secs as i64;
        if age_secs > threshold * 6 {
            AlertSeverity::Critical
        } else if age_secs > threshold * 3 {
            AlertSeverity::Error
        } else {
            AlertSeverity::Warning
        }
    }

    /// Sample the gas price against a rolling baseline; returns the spike
    /// multiplier when one is detected
    async fn check_gas_price(&self) -> Result<Option<f64>> {
        let current = self.ledger.get_gas_price().await?;
        let now = Utc::now();

        let baseline = {
            let mut guard = self.gas_baseline.lock().unwrap();
            match guard.as_ref() {
                Some(baseline)
                    if (now - baseline.sampled_at).num_seconds()
                        < self.config.baseline_refresh_secs as i64 =>
                {
                    Some(baseline.price)
                }
                _ => {
                    *guard = Some(GasBaseline {
                        price: current,
                        sampled_at: now,
                    });
                    info!(price_wei = current, "gas price baseline updated");
                    None
                }
            }
        };

        let Some(baseline) = baseline else {
            return Ok(None);
        };

        if baseline == 0 {
            return Ok(None);
        }

        let multiplier = current as f64 / baseline as f64;
        if multiplier <= self.config.gas_spike_threshold_multiplier {
            return Ok(None);
        }

        warn!(
            current_wei = current,
            baseline_wei = baseline,
            multiplier,
            "gas price spike detected"
        );

        self.raise(
            Alert::new(
                "Gas Price Spike Detected",
                &format!(
                    "Gas price at {:.1}x the rolling baseline ({} wei vs {} wei)",
                    multiplier, current, baseline
                ),
                AlertSeverity::Warning,
                "gas_price_spike",
            )
            .with_data(json!({
                "current_gas_price_wei": current,
                "baseline_gas_price_wei": baseline,
                "multiplier": multiplier,
                "threshold_multiplier": self.config.gas_spike_threshold_multiplier,
            })),
        )
        .await;

        Ok(Some(multiplier))
    }

    async fn raise(&self, alert: Alert) {
        if let Err(e) = self.alerts.send_alert(alert).await {
            error!("failed to queue alert: {}", e);
        }
    }

    /// Aggregate transaction and gas state for diagnostics
    pub async fn summary(&self) -> Result<MonitoringSummary> {
        let transactions = self.pending.counts().await?;
        let recent_failures_24h = self
            .pending
            .failures_since(Utc::now() - chrono::Duration::hours(24))
            .await?;

        let gas_price_wei = self.ledger.get_gas_price().await.ok();
        let baseline_gas_price_wei = self.gas_baseline.lock().unwrap().as_ref().map(|b| b.price);

        Ok(MonitoringSummary {
            timestamp: Utc::now(),
            transactions,
            recent_failures_24h,
            gas_price_wei,
            baseline_gas_price_wei,
        })
    }
}
