//! Alerting service
//!
//! Fans monitor/breaker findings out to operators over email and webhooks.
//! Identical alerts (same category + severity) inside the aggregation window
//! collapse into a single delivered notification carrying an occurrence
//! count, so a flapping dependency cannot cause a notification storm.

pub mod channels;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::AlertStore;

pub use channels::{AlertChannel, EmailChannel, WebhookChannel};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "error" => Some(AlertSeverity::Error),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// An operator-facing alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub category: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(title: &str, message: &str, severity: AlertSeverity, category: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            message: message.to_string(),
            severity,
            category: category.to_string(),
            data: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Persisted alert, immutable once delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub category: String,
    pub data: Option<serde_json::Value>,
    /// Occurrences collapsed into this notification
    pub count: i64,
    pub delivered_channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one channel delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub alert_id: Uuid,
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Aggregate alert statistics over a time window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: i64,
    pub by_severity: HashMap<String, i64>,
    pub by_category: HashMap<String, i64>,
}

struct PendingAggregate {
    alert: Alert,
    count: u64,
    window_started: DateTime<Utc>,
}

/// Delivers alerts with per-window aggregation
pub struct AlertingService {
    store: Arc<dyn AlertStore>,
    channels: Vec<Arc<dyn AlertChannel>>,
    window: Duration,
    pending: Mutex<HashMap<String, PendingAggregate>>,
}

impl AlertingService {
    pub fn new(
        store: Arc<dyn AlertStore>,
        channels: Vec<Arc<dyn AlertChannel>>,
        aggregation_window_secs: u64,
    ) -> Self {
        info!(
            channels = channels.len(),
            window_secs = aggregation_window_secs,
            "alerting service initialized"
        );

        Self {
            store,
            channels,
            window: Duration::seconds(aggregation_window_secs as i64),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an alert for delivery, collapsing duplicates within the window
    pub async fn send_alert(&self, alert: Alert) -> Result<()> {
        self.send_alert_at(alert, Utc::now()).await
    }

    pub(crate) async fn send_alert_at(&self, alert: Alert, now: DateTime<Utc>) -> Result<()> {
        let key = aggregate_key(&alert);

        let expired = {
            let mut pending = self.pending.lock().unwrap();

            let window_open = matches!(
                pending.get(&key),
                Some(aggregate) if now - aggregate.window_started < self.window
            );

            if window_open {
                let aggregate = pending.get_mut(&key).expect("open window checked above");
                aggregate.count += 1;
                debug!(
                    category = %alert.category,
                    count = aggregate.count,
                    "alert collapsed into open window"
                );
                None
            } else {
                // Any expired aggregate under this key gets delivered now,
                // and the incoming alert opens a fresh window.
                let expired = pending.remove(&key);
                pending.insert(key, new_aggregate(alert, now));
                expired
            }
        };

        if let Some(aggregate) = expired {
            self.deliver(aggregate).await?;
        }

        Ok(())
    }

    /// Deliver every aggregate whose window has elapsed.
    /// Returns the number of notifications delivered.
    pub async fn flush_due(&self) -> Result<usize> {
        self.flush_due_at(Utc::now()).await
    }

    pub(crate) async fn flush_due_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let due: Vec<PendingAggregate> = {
            let mut pending = self.pending.lock().unwrap();
            let keys: Vec<String> = pending
                .iter()
                .filter(|(_, aggregate)| now - aggregate.window_started >= self.window)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key))
                .collect()
        };

        let mut delivered = 0;
        for aggregate in due {
            match self.deliver(aggregate).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("alert flush failed: {}", e),
            }
        }

        Ok(delivered)
    }

    /// Deliver every pending aggregate immediately, regardless of window
    pub async fn flush_all(&self) -> Result<usize> {
        self.flush_due_at(Utc::now() + self.window).await
    }

    /// Fire-and-forget entry point for hot-path callers
    pub fn dispatch(self: &Arc<Self>, alert: Alert) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.send_alert(alert).await {
                error!("alert dispatch failed: {}", e);
            }
        });
    }

    /// Fan one aggregated notification out to every channel.
    /// A channel failure is logged and recorded; it never blocks the others.
    async fn deliver(&self, aggregate: PendingAggregate) -> Result<()> {
        let alert = &aggregate.alert;
        let mut delivered_channels = Vec::new();

        for channel in &self.channels {
            let outcome = channel.deliver(alert, aggregate.count).await;

            let attempt = DeliveryAttempt {
                alert_id: alert.id,
                channel: channel.name().to_string(),
                success: outcome.is_ok(),
                error: outcome.as_ref().err().map(|e| e.to_string()),
                attempted_at: Utc::now(),
            };

            match outcome {
                Ok(()) => delivered_channels.push(channel.name().to_string()),
                Err(e) => warn!(channel = channel.name(), "alert delivery failed: {}", e),
            }

            if let Err(e) = self.store.record_attempt(&attempt).await {
                error!("failed to persist delivery attempt: {}", e);
            }
        }

        let record = AlertRecord {
            id: alert.id,
            title: alert.title.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            category: alert.category.clone(),
            data: alert.data.clone(),
            count: aggregate.count as i64,
            delivered_channels,
            created_at: alert.created_at,
        };

        self.store.insert_alert(&record).await?;

        info!(
            severity = alert.severity.as_str(),
            category = %alert.category,
            count = aggregate.count,
            "alert delivered: {}",
            alert.title
        );

        Ok(())
    }

    /// Send a test alert to verify channel configuration
    pub async fn send_test_alert(&self) -> Result<usize> {
        let alert = Alert::new(
            "Test Alert",
            "Test alert from the custody monitoring system.",
            AlertSeverity::Info,
            "system_test",
        );

        self.send_alert(alert).await?;
        // Deliver immediately rather than waiting out the window.
        self.flush_all().await
    }

    /// Recent delivered alerts, optionally filtered
    pub async fn recent_alerts(
        &self,
        severity: Option<AlertSeverity>,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertRecord>> {
        self.store.recent(severity, category, limit).await
    }

    /// Delivery statistics over the trailing `hours`
    pub async fn alert_stats(&self, hours: i64) -> Result<AlertStats> {
        let since = Utc::now() - Duration::hours(hours);
        self.store.stats_since(since).await
    }
}

fn aggregate_key(alert: &Alert) -> String {
    format!("{}:{}", alert.category, alert.severity.as_str())
}

fn new_aggregate(alert: Alert, now: DateTime<Utc>) -> PendingAggregate {
    PendingAggregate {
        alert,
        count: 1,
        window_started: now,
    }
}

#[cfg(test)]
mod tests {
    use super::channels::testing::RecordingChannel;
    use super::*;
    use crate::storage::memory::MemoryAlertStore;

    fn service_with_channel(
        window_secs: u64,
    ) -> (Arc<AlertingService>, Arc<RecordingChannel>, Arc<MemoryAlertStore>) {
        let store = Arc::new(MemoryAlertStore::new());
        let channel = Arc::new(RecordingChannel::new("recording"));
        let service = Arc::new(AlertingService::new(
            Arc::clone(&store) as Arc<dyn AlertStore>,
            vec![Arc::clone(&channel) as Arc<dyn AlertChannel>],
            window_secs,
        ));
        (service, channel, store)
    }

    fn sample_alert() -> Alert {
        Alert::new(
            "Transaction Pending",
            "tx abc pending for 7 minutes",
            AlertSeverity::Warning,
            "transaction_pending",
        )
    }

    #[tokio::test]
    async fn test_ten_identical_alerts_collapse_to_one_delivery() {
        let (service, channel, _store) = service_with_channel(300);

        for _ in 0..10 {
            service.send_alert(sample_alert()).await.unwrap();
        }

        // Nothing delivered while the window is open.
        assert_eq!(channel.deliveries().len(), 0);

        let flushed = service
            .flush_due_at(Utc::now() + Duration::seconds(301))
            .await
            .unwrap();
        assert_eq!(flushed, 1);

        let deliveries = channel.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, 10);
    }

    #[tokio::test]
    async fn test_different_categories_do_not_collapse() {
        let (service, channel, _store) = service_with_channel(300);

        service.send_alert(sample_alert()).await.unwrap();
        service
            .send_alert(Alert::new(
                "Gas Spike",
                "gas at 3x baseline",
                AlertSeverity::Warning,
                "gas_price_spike",
            ))
            .await
            .unwrap();

        let flushed = service
            .flush_due_at(Utc::now() + Duration::seconds(301))
            .await
            .unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(channel.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_block_others() {
        let store = Arc::new(MemoryAlertStore::new());
        let failing = Arc::new(RecordingChannel::failing("broken"));
        let working = Arc::new(RecordingChannel::new("working"));
        let service = AlertingService::new(
            Arc::clone(&store) as Arc<dyn AlertStore>,
            vec![
                Arc::clone(&failing) as Arc<dyn AlertChannel>,
                Arc::clone(&working) as Arc<dyn AlertChannel>,
            ],
            300,
        );

        service.send_alert(sample_alert()).await.unwrap();
        service
            .flush_due_at(Utc::now() + Duration::seconds(301))
            .await
            .unwrap();

        assert_eq!(working.deliveries().len(), 1);

        // Both attempts persisted, success and failure alike.
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().any(|a| a.channel == "broken" && !a.success));
        assert!(attempts.iter().any(|a| a.channel == "working" && a.success));

        // Delivered record only lists the channel that worked.
        let recent = store.recent(None, None, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].delivered_channels, vec!["working".to_string()]);
    }

    #[tokio::test]
    async fn test_new_window_opens_after_flush() {
        let (service, channel, _store) = service_with_channel(300);

        service.send_alert(sample_alert()).await.unwrap();
        service
            .flush_due_at(Utc::now() + Duration::seconds(301))
            .await
            .unwrap();

        service.send_alert(sample_alert()).await.unwrap();
        service
            .flush_due_at(Utc::now() + Duration::seconds(602))
            .await
            .unwrap();

        let deliveries = channel.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].1, 1);
        assert_eq!(deliveries[1].1, 1);
    }

    #[tokio::test]
    async fn test_send_test_alert_delivers_immediately() {
        let (service, channel, _store) = service_with_channel(300);
        let delivered = service.send_test_alert().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(channel.deliveries().len(), 1);
    }
}
