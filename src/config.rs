//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub custody: CustodyConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint for the ledger node
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Shared store URL. `redis://...` for production, `memory://` for tests
    /// and single-instance development.
    #[serde(default = "default_store_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustodyConfig {
    /// 32-byte envelope key, hex encoded. Required: the service refuses to
    /// start without it rather than generating a temporary key.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// KMS key identifier recorded alongside wallets when the envelope key
    /// is KMS-held.
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NonceConfig {
    /// Lock TTL so a crashed holder's lock expires on its own
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Total budget for lock acquisition before giving up
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Initial retry delay for lock acquisition backoff
    #[serde(default = "default_lock_retry_base_ms")]
    pub lock_retry_base_ms: u64,

    /// How long a cached nonce is trusted before re-reading the chain
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_retry_base_ms: default_lock_retry_base_ms(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_name")]
    pub name: String,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: default_breaker_name(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Age after which a pending transaction is considered stuck
    #[serde(default = "default_pending_threshold_secs")]
    pub pending_threshold_secs: u64,

    /// Gas spike alert when current > multiplier x baseline
    #[serde(default = "default_gas_spike_multiplier")]
    pub gas_spike_threshold_multiplier: f64,

    /// How often the gas baseline is refreshed
    #[serde(default = "default_baseline_refresh_secs")]
    pub baseline_refresh_secs: u64,

    /// Receipt queries issued in parallel within one cycle
    #[serde(default = "default_receipt_concurrency")]
    pub receipt_concurrency: usize,

    /// Interval between scheduled monitoring cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pending_threshold_secs: default_pending_threshold_secs(),
            gas_spike_threshold_multiplier: default_gas_spike_multiplier(),
            baseline_refresh_secs: default_baseline_refresh_secs(),
            receipt_concurrency: default_receipt_concurrency(),
            cycle_interval_secs: default_cycle_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    /// Identical alerts within this window collapse into one notification
    #[serde(default = "default_aggregation_window_secs")]
    pub aggregation_window_secs: u64,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            aggregation_window_secs: default_aggregation_window_secs(),
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub to_emails: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_chain_id() -> u64 {
    84532
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_store_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_lock_wait_ms() -> u64 {
    5_000
}

fn default_lock_retry_base_ms() -> u64 {
    100
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_breaker_name() -> String {
    "ledger-rpc".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout_secs() -> u64 {
    30
}

fn default_pending_threshold_secs() -> u64 {
    300
}

fn default_gas_spike_multiplier() -> f64 {
    2.0
}

fn default_baseline_refresh_secs() -> u64 {
    3_600
}

fn default_receipt_concurrency() -> usize {
    8
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_aggregation_window_secs() -> u64 {
    300
}

fn default_smtp_port() -> u16 {
    587
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("store.url", default_store_url())?
            .set_default("ledger.chain_id", default_chain_id() as i64)?
            .set_default("ledger.timeout_ms", default_rpc_timeout_ms() as i64)?
            .set_default("database.max_connections", default_max_connections() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix MINTCUSTODY_)
            .add_source(
                config::Environment::with_prefix("MINTCUSTODY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.ledger.rpc_url.is_empty() {
            anyhow::bail!("ledger.rpc_url must be set");
        }

        // No silent fallback: refuse to start without a configured envelope
        // key rather than generating a temporary one.
        match &self.custody.encryption_key {
            None => anyhow::bail!(
                "custody.encryption_key is not configured; refusing to start without an \
                 envelope encryption key (set MINTCUSTODY_CUSTODY__ENCRYPTION_KEY or \
                 configure a KMS-held key)"
            ),
            Some(key) => {
                let clean = key.strip_prefix("0x").unwrap_or(key);
                if clean.len() != 64 || hex::decode(clean).is_err() {
                    anyhow::bail!(
                        "custody.encryption_key must be 32 bytes of hex (64 hex characters)"
                    );
                }
            }
        }

        if !self.store.url.starts_with("redis://") && !self.store.url.starts_with("memory://") {
            anyhow::bail!("store.url must start with 'redis://' or 'memory://'");
        }

        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be positive");
        }

        if self.breaker.success_threshold == 0 {
            anyhow::bail!("breaker.success_threshold must be positive");
        }

        if self.monitor.gas_spike_threshold_multiplier <= 1.0 {
            anyhow::bail!("monitor.gas_spike_threshold_multiplier must be greater than 1.0");
        }

        if self.monitor.receipt_concurrency == 0 {
            anyhow::bail!("monitor.receipt_concurrency must be positive");
        }

        if self.nonce.lock_wait_ms == 0 {
            anyhow::bail!("nonce.lock_wait_ms must be positive");
        }

        if self.alerting.email.enabled {
            if self.alerting.email.smtp_host.is_empty() {
                anyhow::bail!("alerting.email.smtp_host required when email is enabled");
            }
            if self.alerting.email.from_email.is_empty() || self.alerting.email.to_emails.is_empty()
            {
                anyhow::bail!("alerting.email from/to addresses required when email is enabled");
            }
        }

        if self.alerting.webhook.enabled && self.alerting.webhook.urls.is_empty() {
            anyhow::bail!("alerting.webhook.urls required when webhooks are enabled");
        }

        Ok(())
    }

    /// Render the configuration with secrets masked, for `config show`
    pub fn masked(&self) -> serde_json::Value {
        serde_json::json!({
            "ledger": {
                "rpc_url": self.ledger.rpc_url,
                "chain_id": self.ledger.chain_id,
                "timeout_ms": self.ledger.timeout_ms,
            },
            "store": { "url": mask_url(&self.store.url) },
            "database": {
                "url": mask_url(&self.database.url),
                "max_connections": self.database.max_connections,
            },
            "custody": {
                "encryption_key": "***",
                "kms_key_id": self.custody.kms_key_id,
            },
            "nonce": {
                "lock_ttl_secs": self.nonce.lock_ttl_secs,
                "lock_wait_ms": self.nonce.lock_wait_ms,
                "sync_interval_secs": self.nonce.sync_interval_secs,
            },
            "breaker": {
                "name": self.breaker.name,
                "failure_threshold": self.breaker.failure_threshold,
                "success_threshold": self.breaker.success_threshold,
                "timeout_secs": self.breaker.timeout_secs,
            },
            "monitor": {
                "pending_threshold_secs": self.monitor.pending_threshold_secs,
                "gas_spike_threshold_multiplier": self.monitor.gas_spike_threshold_multiplier,
                "receipt_concurrency": self.monitor.receipt_concurrency,
                "cycle_interval_secs": self.monitor.cycle_interval_secs,
            },
            "alerting": {
                "aggregation_window_secs": self.alerting.aggregation_window_secs,
                "email_enabled": self.alerting.email.enabled,
                "webhook_count": self.alerting.webhook.urls.len(),
            },
        })
    }
}

/// Strip credentials from a connection URL for display
fn mask_url(url: &str) -> String {
    match url.find('@') {
        Some(at) => match url.find("://") {
            Some(scheme_end) => format!("{}://***{}", &url[..scheme_end], &url[at..]),
            None => "***".to_string(),
        },
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            ledger: LedgerConfig {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 84532,
                timeout_ms: 10_000,
            },
            store: StoreConfig {
                url: "memory://".to_string(),
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/custody".to_string(),
                max_connections: 5,
            },
            custody: CustodyConfig {
                encryption_key: Some("ab".repeat(32)),
                kms_key_id: None,
            },
            nonce: NonceConfig::default(),
            breaker: BreakerConfig::default(),
            monitor: MonitorConfig::default(),
            alerting: AlertingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_missing_encryption_key_refused() {
        let mut config = base_config();
        config.custody.encryption_key = None;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("refusing to start"));
    }

    #[test]
    fn test_short_encryption_key_refused() {
        let mut config = base_config();
        config.custody.encryption_key = Some("abcd".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_store_url_refused() {
        let mut config = base_config();
        config.store.url = "http://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url_strips_credentials() {
        assert_eq!(
            mask_url("postgresql://user:secret@db:5432/custody"),
            "postgresql://***@db:5432/custody"
        );
        assert_eq!(mask_url("memory://"), "memory://");
    }
}
