//! Service wiring
//!
//! Every service is constructed exactly once here and handed to call sites
//! explicitly. There are no ambient globals to look up.

use std::sync::Arc;

use tracing::info;

use crate::alert::{AlertChannel, AlertingService, EmailChannel, WebhookChannel};
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::custody::{EnvelopeCipher, WalletCustodyService};
use crate::error::{Error, Result};
use crate::ledger::{HttpLedgerClient, LedgerClient};
use crate::monitor::TransactionMonitor;
use crate::nonce::NonceManager;
use crate::report::ErrorReporter;
use crate::storage::postgres::{
    self, PgAlertStore, PgErrorLogStore, PgPendingTxStore, PgWalletStore,
};
use crate::storage::{AlertStore, PendingTxStore};
use crate::store::{self, LockConfig};
use crate::submit::TransactionSubmitter;

/// All services, constructed once at startup
pub struct AppContext {
    pub config: Config,
    pub custody: Arc<WalletCustodyService>,
    pub nonces: Arc<NonceManager>,
    pub breaker: Arc<CircuitBreaker>,
    pub monitor: Arc<TransactionMonitor>,
    pub alerts: Arc<AlertingService>,
    pub submitter: Arc<TransactionSubmitter>,
    pub reporter: Arc<ErrorReporter>,
}

impl AppContext {
    /// Connect stores and build the service graph
    pub async fn init(config: Config) -> Result<Self> {
        let shared = store::connect(&config.store.url).await?;

        let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(
            config.ledger.rpc_url.clone(),
            config.ledger.timeout_ms,
        )?);

        let pool = postgres::connect(&config.database.url, config.database.max_connections).await?;
        let wallet_store = Arc::new(PgWalletStore::new(pool.clone()));
        let pending_store: Arc<dyn PendingTxStore> = Arc::new(PgPendingTxStore::new(pool.clone()));
        let alert_store: Arc<dyn AlertStore> = Arc::new(PgAlertStore::new(pool.clone()));
        let error_store = Arc::new(PgErrorLogStore::new(pool));

        let encryption_key = config
            .custody
            .encryption_key
            .as_deref()
            .ok_or_else(|| Error::Config("custody encryption key not configured".to_string()))?;
        let cipher = EnvelopeCipher::from_hex(encryption_key, config.custody.kms_key_id.clone())?;

        // Custody mutations share the nonce lock tuning.
        let lock_config = LockConfig {
            ttl: std::time::Duration::from_secs(config.nonce.lock_ttl_secs),
            wait_budget: std::time::Duration::from_millis(config.nonce.lock_wait_ms),
            retry_base: std::time::Duration::from_millis(config.nonce.lock_retry_base_ms),
        };

        let custody = Arc::new(WalletCustodyService::new(
            wallet_store,
            Arc::clone(&shared),
            cipher,
            lock_config,
        ));

        let nonces = Arc::new(NonceManager::new(
            Arc::clone(&shared),
            Arc::clone(&ledger),
            &config.nonce,
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            Arc::clone(&shared),
            config.breaker.clone(),
        ));

        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
        if config.alerting.email.enabled {
            channels.push(Arc::new(EmailChannel::from_config(&config.alerting.email)?));
        }
        if config.alerting.webhook.enabled {
            for channel in WebhookChannel::from_config(&config.alerting.webhook)? {
                channels.push(Arc::new(channel));
            }
        }

        let alerts = Arc::new(AlertingService::new(
            alert_store,
            channels,
            config.alerting.aggregation_window_secs,
        ));

        let monitor = Arc::new(TransactionMonitor::new(
            Arc::clone(&pending_store),
            Arc::clone(&ledger),
            Arc::clone(&alerts),
            config.monitor.clone(),
        ));

        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::clone(&nonces),
            Arc::clone(&breaker),
            ledger,
            pending_store,
        ));

        let reporter = Arc::new(ErrorReporter::new(error_store));

        info!("service context initialized");

        Ok(Self {
            config,
            custody,
            nonces,
            breaker,
            monitor,
            alerts,
            submitter,
            reporter,
        })
    }
}
