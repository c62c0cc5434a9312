//! Circuit breaker for ledger calls
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast without executing
//! - HalfOpen: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed   -> Open:     consecutive failures >= failure_threshold
//! Open     -> HalfOpen: timeout_secs elapsed since last failure
//! HalfOpen -> Closed:   consecutive successes >= success_threshold
//! HalfOpen -> Open:     any failure
//! ```
//!
//! State lives in the shared store keyed by breaker name, so every process
//! instance protecting the same dependency observes one breaker.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::BreakerConfig;
use crate::error::{Error, Result};
use crate::store::SharedStore;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

/// Snapshot of breaker state for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: i64,
    pub success_count: i64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub should_attempt_reset: bool,
}

/// Shared-store-backed circuit breaker
pub struct CircuitBreaker {
    name: String,
    store: Arc<dyn SharedStore>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn SharedStore>, config: BreakerConfig) -> Self {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            timeout_secs = config.timeout_secs,
            "circuit breaker initialized"
        );

        Self {
            name: config.name.clone(),
            store,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state_key(&self) -> String {
        format!("circuit_breaker:{}:state", self.name)
    }

    fn failures_key(&self) -> String {
        format!("circuit_breaker:{}:failures", self.name)
    }

    fn successes_key(&self) -> String {
        format!("circuit_breaker:{}:successes", self.name)
    }

    fn last_failure_key(&self) -> String {
        format!("circuit_breaker:{}:last_failure", self.name)
    }

    /// Run `op` through the breaker.
    ///
    /// In Open state the operation is never invoked; the caller gets
    /// `CircuitBreakerOpen` immediately. Only connection-class errors count
    /// against the breaker: everything else passes through unrecorded.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let state = self.state().await?;

        if state == CircuitState::Open {
            if self.should_attempt_reset().await? {
                self.set_state(CircuitState::HalfOpen).await?;
                self.store.delete(&self.successes_key()).await?;
                info!(name = %self.name, "circuit attempting recovery (half-open)");
            } else {
                debug!(name = %self.name, "circuit open, rejecting call");
                return Err(Error::CircuitBreakerOpen(self.name.clone()));
            }
        }

        match op().await {
            Ok(value) => {
                self.on_success().await?;
                Ok(value)
            }
            Err(e) if e.trips_breaker() => {
                self.on_failure(&e).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Current state; absent key means Closed
    pub async fn state(&self) -> Result<CircuitState> {
        let raw = self.store.get(&self.state_key()).await?;
        Ok(raw
            .as_deref()
            .and_then(CircuitState::parse)
            .unwrap_or(CircuitState::Closed))
    }

    async fn set_state(&self, state: CircuitState) -> Result<()> {
        self.store.put(&self.state_key(), state.as_str()).await?;
        info!(name = %self.name, state = state.as_str(), "circuit state changed");
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<i64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    async fn on_success(&self) -> Result<()> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.store.incr(&self.successes_key()).await?;
                debug!(
                    name = %self.name,
                    successes,
                    threshold = self.config.success_threshold,
                    "success in half-open"
                );

                if successes >= self.config.success_threshold as i64 {
                    self.set_state(CircuitState::Closed).await?;
                    self.store.delete(&self.failures_key()).await?;
                    self.store.delete(&self.successes_key()).await?;
                    info!(name = %self.name, "circuit recovered and closed");
                }
            }
            CircuitState::Closed => {
                self.store.delete(&self.failures_key()).await?;
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    async fn on_failure(&self, err: &Error) -> Result<()> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                // Any failure while probing reopens immediately.
                self.set_state(CircuitState::Open).await?;
                self.store.delete(&self.successes_key()).await?;
                self.record_failure().await?;
                warn!(name = %self.name, "circuit failed in half-open, reopening");
            }
            CircuitState::Closed => {
                let failures = self.record_failure().await?;
                warn!(
                    name = %self.name,
                    failures,
                    threshold = self.config.failure_threshold,
                    "circuit failure: {}",
                    err
                );

                if failures >= self.config.failure_threshold as i64 {
                    self.set_state(CircuitState::Open).await?;
                    error!(name = %self.name, failures, "circuit opened");
                }
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    async fn record_failure(&self) -> Result<i64> {
        let failures = self.store.incr(&self.failures_key()).await?;
        self.store
            .put(&self.last_failure_key(), &Utc::now().timestamp().to_string())
            .await?;
        Ok(failures)
    }

    async fn last_failure_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get(&self.last_failure_key())
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    async fn should_attempt_reset(&self) -> Result<bool> {
        match self.last_failure_at().await? {
            None => Ok(true),
            Some(at) => {
                let elapsed = (Utc::now() - at).num_seconds();
                Ok(elapsed >= self.config.timeout_secs as i64)
            }
        }
    }

    /// Full status snapshot for diagnostics
    pub async fn status(&self) -> Result<CircuitBreakerStatus> {
        Ok(CircuitBreakerStatus {
            name: self.name.clone(),
            state: self.state().await?,
            failure_count: self.counter(&self.failures_key()).await?,
            success_count: self.counter(&self.successes_key()).await?,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            timeout_secs: self.config.timeout_secs,
            last_failure_at: self.last_failure_at().await?,
            should_attempt_reset: self.should_attempt_reset().await?,
        })
    }

    /// Force the breaker closed. Administrative; the caller is expected to
    /// leave an audit trail of the reset.
    pub async fn reset(&self) -> Result<()> {
        self.set_state(CircuitState::Closed).await?;
        self.store.delete(&self.failures_key()).await?;
        self.store.delete(&self.successes_key()).await?;
        self.store.delete(&self.last_failure_key()).await?;
        warn!(name = %self.name, "circuit manually reset to closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker_with_timeout(timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(MemoryStore::new()),
            BreakerConfig {
                name: "test-ledger".to_string(),
                failure_threshold: 5,
                success_threshold: 2,
                timeout_secs,
            },
        )
    }

    async fn fail_connection(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>(Error::Connection("refused".to_string())) })
            .await;
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let breaker = breaker_with_timeout(30);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures_and_fails_fast() {
        let breaker = breaker_with_timeout(30);

        for _ in 0..5 {
            fail_connection(&breaker).await;
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        // Sixth call is rejected without invoking the operation.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let err = breaker
            .call(move || {
                let calls = calls_clone;
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CircuitBreakerOpen(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak_in_closed() {
        let breaker = breaker_with_timeout(30);

        for _ in 0..4 {
            fail_connection(&breaker).await;
        }
        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();

        // Streak broken: four more failures still leave it closed.
        for _ in 0..4 {
            fail_connection(&breaker).await;
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes_on_successes() {
        let breaker = breaker_with_timeout(0);

        for _ in 0..5 {
            fail_connection(&breaker).await;
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        // Timeout (0s) elapsed: next call probes in half-open and executes.
        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);

        // Second success reaches the threshold and closes the circuit.
        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_any_failure() {
        let breaker = breaker_with_timeout(0);

        for _ in 0..5 {
            fail_connection(&breaker).await;
        }

        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);

        fail_connection(&breaker).await;
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_non_tripping_errors_pass_through_uncounted() {
        let breaker = breaker_with_timeout(30);

        for _ in 0..10 {
            let err = breaker
                .call(|| async {
                    Err::<(), _>(Error::Validation {
                        field: "amount".to_string(),
                        message: "negative".to_string(),
                    })
                })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation { .. }));
        }

        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(breaker.status().await.unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_manual_reset_forces_closed() {
        let breaker = breaker_with_timeout(30);

        for _ in 0..5 {
            fail_connection(&breaker).await;
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        breaker.reset().await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(breaker.status().await.unwrap().failure_count, 0);

        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_instances_share_state_through_store() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let config = BreakerConfig {
            name: "shared-ledger".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 30,
        };

        let first = CircuitBreaker::new(Arc::clone(&store), config.clone());
        let second = CircuitBreaker::new(store, config);

        for _ in 0..5 {
            fail_connection(&first).await;
        }

        // The other instance observes the open breaker immediately.
        let err = second
            .call(|| async { Ok::<_, Error>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitBreakerOpen(_)));
    }
}
