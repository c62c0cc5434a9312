//! Error types for the custody service
//!
//! A sealed taxonomy shared by every component. Each variant maps to a
//! machine-readable code, a sanitized user-facing message, and a transport
//! status; internal detail stays in logs and the error log table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the custody service
#[derive(Error, Debug)]
pub enum Error {
    // Blockchain errors
    #[error("Blockchain connection failed: {0}")]
    Connection(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Nonce lock timed out for {0}")]
    NonceLockTimeout(String),

    #[error("Gas price error: {0}")]
    GasPrice(String),

    #[error("Insufficient balance for {address}: required {required}, available {available}")]
    InsufficientBalance {
        address: String,
        required: String,
        available: String,
    },

    #[error("Contract call {function} on {address} failed: {message}")]
    ContractCall {
        address: String,
        function: String,
        message: String,
    },

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Validation errors
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    // Business logic errors
    #[error("{0}")]
    BusinessLogic(String),

    // System errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("External service {service} failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("Circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("Lock timed out for {0}")]
    LockTimeout(String),

    // Authentication & authorization errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    // Wallet custody errors
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("Wallet revoked: {0}")]
    WalletRevoked(String),

    #[error("Wallet decryption failed: {0}")]
    WalletDecryption(String),

    #[error("Wallet custody error: {0}")]
    Custody(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::Connection(_) => "BLOCKCHAIN_CONNECTION_ERROR",
            Error::Transaction(_) => "TRANSACTION_ERROR",
            Error::Nonce { .. } => "NONCE_ERROR",
            Error::NonceLockTimeout(_) => "NONCE_LOCK_TIMEOUT",
            Error::GasPrice(_) => "GAS_PRICE_ERROR",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::ContractCall { .. } => "CONTRACT_ERROR",
            Error::RpcTimeout(_) => "RPC_TIMEOUT",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::BusinessLogic(_) => "BUSINESS_LOGIC_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Error::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            Error::LockTimeout(_) => "LOCK_TIMEOUT",
            Error::Authentication(_) => "AUTHENTICATION_ERROR",
            Error::Authorization(_) => "AUTHORIZATION_ERROR",
            Error::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Error::WalletAlreadyExists(_) => "WALLET_ALREADY_EXISTS",
            Error::WalletRevoked(_) => "WALLET_REVOKED",
            Error::WalletDecryption(_) => "WALLET_DECRYPTION_ERROR",
            Error::Custody(_) => "WALLET_CUSTODY_ERROR",
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// User-facing message, safe to return to untrusted callers
    pub fn user_message(&self) -> String {
        match self {
            Error::Connection(_) | Error::RpcTimeout(_) => {
                "Unable to reach the blockchain. Please try again later.".to_string()
            }
            Error::Transaction(_) => {
                "Transaction failed. Please check your transaction and try again.".to_string()
            }
            Error::Nonce { .. } | Error::NonceLockTimeout(_) => {
                "Transaction sequencing error. Please try again.".to_string()
            }
            Error::GasPrice(_) => "Network fees are too high. Please try again later.".to_string(),
            Error::InsufficientBalance {
                required,
                available,
                ..
            } => format!(
                "Insufficient balance. Required: {}, available: {}",
                required, available
            ),
            Error::ContractCall { .. } => {
                "Smart contract operation failed. Please contact support.".to_string()
            }
            Error::Validation { field, message } => format!("Invalid {}: {}", field, message),
            Error::BusinessLogic(msg) => msg.clone(),
            Error::Database(_) => "Database error. Please try again.".to_string(),
            Error::Cache(_) => "Cache error. Please try again.".to_string(),
            Error::ExternalService { service, .. } => {
                format!("{} is temporarily unavailable. Please try again later.", service)
            }
            Error::CircuitBreakerOpen(name) => format!(
                "{} is temporarily unavailable. Please try again in a few moments.",
                name
            ),
            Error::LockTimeout(_) => "Resource is busy. Please try again.".to_string(),
            Error::Authentication(_) => {
                "Authentication failed. Please check your credentials.".to_string()
            }
            Error::Authorization(_) => {
                "You don't have permission to perform this action.".to_string()
            }
            Error::WalletNotFound(_) => "Wallet not found.".to_string(),
            Error::WalletAlreadyExists(_) => "Wallet already exists.".to_string(),
            Error::WalletRevoked(_) => "This wallet has been revoked.".to_string(),
            Error::WalletDecryption(_) | Error::Custody(_) => {
                "Wallet operation failed. Please contact support.".to_string()
            }
            Error::Config(_) | Error::Serialization(_) | Error::Io(_) => {
                "A system error occurred. Please try again later.".to_string()
            }
        }
    }

    /// Transport status code for this error kind
    pub fn status(&self) -> u16 {
        match self {
            Error::Connection(_) | Error::RpcTimeout(_) | Error::ExternalService { .. } => 502,
            Error::Transaction(_)
            | Error::Nonce { .. }
            | Error::GasPrice(_)
            | Error::InsufficientBalance { .. }
            | Error::ContractCall { .. }
            | Error::BusinessLogic(_) => 400,
            Error::Validation { .. } => 422,
            Error::NonceLockTimeout(_) | Error::LockTimeout(_) => 409,
            Error::CircuitBreakerOpen(_) => 503,
            Error::Authentication(_) => 401,
            Error::Authorization(_) => 403,
            Error::WalletNotFound(_) => 404,
            Error::WalletAlreadyExists(_) => 409,
            Error::WalletRevoked(_) => 410,
            Error::WalletDecryption(_)
            | Error::Custody(_)
            | Error::Database(_)
            | Error::Cache(_)
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Io(_) => 500,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::RpcTimeout(_)
                | Error::NonceLockTimeout(_)
                | Error::LockTimeout(_)
                | Error::Cache(_)
                | Error::ExternalService { .. }
                | Error::CircuitBreakerOpen(_)
        )
    }

    /// Check if this error is fatal (operator intervention required, never retry)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WalletDecryption(_) | Error::WalletRevoked(_) | Error::Config(_)
        )
    }

    /// Check if this error counts against a circuit breaker
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::RpcTimeout(_) | Error::ExternalService { .. }
        )
    }

    /// Build the structured envelope returned across service boundaries
    pub fn envelope(&self, correlation_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            user_message: self.user_message(),
            error_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Structured error envelope exposed to external callers
///
/// Carries no internal detail; the error_id links back to the persisted
/// `ErrorLogEntry` for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub user_message: String,
    pub error_id: String,
    pub correlation_id: String,
}

/// Persisted record of an error that crossed a service boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub error_id: String,
    pub code: String,
    pub message: String,
    pub correlation_id: String,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn from_error(err: &Error, envelope: &ErrorEnvelope, context: Option<serde_json::Value>) -> Self {
        Self {
            error_id: envelope.error_id.clone(),
            code: err.code().to_string(),
            message: err.to_string(),
            correlation_id: envelope.correlation_id.clone(),
            context,
            created_at: Utc::now(),
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from redis errors
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Cache(e.to_string())
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else {
            Error::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            Error::WalletNotFound("w1".to_string()).code(),
            "WALLET_NOT_FOUND"
        );
        assert_eq!(
            Error::CircuitBreakerOpen("ledger".to_string()).code(),
            "CIRCUIT_BREAKER_OPEN"
        );
        assert_eq!(Error::NonceLockTimeout("0xab".to_string()).code(), "NONCE_LOCK_TIMEOUT");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::WalletNotFound("w1".to_string()).status(), 404);
        assert_eq!(Error::WalletRevoked("w1".to_string()).status(), 410);
        assert_eq!(Error::CircuitBreakerOpen("x".to_string()).status(), 503);
        assert_eq!(Error::Connection("refused".to_string()).status(), 502);
        assert_eq!(
            Error::Validation {
                field: "address".to_string(),
                message: "bad hex".to_string()
            }
            .status(),
            422
        );
    }

    #[test]
    fn test_retryable_and_fatal_are_disjoint() {
        let retryable = Error::NonceLockTimeout("0xab".to_string());
        assert!(retryable.is_retryable());
        assert!(!retryable.is_fatal());

        let fatal = Error::WalletDecryption("key mismatch".to_string());
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::Database("connection to 10.0.0.3:5432 refused".to_string());
        assert!(!err.user_message().contains("10.0.0.3"));

        let err = Error::WalletDecryption("aead tag mismatch for wallet w9".to_string());
        assert!(!err.user_message().contains("w9"));
    }

    #[test]
    fn test_envelope_carries_correlation() {
        let err = Error::Transaction("reverted".to_string());
        let env = err.envelope("corr-123");
        assert_eq!(env.code, "TRANSACTION_ERROR");
        assert_eq!(env.correlation_id, "corr-123");
        assert!(!env.error_id.is_empty());
    }
}
