//! Boundary error reporting
//!
//! Every error leaving the service is logged in full internally, persisted
//! to the error log, and converted into a sanitized envelope. External
//! callers only ever see the envelope.

use std::sync::Arc;

use tracing::error;

use crate::error::{Error, ErrorEnvelope, ErrorLogEntry};
use crate::storage::ErrorLogStore;

/// Converts boundary-crossing errors into envelopes and persists them
pub struct ErrorReporter {
    store: Arc<dyn ErrorLogStore>,
}

impl ErrorReporter {
    pub fn new(store: Arc<dyn ErrorLogStore>) -> Self {
        Self { store }
    }

    /// Log, persist, and sanitize an error
    pub async fn report(
        &self,
        err: &Error,
        correlation_id: &str,
        context: Option<serde_json::Value>,
    ) -> ErrorEnvelope {
        let envelope = err.envelope(correlation_id);

        error!(
            code = err.code(),
            error_id = %envelope.error_id,
            correlation_id,
            "boundary error: {}",
            err
        );

        let entry = ErrorLogEntry::from_error(err, &envelope, context);
        if let Err(e) = self.store.insert(&entry).await {
            // The envelope still goes out; losing the log entry must not
            // turn into a second failure for the caller.
            error!("failed to persist error log entry: {}", e);
        }

        envelope
    }
}
