use thiserror::Error;

use crate::domain::CustomerId;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Membership criteria could not be loaded or failed validation. Aborts the run.
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Aggregation read failed for customer {customer_id}: {reason}")]
    AggregationReadFailure { customer_id: CustomerId, reason: String },

    #[error("Persist conflict for customer {customer_id} (expected version {expected_version})")]
    PersistConflict {
        customer_id: CustomerId,
        expected_version: i64,
    },

    #[error("Notification sink failure: {0}")]
    NotificationSinkFailure(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("Recompute of customer {0} timed out")]
    IterationTimeout(CustomerId),

    #[error("Invalid stored value: {0}")]
    InvalidStoredValue(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Listener error: {0}")]
    Listener(#[from] tokio_postgres::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl EngineError {
    /// Fatal errors abort the whole batch run instead of a single customer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ConfigUnavailable(_))
    }

    /// Transient read errors the processor retries before giving up on a customer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AggregationReadFailure { .. } | EngineError::Database(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
