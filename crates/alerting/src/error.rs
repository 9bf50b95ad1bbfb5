//! Aggregation Error Types

use storage::{InvalidKey, StorageError};
use thiserror::Error;

/// Errors while applying a dedup event to the alert store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// Empty rule id or dedup string
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),

    /// Event does not belong to the key it was applied under
    #[error("event for {event_key} applied under key {key}")]
    KeyMismatch { key: String, event_key: String },

    /// Concurrent writers kept winning the conditional write
    #[error("gave up after {attempts} conflicting writes")]
    Conflict { attempts: u32 },

    /// Backing store itself is failing
    #[error("alert store unavailable: {0}")]
    StoreUnavailable(String),

    /// Store rejected or could not decode a single alert
    #[error("alert store error: {0}")]
    Store(StorageError),
}

impl AggregationError {
    /// Whether the caller must stop making progress and retry later
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregationError::StoreUnavailable(_))
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AggregationError::InvalidKey(_) => "invalid_key",
            AggregationError::KeyMismatch { .. } => "key_mismatch",
            AggregationError::Conflict { .. } => "conflict",
            AggregationError::StoreUnavailable(_) => "store_unavailable",
            AggregationError::Store(_) => "store",
        }
    }
}

impl From<StorageError> for AggregationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(reason) => AggregationError::StoreUnavailable(reason),
            other => AggregationError::Store(other),
        }
    }
}
