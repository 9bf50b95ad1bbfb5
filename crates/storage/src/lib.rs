//! Storage Layer
//!
//! Provides the [`Alert`] entity and a versioned store with conditional
//! writes, used for optimistic read-modify-write aggregation.

mod alert;
mod repository;

pub use alert::{Alert, DedupKey, InvalidKey};
pub use repository::{AlertStore, MemoryStore, StoredAlert};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backing store cannot serve requests
    #[error("Alert store unavailable: {0}")]
    Unavailable(String),
    /// Conditional write lost against a concurrent writer
    #[error("Conditional write failed for {key}: expected version {expected:?}, found {found:?}")]
    ConditionFailed {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
