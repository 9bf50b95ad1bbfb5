//! Extraction Error Types

use thiserror::Error;

/// Why a single attribute could not be converted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionCause {
    /// Attribute carried a different type tag
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Number text is not a valid 64-bit integer
    #[error("'{0}' is not an integer")]
    NotAnInteger(String),

    /// Epoch seconds outside the representable range
    #[error("epoch seconds {0} out of range")]
    TimestampOutOfRange(i64),

    /// Unknown severity label
    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
}

/// Errors while extracting a dedup event from a change record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Required attribute absent
    #[error("could not find '{key}' attribute")]
    MissingAttribute { key: &'static str },

    /// Attribute present but of the wrong shape
    #[error("failed to convert attribute '{key}': {cause}")]
    Conversion {
        key: &'static str,
        cause: ConversionCause,
    },

    /// Unexpected fault caught at the decode boundary
    #[error("panicked while getting alert dedup event: {message}")]
    Internal { message: String },
}

impl ExtractionError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::MissingAttribute { .. } => "missing_attribute",
            ExtractionError::Conversion { .. } => "conversion",
            ExtractionError::Internal { .. } => "internal",
        }
    }
}
