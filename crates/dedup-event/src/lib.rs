//! Dedup Event Extraction
//!
//! Decodes raw change-stream records emitted by the rules engine into
//! strongly typed [`DedupEvent`]s.

mod error;
mod event;
mod extractor;
mod value;

pub use error::{ConversionCause, ExtractionError};
pub use event::{AlertType, DedupEvent, Severity};
pub use extractor::extract;
pub use value::{AttributeMap, AttributeValue};
