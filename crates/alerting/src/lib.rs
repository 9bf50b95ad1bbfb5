//! Alerting System
//!
//! Folds dedup events from the rules engine into deduplicated alerts:
//! content resolution against rule defaults, identity derivation, and
//! optimistic read-modify-write aggregation per dedup key.

mod aggregator;
mod error;
mod identity;
mod resolver;

pub use aggregator::{AggregatorConfig, AlertAggregator, Applied, Outcome};
pub use error::AggregationError;
pub use identity::{alert_id, TimePartitioning};
pub use resolver::{
    resolve, AlertDefaults, FallbackContent, NoRuleMetadata, ResolvedContent, RuleCatalog,
    StaticCatalog,
};

pub use storage::{Alert, DedupKey, InvalidKey};
