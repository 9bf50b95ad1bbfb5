//! Alert identity and storage partitioning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-based alert ids
const ALERT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6a1e_47c2_93d5_4b0e_a8f1_2c7d_5e90_b314);

/// Deterministic alert id for one window of a dedup key
///
/// The same rule, dedup string and window generation always map to the same
/// id, so re-deliveries and concurrent writers agree on it.
pub fn alert_id(rule_id: &str, generation: i64, dedup: &str) -> String {
    let name = format!("{}:{}:{}", rule_id, generation, dedup);
    Uuid::new_v5(&ALERT_ID_NAMESPACE, name.as_bytes())
        .simple()
        .to_string()
}

/// How alerts are bucketed for storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePartitioning {
    /// One bucket per UTC day of the window start
    #[default]
    Daily,
    /// Every alert in the same bucket
    Fixed(String),
}

impl TimePartitioning {
    pub fn partition(&self, creation_time: DateTime<Utc>) -> String {
        match self {
            TimePartitioning::Daily => creation_time.format("%Y-%m-%d").to_string(),
            TimePartitioning::Fixed(bucket) => bucket.clone(),
        }
    }
}
