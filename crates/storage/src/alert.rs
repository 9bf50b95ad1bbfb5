//! Alert entity and dedup identity

use chrono::{DateTime, Utc};
use dedup_event::{DedupEvent, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Malformed dedup identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid dedup key: {0} is empty")]
pub struct InvalidKey(pub &'static str);

/// Identity of one logical alert: rule plus deduplication string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    rule_id: String,
    dedup: String,
}

impl DedupKey {
    /// Build a key, rejecting empty parts
    pub fn new(rule_id: impl Into<String>, dedup: impl Into<String>) -> Result<Self, InvalidKey> {
        let rule_id = rule_id.into();
        let dedup = dedup.into();
        if rule_id.is_empty() {
            return Err(InvalidKey("ruleId"));
        }
        if dedup.is_empty() {
            return Err(InvalidKey("dedup"));
        }
        Ok(Self { rule_id, dedup })
    }

    /// Key of the window an event belongs to
    pub fn of(event: &DedupEvent) -> Result<Self, InvalidKey> {
        Self::new(event.rule_id.as_str(), event.deduplication_string.as_str())
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn dedup(&self) -> &str {
        &self.dedup
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rule_id, self.dedup)
    }
}

/// Deduplicated alert, as handed to downstream publishers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Stable for the lifetime of one dedup window
    pub id: String,
    /// Coarse storage bucket
    pub time_partition: String,
    pub severity: Severity,
    pub rule_display_name: Option<String>,
    pub first_event_match_time: DateTime<Utc>,
    /// Union of log types seen across the window
    pub log_types: BTreeSet<String>,
    pub title: String,
    pub description: String,
    pub reference: String,
    pub runbook: String,
    pub destination_override: Vec<String>,
    /// Latest accepted dedup event
    #[serde(rename = "alertDedupEvent")]
    pub event: DedupEvent,
}

impl Alert {
    /// Dedup key this alert is stored under
    pub fn key(&self) -> Result<DedupKey, InvalidKey> {
        DedupKey::of(&self.event)
    }

    pub fn event_count(&self) -> i64 {
        self.event.event_count
    }

    /// Window generation the alert belongs to
    pub fn generation(&self) -> i64 {
        self.event.alert_count
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.event.creation_time
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.event.update_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_rejects_empty_parts() {
        assert_eq!(DedupKey::new("", "d1"), Err(InvalidKey("ruleId")));
        assert_eq!(DedupKey::new("R1", ""), Err(InvalidKey("dedup")));

        let key = DedupKey::new("R1", "d1").unwrap();
        assert_eq!(key.rule_id(), "R1");
        assert_eq!(key.dedup(), "d1");
        assert_eq!(key.to_string(), "R1/d1");
    }

    #[test]
    fn test_key_ignores_version_and_type() {
        let at = Utc.timestamp_opt(1000, 0).unwrap();
        let mut first = DedupEvent::new("R1", "d1", 1, at);
        first.rule_version = "v1".into();
        let mut second = DedupEvent::new("R1", "d1", 2, at);
        second.rule_version = "v2".into();
        second.alert_type = dedup_event::AlertType::RuleError;

        assert_eq!(DedupKey::of(&first), DedupKey::of(&second));
    }
}
