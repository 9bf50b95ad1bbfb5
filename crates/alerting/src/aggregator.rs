//! Alert Aggregator Implementation

use crate::error::AggregationError;
use crate::identity::{alert_id, TimePartitioning};
use crate::resolver::{AlertDefaults, FallbackContent, ResolvedContent, RuleCatalog};
use dedup_event::DedupEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{Alert, AlertStore, DedupKey, StorageError};
use tracing::{debug, info, warn};

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Re-read and re-apply attempts after a lost conditional write (default: 5)
    pub max_conflict_retries: u32,
    /// Storage bucketing of alerts
    pub time_partitioning: TimePartitioning,
    /// Content used when a rule has no metadata
    pub fallback: FallbackContent,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            time_partitioning: TimePartitioning::Daily,
            fallback: FallbackContent::default(),
        }
    }
}

/// What applying an event did to the stored alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First event for the key
    Created,
    /// Event accepted and the alert changed
    Updated,
    /// Event accepted but the alert already reflected it
    Unchanged,
    /// Event older than the stored state; discarded
    Stale,
    /// Event opened a new window; the previous alert is closed
    Rolled { previous_id: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Stale => "stale",
            Outcome::Rolled { .. } => "rolled",
        }
    }

    /// Whether the stored alert was written
    pub fn is_write(&self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated | Outcome::Rolled { .. })
    }
}

/// Result of [`AlertAggregator::apply`]: the outcome and the alert as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub outcome: Outcome,
    pub alert: Alert,
}

/// Folds dedup events into the live alert of their dedup key
///
/// Each `apply` is a read-modify-write against the store with the write
/// conditioned on the version read. Callers should still keep at most one
/// in-flight `apply` per key; the condition only guards against writers
/// outside this process.
pub struct AlertAggregator {
    store: Arc<dyn AlertStore>,
    catalog: Arc<dyn RuleCatalog>,
    config: AggregatorConfig,
}

impl AlertAggregator {
    /// Create a new aggregator
    pub fn new(
        store: Arc<dyn AlertStore>,
        catalog: Arc<dyn RuleCatalog>,
        config: AggregatorConfig,
    ) -> Self {
        info!("Creating alert aggregator with config: {:?}", config);
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Apply an event under the key derived from it
    pub fn apply_event(&self, event: &DedupEvent) -> Result<Applied, AggregationError> {
        let key = DedupKey::of(event)?;
        self.apply(&key, event)
    }

    /// Apply one dedup event to the alert stored under `key`
    pub fn apply(&self, key: &DedupKey, event: &DedupEvent) -> Result<Applied, AggregationError> {
        let event_key = DedupKey::of(event)?;
        if &event_key != key {
            return Err(AggregationError::KeyMismatch {
                key: key.to_string(),
                event_key: event_key.to_string(),
            });
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let current = self.store.get(key)?;
            let expected_version = current.as_ref().map(|stored| stored.version);

            let (outcome, alert) = match current {
                None => (Outcome::Created, self.create(event)),
                Some(stored) => match self.merge(stored.alert, event) {
                    Merge::Keep(outcome, alert) => {
                        debug!(%key, outcome = outcome.as_str(), event_count = event.event_count, "No write needed");
                        return Ok(Applied { outcome, alert });
                    }
                    Merge::Write(outcome, alert) => (outcome, alert),
                },
            };

            match self.store.put(key, &alert, expected_version) {
                Ok(version) => {
                    debug!(%key, id = %alert.id, outcome = outcome.as_str(), version, "Applied dedup event");
                    return Ok(Applied { outcome, alert });
                }
                Err(StorageError::ConditionFailed { .. }) if attempts <= self.config.max_conflict_retries => {
                    metrics::counter!("alerts_conflict_retries_total").increment(1);
                    debug!(%key, attempts, "Conditional write lost, re-reading");
                }
                Err(StorageError::ConditionFailed { .. }) => {
                    warn!(%key, attempts, "Giving up on conflicting writes");
                    return Err(AggregationError::Conflict { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Defaults for the rule that produced `event`
    fn defaults_for(&self, event: &DedupEvent) -> AlertDefaults {
        let mut defaults = self
            .catalog
            .defaults_for(&event.rule_id, &event.rule_version)
            .unwrap_or_else(|| AlertDefaults::from_fallback(&self.config.fallback));

        if event.alert_type.is_rule_error() {
            defaults.title = format!("Rule error in {}", event.rule_id);
        }
        defaults
    }

    /// New alert opening a window
    fn create(&self, event: &DedupEvent) -> Alert {
        let defaults = self.defaults_for(event);
        let content = ResolvedContent::from_defaults(event, &defaults);

        let mut event = event.clone();
        if event.update_time < event.creation_time {
            event.update_time = event.creation_time;
        }

        Alert {
            id: alert_id(&event.rule_id, event.alert_count, &event.deduplication_string),
            time_partition: self.config.time_partitioning.partition(event.creation_time),
            severity: content.severity,
            rule_display_name: defaults.rule_display_name,
            first_event_match_time: event.creation_time,
            log_types: event.log_types.clone(),
            title: content.title,
            description: content.description,
            reference: content.reference,
            runbook: content.runbook,
            destination_override: content.destination_override,
            event,
        }
    }

    /// Decide how `event` changes the stored alert
    fn merge(&self, stored: Alert, event: &DedupEvent) -> Merge {
        if event.alert_count > stored.generation() {
            info!(
                rule_id = %event.rule_id,
                previous_id = %stored.id,
                generation = event.alert_count,
                "Dedup window rolled over"
            );
            return Merge::Write(
                Outcome::Rolled {
                    previous_id: stored.id,
                },
                self.create(event),
            );
        }

        if event.alert_count < stored.generation() || event.event_count < stored.event_count() {
            debug!(
                id = %stored.id,
                stored_count = stored.event_count(),
                event_count = event.event_count,
                "Discarding stale dedup event"
            );
            return Merge::Keep(Outcome::Stale, stored);
        }

        let content = ResolvedContent::from_previous(event, &stored);

        let mut latest = event.clone();
        latest.creation_time = stored.creation_time();
        latest.update_time = stored.update_time().max(event.update_time);

        let mut log_types = stored.log_types.clone();
        log_types.extend(event.log_types.iter().cloned());

        let updated = Alert {
            id: stored.id.clone(),
            time_partition: stored.time_partition.clone(),
            severity: content.severity,
            rule_display_name: stored.rule_display_name.clone(),
            first_event_match_time: stored.first_event_match_time,
            log_types,
            title: content.title,
            description: content.description,
            reference: content.reference,
            runbook: content.runbook,
            destination_override: content.destination_override,
            event: latest,
        };

        if updated == stored {
            Merge::Keep(Outcome::Unchanged, stored)
        } else {
            Merge::Write(Outcome::Updated, updated)
        }
    }
}

enum Merge {
    Keep(Outcome, Alert),
    Write(Outcome, Alert),
}
