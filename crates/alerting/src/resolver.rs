//! Alert content resolution
//!
//! Every content field of an alert is either generated by the rule at match
//! time or taken from a default. Defaults come from rule metadata when the
//! catalog knows the rule, otherwise from static fallback configuration.

use dedup_event::{DedupEvent, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use storage::Alert;

/// Generated value when present, default otherwise
pub fn resolve<T: Clone>(generated: Option<&T>, default: &T) -> T {
    generated.unwrap_or(default).clone()
}

/// Static content used when nothing better is known about a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackContent {
    pub title: String,
    pub description: String,
    pub reference: String,
    pub runbook: String,
    pub severity: Severity,
    pub destination_override: Vec<String>,
}

impl Default for FallbackContent {
    fn default() -> Self {
        Self {
            title: "no title provided".to_string(),
            description: String::new(),
            reference: String::new(),
            runbook: String::new(),
            severity: Severity::Info,
            destination_override: Vec::new(),
        }
    }
}

/// Default content for one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDefaults {
    pub rule_display_name: Option<String>,
    pub title: String,
    pub description: String,
    pub reference: String,
    pub runbook: String,
    pub severity: Severity,
    pub destination_override: Vec<String>,
}

impl AlertDefaults {
    pub fn from_fallback(fallback: &FallbackContent) -> Self {
        Self {
            rule_display_name: None,
            title: fallback.title.clone(),
            description: fallback.description.clone(),
            reference: fallback.reference.clone(),
            runbook: fallback.runbook.clone(),
            severity: fallback.severity,
            destination_override: fallback.destination_override.clone(),
        }
    }
}

/// Lookup of rule metadata owned by the rules service
pub trait RuleCatalog: Send + Sync {
    fn defaults_for(&self, rule_id: &str, rule_version: &str) -> Option<AlertDefaults>;
}

/// Catalog that knows no rules; every alert uses fallback content
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRuleMetadata;

impl RuleCatalog for NoRuleMetadata {
    fn defaults_for(&self, _rule_id: &str, _rule_version: &str) -> Option<AlertDefaults> {
        None
    }
}

/// Map-backed catalog, keyed by rule id
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    rules: HashMap<String, AlertDefaults>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rule_id: impl Into<String>, defaults: AlertDefaults) {
        self.rules.insert(rule_id.into(), defaults);
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>, defaults: AlertDefaults) -> Self {
        self.insert(rule_id, defaults);
        self
    }
}

impl RuleCatalog for StaticCatalog {
    fn defaults_for(&self, rule_id: &str, _rule_version: &str) -> Option<AlertDefaults> {
        self.rules.get(rule_id).cloned()
    }
}

/// Resolved content fields of an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub title: String,
    pub description: String,
    pub reference: String,
    pub runbook: String,
    pub severity: Severity,
    pub destination_override: Vec<String>,
}

impl ResolvedContent {
    /// Content for a newly created alert
    pub fn from_defaults(event: &DedupEvent, defaults: &AlertDefaults) -> Self {
        Self {
            title: resolve(event.generated_title.as_ref(), &defaults.title),
            description: resolve(event.generated_description.as_ref(), &defaults.description),
            reference: resolve(event.generated_reference.as_ref(), &defaults.reference),
            runbook: resolve(event.generated_runbook.as_ref(), &defaults.runbook),
            severity: resolve(event.generated_severity.as_ref(), &defaults.severity),
            destination_override: resolve(
                event.generated_destination_override.as_ref(),
                &defaults.destination_override,
            ),
        }
    }

    /// Content for an existing alert; fields the event does not generate
    /// keep their previously resolved value
    pub fn from_previous(event: &DedupEvent, previous: &Alert) -> Self {
        Self {
            title: resolve(event.generated_title.as_ref(), &previous.title),
            description: resolve(event.generated_description.as_ref(), &previous.description),
            reference: resolve(event.generated_reference.as_ref(), &previous.reference),
            runbook: resolve(event.generated_runbook.as_ref(), &previous.runbook),
            severity: resolve(event.generated_severity.as_ref(), &previous.severity),
            destination_override: resolve(
                event.generated_destination_override.as_ref(),
                &previous.destination_override,
            ),
        }
    }
}
