//! Dedup Event Model

use crate::error::ConversionCause;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Wire value marking an alert raised because a rule itself failed
pub const RULE_ERROR_TYPE: &str = "RULE_ERROR";

/// Alert severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConversionCause;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(ConversionCause::UnknownSeverity(s.to_string())),
        }
    }
}

/// Kind of match that produced the event
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertType {
    /// Ordinary rule match
    #[default]
    Rule,
    /// The rule raised an error while evaluating
    RuleError,
    /// Any type label this core does not interpret
    Other(String),
}

impl AlertType {
    pub fn is_rule_error(&self) -> bool {
        matches!(self, AlertType::RuleError)
    }
}

impl From<String> for AlertType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "RULE" => AlertType::Rule,
            RULE_ERROR_TYPE => AlertType::RuleError,
            _ => AlertType::Other(value),
        }
    }
}

impl From<AlertType> for String {
    fn from(value: AlertType) -> Self {
        match value {
            AlertType::Rule => "RULE".to_string(),
            AlertType::RuleError => RULE_ERROR_TYPE.to_string(),
            AlertType::Other(label) => label,
        }
    }
}

/// One observation of a rule match, as reported by the rules engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupEvent {
    pub rule_id: String,
    pub rule_version: String,
    /// Deduplication string computed by the rule
    #[serde(rename = "dedup")]
    pub deduplication_string: String,
    /// Start of the dedup window
    pub creation_time: DateTime<Utc>,
    /// Latest match inside the window
    pub update_time: DateTime<Utc>,
    /// Matches seen so far in this window, authoritative from upstream
    pub event_count: i64,
    pub log_types: BTreeSet<String>,
    #[serde(rename = "context", default)]
    pub alert_context: Option<String>,
    #[serde(rename = "type", default)]
    pub alert_type: AlertType,
    #[serde(default)]
    pub generated_title: Option<String>,
    #[serde(default)]
    pub generated_description: Option<String>,
    #[serde(default)]
    pub generated_reference: Option<String>,
    #[serde(default)]
    pub generated_severity: Option<Severity>,
    #[serde(default)]
    pub generated_runbook: Option<String>,
    #[serde(default)]
    pub generated_destination_override: Option<Vec<String>>,
    /// Window generation for this dedup string, as numbered upstream
    pub alert_count: i64,
}

impl DedupEvent {
    /// Minimal event with no generated content, used by builders and tests
    pub fn new(
        rule_id: impl Into<String>,
        deduplication_string: impl Into<String>,
        event_count: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_version: String::new(),
            deduplication_string: deduplication_string.into(),
            creation_time: at,
            update_time: at,
            event_count,
            log_types: BTreeSet::new(),
            alert_context: None,
            alert_type: AlertType::Rule,
            generated_title: None,
            generated_description: None,
            generated_reference: None,
            generated_severity: None,
            generated_runbook: None,
            generated_destination_override: None,
            alert_count: 1,
        }
    }
}
