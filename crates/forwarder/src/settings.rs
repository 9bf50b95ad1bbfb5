//! Forwarder settings
//!
//! Settings are layered from an optional TOML file and then
//! `ALERT_FORWARDER__*` environment variables, e.g.
//! `ALERT_FORWARDER__WORKERS=8` or
//! `ALERT_FORWARDER__AGGREGATOR__MAX_CONFLICT_RETRIES=10`.

use alerting::AggregatorConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

const ENV_PREFIX: &str = "ALERT_FORWARDER";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl LoggingConfig {
    /// Parsed `level`, if it names a tracing level
    pub fn max_level(&self) -> Option<Level> {
        Level::from_str(&self.level).ok()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level forwarder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderSettings {
    /// Worker tasks; each dedup key is owned by exactly one
    pub workers: usize,
    /// Bounded queue per worker
    pub queue_depth: usize,
    pub aggregator: AggregatorConfig,
    pub logging: LoggingConfig,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
            aggregator: AggregatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ForwarderSettings {
    /// Load settings from an optional file plus the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        Self::build(
            builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".to_string()));
        }
        if self.logging.max_level().is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown logging level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::TimePartitioning;
    use config::FileFormat;
    use dedup_event::Severity;

    fn from_toml(text: &str) -> Result<ForwarderSettings, ConfigError> {
        ForwarderSettings::build(
            config::Config::builder().add_source(File::from_str(text, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings, ForwarderSettings::default());
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.aggregator.max_conflict_retries, 5);
        assert_eq!(settings.aggregator.fallback.title, "no title provided");
    }

    #[test]
    fn test_file_overrides() {
        let settings = from_toml(
            r#"
            workers = 8

            [aggregator]
            max_conflict_retries = 2
            time_partitioning = { fixed = "defaultPartition" }

            [aggregator.fallback]
            title = "untitled alert"
            severity = "MEDIUM"

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.workers, 8);
        assert_eq!(settings.queue_depth, 1024);
        assert_eq!(settings.aggregator.max_conflict_retries, 2);
        assert_eq!(
            settings.aggregator.time_partitioning,
            TimePartitioning::Fixed("defaultPartition".into())
        );
        assert_eq!(settings.aggregator.fallback.title, "untitled alert");
        assert_eq!(settings.aggregator.fallback.severity, Severity::Medium);
        assert_eq!(settings.aggregator.fallback.description, "");
        assert!(settings.logging.json);
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = from_toml("[logging]\nlevel = \"verbose\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref reason) if reason.contains("verbose")));

        let settings = from_toml("[logging]\nlevel = \"WARN\"").unwrap();
        assert_eq!(settings.logging.max_level(), Some(Level::WARN));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            from_toml("workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
