//! Alert publishing
//!
//! Publishers receive a notice for every alert write. Stale and unchanged
//! applications produce no notice.

use alerting::{Alert, Applied, Outcome};
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// Publisher errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Publisher closed")]
    Closed,
    #[error("Failed to write notice: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of write that produced a notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "camelCase")]
pub enum AlertChange {
    Created,
    Updated,
    /// New window; `previous_id` is now closed
    #[serde(rename_all = "camelCase")]
    Rolled { previous_id: String },
}

impl AlertChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChange::Created => "created",
            AlertChange::Updated => "updated",
            AlertChange::Rolled { .. } => "rolled",
        }
    }
}

/// Alert snapshot handed downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertNotice {
    #[serde(flatten)]
    pub change: AlertChange,
    pub alert: Alert,
}

impl AlertNotice {
    /// Notice for an application, if it wrote anything
    pub fn from_applied(applied: &Applied) -> Option<Self> {
        let change = match &applied.outcome {
            Outcome::Created => AlertChange::Created,
            Outcome::Updated => AlertChange::Updated,
            Outcome::Rolled { previous_id } => AlertChange::Rolled {
                previous_id: previous_id.clone(),
            },
            Outcome::Unchanged | Outcome::Stale => return None,
        };
        Some(Self {
            change,
            alert: applied.alert.clone(),
        })
    }
}

/// Downstream sink for alert notices
pub trait AlertPublisher: Send + Sync {
    fn publish(&self, notice: &AlertNotice) -> Result<(), PublishError>;
}

/// Records a summary of each notice as a structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

impl AlertPublisher for LogPublisher {
    fn publish(&self, notice: &AlertNotice) -> Result<(), PublishError> {
        info!(
            target: "alert_notice",
            change = notice.change.as_str(),
            alert_id = %notice.alert.id,
            rule_id = %notice.alert.event.rule_id,
            event_count = notice.alert.event.event_count,
            severity = %notice.alert.severity,
            "Alert published"
        );
        Ok(())
    }
}

/// Writes each notice as one JSON object per line
pub struct JsonLinesPublisher<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesPublisher<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> AlertPublisher for JsonLinesPublisher<W> {
    fn publish(&self, notice: &AlertNotice) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(notice)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().map_err(|_| PublishError::Closed)?;
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Forwards notices into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<AlertNotice>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertPublisher for ChannelPublisher {
    fn publish(&self, notice: &AlertNotice) -> Result<(), PublishError> {
        self.tx.send(notice.clone()).map_err(|_| PublishError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::{AggregatorConfig, AlertAggregator, NoRuleMetadata};
    use chrono::{TimeZone, Utc};
    use dedup_event::DedupEvent;
    use std::sync::Arc;
    use storage::MemoryStore;

    fn applied(event_count: i64) -> (Applied, Applied) {
        let aggregator = AlertAggregator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoRuleMetadata),
            AggregatorConfig::default(),
        );
        let event = DedupEvent::new("R1", "d1", event_count, Utc.timestamp_opt(1000, 0).unwrap());
        let first = aggregator.apply_event(&event).unwrap();
        let second = aggregator.apply_event(&event).unwrap();
        (first, second)
    }

    #[test]
    fn test_only_writes_are_published() {
        let (created, unchanged) = applied(1);

        let notice = AlertNotice::from_applied(&created).unwrap();
        assert_eq!(notice.change, AlertChange::Created);
        assert!(AlertNotice::from_applied(&unchanged).is_none());
    }

    #[test]
    fn test_notice_json_shape() {
        let (created, _) = applied(1);
        let mut notice = AlertNotice::from_applied(&created).unwrap();
        notice.change = AlertChange::Rolled {
            previous_id: "abc".into(),
        };

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["change"], "rolled");
        assert_eq!(json["previousId"], "abc");
        assert_eq!(json["alert"]["id"], created.alert.id.as_str());
    }

    #[test]
    fn test_channel_publisher() {
        let (created, _) = applied(1);
        let notice = AlertNotice::from_applied(&created).unwrap();

        let (publisher, mut rx) = ChannelPublisher::new();
        publisher.publish(&notice).unwrap();
        assert_eq!(rx.try_recv().unwrap(), notice);

        drop(rx);
        assert!(matches!(publisher.publish(&notice), Err(PublishError::Closed)));
        assert!(LogPublisher::new().publish(&notice).is_ok());
    }

    #[test]
    fn test_json_lines_are_objects() {
        let (created, _) = applied(1);
        let notice = AlertNotice::from_applied(&created).unwrap();

        let publisher = JsonLinesPublisher::new(Vec::new());
        publisher.publish(&notice).unwrap();
        publisher.publish(&notice).unwrap();
        let output = String::from_utf8(publisher.into_inner()).unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(json.is_object());
        assert_eq!(json["change"], "created");
        assert!(json["alert"].is_object());
        assert_eq!(json["alert"]["id"], created.alert.id.as_str());
        assert_eq!(json["alert"]["alertDedupEvent"]["ruleId"], "R1");
    }
}
