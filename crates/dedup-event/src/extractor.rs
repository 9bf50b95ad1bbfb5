//! Change-record to DedupEvent decoding

use crate::error::{ConversionCause, ExtractionError};
use crate::event::{AlertType, DedupEvent, Severity};
use crate::value::{AttributeMap, AttributeValue};
use chrono::{DateTime, TimeZone, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Decode a change-record image into a [`DedupEvent`]
///
/// `None` and empty images carry nothing to extract and yield `Ok(None)`.
/// Any panic raised while decoding is caught here and reported as
/// [`ExtractionError::Internal`] so one bad record cannot take down the
/// consumer.
pub fn extract(input: Option<&AttributeMap>) -> Result<Option<DedupEvent>, ExtractionError> {
    let input = match input {
        Some(map) if !map.is_empty() => map,
        _ => {
            debug!("Empty change record, nothing to extract");
            return Ok(None);
        }
    };

    guarded(|| decode(input)).map(Some)
}

/// Run `decode` inside a fault boundary
fn guarded<T>(
    decode: impl FnOnce() -> Result<T, ExtractionError>,
) -> Result<T, ExtractionError> {
    match panic::catch_unwind(AssertUnwindSafe(decode)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "Recovered from panic while decoding dedup event");
            Err(ExtractionError::Internal { message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn decode(input: &AttributeMap) -> Result<DedupEvent, ExtractionError> {
    let rule_id = required_string("ruleId", input)?;
    let rule_version = required_string("ruleVersion", input)?;
    let deduplication_string = required_string("dedup", input)?;
    let alert_count = required_integer("alertCount", input)?;
    let creation_time = required_time("alertCreationTime", input)?;
    let update_time = required_time("alertUpdateTime", input)?;
    let event_count = required_integer("eventCount", input)?;
    let log_types = required("logTypes", input)?
        .as_string_set()
        .map_err(|cause| conversion("logTypes", cause))?
        .iter()
        .cloned()
        .collect();

    let generated_severity = optional_string("severity", input)?
        .map(|label| label.parse::<Severity>())
        .transpose()
        .map_err(|cause| conversion("severity", cause))?;

    let generated_destination_override = optional("destinationOverride", input)
        .map(|value| {
            value
                .as_string_set()
                .map(<[String]>::to_vec)
                .map_err(|cause| conversion("destinationOverride", cause))
        })
        .transpose()?;

    let alert_type = optional_string("type", input)?
        .map(AlertType::from)
        .unwrap_or_default();

    Ok(DedupEvent {
        rule_id,
        rule_version,
        deduplication_string,
        creation_time,
        update_time,
        event_count,
        log_types,
        alert_context: optional_string("context", input)?,
        alert_type,
        generated_title: optional_string("title", input)?,
        generated_description: optional_string("description", input)?,
        generated_reference: optional_string("reference", input)?,
        generated_severity,
        generated_runbook: optional_string("runbook", input)?,
        generated_destination_override,
        alert_count,
    })
}

fn conversion(key: &'static str, cause: ConversionCause) -> ExtractionError {
    ExtractionError::Conversion { key, cause }
}

fn required<'a>(
    key: &'static str,
    input: &'a AttributeMap,
) -> Result<&'a AttributeValue, ExtractionError> {
    input
        .get(key)
        .ok_or(ExtractionError::MissingAttribute { key })
}

/// Present and non-null attribute, if any
fn optional<'a>(key: &str, input: &'a AttributeMap) -> Option<&'a AttributeValue> {
    input.get(key).filter(|value| !value.is_null())
}

fn required_string(key: &'static str, input: &AttributeMap) -> Result<String, ExtractionError> {
    required(key, input)?
        .as_str()
        .map(str::to_string)
        .map_err(|cause| conversion(key, cause))
}

fn required_integer(key: &'static str, input: &AttributeMap) -> Result<i64, ExtractionError> {
    required(key, input)?
        .as_integer()
        .map_err(|cause| conversion(key, cause))
}

fn required_time(key: &'static str, input: &AttributeMap) -> Result<DateTime<Utc>, ExtractionError> {
    let seconds = required_integer(key, input)?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| conversion(key, ConversionCause::TimestampOutOfRange(seconds)))
}

fn optional_string(
    key: &'static str,
    input: &AttributeMap,
) -> Result<Option<String>, ExtractionError> {
    optional(key, input)
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .map_err(|cause| conversion(key, cause))
        })
        .transpose()
}
