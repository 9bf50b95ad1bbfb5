//! Loosely typed change-record attribute values

use crate::error::ConversionCause;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute name to value, as found in one change-record image
pub type AttributeMap = HashMap<String, AttributeValue>;

/// A single attribute value in change-stream form
///
/// Serializes with the stream's type tags, e.g. `{"S": "abc"}`,
/// `{"N": "42"}`, `{"SS": ["a", "b"]}` or `{"NULL": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// UTF-8 string
    #[serde(rename = "S")]
    String(String),
    /// Number kept as decimal text
    #[serde(rename = "N")]
    Number(String),
    /// Set of strings
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    /// Explicit null
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    /// Build a number attribute from an integer
    pub fn number(value: i64) -> Self {
        AttributeValue::Number(value.to_string())
    }

    /// Build a string-set attribute
    pub fn string_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeValue::StringSet(values.into_iter().map(Into::into).collect())
    }

    /// Name of the type tag, for error reporting
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Number(_) => "number",
            AttributeValue::StringSet(_) => "string set",
            AttributeValue::Null(_) => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null(_))
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Result<&str, ConversionCause> {
        match self {
            AttributeValue::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// Parse the number payload as a signed 64-bit integer
    pub fn as_integer(&self) -> Result<i64, ConversionCause> {
        match self {
            AttributeValue::Number(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| ConversionCause::NotAnInteger(text.clone())),
            other => Err(other.mismatch("number")),
        }
    }

    /// Borrow the string-set payload
    pub fn as_string_set(&self) -> Result<&[String], ConversionCause> {
        match self {
            AttributeValue::StringSet(values) => Ok(values),
            other => Err(other.mismatch("string set")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> ConversionCause {
        ConversionCause::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}
