//! Log data model.
//!
//! Defines the `LogEntry` structure for structured log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use super::sanitize::{self, truncate, MAX_ATTRIBUTE_KEY_LENGTH, MAX_STRING_LENGTH};

/// Log severity level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational messages.
    #[default]
    Info,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical/fatal conditions.
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Error returned when a string is not a known log level.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown log level: '{0}'")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    /// Parses a level case-insensitively. `warn` and `fatal` are accepted as
    /// aliases for `warning` and `critical`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// A structured log entry.
///
/// The message is capped at [`MAX_STRING_LENGTH`] characters including the
/// truncation marker.
///
/// # Example
///
/// ```
/// use shared::models::{LogEntry, LogLevel};
///
/// let log = LogEntry::new(LogLevel::Info, "User logged in")
///     .with_attribute("user_id", "12345")
///     .with_trace_id("4bf92f3577b34da6a3ce929d0e0e4736");
///
/// assert_eq!(log.attributes.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity level of the log.
    #[serde(default)]
    pub level: LogLevel,

    /// The log message content.
    #[serde(serialize_with = "sanitize::ser::text")]
    pub message: String,

    /// Timestamp when the log event occurred.
    pub timestamp: DateTime<Utc>,

    /// Additional key-value attributes.
    #[serde(default, serialize_with = "sanitize::ser::attributes")]
    pub attributes: HashMap<String, String>,

    /// Optional trace ID for distributed tracing correlation.
    #[serde(default, serialize_with = "sanitize::ser::id_or_empty")]
    pub trace_id: Option<String>,

    /// Optional span ID for distributed tracing correlation.
    #[serde(default, serialize_with = "sanitize::ser::id_or_empty")]
    pub span_id: Option<String>,
}

impl LogEntry {
    /// Creates a new log entry with the current timestamp.
    #[must_use]
    pub fn new(level: LogLevel, message: impl AsRef<str>) -> Self {
        Self {
            level,
            message: truncate(message.as_ref(), MAX_STRING_LENGTH),
            timestamp: Utc::now(),
            attributes: HashMap::new(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Adds an attribute to the log entry. Empty keys are ignored.
    #[must_use]
    pub fn with_attribute(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Some((k, v)) = sanitize::attribute(key.as_ref(), value.as_ref()) {
            self.attributes.insert(k, v);
        }
        self
    }

    /// Adds every attribute from `attributes`.
    #[must_use]
    pub fn with_attributes<K, V, I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.attributes.extend(sanitize::attributes(attributes));
        self
    }

    /// Sets the trace ID for distributed tracing correlation.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl AsRef<str>) -> Self {
        self.trace_id = non_empty(trace_id.as_ref());
        self
    }

    /// Sets the span ID for distributed tracing correlation.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl AsRef<str>) -> Self {
        self.span_id = non_empty(span_id.as_ref());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn non_empty(id: &str) -> Option<String> {
    let id = id.trim();
    (!id.is_empty()).then(|| truncate(id, MAX_ATTRIBUTE_KEY_LENGTH))
}
