//! The `Record` tagged union over every kind of telemetry the pipeline carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Event, LogEntry, Metric, RequestRecord, Span};

/// Kind tag of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// HTTP request telemetry.
    Request,
    /// Metric data point.
    Metric,
    /// Structured log.
    Log,
    /// Trace span.
    Span,
    /// Custom event.
    Event,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Metric => write!(f, "metric"),
            Self::Log => write!(f, "log"),
            Self::Span => write!(f, "span"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// One captured telemetry item.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// HTTP request telemetry.
    Request(RequestRecord),
    /// Metric data point.
    Metric(Metric),
    /// Structured log.
    Log(LogEntry),
    /// Trace span.
    Span(Span),
    /// Custom event.
    Event(Event),
}

impl Record {
    /// Returns the kind tag of this record.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Request(_) => RecordKind::Request,
            Self::Metric(_) => RecordKind::Metric,
            Self::Log(_) => RecordKind::Log,
            Self::Span(_) => RecordKind::Span,
            Self::Event(_) => RecordKind::Event,
        }
    }

    /// Returns the capture timestamp. For spans this is the start time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Request(r) => r.timestamp,
            Self::Metric(m) => m.timestamp,
            Self::Log(l) => l.timestamp,
            Self::Span(s) => s.start_time,
            Self::Event(e) => e.timestamp,
        }
    }
}

impl From<RequestRecord> for Record {
    fn from(value: RequestRecord) -> Self {
        Self::Request(value)
    }
}

impl From<Metric> for Record {
    fn from(value: Metric) -> Self {
        Self::Metric(value)
    }
}

impl From<LogEntry> for Record {
    fn from(value: LogEntry) -> Self {
        Self::Log(value)
    }
}

impl From<Span> for Record {
    fn from(value: Span) -> Self {
        Self::Span(value)
    }
}

impl From<Event> for Record {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}
