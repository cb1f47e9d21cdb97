//! Data models for APILens telemetry.
//!
//! This module contains the record types captured by the SDK: requests,
//! metrics, logs, spans and events, plus the sanitization rules they share.

pub mod event;
pub mod log;
pub mod metric;
pub mod record;
pub mod request;
pub mod sanitize;
pub mod trace;

pub use event::Event;
pub use log::{LogEntry, LogLevel, ParseLogLevelError};
pub use metric::Metric;
pub use record::{Record, RecordKind};
pub use request::RequestRecord;
pub use trace::{Span, SpanStatus};
