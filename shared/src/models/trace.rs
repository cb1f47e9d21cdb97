//! Trace span data model.
//!
//! A `Span` is the one record that is mutable after creation: attributes and
//! status may change until [`Span::finish`] is called, after which it is frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sanitize::{self, finite_or_zero, truncate, MAX_ATTRIBUTE_KEY_LENGTH};
use crate::context::{self, SpanContext};

/// Status code for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// No status recorded yet.
    #[default]
    Unset,
    /// The span completed without error.
    Ok,
    /// The span encountered an error.
    Error,
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A span representing a unit of work in a distributed trace.
///
/// # Example
///
/// ```
/// use shared::models::{Span, SpanStatus};
///
/// let mut span = Span::new("GET /api/users", "api-service");
/// span.set_attribute("http.method", "GET");
/// span.finish();
///
/// assert!(span.is_finished());
/// assert_eq!(span.status, SpanStatus::Ok);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Identifier of the trace this span belongs to.
    #[serde(serialize_with = "sanitize::ser::name")]
    pub trace_id: String,

    /// Unique identifier for this span.
    #[serde(serialize_with = "sanitize::ser::name")]
    pub span_id: String,

    /// The parent span ID (`None` for root spans).
    #[serde(default, serialize_with = "sanitize::ser::id_or_empty")]
    pub parent_span_id: Option<String>,

    /// The name of the operation.
    #[serde(serialize_with = "sanitize::ser::name")]
    pub operation_name: String,

    /// The service that generated this span.
    #[serde(serialize_with = "sanitize::ser::name")]
    pub service_name: String,

    /// Timestamp when the span started.
    #[serde(rename = "timestamp")]
    pub start_time: DateTime<Utc>,

    /// Timestamp when the span ended, `None` while open.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Duration in milliseconds, `None` while open.
    #[serde(default, serialize_with = "sanitize::ser::finite_opt")]
    pub duration_ms: Option<f64>,

    /// The status of the span.
    #[serde(default, rename = "status_code")]
    pub status: SpanStatus,

    /// Additional attributes for the span.
    #[serde(default, serialize_with = "sanitize::ser::attributes")]
    pub attributes: HashMap<String, String>,
}

impl Span {
    /// Creates a root span with fresh trace and span ids.
    #[must_use]
    pub fn new(operation_name: impl AsRef<str>, service_name: impl AsRef<str>) -> Self {
        Self::with_context(SpanContext::new_root(), operation_name, service_name)
    }

    /// Creates a child of `parent`, sharing its trace id.
    #[must_use]
    pub fn child_of(
        parent: &SpanContext,
        operation_name: impl AsRef<str>,
        service_name: impl AsRef<str>,
    ) -> Self {
        Self::with_context(parent.child(), operation_name, service_name)
    }

    /// Creates a span whose identity is taken from `ctx`.
    #[must_use]
    pub fn with_context(
        ctx: SpanContext,
        operation_name: impl AsRef<str>,
        service_name: impl AsRef<str>,
    ) -> Self {
        Self {
            trace_id: truncate(&ctx.trace_id, MAX_ATTRIBUTE_KEY_LENGTH),
            span_id: truncate(&ctx.span_id, MAX_ATTRIBUTE_KEY_LENGTH),
            parent_span_id: ctx
                .parent_span_id
                .map(|id| truncate(&id, MAX_ATTRIBUTE_KEY_LENGTH)),
            operation_name: truncate(operation_name.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH),
            service_name: truncate(service_name.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Unset,
            attributes: HashMap::new(),
        }
    }

    /// Adds an attribute. Ignored once the span is finished.
    #[must_use]
    pub fn with_attribute(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Sets an attribute. Ignored once the span is finished.
    pub fn set_attribute(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        if self.is_finished() {
            return;
        }
        if let Some((k, v)) = sanitize::attribute(key.as_ref(), value.as_ref()) {
            self.attributes.insert(k, v);
        }
    }

    /// Sets the status. Ignored once the span is finished.
    pub fn set_status(&mut self, status: SpanStatus) {
        if !self.is_finished() {
            self.status = status;
        }
    }

    /// Marks the span as failed and records the error type and message.
    pub fn set_error<E>(&mut self, error: &E)
    where
        E: std::fmt::Display + ?Sized,
    {
        if self.is_finished() {
            return;
        }
        self.status = SpanStatus::Error;
        self.set_attribute("error.type", short_type_name::<E>());
        self.set_attribute("error.message", error.to_string());
    }

    /// Finishes the span now. Does nothing if already finished.
    ///
    /// An `Unset` status becomes `Ok`.
    pub fn finish(&mut self) {
        self.finish_at(Utc::now());
    }

    /// Finishes the span at `end_time`. Does nothing if already finished.
    pub fn finish_at(&mut self, end_time: DateTime<Utc>) {
        if self.is_finished() {
            return;
        }
        let end_time = end_time.max(self.start_time);
        let micros = (end_time - self.start_time).num_microseconds().unwrap_or(0);
        // Precision loss only matters for spans lasting centuries.
        #[allow(clippy::cast_precision_loss)]
        let duration_ms = finite_or_zero(micros as f64 / 1000.0);

        self.end_time = Some(end_time);
        self.duration_ms = Some(duration_ms);
        if self.status == SpanStatus::Unset {
            self.status = SpanStatus::Ok;
        }
    }

    /// Returns true once [`finish`](Self::finish) has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Returns true if this is a root span (no parent).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Returns the propagation context identifying this span.
    #[must_use]
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
        }
    }

    /// Makes this span the current span of the calling execution context
    /// until the returned guard is dropped.
    #[must_use = "the span stops being current when the guard is dropped"]
    pub fn enter(&self) -> context::ContextGuard {
        context::enter(self.context())
    }
}

fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
