//! Metric data model.
//!
//! Defines the `Metric` structure for a single numeric data point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sanitize::{self, finite_or_zero, truncate, MAX_ATTRIBUTE_KEY_LENGTH};

/// A metric data point representing a single measurement.
///
/// Non-finite values (`NaN`, `±Infinity`) are replaced with `0.0` and the name
/// and tags are length-capped, so a metric never fails to serialize.
///
/// # Example
///
/// ```
/// use shared::models::Metric;
///
/// let metric = Metric::new("http.request.duration_ms", 142.5)
///     .with_tag("method", "GET")
///     .with_tag("status", "200");
///
/// assert_eq!(metric.tags.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// The name of the metric (e.g., "`api.requests`").
    #[serde(rename = "metric_name", serialize_with = "sanitize::ser::name")]
    pub name: String,

    /// The metric value.
    #[serde(serialize_with = "sanitize::ser::finite")]
    pub value: f64,

    /// Timestamp when the metric was recorded.
    pub timestamp: DateTime<Utc>,

    /// Tags (dimensions) for filtering and grouping.
    #[serde(default, serialize_with = "sanitize::ser::attributes")]
    pub tags: HashMap<String, String>,
}

impl Metric {
    /// Creates a new metric with the current timestamp.
    #[must_use]
    pub fn new(name: impl AsRef<str>, value: f64) -> Self {
        Self {
            name: truncate(name.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH),
            value: finite_or_zero(value),
            timestamp: Utc::now(),
            tags: HashMap::new(),
        }
    }

    /// Creates a counter increment.
    #[must_use]
    pub fn counter(name: impl AsRef<str>, value: f64) -> Self {
        Self::new(name, value)
    }

    /// Creates a gauge reading.
    #[must_use]
    pub fn gauge(name: impl AsRef<str>, value: f64) -> Self {
        Self::new(name, value)
    }

    /// Creates a single histogram observation.
    #[must_use]
    pub fn histogram(name: impl AsRef<str>, value: f64) -> Self {
        Self::new(name, value)
    }

    /// Adds a tag. Empty keys are ignored.
    #[must_use]
    pub fn with_tag(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Some((k, v)) = sanitize::attribute(key.as_ref(), value.as_ref()) {
            self.tags.insert(k, v);
        }
        self
    }

    /// Adds every tag from `tags`, overriding existing keys.
    #[must_use]
    pub fn with_tags<K, V, I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.tags.extend(sanitize::attributes(tags));
        self
    }

    /// Sets the timestamp of the metric.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
