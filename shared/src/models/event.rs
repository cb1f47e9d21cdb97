//! Custom application event data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sanitize::{self, truncate, MAX_ATTRIBUTE_KEY_LENGTH};

/// A custom application event such as a signup or a deploy.
///
/// The payload is stored pre-serialized as a JSON string. Anything that fails
/// to serialize is replaced with an empty object.
///
/// # Example
///
/// ```
/// use shared::models::Event;
/// use serde_json::json;
///
/// let event = Event::new("user", "signup")
///     .with_payload(&json!({"plan": "pro"}))
///     .with_attribute("source", "google");
///
/// assert_eq!(event.payload, r#"{"plan":"pro"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Category of the event (e.g. "user", "payment").
    #[serde(serialize_with = "sanitize::ser::name")]
    pub event_type: String,

    /// Specific event name (e.g. "signup", "checkout").
    #[serde(serialize_with = "sanitize::ser::name")]
    pub event_name: String,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Event data as a JSON document.
    pub payload: String,

    /// Additional metadata for filtering.
    #[serde(default, serialize_with = "sanitize::ser::attributes")]
    pub attributes: HashMap<String, String>,
}

const EMPTY_PAYLOAD: &str = "{}";

impl Event {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl AsRef<str>, event_name: impl AsRef<str>) -> Self {
        Self {
            event_type: truncate(event_type.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH),
            event_name: truncate(event_name.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH),
            timestamp: Utc::now(),
            payload: EMPTY_PAYLOAD.to_string(),
            attributes: HashMap::new(),
        }
    }

    /// Sets the payload, falling back to `{}` if it cannot be serialized.
    #[must_use]
    pub fn with_payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        self.payload = match serde_json::to_string(payload) {
            Ok(json) if json != "null" => json,
            Ok(_) => EMPTY_PAYLOAD.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, event = %self.event_name, "Event payload not serializable");
                EMPTY_PAYLOAD.to_string()
            }
        };
        self
    }

    /// Adds an attribute. Empty keys are ignored.
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
}
