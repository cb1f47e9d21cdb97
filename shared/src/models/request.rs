//! HTTP request data model.
//!
//! Defines `RequestRecord`, the telemetry captured for one completed request
//! handled by the instrumented application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sanitize::{
    self, finite_or_zero, truncate, MAX_ATTRIBUTE_KEY_LENGTH, MAX_PAYLOAD_LENGTH,
};

/// Default environment label when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Telemetry for a single completed HTTP request.
///
/// Constructed through [`RequestRecord::new`] and the `with_*` builders, all of
/// which sanitize their input, so a record is always safe to ship.
///
/// # Example
///
/// ```
/// use shared::models::RequestRecord;
///
/// let record = RequestRecord::new("get", "users/42?expand=true", 200, 12.5)
///     .with_sizes(128, 2048)
///     .with_client("10.0.0.1", "curl/8.4.0");
///
/// assert_eq!(record.method, "GET");
/// assert_eq!(record.path, "/users/42");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// When the request completed.
    pub timestamp: DateTime<Utc>,

    /// Deployment environment label (e.g. "production", "staging").
    #[serde(serialize_with = "sanitize::ser::name")]
    pub environment: String,

    /// Uppercased HTTP method.
    #[serde(serialize_with = "sanitize::ser::name")]
    pub method: String,

    /// Normalized path: leading slash, no query string.
    #[serde(serialize_with = "sanitize::ser::text")]
    pub path: String,

    /// Response status code.
    pub status_code: u16,

    /// Elapsed handling time in milliseconds.
    #[serde(serialize_with = "sanitize::ser::finite")]
    pub response_time_ms: f64,

    /// Request body size in bytes.
    #[serde(default)]
    pub request_size: u64,

    /// Response body size in bytes.
    #[serde(default)]
    pub response_size: u64,

    /// Client IP address.
    #[serde(default, serialize_with = "sanitize::ser::name")]
    pub ip_address: String,

    /// Client user agent.
    #[serde(default, serialize_with = "sanitize::ser::text")]
    pub user_agent: String,

    /// Truncated request body snippet.
    #[serde(default, serialize_with = "sanitize::ser::text")]
    pub request_payload: String,

    /// Truncated response body snippet.
    #[serde(default, serialize_with = "sanitize::ser::text")]
    pub response_payload: String,
}

impl RequestRecord {
    /// Creates a record stamped with the current time.
    ///
    /// The method is uppercased, the path normalized, and a negative or
    /// non-finite elapsed time becomes `0`.
    #[must_use]
    pub fn new(
        method: impl AsRef<str>,
        path: impl AsRef<str>,
        status_code: u16,
        response_time_ms: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            method: normalize_method(method.as_ref()),
            path: normalize_path(path.as_ref()),
            status_code,
            response_time_ms: finite_or_zero(response_time_ms).max(0.0),
            request_size: 0,
            response_size: 0,
            ip_address: String::new(),
            user_agent: String::new(),
            request_payload: String::new(),
            response_payload: String::new(),
        }
    }

    /// Sets the environment label.
    #[must_use]
    pub fn with_environment(mut self, environment: impl AsRef<str>) -> Self {
        self.environment = truncate(environment.as_ref(), MAX_ATTRIBUTE_KEY_LENGTH);
        self
    }

    /// Sets request and response body sizes.
    #[must_use]
    pub fn with_sizes(mut self, request_size: u64, response_size: u64) -> Self {
        self.request_size = request_size;
        self.response_size = response_size;
        self
    }

    /// Sets the client IP address and user agent.
    #[must_use]
    pub fn with_client(mut self, ip_address: impl AsRef<str>, user_agent: impl AsRef<str>) -> Self {
        self.ip_address = truncate(ip_address.as_ref().trim(), MAX_ATTRIBUTE_KEY_LENGTH);
        self.user_agent = truncate(user_agent.as_ref().trim(), MAX_PAYLOAD_LENGTH);
        self
    }

    /// Sets the request body snippet, capped at [`MAX_PAYLOAD_LENGTH`].
    #[must_use]
    pub fn with_request_payload(mut self, payload: impl AsRef<str>) -> Self {
        self.request_payload = truncate(payload.as_ref(), MAX_PAYLOAD_LENGTH);
        self
    }

    /// Sets the response body snippet, capped at [`MAX_PAYLOAD_LENGTH`].
    #[must_use]
    pub fn with_response_payload(mut self, payload: impl AsRef<str>) -> Self {
        self.response_payload = truncate(payload.as_ref(), MAX_PAYLOAD_LENGTH);
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true for 5xx responses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

/// Uppercases a method, defaulting to `GET` when empty.
#[must_use]
pub fn normalize_method(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() {
        "GET".to_string()
    } else {
        truncate(&method.to_ascii_uppercase(), 16)
    }
}

/// Normalizes a request path.
///
/// Absolute URLs are reduced to their path, the query string and fragment
/// are stripped, and the result always starts with `/`.
///
/// ```
/// use shared::models::request::normalize_path;
///
/// assert_eq!(normalize_path("https://example.com/a/b?c=1"), "/a/b");
/// assert_eq!(normalize_path("items"), "/items");
/// assert_eq!(normalize_path(""), "/");
/// ```
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim();
    if path.is_empty() {
        return "/".to_string();
    }

    if let Some(rest) = path
        .strip_prefix("http://")
        .or_else(|| path.strip_prefix("https://"))
    {
        path = rest.find('/').map_or("/", |idx| &rest[idx..]);
    }

    if let Some(idx) = path.find(['?', '#']) {
        path = &path[..idx];
    }

    let path = truncate(path, MAX_PAYLOAD_LENGTH);
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}
