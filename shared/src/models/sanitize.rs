//! Length caps and value sanitization applied to every record before it
//! leaves the process.

use serde::Serializer;
use std::borrow::Cow;
use std::collections::HashMap;

/// Maximum length of free-text fields such as log messages.
pub const MAX_STRING_LENGTH: usize = 4096;

/// Maximum length of names, identifiers and attribute keys.
pub const MAX_ATTRIBUTE_KEY_LENGTH: usize = 256;

/// Maximum length of attribute and tag values.
pub const MAX_ATTRIBUTE_VALUE_LENGTH: usize = 4096;

/// Maximum length of captured request/response payload snippets.
pub const MAX_PAYLOAD_LENGTH: usize = 4096;

/// Appended to any value that had to be truncated.
pub const TRUNCATION_MARKER: &str = "...";

/// Truncates `value` to at most `max_chars` characters.
///
/// When truncation happens the result ends with [`TRUNCATION_MARKER`] and is
/// exactly `max_chars` characters long. Never splits a code point.
///
/// # Example
///
/// ```
/// use shared::models::sanitize::truncate;
///
/// assert_eq!(truncate("hello world", 8), "hello...");
/// assert_eq!(truncate("short", 8), "short");
/// ```
#[must_use]
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = value.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Replaces `NaN` and infinities with `0.0`.
#[must_use]
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Sanitizes a single attribute pair.
///
/// Returns `None` for empty keys, which are dropped.
#[must_use]
pub fn attribute(key: &str, value: &str) -> Option<(String, String)> {
    if key.is_empty() {
        return None;
    }
    Some((
        truncate(key, MAX_ATTRIBUTE_KEY_LENGTH),
        truncate(value, MAX_ATTRIBUTE_VALUE_LENGTH),
    ))
}

/// Sanitizes every pair of an attribute or tag map.
#[must_use]
pub fn attributes<K, V, I>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| attribute(k.as_ref(), v.as_ref()))
        .collect()
}

fn capped(value: &str, max_chars: usize) -> Cow<'_, str> {
    if value.chars().count() <= max_chars {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(truncate(value, max_chars))
    }
}

/// `serialize_with` helpers that re-apply the caps when a record is encoded.
///
/// Record fields are public, so a value assigned after construction has not
/// been through the constructors. These keep the wire form within bounds
/// regardless.
pub mod ser {
    use super::{
        attribute, capped, finite_or_zero, HashMap, Serializer, MAX_ATTRIBUTE_KEY_LENGTH,
        MAX_STRING_LENGTH,
    };

    /// Non-finite numbers become `0.0`.
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(finite_or_zero(*value))
    }

    /// Like [`finite`], keeping `None` as `null`.
    pub fn finite_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&finite_or_zero(*value)),
            None => serializer.serialize_none(),
        }
    }

    /// Names, labels and identifiers, capped at [`MAX_ATTRIBUTE_KEY_LENGTH`].
    pub fn name<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&capped(value, MAX_ATTRIBUTE_KEY_LENGTH))
    }

    /// Free text and payloads, capped at [`MAX_STRING_LENGTH`].
    pub fn text<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&capped(value, MAX_STRING_LENGTH))
    }

    /// Optional id; `None` becomes the empty string the collector expects.
    pub fn id_or_empty<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        name(value.as_deref().unwrap_or_default(), serializer)
    }

    /// Attribute and tag maps: empty keys dropped, keys and values capped.
    pub fn attributes<S: Serializer>(
        map: &HashMap<String, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().filter_map(|(k, v)| attribute(k, v)))
    }
}
