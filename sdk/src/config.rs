//! SDK configuration.
//!
//! Handles loading configuration from environment variables with sensible
//! defaults, and validating it before a client is built.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;

/// Default collector base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.apilens.ai/api/v1";

/// Default ingest path, joined onto the base URL.
pub const DEFAULT_INGEST_PATH: &str = "/ingest";

/// Longest accepted flush interval or request timeout.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// SDK configuration.
///
/// Configuration values can be set via environment variables:
/// - `APILENS_API_KEY`: credential sent with every batch (required when enabled)
/// - `APILENS_BASE_URL`: collector base URL (default: `https://api.apilens.ai/api/v1`)
/// - `APILENS_INGEST_PATH`: path joined onto the base URL (default: `/ingest`)
/// - `APILENS_ENVIRONMENT`: environment label for request records (default: "production")
/// - `APILENS_SERVICE_NAME`: default service name for spans (default: "unknown")
/// - `APILENS_BATCH_SIZE`: records per batch (default: 200)
/// - `APILENS_FLUSH_INTERVAL_SECS`: seconds between timed flushes (default: 3)
/// - `APILENS_TIMEOUT_SECS`: HTTP request timeout (default: 5)
/// - `APILENS_MAX_QUEUE_SIZE`: queued records before oldest-first eviction (default: 10000)
/// - `APILENS_MAX_RETRIES`: retries after the first attempt (default: 3)
/// - `APILENS_RETRY_BACKOFF_BASE_SECS`: first retry delay (default: 0.25)
/// - `APILENS_RETRY_BACKOFF_MAX_SECS`: retry delay cap (default: 5)
/// - `APILENS_ENABLED`: set to `false` to turn the SDK into a no-op (default: true)
#[derive(Clone, Validate)]
pub struct Config {
    /// Credential sent in the `X-API-Key` header.
    pub api_key: String,

    /// Collector base URL.
    #[validate(url(message = "base_url must be an absolute URL"))]
    pub base_url: String,

    /// Ingest path joined onto `base_url`.
    pub ingest_path: String,

    /// Environment label stamped on request records.
    pub environment: String,

    /// Default service name for spans.
    pub service_name: String,

    /// Maximum number of records per batch.
    #[validate(range(min = 1, message = "batch_size must be at least 1"))]
    pub batch_size: usize,

    /// Interval between timed flushes.
    #[validate(custom(function = "bounded_duration"))]
    pub flush_interval: Duration,

    /// HTTP request timeout.
    #[validate(custom(function = "bounded_duration"))]
    pub timeout: Duration,

    /// Queue capacity; the oldest record is evicted beyond it.
    #[validate(range(min = 1, message = "max_queue_size must be at least 1"))]
    pub max_queue_size: usize,

    /// Retries after the first delivery attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles per attempt.
    pub retry_backoff_base: Duration,

    /// Upper bound on any retry delay.
    pub retry_backoff_max: Duration,

    /// When false, every SDK call is a no-op.
    pub enabled: bool,

    /// Tags merged into every metric.
    pub default_tags: HashMap<String, String>,
}

impl Config {
    /// Creates a configuration with defaults and the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Creates a new configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_key: get("APILENS_API_KEY").unwrap_or_default(),
            base_url: get("APILENS_BASE_URL").unwrap_or(defaults.base_url),
            ingest_path: get("APILENS_INGEST_PATH").unwrap_or(defaults.ingest_path),
            environment: get("APILENS_ENVIRONMENT").unwrap_or(defaults.environment),
            service_name: get("APILENS_SERVICE_NAME").unwrap_or(defaults.service_name),
            batch_size: parse_var(&get, "APILENS_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            flush_interval: secs_var(&get, "APILENS_FLUSH_INTERVAL_SECS")?
                .unwrap_or(defaults.flush_interval),
            timeout: secs_var(&get, "APILENS_TIMEOUT_SECS")?.unwrap_or(defaults.timeout),
            max_queue_size: parse_var(&get, "APILENS_MAX_QUEUE_SIZE")?
                .unwrap_or(defaults.max_queue_size),
            max_retries: parse_var(&get, "APILENS_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_backoff_base: secs_var(&get, "APILENS_RETRY_BACKOFF_BASE_SECS")?
                .unwrap_or(defaults.retry_backoff_base),
            retry_backoff_max: secs_var(&get, "APILENS_RETRY_BACKOFF_MAX_SECS")?
                .unwrap_or(defaults.retry_backoff_max),
            enabled: bool_var(&get, "APILENS_ENABLED")?.unwrap_or(defaults.enabled),
            default_tags: HashMap::new(),
        })
    }

    /// Sets the collector base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the ingest path.
    #[must_use]
    pub fn with_ingest_path(mut self, ingest_path: impl Into<String>) -> Self {
        self.ingest_path = ingest_path.into();
        self
    }

    /// Sets the environment label.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sets the default service name.
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Sets the retry count and backoff bounds.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    /// Enables or disables the SDK.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a tag merged into every metric.
    #[must_use]
    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    /// Validates the configuration.
    ///
    /// A disabled configuration only needs to be well-formed; it does not
    /// need an API key.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The SDK is enabled and the API key is empty
    /// - Any field fails validation (zero batch size, zero queue size,
    ///   zero or longer-than-a-day intervals, malformed base URL)
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.enabled && self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        self.validate()?;
        Ok(())
    }

    /// Returns the full ingest URL.
    ///
    /// # Example
    ///
    /// ```
    /// use apilens::Config;
    ///
    /// let config = Config::new("key").with_base_url("http://localhost:8000/api/v1/");
    /// assert_eq!(config.ingest_url(), "http://localhost:8000/api/v1/ingest");
    /// ```
    #[must_use]
    pub fn ingest_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.ingest_path.trim_start_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            ingest_path: DEFAULT_INGEST_PATH.to_string(),
            environment: shared::models::request::DEFAULT_ENVIRONMENT.to_string(),
            service_name: "unknown".to_string(),
            batch_size: 200,
            flush_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
            max_queue_size: 10_000,
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(250),
            retry_backoff_max: Duration::from_secs(5),
            enabled: true,
            default_tags: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Config")
            .field("api_key", &api_key)
            .field("base_url", &self.base_url)
            .field("ingest_path", &self.ingest_path)
            .field("environment", &self.environment)
            .field("service_name", &self.service_name)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("timeout", &self.timeout)
            .field("max_queue_size", &self.max_queue_size)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base", &self.retry_backoff_base)
            .field("retry_backoff_max", &self.retry_backoff_max)
            .field("enabled", &self.enabled)
            .field("default_tags", &self.default_tags)
            .finish()
    }
}

fn bounded_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    if *value > MAX_DURATION {
        return Err(ValidationError::new("duration_too_long"));
    }
    Ok(())
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { var, value })
        })
        .transpose()
}

fn secs_var<G>(get: &G, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or(ConfigError::InvalidValue { var, value })
        })
        .transpose()
}

fn bool_var<G>(get: &G, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { var, value }),
        })
        .transpose()
}
