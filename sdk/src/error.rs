//! Error types for the APILens SDK.
//!
//! Only construction and lifecycle calls return errors. Capturing telemetry
//! never does; delivery failures are reported through the error callback or
//! the log.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Telemetry is enabled but no API key was provided.
    #[error("API key is required. Set `api_key` or the APILENS_API_KEY environment variable")]
    MissingApiKey,

    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Name of the offending variable.
        var: &'static str,
        /// The raw value.
        value: String,
    },

    /// Validation failed with details.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Errors raised while constructing or starting a [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start` was called outside of a Tokio runtime.
    #[error("No Tokio runtime is available to run the background worker")]
    NoRuntime,

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// [`init`](crate::init) was called after the global client was set.
    #[error("The global APILens client is already initialized")]
    AlreadyInitialized,
}

/// Why a batch could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The collector rejected the API key (401/403).
    #[error("Invalid or missing API key (status {status})")]
    Unauthorized {
        /// The HTTP status returned.
        status: u16,
    },

    /// The collector asked us to slow down (429).
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Value of the `Retry-After` header, if present.
        retry_after: Option<Duration>,
    },

    /// The collector refused the payload (4xx other than 401/403/429).
    #[error("Collector rejected batch with status {status}")]
    Rejected {
        /// The HTTP status returned.
        status: u16,
    },

    /// The collector failed (5xx).
    #[error("Collector returned server error {status}")]
    Server {
        /// The HTTP status returned.
        status: u16,
    },

    /// The request timed out.
    #[error("Request to collector timed out")]
    Timeout,

    /// A connection or protocol error occurred.
    #[error("Network error: {0}")]
    Network(String),

    /// The batch could not be encoded.
    #[error("Failed to serialize batch: {0}")]
    Serialization(String),

    /// The transport was closed by `shutdown`.
    #[error("Transport is closed")]
    Closed,

    /// Every retry attempt failed.
    #[error("Failed to deliver batch after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout | Self::Network(_)
        )
    }

    /// Returns true if the collector rejected the credential.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_auth(),
            _ => false,
        }
    }

    /// Returns the HTTP status behind this error, if there was a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status } | Self::Rejected { status } | Self::Server { status } => {
                Some(*status)
            }
            Self::RateLimited { .. } => Some(429),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Timeout | Self::Network(_) | Self::Serialization(_) | Self::Closed => None,
        }
    }
}
