//! Batch delivery with bounded retries.
//!
//! A [`Sender`] performs one POST; the [`Transport`] wraps it with response
//! classification, exponential backoff, delivery counters and failure
//! reporting.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::batch::Batch;
use crate::config::Config;
use crate::error::DeliveryError;

pub use http::HttpSender;

/// Status and headers of interest from one collector response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header, if present.
    pub retry_after: Option<Duration>,
}

impl SenderResponse {
    /// A response with the given status and no retry hint.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
        }
    }
}

/// Why a single send produced no response.
#[derive(Debug, Error)]
pub enum SendError {
    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

/// One POST of an encoded batch to the collector.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sends `body` and returns the collector's response.
    async fn send(&self, body: &[u8]) -> Result<SenderResponse, SendError>;
}

/// Result of classifying one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The collector accepted the batch.
    Delivered,
    /// The attempt failed but may succeed later, optionally after the
    /// collector's requested delay.
    Retry(DeliveryError, Option<Duration>),
    /// The attempt failed and retrying cannot help.
    Fatal(DeliveryError),
}

/// Maps a send result onto an [`Outcome`].
#[must_use]
pub fn classify(result: Result<SenderResponse, SendError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(SendError::Timeout) => return Outcome::Retry(DeliveryError::Timeout, None),
        Err(err) => return Outcome::Retry(DeliveryError::Network(err.to_string()), None),
    };

    match response.status {
        200..=299 => Outcome::Delivered,
        401 | 403 => Outcome::Fatal(DeliveryError::Unauthorized {
            status: response.status,
        }),
        429 => Outcome::Retry(
            DeliveryError::RateLimited {
                retry_after: response.retry_after,
            },
            response.retry_after,
        ),
        status @ 500..=599 => Outcome::Retry(DeliveryError::Server { status }, None),
        status => Outcome::Fatal(DeliveryError::Rejected { status }),
    }
}

/// Retry count and exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Upper bound on any delay.
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Takes the retry settings from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.retry_backoff_base,
            backoff_max: config.retry_backoff_max,
        }
    }

    /// Total attempts, first one included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `retry` (0-based): `min(base * 2^retry, max)`.
    ///
    /// ```
    /// use apilens::transport::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_retries: 3,
    ///     backoff_base: Duration::from_millis(250),
    ///     backoff_max: Duration::from_secs(5),
    /// };
    /// assert_eq!(policy.backoff(2), Duration::from_secs(1));
    /// assert_eq!(policy.backoff(10), Duration::from_secs(5));
    /// ```
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(multiplier)
            .min(self.backoff_max)
    }

    /// Delay before retry `retry`, preferring the collector's hint when given.
    #[must_use]
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.backoff_max),
            None => self.backoff(retry),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Callback invoked with every batch the transport gives up on.
pub type ErrorCallback = Arc<dyn Fn(&DeliveryError, &Batch) + Send + Sync>;

/// Monotonic delivery counters shared with the pipeline.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    delivered_records: AtomicU64,
    delivered_batches: AtomicU64,
    failed_batches: AtomicU64,
    retries: AtomicU64,
}

impl DeliveryCounters {
    /// Records delivered successfully.
    #[must_use]
    pub fn delivered_records(&self) -> u64 {
        self.delivered_records.load(Ordering::Relaxed)
    }

    /// Batches delivered successfully.
    #[must_use]
    pub fn delivered_batches(&self) -> u64 {
        self.delivered_batches.load(Ordering::Relaxed)
    }

    /// Batches dropped after a fatal error or exhausted retries.
    #[must_use]
    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    /// Retry attempts made.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Delivers batches through a [`Sender`], retrying transient failures.
pub struct Transport {
    sender: Arc<dyn Sender>,
    closed: AtomicBool,
    policy: RetryPolicy,
    on_error: Option<ErrorCallback>,
    counters: Arc<DeliveryCounters>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.is_closed())
            .field("policy", &self.policy)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport over `sender`.
    #[must_use]
    pub fn new(sender: Arc<dyn Sender>, policy: RetryPolicy) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
            policy,
            on_error: None,
            counters: Arc::new(DeliveryCounters::default()),
        }
    }

    /// Registers the callback for dropped batches.
    #[must_use]
    pub fn with_error_callback(mut self, callback: Option<ErrorCallback>) -> Self {
        self.on_error = callback;
        self
    }

    /// Returns the shared delivery counters.
    #[must_use]
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        Arc::clone(&self.counters)
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the transport without waiting for in-flight deliveries.
    ///
    /// Later deliveries fail with [`DeliveryError::Closed`]. A delivery that
    /// is already running makes no further attempts once its current send
    /// returns.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Delivers `batch`, retrying transient failures.
    ///
    /// On failure the batch is dropped: the error callback is invoked (or a
    /// warning logged) and the error is returned for the caller's
    /// information only.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, [`DeliveryError::RetriesExhausted`], or
    /// [`DeliveryError::Closed`].
    pub async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.try_deliver(&batch).await {
            Ok(attempts) => {
                self.counters
                    .delivered_records
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.counters
                    .delivered_batches
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(records = batch.len(), attempts, "Delivered batch");
                Ok(())
            }
            Err(err) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.report(&err, &batch);
                Err(err)
            }
        }
    }

    async fn try_deliver(&self, batch: &Batch) -> Result<u32, DeliveryError> {
        let body = batch
            .to_payload()
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        loop {
            if self.is_closed() {
                return Err(DeliveryError::Closed);
            }
            attempt += 1;
            match classify(self.sender.send(&body).await) {
                Outcome::Delivered => return Ok(attempt),
                Outcome::Fatal(err) => return Err(err),
                Outcome::Retry(err, hint) => {
                    if attempt >= max_attempts {
                        return Err(DeliveryError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.policy.delay(attempt - 1, hint);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Batch delivery failed, retrying"
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn report(&self, err: &DeliveryError, batch: &Batch) {
        if err.is_auth() {
            tracing::error!(error = %err, "Collector rejected the API key, check APILENS_API_KEY");
        }

        match &self.on_error {
            Some(callback) => {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(err, batch)));
                if result.is_err() {
                    tracing::error!("Delivery error callback panicked");
                }
            }
            None => {
                tracing::warn!(records = batch.len(), error = %err, "Dropped batch");
            }
        }
    }
}
