//! HTTP sender backed by `reqwest`.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;

use super::{SendError, Sender, SenderResponse};
use crate::config::Config;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Client identifier sent as the `User-Agent`.
pub const USER_AGENT: &str = concat!("apilens-rust-sdk/", env!("CARGO_PKG_VERSION"));

/// Posts batches to the collector's ingest endpoint.
#[derive(Clone)]
pub struct HttpSender {
    client: Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSender")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl HttpSender {
    /// Builds a sender for the endpoint and credentials in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: config.ingest_url(),
            api_key: config.api_key.clone(),
        })
    }

    /// The full ingest URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, body: &[u8]) -> Result<SenderResponse, SendError> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);

        Ok(SenderResponse {
            status: response.status().as_u16(),
            retry_after,
        })
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Parses a `Retry-After` value given in seconds. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
