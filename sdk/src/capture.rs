//! Helpers for framework adapters.
//!
//! An adapter records exactly one [`RequestRecord`] per completed request.
//! [`Client::begin_request`] returns a [`RequestGuard`] that does this even
//! when the handler panics or returns early: a guard dropped without being
//! completed records the request as a 500.

use std::time::Instant;

use shared::context::SpanContext;
use shared::models::RequestRecord;

use crate::client::Client;

pub use shared::models::request::normalize_path;

/// Returns the originating client address.
///
/// Prefers the first entry of `X-Forwarded-For`, then `X-Real-IP`, then
/// `fallback` (usually the socket peer address).
///
/// ```
/// use apilens::capture::client_ip;
///
/// let headers = [("x-forwarded-for", "203.0.113.7, 10.0.0.1")];
/// assert_eq!(client_ip(headers, "127.0.0.1"), "203.0.113.7");
/// assert_eq!(client_ip(Vec::<(&str, &str)>::new(), "127.0.0.1"), "127.0.0.1");
/// ```
pub fn client_ip<I, K, V>(headers: I, fallback: &str) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut real_ip = None;
    for (name, value) in headers {
        let name = name.as_ref();
        let value = value.as_ref();
        if name.eq_ignore_ascii_case("x-forwarded-for") {
            if let Some(first) = value.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_string();
            }
        } else if name.eq_ignore_ascii_case("x-real-ip") && !value.trim().is_empty() {
            real_ip = Some(value.trim().to_string());
        }
    }
    real_ip.unwrap_or_else(|| fallback.to_string())
}

/// Returns the `User-Agent` header, or an empty string.
pub fn user_agent<I, K, V>(headers: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    find_header(headers, "user-agent").unwrap_or_default()
}

/// Returns the `Content-Length` header, or 0 when absent or unparseable.
pub fn content_length<I, K, V>(headers: I) -> u64
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    find_header(headers, "content-length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn find_header<I, K, V>(headers: I, wanted: &str) -> Option<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.as_ref().eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value.as_ref().to_string())
}

/// The request half of a capture, taken when the request arrives.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    /// HTTP method.
    pub method: String,
    /// Normalized path.
    pub path: String,
    /// Client address.
    pub ip_address: String,
    /// Client user agent.
    pub user_agent: String,
    /// Request body size in bytes.
    pub request_size: u64,
    /// Trace context propagated by the caller, if any.
    pub parent: Option<SpanContext>,
    started: Instant,
}

impl CaptureContext {
    /// Reads what the record needs from the incoming request.
    ///
    /// `peer_addr` is used when no forwarding header names the client.
    #[must_use]
    pub fn from_request<K, V>(
        method: impl AsRef<str>,
        path: impl AsRef<str>,
        headers: &[(K, V)],
        peer_addr: &str,
    ) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let pairs = || headers.iter().map(|(k, v)| (k.as_ref(), v.as_ref()));
        Self {
            method: method.as_ref().to_string(),
            path: normalize_path(path.as_ref()),
            ip_address: client_ip(pairs(), peer_addr),
            user_agent: user_agent(pairs()),
            request_size: content_length(pairs()),
            parent: SpanContext::from_headers(pairs()),
            started: Instant::now(),
        }
    }

    /// Milliseconds since the request arrived.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Builds the finished record.
    #[must_use]
    pub fn into_record(self, client: &Client, status_code: u16, response_size: u64) -> RequestRecord {
        client
            .request(&self.method, &self.path, status_code, self.elapsed_ms())
            .with_sizes(self.request_size, response_size)
            .with_client(&self.ip_address, &self.user_agent)
    }
}

/// Guarantees one request record per request.
#[derive(Debug)]
pub struct RequestGuard {
    client: Client,
    context: Option<CaptureContext>,
    request_payload: Option<String>,
    response_payload: Option<String>,
}

impl RequestGuard {
    /// The captured request half.
    #[must_use]
    pub fn context(&self) -> Option<&CaptureContext> {
        self.context.as_ref()
    }

    /// Attaches a request body snippet. It is truncated on capture.
    pub fn set_request_payload(&mut self, payload: impl Into<String>) {
        self.request_payload = Some(payload.into());
    }

    /// Attaches a response body snippet. It is truncated on capture.
    pub fn set_response_payload(&mut self, payload: impl Into<String>) {
        self.response_payload = Some(payload.into());
    }

    /// Records the request with the final status and response size.
    pub fn complete(mut self, status_code: u16, response_size: u64) {
        self.capture(status_code, response_size);
    }

    fn capture(&mut self, status_code: u16, response_size: u64) {
        let Some(context) = self.context.take() else {
            return;
        };
        let mut record = context.into_record(&self.client, status_code, response_size);
        if let Some(payload) = self.request_payload.take() {
            record = record.with_request_payload(payload);
        }
        if let Some(payload) = self.response_payload.take() {
            record = record.with_response_payload(payload);
        }
        self.client.capture_request(record);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.capture(500, 0);
    }
}

impl Client {
    /// Starts capturing a request. Complete the returned guard with the
    /// response status; dropping it uncompleted records a 500.
    #[must_use = "the request is recorded as a 500 when the guard is dropped"]
    pub fn begin_request<K, V>(
        &self,
        method: impl AsRef<str>,
        path: impl AsRef<str>,
        headers: &[(K, V)],
        peer_addr: &str,
    ) -> RequestGuard
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        RequestGuard {
            client: self.clone(),
            context: Some(CaptureContext::from_request(method, path, headers, peer_addr)),
            request_payload: None,
            response_payload: None,
        }
    }
}
