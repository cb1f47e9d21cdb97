//! Common test utilities and helpers for integration tests.
//!
//! Provides a mock collector served by axum on an ephemeral port, so the
//! SDK's real HTTP transport can be exercised end to end.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apilens::Config;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Ingest path the mock collector serves.
pub const INGEST_PATH: &str = "/api/v1/ingest";

/// One request received by the collector.
#[derive(Debug, Clone)]
pub struct Received {
    /// Value of the `X-API-Key` header.
    pub api_key: Option<String>,
    /// Value of the `User-Agent` header.
    pub user_agent: Option<String>,
    /// Value of the `Content-Type` header.
    pub content_type: Option<String>,
    /// Parsed JSON body.
    pub body: Value,
}

impl Received {
    /// Number of records across every kind in the body.
    pub fn record_count(&self) -> usize {
        self.body
            .as_object()
            .map(|kinds| {
                kinds
                    .values()
                    .map(|list| list.as_array().map_or(0, Vec::len))
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[derive(Clone, Default)]
struct CollectorState {
    received: Arc<Mutex<Vec<Received>>>,
    script: Arc<Mutex<VecDeque<StatusCode>>>,
}

/// A collector that records every batch and answers with scripted statuses,
/// then 202 once the script runs out.
pub struct MockCollector {
    addr: SocketAddr,
    state: CollectorState,
    server: JoinHandle<()>,
}

impl MockCollector {
    /// Starts a collector that accepts everything.
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_statuses(std::iter::empty()).await
    }

    /// Starts a collector that answers with `statuses` first.
    pub async fn with_statuses(
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> anyhow::Result<Self> {
        let state = CollectorState::default();
        state.script.lock().unwrap().extend(statuses);

        let app = Router::new()
            .route(INGEST_PATH, post(ingest))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    /// Base URL to configure the SDK with.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// SDK configuration pointing at this collector with fast retries.
    pub fn config(&self) -> Config {
        Config::new("test-api-key")
            .with_base_url(self.base_url())
            .with_service_name("integration")
            .with_retries(3, Duration::from_millis(10), Duration::from_millis(50))
    }

    /// Every request received so far.
    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    /// Total records received so far, retries included.
    pub fn record_count(&self) -> usize {
        self.received().iter().map(Received::record_count).sum()
    }

    /// Polls until `predicate` holds or `timeout` elapses.
    pub async fn wait_for(&self, timeout: Duration, predicate: impl Fn(&[Received]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.received()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn ingest(State(state): State<CollectorState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.received.lock().unwrap().push(Received {
        api_key: header_value("x-api-key"),
        user_agent: header_value(header::USER_AGENT.as_str()),
        content_type: header_value(header::CONTENT_TYPE.as_str()),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::ACCEPTED)
}

/// Returns an address nothing is listening on.
pub async fn unused_addr() -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}

/// Installs a test-writer tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("apilens=debug")),
        )
        .with_test_writer()
        .try_init();
}
