//! Integration tests for batch delivery.
//!
//! Tests cover:
//! - Wire format and request headers
//! - Retry on server errors
//! - No retry on authentication failure
//! - Unreachable collector

use std::sync::{Arc, Mutex};
use std::time::Duration;

use apilens::{Client, DeliveryError, Event, LogLevel, Metric};
use axum::http::StatusCode;
use serde_json::json;

use crate::common::{init_tracing, unused_addr, MockCollector};

#[tokio::test]
async fn test_batch_is_posted_with_headers() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::builder(collector.config()).start(false).build()?;

    client.capture_request(client.request("GET", "/users/7?expand=1", 200, 3.5));
    client.metric(Metric::counter("signups", 1.0).with_tag("plan", "pro"));
    client.log(LogLevel::Error, "payment declined");
    client.event(Event::new("user", "signed_up").with_payload(&json!({"id": 7})));
    client.span("checkout").finish();
    client.flush().await;

    let received = collector.received();
    assert_eq!(received.len(), 1);

    let request = &received[0];
    assert_eq!(request.api_key.as_deref(), Some("test-api-key"));
    assert_eq!(request.content_type.as_deref(), Some("application/json"));
    assert!(request
        .user_agent
        .as_deref()
        .is_some_and(|ua| ua.starts_with("apilens-rust-sdk/")));

    let body = &request.body;
    assert_eq!(body["requests"][0]["path"], "/users/7");
    assert_eq!(body["metrics"][0]["metric_name"], "signups");
    assert_eq!(body["metrics"][0]["tags"]["plan"], "pro");
    assert_eq!(body["logs"][0]["level"], "error");
    assert_eq!(body["events"][0]["payload"], r#"{"id":7}"#);
    assert_eq!(body["traces"][0]["operation_name"], "checkout");
    assert_eq!(body["traces"][0]["service_name"], "integration");
    assert!(body["requests"][0]["timestamp"]
        .as_str()
        .is_some_and(|ts| ts.ends_with('Z')));

    let stats = client.stats();
    assert_eq!(stats.delivered_batches, 1);
    assert_eq!(stats.delivered_records, 5);
    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_retried() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::with_statuses([
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::SERVICE_UNAVAILABLE,
    ])
    .await?;
    let client = Client::builder(collector.config()).start(false).build()?;

    client.counter("requests", 1.0);
    client.flush().await;

    let received = collector.received();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].body, received[2].body);

    let stats = client.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.delivered_batches, 1);
    assert_eq!(stats.failed_batches, 0);
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::with_statuses([StatusCode::UNAUTHORIZED]).await?;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    let client = Client::builder(collector.config())
        .on_error(move |err, batch| seen.lock().unwrap().push((err.clone(), batch.len())))
        .start(false)
        .build()?;

    client.counter("requests", 1.0);
    client.flush().await;

    assert_eq!(collector.received().len(), 1);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![(DeliveryError::Unauthorized { status: 401 }, 1)]
    );
    Ok(())
}

#[tokio::test]
async fn test_unprocessable_batch_is_dropped() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::with_statuses([StatusCode::UNPROCESSABLE_ENTITY]).await?;
    let client = Client::builder(collector.config()).start(false).build()?;

    client.info("bad");
    client.flush().await;
    client.info("good");
    client.flush().await;

    assert_eq!(collector.received().len(), 2);
    let stats = client.stats();
    assert_eq!(stats.failed_batches, 1);
    assert_eq!(stats.delivered_batches, 1);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_collector_exhausts_retries() -> anyhow::Result<()> {
    init_tracing();
    let addr = unused_addr().await?;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    let config = apilens::Config::new("k")
        .with_base_url(format!("http://{addr}"))
        .with_timeout(Duration::from_secs(1))
        .with_retries(1, Duration::from_millis(10), Duration::from_millis(10));
    let client = Client::builder(config)
        .on_error(move |err, _| seen.lock().unwrap().push(err.clone()))
        .start(false)
        .build()?;

    client.counter("lost", 1.0);
    client.flush().await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        DeliveryError::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, 2);
            assert!(matches!(
                **last,
                DeliveryError::Network(_) | DeliveryError::Timeout
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
