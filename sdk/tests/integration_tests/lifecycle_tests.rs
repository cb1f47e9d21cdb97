//! Integration tests for the background worker and client lifecycle.
//!
//! Tests cover:
//! - Timed flushes
//! - Early flush when a batch fills up
//! - Shutdown delivering everything queued
//! - Queue overflow
//! - Configuration from environment-style lookups

use std::time::Duration;

use apilens::{Client, Config, ConfigError, Metric, PipelineState};
use tokio_test::assert_ok;

use crate::common::{init_tracing, MockCollector};

#[tokio::test]
async fn test_timer_flush_delivers_partial_batch() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::new(
        collector
            .config()
            .with_flush_interval(Duration::from_millis(100)),
    )?;

    client.counter("a", 1.0);
    client.counter("b", 2.0);

    assert!(
        collector
            .wait_for(Duration::from_secs(5), |r| r.iter().map(|x| x.record_count()).sum::<usize>() == 2)
            .await
    );
    assert_eq!(client.queue_len(), 0);
    client.shutdown(Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
async fn test_full_batch_is_sent_before_interval() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::new(
        collector
            .config()
            .with_batch_size(10)
            .with_flush_interval(Duration::from_secs(3600)),
    )?;

    for i in 0..25 {
        client.metric(Metric::gauge(format!("g{i}"), f64::from(i)));
    }

    assert!(collector.wait_for(Duration::from_secs(5), |r| r.len() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received = collector.received();
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|r| r.record_count() == 10));
    assert_eq!(client.queue_len(), 5);

    client.shutdown(Duration::from_secs(5)).await;
    assert_eq!(collector.record_count(), 25);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_delivers_all_queued_records() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::new(
        collector
            .config()
            .with_batch_size(200)
            .with_flush_interval(Duration::from_secs(3600)),
    )?;
    assert_eq!(client.state(), PipelineState::Running);

    for i in 0..500 {
        client.counter(format!("c{i}"), 1.0);
    }
    client.shutdown(Duration::from_secs(10)).await;

    assert_eq!(collector.record_count(), 500);
    assert_eq!(client.state(), PipelineState::Stopped);
    assert_eq!(client.stats().delivered_records, 500);

    client.counter("late", 1.0);
    assert_eq!(client.queue_len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_overflow_drops_oldest_records() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::builder(collector.config().with_max_queue_size(10))
        .start(false)
        .build()?;

    for i in 0..15 {
        client.counter(format!("m{i}"), 1.0);
    }
    assert_eq!(client.queue_len(), 10);
    assert_eq!(client.dropped_count(), 5);

    client.flush().await;

    let received = collector.received();
    let names: Vec<_> = received[0].body["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["metric_name"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<_> = (5..15).map(|i| format!("m{i}")).collect();
    assert_eq!(names, expected);
    Ok(())
}

#[tokio::test]
async fn test_dropping_last_client_stops_worker() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::new(collector.config())?;
    let clone = client.clone();

    drop(client);
    assert_eq!(clone.state(), PipelineState::Running);
    clone.counter("still-alive", 1.0);
    clone.flush().await;
    assert_eq!(collector.record_count(), 1);

    drop(clone);
    Ok(())
}

#[test]
fn test_config_from_lookup_builds_disabled_client() {
    let vars = [("APILENS_ENABLED", "false"), ("APILENS_BATCH_SIZE", "25")];
    let config = Config::from_lookup(|name| {
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| (*v).to_string())
    })
    .unwrap();

    assert_eq!(config.batch_size, 25);
    let client = Client::new(config).unwrap();
    assert!(!client.is_enabled());
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = Config::from_lookup(|name| {
        (name == "APILENS_FLUSH_INTERVAL_SECS").then(|| "soon".to_string())
    });
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

    let config = Config::new("k").with_batch_size(0);
    assert!(Client::builder(config).start(false).build().is_err());
}

#[tokio::test]
async fn test_start_is_idempotent() -> anyhow::Result<()> {
    let collector = MockCollector::start().await?;
    let client = Client::builder(collector.config()).start(false).build()?;
    assert_eq!(client.state(), PipelineState::Stopped);

    assert_ok!(client.start());
    assert_ok!(client.start());
    assert_eq!(client.state(), PipelineState::Running);

    client.shutdown(Duration::from_secs(1)).await;
    Ok(())
}
