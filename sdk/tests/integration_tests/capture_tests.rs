//! Integration tests for adapter-side capture.
//!
//! Tests cover:
//! - Request guards completed and abandoned
//! - Trace propagation from incoming headers
//! - Log correlation across async tasks

use std::time::Duration;

use apilens::{trace_context, Client, SpanContext};

use crate::common::{init_tracing, MockCollector};

#[tokio::test]
async fn test_request_guard_records_each_request_once() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::builder(collector.config().with_environment("staging"))
        .start(false)
        .build()?;

    let headers = [
        ("X-Forwarded-For", "198.51.100.4, 10.0.0.2"),
        ("User-Agent", "integration-test"),
        ("Content-Length", "17"),
    ];

    let mut ok = client.begin_request("post", "/api/orders?draft=true", &headers, "10.0.0.2");
    ok.set_response_payload("x".repeat(10_000));
    ok.complete(201, 512);

    {
        let _abandoned = client.begin_request("get", "/api/fail", &headers, "10.0.0.2");
    }
    client.flush().await;

    let received = collector.received();
    let requests = received[0].body["requests"].as_array().unwrap().clone();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0]["method"], "POST");
    assert_eq!(requests[0]["path"], "/api/orders");
    assert_eq!(requests[0]["status_code"], 201);
    assert_eq!(requests[0]["environment"], "staging");
    assert_eq!(requests[0]["ip_address"], "198.51.100.4");
    assert_eq!(requests[0]["user_agent"], "integration-test");
    assert_eq!(requests[0]["request_size"], 17);
    let payload = requests[0]["response_payload"].as_str().unwrap();
    assert_eq!(payload.chars().count(), 4096);
    assert!(payload.ends_with("..."));

    assert_eq!(requests[1]["path"], "/api/fail");
    assert_eq!(requests[1]["status_code"], 500);
    Ok(())
}

#[tokio::test]
async fn test_incoming_trace_is_continued() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::builder(collector.config()).start(false).build()?;

    let upstream = SpanContext::new_root();
    let headers: Vec<(String, String)> = upstream
        .to_headers()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    let guard = client.begin_request("GET", "/downstream", &headers, "127.0.0.1");
    let parent = guard.context().and_then(|c| c.parent.clone()).unwrap();
    {
        let span = client.span_with_parent("handle", &parent);
        client.info("handling");
        let outgoing = span.context().unwrap().to_headers();
        assert_eq!(outgoing[0], ("X-Trace-Id", upstream.trace_id.clone()));
    }
    guard.complete(200, 0);
    client.flush().await;

    let body = &collector.received()[0].body;
    assert_eq!(body["traces"][0]["trace_id"], upstream.trace_id.as_str());
    assert_eq!(body["traces"][0]["parent_span_id"], upstream.span_id.as_str());
    assert_eq!(body["logs"][0]["trace_id"], upstream.trace_id.as_str());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_handlers_keep_their_own_spans() -> anyhow::Result<()> {
    init_tracing();
    let collector = MockCollector::start().await?;
    let client = Client::new(collector.config().with_flush_interval(Duration::from_secs(3600)))?;

    let mut handles = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .in_span(format!("handler-{i}"), async {
                    tokio::task::yield_now().await;
                    client.info(format!("log-{i}"));
                    let ctx = trace_context::current();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, String>(ctx)
                })
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await?.map_err(anyhow::Error::msg)?.is_some());
    }
    client.shutdown(Duration::from_secs(5)).await;

    let received = collector.received();
    let mut span_ids = std::collections::HashMap::new();
    for body in received.iter().map(|r| &r.body) {
        for span in body["traces"].as_array().into_iter().flatten() {
            let name = span["operation_name"].as_str().unwrap().to_string();
            span_ids.insert(name, span["span_id"].as_str().unwrap().to_string());
        }
    }
    for body in received.iter().map(|r| &r.body) {
        for log in body["logs"].as_array().into_iter().flatten() {
            let message = log["message"].as_str().unwrap();
            let handler = message.replace("log-", "handler-");
            assert_eq!(log["span_id"].as_str(), span_ids.get(&handler).map(String::as_str));
        }
    }
    assert_eq!(span_ids.len(), 10);
    Ok(())
}
