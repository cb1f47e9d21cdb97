//! APILens SDK
//!
//! Captures HTTP request telemetry, metrics, logs, spans and events from an
//! instrumented application and delivers them to the APILens collector in
//! the background.
//!
//! # Modules
//!
//! - [`config`] - Configuration from code or `APILENS_*` environment variables
//! - [`client`] - The [`Client`] facade and span guards
//! - [`global`](mod@global) - Optional process-wide client set up by [`init`]
//! - [`capture`] - Request capture helpers for framework adapters
//! - [`queue`] - Bounded queue evicting the oldest record when full
//! - [`batch`] - Grouping records into delivery batches
//! - [`transport`] - HTTP delivery with bounded retries
//! - [`scheduler`] - Background worker and lifecycle
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use apilens::{Client, Config};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), apilens::ClientError> {
//! let client = Client::new(Config::new("my-api-key").with_service_name("checkout"))?;
//!
//! client.capture_request(client.request("GET", "/users/42", 200, 12.3));
//! client.counter("orders.created", 1.0);
//!
//! client
//!     .in_span("charge-card", async {
//!         client.info("charging card");
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .await
//!     .ok();
//!
//! client.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod batch;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod global;
pub mod queue;
pub mod scheduler;
pub mod transport;

pub use batch::Batch;
pub use capture::RequestGuard;
pub use client::{Client, ClientBuilder, SpanGuard};
pub use config::Config;
pub use error::{ClientError, ConfigError, DeliveryError};
pub use global::{global, init};
pub use scheduler::{PipelineState, PipelineStats};

pub use shared::context::{self as trace_context, SpanContext};
pub use shared::models::{
    Event, LogEntry, LogLevel, Metric, Record, RecordKind, RequestRecord, Span, SpanStatus,
};
