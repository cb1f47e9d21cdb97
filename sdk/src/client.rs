//! The `Client` facade used by instrumented applications.
//!
//! Capturing never blocks, never fails and never panics: records go into a
//! bounded queue and a background worker delivers them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shared::context::{self, ContextGuard, SpanContext};
use shared::models::{
    Event, LogEntry, LogLevel, Metric, Record, RequestRecord, Span, SpanStatus,
};

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{ClientError, DeliveryError};
use crate::scheduler::{Pipeline, PipelineState, PipelineStats};
use crate::transport::{ErrorCallback, HttpSender, RetryPolicy, Sender, Transport};

/// Handle to a telemetry pipeline. Cheap to clone; clones share the pipeline.
///
/// Dropping the last clone stops the background worker.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    // `None` when the SDK is disabled.
    pipeline: Option<Pipeline>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: Config,
    on_error: Option<ErrorCallback>,
    sender: Option<Arc<dyn Sender>>,
    start: bool,
}

impl ClientBuilder {
    /// Registers a callback for batches dropped after failed delivery.
    ///
    /// A panic inside the callback is caught and logged.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeliveryError, &Batch) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Replaces the HTTP sender, e.g. with a test double.
    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Whether `build` starts the background worker (default: true).
    #[must_use]
    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    /// Validates the configuration and builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the HTTP client
    /// cannot be built, or the worker must start outside a Tokio runtime.
    pub fn build(self) -> Result<Client, ClientError> {
        self.config.validate_config()?;

        if !self.config.enabled {
            tracing::info!("APILens telemetry is disabled");
            return Ok(Client {
                inner: Arc::new(Inner {
                    config: self.config,
                    pipeline: None,
                }),
            });
        }

        let sender: Arc<dyn Sender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(HttpSender::new(&self.config)?),
        };
        let transport = Transport::new(sender, RetryPolicy::from_config(&self.config))
            .with_error_callback(self.on_error);
        let pipeline = Pipeline::new(
            transport,
            self.config.batch_size,
            self.config.max_queue_size,
            self.config.flush_interval,
        );
        if self.start {
            pipeline.start()?;
        }

        Ok(Client {
            inner: Arc::new(Inner {
                config: self.config,
                pipeline: Some(pipeline),
            }),
        })
    }
}

impl Client {
    /// Builds a client and starts its worker on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::build`].
    pub fn new(config: Config) -> Result<Self, ClientError> {
        Self::builder(config).build()
    }

    /// Builds a client from `APILENS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed, or see
    /// [`ClientBuilder::build`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(Config::from_env()?)
    }

    /// Starts building a client.
    #[must_use]
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder {
            config,
            on_error: None,
            sender: None,
            start: true,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns false if the SDK is disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.pipeline.is_some()
    }

    /// Lifecycle state of the background worker.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.inner
            .pipeline
            .as_ref()
            .map_or(PipelineState::Stopped, Pipeline::state)
    }

    /// Starts the background worker if it is not running.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoRuntime`] when called outside a runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        match &self.inner.pipeline {
            Some(pipeline) => pipeline.start(),
            None => Ok(()),
        }
    }

    /// Queues any record.
    pub fn capture(&self, record: impl Into<Record>) {
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.enqueue(record.into());
        }
    }

    /// Queues several records, keeping their order.
    pub fn capture_many<I>(&self, records: I)
    where
        I: IntoIterator,
        I::Item: Into<Record>,
    {
        if let Some(pipeline) = &self.inner.pipeline {
            for record in records {
                pipeline.enqueue(record.into());
            }
        }
    }

    /// Starts a request record stamped with this client's environment.
    #[must_use]
    pub fn request(
        &self,
        method: impl AsRef<str>,
        path: impl AsRef<str>,
        status_code: u16,
        response_time_ms: f64,
    ) -> RequestRecord {
        RequestRecord::new(method, path, status_code, response_time_ms)
            .with_environment(&self.inner.config.environment)
    }

    /// Queues a request record.
    pub fn capture_request(&self, record: RequestRecord) {
        self.capture(record);
    }

    /// Queues a metric, adding the configured default tags it lacks.
    pub fn metric(&self, mut metric: Metric) {
        if !self.is_enabled() {
            return;
        }
        for (key, value) in &self.inner.config.default_tags {
            if !metric.tags.contains_key(key) {
                metric = metric.with_tag(key, value);
            }
        }
        self.capture(metric);
    }

    /// Queues a counter data point.
    pub fn counter(&self, name: impl AsRef<str>, value: f64) {
        self.metric(Metric::counter(name, value));
    }

    /// Queues a gauge data point.
    pub fn gauge(&self, name: impl AsRef<str>, value: f64) {
        self.metric(Metric::gauge(name, value));
    }

    /// Queues a histogram observation.
    pub fn histogram(&self, name: impl AsRef<str>, value: f64) {
        self.metric(Metric::histogram(name, value));
    }

    /// Queues a log entry, correlating it with the current span when it
    /// carries no trace id of its own.
    pub fn log_entry(&self, mut entry: LogEntry) {
        if !self.is_enabled() {
            return;
        }
        if entry.trace_id.is_none() {
            if let Some(current) = context::current() {
                entry = entry
                    .with_trace_id(current.trace_id)
                    .with_span_id(current.span_id);
            }
        }
        self.capture(entry);
    }

    /// Queues a log message at `level`.
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.log_entry(LogEntry::new(level, message));
    }

    /// Queues a debug log.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    /// Queues an info log.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    /// Queues a warning log.
    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    /// Queues an error log.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    /// Queues a critical log.
    pub fn critical(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Critical, message);
    }

    /// Queues a custom event.
    pub fn event(&self, event: Event) {
        self.capture(event);
    }

    /// Opens a span that becomes the current span of this thread.
    ///
    /// Its parent is the span that was current, if any. The span is
    /// finished and queued when the guard is finished or dropped.
    ///
    /// For async code use [`in_span`](Self::in_span); the guard cannot be
    /// held across `.await` on a multi-threaded runtime.
    #[must_use = "the span ends when the guard is dropped"]
    pub fn span(&self, operation_name: impl AsRef<str>) -> SpanGuard {
        let span = self.new_span(context::current().as_ref(), operation_name);
        SpanGuard::enter(self.clone(), span)
    }

    /// Same as [`span`](Self::span).
    #[must_use = "the span ends when the guard is dropped"]
    pub fn begin_span(&self, operation_name: impl AsRef<str>) -> SpanGuard {
        self.span(operation_name)
    }

    /// Opens a span under an explicit parent, e.g. one read from
    /// propagation headers.
    #[must_use = "the span ends when the guard is dropped"]
    pub fn span_with_parent(
        &self,
        operation_name: impl AsRef<str>,
        parent: &SpanContext,
    ) -> SpanGuard {
        let span = self.new_span(Some(parent), operation_name);
        SpanGuard::enter(self.clone(), span)
    }

    /// Runs `future` inside a new span.
    ///
    /// The span is current for the whole future, across `.await` points and
    /// without leaking into concurrently running tasks. If the future
    /// resolves to `Err`, the span is marked as failed.
    pub async fn in_span<F, T, E>(&self, operation_name: impl AsRef<str>, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut span = self.new_span(context::current().as_ref(), operation_name);
        let result = context::scope_with(span.context(), future).await;
        if let Err(err) = &result {
            span.set_error(err);
        }
        self.record_span(span);
        result
    }

    /// Queues a span built by hand, finishing it first if still open.
    pub fn record_span(&self, mut span: Span) {
        span.finish();
        self.capture(span);
    }

    fn new_span(&self, parent: Option<&SpanContext>, operation_name: impl AsRef<str>) -> Span {
        let service = &self.inner.config.service_name;
        match parent {
            Some(parent) => Span::child_of(parent, operation_name, service),
            None => Span::new(operation_name, service),
        }
    }

    /// Delivers everything queued before returning.
    pub async fn flush(&self) {
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.flush().await;
        }
    }

    /// Stops the worker, flushes within `timeout` and closes the transport.
    ///
    /// Later captures are ignored. Calling it again is a no-op.
    pub async fn shutdown(&self, timeout: Duration) {
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.shutdown(timeout).await;
        }
    }

    /// Records evicted because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner
            .pipeline
            .as_ref()
            .map_or(0, Pipeline::dropped_count)
    }

    /// Records waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.pipeline.as_ref().map_or(0, Pipeline::queue_len)
    }

    /// Snapshot of the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.inner
            .pipeline
            .as_ref()
            .map(Pipeline::stats)
            .unwrap_or_default()
    }
}

/// An open span that is the current span until finished or dropped.
///
/// Not `Send`: it must be finished on the thread that opened it.
pub struct SpanGuard {
    client: Client,
    span: Option<Span>,
    context: Option<ContextGuard>,
}

impl fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanGuard").field("span", &self.span).finish()
    }
}

impl SpanGuard {
    fn enter(client: Client, span: Span) -> Self {
        let context = span.enter();
        Self {
            client,
            span: Some(span),
            context: Some(context),
        }
    }

    /// The span's propagation context, e.g. for outgoing request headers.
    #[must_use]
    pub fn context(&self) -> Option<SpanContext> {
        self.span.as_ref().map(Span::context)
    }

    /// Sets an attribute on the span.
    pub fn set_attribute(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        if let Some(span) = &mut self.span {
            span.set_attribute(key, value);
        }
    }

    /// Sets the span status.
    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = &mut self.span {
            span.set_status(status);
        }
    }

    /// Marks the span as failed with `error`.
    pub fn set_error<E: fmt::Display + ?Sized>(&mut self, error: &E) {
        if let Some(span) = &mut self.span {
            span.set_error(error);
        }
    }

    /// Finishes and queues the span, restoring the previous current span.
    pub fn finish(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if let Some(span) = self.span.take() {
            self.client.record_span(span);
        }
        self.context.take();
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.end();
    }
}
