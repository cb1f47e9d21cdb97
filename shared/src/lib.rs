//! APILens Shared Library
//!
//! This crate contains the telemetry record model and trace-context
//! propagation used by the APILens SDK.
//!
//! # Modules
//!
//! - [`models`] - Requests, metrics, logs, spans and events, with sanitization
//! - [`context`] - Trace/span ids, header propagation and the current span
//!
//! # Example
//!
//! ```
//! use shared::models::{LogEntry, LogLevel, Span};
//!
//! let span = Span::new("GET /users", "api");
//! let _guard = span.enter();
//!
//! let log = LogEntry::new(LogLevel::Info, "User logged in")
//!     .with_attribute("user_id", "12345")
//!     .with_trace_id(&span.trace_id);
//!
//! assert_eq!(log.trace_id.as_deref(), Some(span.trace_id.as_str()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod models;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
