//! Trace context propagation and the per-execution-context "current span".
//!
//! Each thread has its own stack of active span contexts, and so does every
//! future run through [`scope`] or [`scope_with`]. Lookups prefer the
//! task-local stack when one is in scope, so concurrent request handlers on
//! a multi-threaded runtime never observe each other's spans.
//!
//! # Example
//!
//! ```
//! use shared::context::{self, SpanContext};
//!
//! let root = SpanContext::new_root();
//! {
//!     let _guard = context::enter(root.clone());
//!     assert_eq!(context::current(), Some(root));
//! }
//! assert_eq!(context::current(), None);
//! ```

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Header carrying the trace id across process boundaries.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Header carrying the caller's span id.
pub const SPAN_ID_HEADER: &str = "X-Span-Id";

/// Header carrying the caller's parent span id, if any.
pub const PARENT_SPAN_ID_HEADER: &str = "X-Parent-Span-Id";

/// Identity of a span, enough to parent new spans and to correlate logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    /// Identifier shared by every span of the trace.
    pub trace_id: String,
    /// Identifier of this span.
    pub span_id: String,
    /// Identifier of the parent span, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl SpanContext {
    /// Mints a context for a new trace.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// Mints a context for a child of this span within the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    /// Returns the propagation headers for an outgoing request.
    #[must_use]
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (TRACE_ID_HEADER, self.trace_id.clone()),
            (SPAN_ID_HEADER, self.span_id.clone()),
        ];
        if let Some(parent) = &self.parent_span_id {
            headers.push((PARENT_SPAN_ID_HEADER, parent.clone()));
        }
        headers
    }

    /// Extracts a context from incoming request headers.
    ///
    /// Header names match case-insensitively. Returns `None` if either the
    /// trace id or the span id is missing or blank.
    ///
    /// ```
    /// use shared::context::SpanContext;
    ///
    /// let ctx = SpanContext::from_headers([("x-trace-id", "abc"), ("x-span-id", "def")]);
    /// assert_eq!(ctx.map(|c| c.span_id), Some("def".to_string()));
    ///
    /// assert!(SpanContext::from_headers([("x-trace-id", "abc")]).is_none());
    /// ```
    pub fn from_headers<I, K, V>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut trace_id = None;
        let mut span_id = None;
        let mut parent_span_id = None;

        for (name, value) in headers {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let name = name.as_ref();
            if name.eq_ignore_ascii_case(TRACE_ID_HEADER) {
                trace_id = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(SPAN_ID_HEADER) {
                span_id = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(PARENT_SPAN_ID_HEADER) {
                parent_span_id = Some(value.to_string());
            }
        }

        Some(Self {
            trace_id: trace_id?,
            span_id: span_id?,
            parent_span_id,
        })
    }
}

/// Generates a 32 character lowercase hex trace id.
#[must_use]
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates a 16 character lowercase hex span id.
#[must_use]
pub fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

struct StackEntry {
    id: u64,
    context: SpanContext,
}

type Stack = RefCell<Vec<StackEntry>>;

thread_local! {
    static THREAD_STACK: Stack = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_STACK: Stack;
}

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

fn with_stack<R>(mut f: impl FnMut(&Stack) -> R) -> R {
    match TASK_STACK.try_with(&mut f) {
        Ok(result) => result,
        Err(_) => THREAD_STACK.with(f),
    }
}

/// Returns the innermost active span context of the calling execution context.
#[must_use]
pub fn current() -> Option<SpanContext> {
    with_stack(|stack| stack.borrow().last().map(|entry| entry.context.clone()))
}

/// Makes `context` the current span until the returned guard is dropped.
///
/// Guards may be dropped out of order; each removes only its own entry.
#[must_use = "the context is removed when the guard is dropped"]
pub fn enter(context: SpanContext) -> ContextGuard {
    let id = NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed);
    with_stack(|stack| {
        stack.borrow_mut().push(StackEntry {
            id,
            context: context.clone(),
        });
    });
    ContextGuard {
        id,
        _not_send: PhantomData,
    }
}

/// Runs `future` with its own current-span stack, seeded with the caller's
/// current span so spawned work stays in the same trace.
pub fn scope<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let seed = current();
    run_scoped(seed, future)
}

/// Runs `future` with its own current-span stack whose current span is `context`.
pub fn scope_with<F: Future>(context: SpanContext, future: F) -> impl Future<Output = F::Output> {
    run_scoped(Some(context), future)
}

fn run_scoped<F: Future>(seed: Option<SpanContext>, future: F) -> impl Future<Output = F::Output> {
    let entries = seed
        .map(|context| StackEntry {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
            context,
        })
        .into_iter()
        .collect();
    TASK_STACK.scope(RefCell::new(entries), future)
}

/// Restores the previous current span when dropped.
///
/// Not `Send`: it belongs to the thread or task scope that created it.
#[derive(Debug)]
pub struct ContextGuard {
    id: u64,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let id = self.id;
        with_stack(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|entry| entry.id == id) {
                stack.remove(pos);
            }
        });
    }
}
