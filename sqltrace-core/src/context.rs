//! Trace context bridge.
//!
//! Reads whatever ambient distributed-tracing context is current on the
//! producer thread at Begin time and freezes it, so the finished record links
//! to the caller's trace even when the completion arrives on another thread.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Read-only access to the ambient trace context.
pub trait AmbientContext: Send + Sync {
    fn root_id(&self) -> Option<String>;
    fn parent_id(&self) -> Option<String>;
    fn baggage(&self) -> BTreeMap<String, String>;
}

/// Frozen copy of the ambient context taken at Begin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContextSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

impl TraceContextSnapshot {
    pub fn new(root_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            root_id: Some(root_id.into()),
            parent_id: Some(parent_id.into()),
            baggage: BTreeMap::new(),
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Snapshot the ambient context, optionally leaving baggage behind
    pub fn capture(context: &dyn AmbientContext, include_baggage: bool) -> Self {
        Self {
            root_id: context.root_id().filter(|s| !s.is_empty()),
            parent_id: context.parent_id().filter(|s| !s.is_empty()),
            baggage: if include_baggage {
                context.baggage()
            } else {
                BTreeMap::new()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root_id.is_none() && self.parent_id.is_none() && self.baggage.is_empty()
    }
}

/// Context source for hosts without distributed tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl AmbientContext for NoContext {
    fn root_id(&self) -> Option<String> {
        None
    }

    fn parent_id(&self) -> Option<String> {
        None
    }

    fn baggage(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Context source that always reports the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub TraceContextSnapshot);

impl AmbientContext for StaticContext {
    fn root_id(&self) -> Option<String> {
        self.0.root_id.clone()
    }

    fn parent_id(&self) -> Option<String> {
        self.0.parent_id.clone()
    }

    fn baggage(&self) -> BTreeMap<String, String> {
        self.0.baggage.clone()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<TraceContextSnapshot>> = const { RefCell::new(None) };
}

/// Thread-scoped ambient context.
///
/// A producer enters a context around the driver call; every Begin event
/// published on that thread while the guard is alive sees it.
///
/// ```
/// use sqltrace_core::context::{AmbientContext, ThreadContext, TraceContextSnapshot};
///
/// let _guard = ThreadContext::enter(TraceContextSnapshot::new("root", "parent"));
/// assert_eq!(ThreadContext.root_id().as_deref(), Some("root"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadContext;

impl ThreadContext {
    /// Make `snapshot` current on this thread until the guard drops
    pub fn enter(snapshot: TraceContextSnapshot) -> ContextGuard {
        let previous = CURRENT.with(|cell| cell.replace(Some(snapshot)));
        ContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    pub fn current() -> Option<TraceContextSnapshot> {
        CURRENT.with(|cell| cell.borrow().clone())
    }

    fn read<T>(f: impl FnOnce(&TraceContextSnapshot) -> T) -> Option<T> {
        CURRENT.with(|cell| cell.borrow().as_ref().map(f))
    }
}

impl AmbientContext for ThreadContext {
    fn root_id(&self) -> Option<String> {
        Self::read(|s| s.root_id.clone()).flatten()
    }

    fn parent_id(&self) -> Option<String> {
        Self::read(|s| s.parent_id.clone()).flatten()
    }

    fn baggage(&self) -> BTreeMap<String, String> {
        Self::read(|s| s.baggage.clone()).unwrap_or_default()
    }
}

/// Restores the previously current context on drop.
#[must_use = "the context is cleared as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<TraceContextSnapshot>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}
