//! Diagnostic event source abstraction and an in-process bus.
//!
//! The engine depends only on [`DiagnosticSource`]: subscribe a handler to a
//! channel name and get back a handle that unsubscribes. [`DiagnosticBus`] is
//! the in-process implementation used by hosts without a platform bus, by the
//! replay CLI, and by tests.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::error::SubscribeError;
use crate::payload::Payload;

/// Callback invoked for every event published on a subscribed channel.
///
/// Runs on the producer's thread; implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, name: &str, payload: &Payload);
}

/// Handle to an active subscription.
pub trait Subscription: Send + Sync {
    /// Stop delivery. Idempotent.
    fn unsubscribe(&self);
}

/// Publish/subscribe capability the engine consumes.
pub trait DiagnosticSource {
    fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Box<dyn Subscription>, SubscribeError>;
}

type HandlerList = Vec<(u64, Arc<dyn EventHandler>)>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    closed: AtomicBool,
    channels: RwLock<HashMap<String, HandlerList>>,
}

impl BusInner {
    fn remove(&self, channel: &str, id: u64) {
        let mut channels = self.channels.write();
        if let Some(handlers) = channels.get_mut(channel) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

/// In-process broadcast bus keyed by channel name.
#[derive(Clone, Default)]
pub struct DiagnosticBus {
    inner: Arc<BusInner>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every subscriber of `channel`.
    ///
    /// Handlers run on the calling thread, outside the bus lock. Returns the
    /// number of handlers invoked.
    pub fn publish(&self, channel: &str, name: &str, payload: &Payload) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let channels = self.inner.channels.read();
            match channels.get(channel) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        trace!(channel, event = name, subscribers = handlers.len(), "publishing event");
        for handler in &handlers {
            handler.on_event(name, payload);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Refuse new subscriptions. Existing ones keep receiving events.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

impl DiagnosticSource for DiagnosticBus {
    fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Box<dyn Subscription>, SubscribeError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SubscribeError::SourceClosed {
                channel: channel.to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));

        Ok(Box::new(BusSubscription {
            bus: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            id,
            active: AtomicBool::new(true),
        }))
    }
}

struct BusSubscription {
    bus: Weak<BusInner>,
    channel: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription for BusSubscription {
    fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.channel, self.id);
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
