//! Fan-out of unsolicited gateway events to subscribers.
//!
//! Handlers subscribe either to one event name or to every event. A dispatch
//! snapshots the handler list first, so handlers may subscribe or
//! unsubscribe (themselves included) without disturbing delivery in
//! progress. Each handler runs under `catch_unwind`; a panicking handler is
//! logged and the rest still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gatelink_core::EventFrame;
use parking_lot::RwLock;
use tracing::{error, trace};

/// Event callback.
pub type EventHandler = Arc<dyn Fn(&EventFrame) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    any: Vec<Subscription>,
    named: HashMap<String, Vec<Subscription>>,
}

/// Event name → handlers, plus wildcard handlers.
#[derive(Default)]
pub struct EventRouter {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl EventRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events named `event`.
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        let sub = self.make(handler);
        let id = sub.id;
        self.registry
            .write()
            .named
            .entry(event.into())
            .or_default()
            .push(sub);
        id
    }

    /// Subscribe to every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        let sub = self.make(handler);
        let id = sub.id;
        self.registry.write().any.push(sub);
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.any.len();
        registry.any.retain(|s| s.id != id);
        if registry.any.len() != before {
            return true;
        }
        let mut removed = false;
        registry.named.retain(|_, subs| {
            let len = subs.len();
            subs.retain(|s| s.id != id);
            removed |= subs.len() != len;
            !subs.is_empty()
        });
        removed
    }

    /// Deliver `frame` to wildcard handlers, then named handlers, each group
    /// in subscription order. Returns how many handlers completed normally.
    pub fn dispatch(&self, frame: &EventFrame) -> usize {
        let handlers: Vec<Subscription> = {
            let registry = self.registry.read();
            registry
                .any
                .iter()
                .chain(registry.named.get(&frame.event).into_iter().flatten())
                .cloned()
                .collect()
        };
        trace!(event = %frame.event, handlers = handlers.len(), "dispatching event");

        let mut delivered = 0;
        for sub in handlers {
            match catch_unwind(AssertUnwindSafe(|| (sub.handler)(frame))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(event = %frame.event, subscription = sub.id.0, panic = %message, "event handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        let registry = self.registry.read();
        registry.any.len() + registry.named.values().map(Vec::len).sum::<usize>()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        Subscription {
            id: SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            handler: Arc::new(handler),
        }
    }
}
