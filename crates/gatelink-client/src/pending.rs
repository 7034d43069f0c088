//! Settle-once correlation table for in-flight requests.
//!
//! Each request id maps to a oneshot sender. The entry is removed on the
//! first settle, reject, or removal, so a response that arrives after its
//! caller timed out finds nothing and is dropped.

use std::collections::HashMap;

use gatelink_core::frames::ResponseFrame;
use gatelink_core::GatewayError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a waiting caller.
pub type CallResult = Result<Value, GatewayError>;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<CallResult>,
}

/// Request id → completion.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its caller awaits.
    ///
    /// Ids come from a process-unique generator; a duplicate replaces the
    /// previous entry, whose receiver then observes a closed channel.
    pub fn register(&self, id: &str, method: &str) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        let _ = entries.insert(
            id.to_owned(),
            PendingEntry {
                method: method.to_owned(),
                tx,
            },
        );
        record_gauge(entries.len());
        rx
    }

    /// Settle the entry matching `response.id`. Returns `false` for unknown
    /// or already-settled ids.
    pub fn settle(&self, response: ResponseFrame) -> bool {
        let Some(entry) = self.take(&response.id) else {
            debug!(id = %response.id, "response for unknown or expired request dropped");
            return false;
        };
        let outcome = response.into_result().map_err(GatewayError::Remote);
        let _ = entry.tx.send(outcome);
        true
    }

    /// Reject the entry with `error`. Returns `false` if it was not pending.
    pub fn reject(&self, id: &str, error: GatewayError) -> bool {
        match self.take(id) {
            Some(entry) => {
                debug!(id, method = %entry.method, error = %error, "request rejected");
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop the entry without settling it.
    pub fn remove(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn take(&self, id: &str) -> Option<PendingEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(id);
        if entry.is_some() {
            record_gauge(entries.len());
        }
        entry
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauge(len: usize) {
    metrics::gauge!("gateway_pending_requests").set(len as f64);
}
