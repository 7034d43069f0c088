//! Outbound buffering while the connection is not `Connected`.
//!
//! Only methods on the [`QueuePolicy`] allowlist are buffered; the caller
//! rejects everything else up front. The queue is FIFO and bounded: pushing
//! past capacity evicts the oldest entry and hands it back so its caller can
//! be rejected before the push returns.

use std::collections::{HashSet, VecDeque};

/// Which methods are safe to buffer while disconnected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuePolicy {
    exact: HashSet<String>,
    suffixes: Vec<String>,
}

impl QueuePolicy {
    /// Policy from exact method names and method-name suffixes.
    pub fn new<E, S>(exact: E, suffixes: S) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            exact: exact.into_iter().map(Into::into).collect(),
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `method` may wait in the queue.
    pub fn is_queueable(&self, method: &str) -> bool {
        self.exact.contains(method) || self.suffixes.iter().any(|s| method.ends_with(s.as_str()))
    }
}

impl Default for QueuePolicy {
    /// Read-only and idempotent operations plus the handshake itself.
    fn default() -> Self {
        Self::new(
            ["health", "ping", "status", gatelink_core::frames::CONNECT_METHOD],
            [".list", ".get", ".status", ".history"],
        )
    }
}

/// A serialized request waiting for a live socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Request id.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Serialized frame.
    pub text: String,
    /// Enqueue order.
    pub seq: u64,
}

/// Bounded FIFO of [`QueuedMessage`]s.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
    capacity: usize,
    next_seq: u64,
}

impl OutboundQueue {
    /// Empty queue holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
        }
    }

    /// Append a message, returning the evicted oldest entry when full.
    pub fn push(&mut self, id: String, method: String, text: String) -> Option<QueuedMessage> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.next_seq += 1;
        self.entries.push_back(QueuedMessage {
            id,
            method,
            text,
            seq: self.next_seq,
        });
        evicted
    }

    /// Remove and return every entry in FIFO order.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.entries.drain(..).collect()
    }

    /// Remove the entry with the given request id.
    pub fn remove(&mut self, id: &str) -> Option<QueuedMessage> {
        let pos = self.entries.iter().position(|m| m.id == id)?;
        self.entries.remove(pos)
    }

    /// Put previously dequeued messages back at the front, keeping their
    /// order. Returns the oldest entries that no longer fit.
    pub fn requeue_front(&mut self, messages: Vec<QueuedMessage>) -> Vec<QueuedMessage> {
        for message in messages.into_iter().rev() {
            self.entries.push_front(message);
        }
        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..excess).collect()
    }

    /// Queued entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entry count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(q: &mut OutboundQueue, id: &str) -> Option<QueuedMessage> {
        q.push(id.into(), "sessions.list".into(), format!("{{\"id\":\"{id}\"}}"))
    }

    #[test]
    fn default_policy_allowlist() {
        let policy = QueuePolicy::default();
        for method in [
            "health",
            "ping",
            "connect",
            "status",
            "sessions.list",
            "config.get",
            "channels.status",
            "chat.history",
        ] {
            assert!(policy.is_queueable(method), "{method} should queue");
        }
        for method in ["agent.abort", "chat.send", "sessions.delete", "listing", "config.set"] {
            assert!(!policy.is_queueable(method), "{method} should not queue");
        }
    }

    #[test]
    fn custom_policy() {
        let policy = QueuePolicy::new(["whoami"], Vec::<String>::new());
        assert!(policy.is_queueable("whoami"));
        assert!(!policy.is_queueable("sessions.list"));
    }

    #[test]
    fn fifo_order() {
        let mut q = OutboundQueue::new(10);
        for id in ["a", "b", "c"] {
            assert!(push(&mut q, id).is_none());
        }
        let ids: Vec<_> = q.drain().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let mut q = OutboundQueue::new(3);
        for id in ["a", "b", "c"] {
            assert!(push(&mut q, id).is_none());
        }
        let evicted = push(&mut q, "d").unwrap();
        assert_eq!(evicted.id, "a");
        assert_eq!(q.len(), 3);
        let evicted = push(&mut q, "e").unwrap();
        assert_eq!(evicted.id, "b");
        let ids: Vec<_> = q.drain().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["c", "d", "e"]);
    }

    #[test]
    fn seq_increases() {
        let mut q = OutboundQueue::new(5);
        let _ = push(&mut q, "a");
        let _ = push(&mut q, "b");
        let drained = q.drain();
        assert!(drained[0].seq < drained[1].seq);
    }

    #[test]
    fn evicted_entry_keeps_its_seq() {
        let mut q = OutboundQueue::new(1);
        let _ = push(&mut q, "a");
        let first = q.drain().remove(0).seq;
        let _ = push(&mut q, "b");
        let evicted = push(&mut q, "c").unwrap();
        assert_eq!(evicted.id, "b");
        assert_eq!(evicted.seq, first + 1);
    }

    #[test]
    fn remove_by_id() {
        let mut q = OutboundQueue::new(5);
        let _ = push(&mut q, "a");
        let _ = push(&mut q, "b");
        assert_eq!(q.remove("a").unwrap().id, "a");
        assert!(q.remove("a").is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn requeue_front_preserves_order() {
        let mut q = OutboundQueue::new(5);
        let _ = push(&mut q, "c");
        let mut other = OutboundQueue::new(5);
        let _ = push(&mut other, "a");
        let _ = push(&mut other, "b");
        let overflow = q.requeue_front(other.drain());
        assert!(overflow.is_empty());
        let ids: Vec<_> = q.drain().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn requeue_front_overflow_evicts_oldest() {
        let mut q = OutboundQueue::new(2);
        let _ = push(&mut q, "c");
        let mut other = OutboundQueue::new(5);
        let _ = push(&mut other, "a");
        let _ = push(&mut other, "b");
        let overflow = q.requeue_front(other.drain());
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow[0].id, "a");
        let ids: Vec<_> = q.drain().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn zero_capacity_clamped() {
        let mut q = OutboundQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(push(&mut q, "a").is_none());
        assert_eq!(push(&mut q, "b").unwrap().id, "a");
    }
}
