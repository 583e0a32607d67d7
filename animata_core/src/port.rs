//! Typed port primitives for the block network.
//!
//! Two port kinds exist:
//! - **Value** ports carry a continuous `f64` signal. A cell holds the single
//!   latest sample; writes overwrite, reads are non-destructive.
//! - **Message** ports carry discrete payloads. A queue accumulates payloads
//!   in FIFO order until the single reader drains it.
//!
//! Message queues are bounded. When a producer outruns a stalled consumer the
//! oldest payload is dropped and the drop is logged (rate-limited), so a dead
//! sink can never grow the queue without bound.

use std::borrow::Cow;
use std::collections::VecDeque;

use tracing::warn;

/// Payload type carried by message ports.
pub type Message = serde_json::Value;

/// Default bound for message-port queues.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// How often repeated queue-overflow drops are logged.
const DROP_LOG_INTERVAL: u64 = 256;

// ─── Port Descriptors ───────────────────────────────────────────────

/// The kind of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Continuous signal, latest sample wins.
    Value,
    /// Discrete payload queue, drained by the reader.
    Message,
}

/// Declaration of a single port on a block.
///
/// Blocks expose ordered slices of these; the network allocates the matching
/// runtime state when the block is added.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: Cow<'static, str>,
    pub kind: PortKind,
}

impl PortSpec {
    pub fn value(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Value,
        }
    }

    pub fn message(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Message,
        }
    }
}

// ─── Runtime Port State ─────────────────────────────────────────────

/// Latest-sample cell backing a value port.
///
/// Holds 0.0 until the first write.
#[derive(Debug, Clone, Default)]
pub struct ValueCell {
    value: f64,
}

impl ValueCell {
    pub const fn new() -> Self {
        Self { value: 0.0 }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn set(&mut self, value: f64) {
        self.value = value;
    }
}

/// Bounded FIFO backing a message port.
#[derive(Debug)]
pub struct MessageQueue {
    queue: VecDeque<Message>,
    capacity: usize,
    dropped: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Append a payload, evicting the oldest one when the queue is full.
    pub fn push(&mut self, msg: Message) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % DROP_LOG_INTERVAL == 0 {
                warn!(
                    "message queue full (capacity {}), dropped {} oldest payloads so far",
                    self.capacity, self.dropped
                );
            }
        }
        self.queue.push_back(msg);
    }

    /// Remove and return all queued payloads in FIFO order.
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Message> {
        self.queue.drain(..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total payloads evicted due to overflow.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_CAPACITY)
    }
}

/// Runtime storage for one port, allocated per `PortSpec`.
#[derive(Debug)]
pub enum PortState {
    Value(ValueCell),
    Message(MessageQueue),
}

impl PortState {
    pub fn for_spec(spec: &PortSpec) -> Self {
        match spec.kind {
            PortKind::Value => Self::Value(ValueCell::new()),
            PortKind::Message => Self::Message(MessageQueue::default()),
        }
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        match self {
            Self::Value(_) => PortKind::Value,
            Self::Message(_) => PortKind::Message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_cell_defaults_to_zero() {
        let cell = ValueCell::new();
        assert_eq!(cell.get(), 0.0);
    }

    #[test]
    fn value_cell_last_write_wins() {
        let mut cell = ValueCell::new();
        cell.set(1.5);
        cell.set(-3.25);
        assert_eq!(cell.get(), -3.25);
        // Reads are non-destructive.
        assert_eq!(cell.get(), -3.25);
    }

    #[test]
    fn message_queue_fifo_drain() {
        let mut q = MessageQueue::default();
        q.push(json!(1));
        q.push(json!(2));
        q.push(json!(3));
        let drained: Vec<Message> = q.drain().collect();
        assert_eq!(drained, vec![json!(1), json!(2), json!(3)]);
        assert!(q.is_empty());
    }

    #[test]
    fn message_queue_drops_oldest_on_overflow() {
        let mut q = MessageQueue::new(2);
        q.push(json!("a"));
        q.push(json!("b"));
        q.push(json!("c"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        let drained: Vec<Message> = q.drain().collect();
        assert_eq!(drained, vec![json!("b"), json!("c")]);
    }

    #[test]
    fn port_state_matches_spec_kind() {
        let v = PortState::for_spec(&PortSpec::value("x"));
        assert_eq!(v.kind(), PortKind::Value);
        let m = PortState::for_spec(&PortSpec::message("m"));
        assert_eq!(m.kind(), PortKind::Message);
    }
}
