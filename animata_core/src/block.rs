//! The block trait and the per-update port view.
//!
//! A block is one node of the dataflow network: ordered input ports, ordered
//! output ports, private internal state, and an `update` invoked exactly once
//! per cycle. During `update` a block may only touch its own ports — the
//! [`BlockIo`] view hands it exactly those and nothing else.

use std::any::Any;

use thiserror::Error;

use crate::clock::Clock;
use crate::port::{Message, PortSpec, PortState};

/// Stable identity of a block within its network.
///
/// Ids are assigned in declaration order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    /// Reference to this block's output port `port`.
    #[inline]
    pub fn output(self, port: usize) -> OutputRef {
        OutputRef { block: self, port }
    }

    /// Reference to this block's input port `port`.
    #[inline]
    pub fn input(self, port: usize) -> InputRef {
        InputRef { block: self, port }
    }
}

/// Endpoint reference to an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub block: BlockId,
    pub port: usize,
}

/// Endpoint reference to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputRef {
    pub block: BlockId,
    pub port: usize,
}

// ─── Update Failure ─────────────────────────────────────────────────

/// Failure of a single block update.
///
/// Not fatal to the cycle: the engine reports it (rate-limited) and the
/// block's outputs hold their last values.
#[derive(Debug, Error)]
#[error("block update failed: {reason}")]
pub struct BlockError {
    pub reason: String,
}

impl BlockError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ─── Per-Update Port View ───────────────────────────────────────────

/// Mutable view over one block's own ports, valid for one `update` call.
///
/// Indices refer to the block's declared port order. Accessing a port with
/// the wrong kind accessor is a programming error in the block itself and
/// panics — a block always knows its own layout.
pub struct BlockIo<'a> {
    pub(crate) inputs: &'a mut [PortState],
    pub(crate) outputs: &'a mut [PortState],
}

impl<'a> BlockIo<'a> {
    /// Build a view over explicit port storage. The engine builds these per
    /// update; block implementations outside the engine use this in their
    /// own tests.
    pub fn new(inputs: &'a mut [PortState], outputs: &'a mut [PortState]) -> Self {
        Self { inputs, outputs }
    }
}

impl BlockIo<'_> {
    /// Read the latest sample on value input `idx`.
    pub fn value_in(&self, idx: usize) -> f64 {
        match &self.inputs[idx] {
            PortState::Value(cell) => cell.get(),
            PortState::Message(_) => panic!("input {idx} is a message port, not a value port"),
        }
    }

    /// Write a sample to value output `idx`.
    pub fn set_value(&mut self, idx: usize, value: f64) {
        match &mut self.outputs[idx] {
            PortState::Value(cell) => cell.set(value),
            PortState::Message(_) => panic!("output {idx} is a message port, not a value port"),
        }
    }

    /// Drain all payloads queued on message input `idx`, in FIFO order.
    pub fn drain_messages(&mut self, idx: usize) -> impl Iterator<Item = Message> + '_ {
        match &mut self.inputs[idx] {
            PortState::Message(q) => q.drain(),
            PortState::Value(_) => panic!("input {idx} is a value port, not a message port"),
        }
    }

    /// Queue a payload on message output `idx`.
    pub fn send_message(&mut self, idx: usize, msg: Message) {
        match &mut self.outputs[idx] {
            PortState::Message(q) => q.push(msg),
            PortState::Value(_) => panic!("output {idx} is a value port, not a message port"),
        }
    }
}

// ─── Block Trait ────────────────────────────────────────────────────

/// A computation unit in the block network.
///
/// Implementors declare their port layout once; the network allocates the
/// backing state when the block is added and keeps it for the block's
/// lifetime. `update` runs exactly once per cycle in topological order.
pub trait Block: Send {
    /// Short type name for diagnostics.
    fn name(&self) -> &str;

    /// Declared input ports, in order.
    fn inputs(&self) -> &[PortSpec];

    /// Declared output ports, in order.
    fn outputs(&self) -> &[PortSpec];

    /// Per-cycle update. May only read/write the block's own ports (through
    /// `io`) and its own internal state.
    fn update(&mut self, io: &mut BlockIo<'_>, clock: &Clock) -> Result<(), BlockError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
