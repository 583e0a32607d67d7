//! Block network: arena of blocks, typed connections, closure and ordering.
//!
//! The network owns every block and its port state. Wiring is explicit:
//! `connect(output, input)` — no operator magic. Construction computes the
//! transitive closure of a root set (following connections in both
//! directions) and a deterministic topological execution order over it.
//!
//! ## Ordering guarantees
//!
//! The order satisfies: every connection's source block precedes its target.
//! Ties between simultaneously-ready blocks resolve by ascending declaration
//! order, so repeated builds of the same network yield the same order. A
//! cyclic connection set fails construction naming one participating block;
//! no partial graph ever executes.

use std::collections::{BinaryHeap, VecDeque};

use thiserror::Error;

use crate::block::{Block, BlockId, InputRef, OutputRef};
use crate::port::{PortKind, PortState};

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown block id {0}")]
    UnknownBlock(usize),

    #[error("{block} has no {direction} port {port}")]
    PortOutOfRange {
        block: String,
        direction: &'static str,
        port: usize,
    },

    #[error("cannot connect {from} to {to}: port kinds differ")]
    KindMismatch { from: String, to: String },

    #[error("input {port} of {block} already has an incoming connection")]
    InputOccupied { block: String, port: usize },

    #[error("cannot connect {block} to itself")]
    SelfConnection { block: String },

    #[error("connection graph has a cycle through {block}")]
    Cycle { block: String },
}

// ─── Network ────────────────────────────────────────────────────────

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: OutputRef,
    pub to: InputRef,
}

pub(crate) struct BlockSlot {
    pub(crate) block: Box<dyn Block>,
    pub(crate) inputs: Vec<PortState>,
    pub(crate) outputs: Vec<PortState>,
}

/// Arena of blocks plus their connections.
#[derive(Default)]
pub struct Network {
    pub(crate) slots: Vec<BlockSlot>,
    connections: Vec<Connection>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block, allocating port state from its declared layout.
    /// Returns the block's stable id (its declaration index).
    pub fn add_block(&mut self, block: impl Block + 'static) -> BlockId {
        let block = Box::new(block);
        let inputs = block.inputs().iter().map(PortState::for_spec).collect();
        let outputs = block.outputs().iter().map(PortState::for_spec).collect();
        let id = BlockId(self.slots.len());
        self.slots.push(BlockSlot {
            block,
            inputs,
            outputs,
        });
        id
    }

    /// Number of blocks in the arena.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Diagnostic label for a block: `name[id]`.
    pub fn label(&self, id: BlockId) -> String {
        match self.slots.get(id.0) {
            Some(slot) => format!("{}[{}]", slot.block.name(), id.0),
            None => format!("?[{}]", id.0),
        }
    }

    pub fn block(&self, id: BlockId) -> &dyn Block {
        self.slots[id.0].block.as_ref()
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut dyn Block {
        self.slots[id.0].block.as_mut()
    }

    /// Downcast a block to its concrete type.
    pub fn downcast_ref<T: Block + 'static>(&self, id: BlockId) -> Option<&T> {
        self.slots.get(id.0)?.block.as_any().downcast_ref()
    }

    /// Mutable downcast to a concrete block type.
    pub fn downcast_mut<T: Block + 'static>(&mut self, id: BlockId) -> Option<&mut T> {
        self.slots.get_mut(id.0)?.block.as_any_mut().downcast_mut()
    }

    /// All block ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.slots.len()).map(BlockId)
    }

    // ─── Wiring ─────────────────────────────────────────────────────

    /// Connect an output port to an input port.
    ///
    /// One output may fan out to any number of inputs; an input accepts at
    /// most one incoming connection. Port kinds must match.
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<(), GraphError> {
        let from_kind = self.output_kind(from)?;
        let to_kind = self.input_kind(to)?;

        if from.block == to.block {
            return Err(GraphError::SelfConnection {
                block: self.label(from.block),
            });
        }
        if from_kind != to_kind {
            return Err(GraphError::KindMismatch {
                from: format!("{}.out[{}]", self.label(from.block), from.port),
                to: format!("{}.in[{}]", self.label(to.block), to.port),
            });
        }
        if self.connections.iter().any(|c| c.to == to) {
            return Err(GraphError::InputOccupied {
                block: self.label(to.block),
                port: to.port,
            });
        }

        self.connections.push(Connection { from, to });
        Ok(())
    }

    fn output_kind(&self, r: OutputRef) -> Result<PortKind, GraphError> {
        let slot = self
            .slots
            .get(r.block.0)
            .ok_or(GraphError::UnknownBlock(r.block.0))?;
        slot.outputs
            .get(r.port)
            .map(PortState::kind)
            .ok_or_else(|| GraphError::PortOutOfRange {
                block: self.label(r.block),
                direction: "output",
                port: r.port,
            })
    }

    fn input_kind(&self, r: InputRef) -> Result<PortKind, GraphError> {
        let slot = self
            .slots
            .get(r.block.0)
            .ok_or(GraphError::UnknownBlock(r.block.0))?;
        slot.inputs
            .get(r.port)
            .map(PortState::kind)
            .ok_or_else(|| GraphError::PortOutOfRange {
                block: self.label(r.block),
                direction: "input",
                port: r.port,
            })
    }

    // ─── Closure & Ordering ─────────────────────────────────────────

    /// Transitive closure of `roots`, following connections in both
    /// directions until no new block is reached. Idempotent: the closure of
    /// a closure is itself. Result is in ascending declaration order.
    pub fn closure(&self, roots: &[BlockId]) -> Result<Vec<BlockId>, GraphError> {
        let n = self.slots.len();
        let mut member = vec![false; n];
        let mut queue = VecDeque::new();

        for &root in roots {
            if root.0 >= n {
                return Err(GraphError::UnknownBlock(root.0));
            }
            if !member[root.0] {
                member[root.0] = true;
                queue.push_back(root);
            }
        }

        while let Some(id) = queue.pop_front() {
            for c in &self.connections {
                let neighbor = if c.from.block == id {
                    c.to.block
                } else if c.to.block == id {
                    c.from.block
                } else {
                    continue;
                };
                if !member[neighbor.0] {
                    member[neighbor.0] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        Ok((0..n).filter(|&i| member[i]).map(BlockId).collect())
    }

    /// Topological execution order over the closure of `roots`.
    ///
    /// Kahn's algorithm with a min-heap of ready blocks keyed by declaration
    /// order — the documented deterministic tie-break. Fails with
    /// [`GraphError::Cycle`] naming one participant when no valid order
    /// exists.
    pub fn build(&self, roots: &[BlockId]) -> Result<Vec<BlockId>, GraphError> {
        let members = self.closure(roots)?;
        let n = self.slots.len();
        let mut in_closure = vec![false; n];
        for &id in &members {
            in_closure[id.0] = true;
        }

        let mut in_degree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for c in &self.connections {
            let (f, t) = (c.from.block.0, c.to.block.0);
            if in_closure[f] && in_closure[t] {
                successors[f].push(t);
                in_degree[t] += 1;
            }
        }

        // Min-heap on declaration index: simultaneously-ready blocks leave
        // in declaration order.
        let mut ready: BinaryHeap<std::cmp::Reverse<usize>> = members
            .iter()
            .filter(|id| in_degree[id.0] == 0)
            .map(|id| std::cmp::Reverse(id.0))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(std::cmp::Reverse(idx)) = ready.pop() {
            order.push(BlockId(idx));
            for &succ in &successors[idx] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(std::cmp::Reverse(succ));
                }
            }
        }

        if order.len() != members.len() {
            // Smallest-id block still blocked names the cycle.
            let culprit = members
                .iter()
                .find(|id| in_degree[id.0] > 0)
                .copied()
                .unwrap_or(BlockId(0));
            return Err(GraphError::Cycle {
                block: self.label(culprit),
            });
        }

        Ok(order)
    }

    // ─── Snapshots & Propagation ────────────────────────────────────

    /// Ordered snapshot of every value output port, walking blocks in
    /// `order` and each block's outputs in declared order. Length and
    /// ordering are stable across cycles for an unchanged graph.
    pub fn capture_value_outputs(&self, order: &[BlockId]) -> Vec<f64> {
        let mut out = Vec::new();
        for &id in order {
            for port in &self.slots[id.0].outputs {
                if let PortState::Value(cell) = port {
                    out.push(cell.get());
                }
            }
        }
        out
    }

    /// Push `src`'s current outputs along all outgoing connections.
    ///
    /// Values are copied to every connected input; queued messages are moved
    /// out once and cloned into each connected input queue. Called by the
    /// execution engine immediately after `src`'s update, so downstream
    /// blocks running later in the same cycle observe this cycle's outputs.
    pub(crate) fn propagate_from(&mut self, src: BlockId) {
        enum Payload {
            Value(f64),
            Messages(Vec<crate::port::Message>),
        }

        for port in 0..self.slots[src.0].outputs.len() {
            let payload = match &mut self.slots[src.0].outputs[port] {
                PortState::Value(cell) => Payload::Value(cell.get()),
                PortState::Message(q) => {
                    if q.is_empty() {
                        continue;
                    }
                    Payload::Messages(q.drain().collect())
                }
            };

            for i in 0..self.connections.len() {
                let c = self.connections[i];
                if c.from.block != src || c.from.port != port {
                    continue;
                }
                let target = &mut self.slots[c.to.block.0].inputs[c.to.port];
                match (&payload, target) {
                    (Payload::Value(v), PortState::Value(cell)) => cell.set(*v),
                    (Payload::Messages(msgs), PortState::Message(q)) => {
                        for msg in msgs {
                            q.push(msg.clone());
                        }
                    }
                    // Kind match was validated at connect time.
                    _ => {}
                }
            }
        }
    }
}
