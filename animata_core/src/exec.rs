//! Execution engine: one deterministic pass over the block order per cycle.
//!
//! `run_cycle` invokes each block's update exactly once, in the order the
//! graph build produced, and propagates that block's outputs to its
//! successors before the next block runs — so a payload pushed into a source
//! reaches the final sink within the same cycle.
//!
//! A failing update is reported and skipped over, never fatal: the block's
//! outputs keep their last values and execution continues. Repeated failures
//! of the same block are rate-limited in the log so a wedged block cannot
//! flood the output while still never going silent.

use tracing::warn;

use crate::block::{BlockId, BlockIo};
use crate::clock::Clock;
use crate::graph::Network;

/// Failures 1..=N are logged individually.
const FAILURE_LOG_HEAD: u64 = 10;
/// After the head, every Nth failure is logged.
const FAILURE_LOG_INTERVAL: u64 = 1000;

/// Runs the block network one cycle at a time.
///
/// Owns the execution order and per-block failure bookkeeping. Taking
/// `&mut self` makes reentrant `run_cycle` calls impossible by construction.
pub struct Executor {
    order: Vec<BlockId>,
    /// Cumulative update failures, indexed by block arena id.
    failures: Vec<u64>,
}

impl Executor {
    pub fn new(order: Vec<BlockId>) -> Self {
        let max_id = order.iter().map(|id| id.index()).max().map_or(0, |m| m + 1);
        Self {
            order,
            failures: vec![0; max_id],
        }
    }

    /// The execution order this engine runs.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Total update failures recorded for `id`.
    pub fn failure_count(&self, id: BlockId) -> u64 {
        self.failures.get(id.index()).copied().unwrap_or(0)
    }

    /// Execute every block once, in order, propagating outputs as each
    /// block finishes.
    pub fn run_cycle(&mut self, net: &mut Network, clock: &Clock) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            let result = {
                let slot = &mut net.slots[id.index()];
                let mut io = BlockIo {
                    inputs: &mut slot.inputs,
                    outputs: &mut slot.outputs,
                };
                slot.block.update(&mut io, clock)
            };
            if let Err(e) = result {
                let count = self.failures[id.index()] + 1;
                self.failures[id.index()] = count;
                if count <= FAILURE_LOG_HEAD || count % FAILURE_LOG_INTERVAL == 0 {
                    warn!("{} update failed (occurrence {count}): {e}", net.label(id));
                }
                // Outputs keep their last values; successors still receive them.
            }
            net.propagate_from(id);
        }
    }
}
