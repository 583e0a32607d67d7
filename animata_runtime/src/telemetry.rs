//! Telemetry snapshot types.
//!
//! The served scheduler captures one [`OutputSnapshot`] per cycle and hands
//! it to the telemetry channel best-effort: a slow or absent consumer drops
//! snapshots, never delays a cycle. Behavior state changes travel separately
//! through the subscriber channels registered on each behavior.

use serde::Serialize;

/// Ordered snapshot of every value output in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSnapshot {
    /// Cycle index the values were produced in.
    pub cycle: u64,
    /// Clock time at capture [s].
    pub timestamp: f64,
    pub values: Vec<f64>,
}
