//! animata dataflow engine.
//!
//! Blocks with typed ports form a directed acyclic network; the engine runs
//! every reachable block exactly once per cycle in a deterministic
//! topological order and steps a cycle clock afterwards. On top of the
//! engine sit the two choreography blocks: trajectory playback
//! ([`player::MotionPlayer`]) and the attention behavior state machine
//! ([`behavior::Behavior`]).
//!
//! # Module Structure
//!
//! - [`port`] - Value/message port primitives and queue policy
//! - [`block`] - The block trait, ids, and the per-update port view
//! - [`graph`] - Network arena, wiring, closure, topological sort
//! - [`exec`] - The per-cycle execution engine
//! - [`clock`] - Cycle counter and elapsed-time policies
//! - [`spline`] - Piecewise-polynomial trajectories
//! - [`player`] - Trajectory playback block
//! - [`behavior`] - Behavior state machine block
//! - [`blocks`] - Small general-purpose value/message blocks

pub mod behavior;
pub mod block;
pub mod blocks;
pub mod clock;
pub mod exec;
pub mod graph;
pub mod player;
pub mod port;
pub mod spline;

pub use behavior::{Behavior, BehaviorParams, BehaviorState, StateChange};
pub use block::{Block, BlockError, BlockId, BlockIo, InputRef, OutputRef};
pub use clock::{Clock, TickPolicy};
pub use exec::Executor;
pub use graph::{Connection, GraphError, Network};
pub use player::{MotionPlayer, PlayerError};
pub use port::{Message, PortKind, PortSpec};
pub use spline::{Spline, SplineError};
