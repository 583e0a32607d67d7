//! animata runtime assembly.
//!
//! Ties the dataflow engine to the fieldbus layer: builds the execution
//! order with the bus adapter appended last, runs the fixed-period cycle in
//! standalone or served mode, and exposes the narrow command surface the
//! control layer is allowed to touch.
//!
//! # Module Structure
//!
//! - [`runtime`] - The assembled runtime container
//! - [`sched`] - Standalone and served cycle loops, RT setup
//! - [`command`] - External command surface and errors
//! - [`telemetry`] - Per-cycle output snapshots
//! - [`config`] - TOML runtime configuration

pub mod command;
pub mod config;
pub mod runtime;
pub mod sched;
pub mod telemetry;

pub use command::{Command, CommandError, CommandReply};
pub use config::{ConfigError, RunMode, RuntimeConfig};
pub use runtime::{Runtime, RuntimeError, StartupReport};
pub use sched::{run_served, run_standalone, rt_setup, CommandEnvelope, CycleStats};
pub use telemetry::OutputSnapshot;
