//! animata CANopen fieldbus layer.
//!
//! Connects the dataflow engine to physical motor axes: CiA 402 drive state
//! handling, homing and enable/disengage sequencing, and the cyclic
//! process-data exchange that runs last in every execution cycle.
//!
//! # Module Structure
//!
//! - [`dict`] - Object dictionary constants (CiA 301 / CiA 402)
//! - [`bus`] - The `CanBus` boundary trait and PDO frames
//! - [`cia402`] - Statusword/controlword bits and the drive state machine
//! - [`motor`] - Per-axis record, configuration, and graph block
//! - [`adapter`] - Bus owner: homing, enable/disengage, cyclic exchange
//! - [`sim`] - Deterministic simulation bus for tests and hardware-free runs

pub mod adapter;
pub mod bus;
pub mod cia402;
pub mod dict;
pub mod motor;
pub mod sim;

pub use adapter::{AxisOutcome, CanAdapter, DriveError, DriveReport};
pub use bus::{BusError, CanBus, PdoFrame};
pub use cia402::{next_command, Controlword, DriveState, Statusword};
pub use dict::OperationMode;
pub use motor::{HomingParams, Motor, MotorBlock, MotorConfig, MotorHandle};
pub use sim::{DriveProfile, SimBus};
