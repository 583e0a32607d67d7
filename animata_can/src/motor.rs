//! Motor axis model and its graph block.
//!
//! A [`Motor`] is the shared per-axis record: static configuration plus the
//! live drive state, setpoints, and actuals. The graph-facing
//! [`MotorBlock`] and the bus-facing adapter both hold a [`MotorHandle`] to
//! it; the lock is only ever taken briefly inside a cycle or a command, so
//! the two sides stay consistent without a dedicated synchronization layer.
//!
//! Per cycle the block copies its input setpoints into the shared record and
//! mirrors the shared actuals onto its outputs. The adapter transmits those
//! setpoints at the end of the same cycle, so actuals published by the block
//! are always the values received in the previous cycle.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use animata_core::block::{Block, BlockError, BlockIo};
use animata_core::clock::Clock;
use animata_core::port::PortSpec;

use crate::cia402::{DriveState, Statusword};

// ─── Configuration ──────────────────────────────────────────────────

/// Homing parameters for one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomingParams {
    /// CiA 402 homing method (object 0x6098). Defaults to 35: home on the
    /// current position, the common choice for friction-held axes.
    #[serde(default = "default_homing_method")]
    pub method: i8,
    /// Home offset in user units (object 0x607C).
    #[serde(default)]
    pub offset: f64,
    /// Bound on the homing-attained wait [s].
    #[serde(default = "default_homing_timeout")]
    pub timeout: f64,
}

fn default_homing_method() -> i8 {
    35
}
fn default_homing_timeout() -> f64 {
    5.0
}

impl Default for HomingParams {
    fn default() -> Self {
        Self {
            method: 35,
            offset: 0.0,
            timeout: 5.0,
        }
    }
}

impl HomingParams {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }
}

/// Static configuration of one motor axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorConfig {
    /// CANopen node id (1..=127).
    pub node_id: u8,
    pub name: String,
    /// Encoder counts per user unit.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub homing: HomingParams,
}

fn default_scale() -> f64 {
    1.0
}

// ─── Shared Axis Record ─────────────────────────────────────────────

/// Live per-axis record shared between graph block and bus adapter.
#[derive(Debug)]
pub struct Motor {
    pub config: MotorConfig,
    pub drive_state: DriveState,
    pub last_statusword: Statusword,
    pub homed: bool,
    /// Setpoints written by the graph [user units].
    pub target_position: f64,
    pub target_velocity: f64,
    /// Actuals received from the drive [user units].
    pub actual_position: f64,
    pub actual_velocity: f64,
}

impl Motor {
    pub fn new(config: MotorConfig) -> Self {
        Self {
            config,
            drive_state: DriveState::default(),
            last_statusword: Statusword::default(),
            homed: false,
            target_position: 0.0,
            target_velocity: 0.0,
            actual_position: 0.0,
            actual_velocity: 0.0,
        }
    }

    /// Setpoint position in encoder counts.
    #[inline]
    pub fn target_counts(&self) -> (i32, i32) {
        (
            (self.target_position * self.config.scale).round() as i32,
            (self.target_velocity * self.config.scale).round() as i32,
        )
    }

    /// Store received actuals, converting counts to user units.
    #[inline]
    pub fn set_actual_counts(&mut self, position: i32, velocity: i32) {
        self.actual_position = position as f64 / self.config.scale;
        self.actual_velocity = velocity as f64 / self.config.scale;
    }
}

pub type MotorHandle = Arc<Mutex<Motor>>;

// ─── Graph Block ────────────────────────────────────────────────────

/// Graph block mirroring one motor axis.
///
/// Inputs: `target_position`, `target_velocity` [user units].
/// Outputs: `actual_position`, `actual_velocity` [user units].
pub struct MotorBlock {
    motor: MotorHandle,
    name: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl MotorBlock {
    pub const TARGET_POSITION_IN: usize = 0;
    pub const TARGET_VELOCITY_IN: usize = 1;
    pub const ACTUAL_POSITION_OUT: usize = 0;
    pub const ACTUAL_VELOCITY_OUT: usize = 1;

    pub fn new(motor: MotorHandle) -> Self {
        let name = motor
            .lock()
            .map(|m| format!("motor:{}", m.config.name))
            .unwrap_or_else(|_| "motor:?".into());
        Self {
            motor,
            name,
            inputs: vec![
                PortSpec::value("target_position"),
                PortSpec::value("target_velocity"),
            ],
            outputs: vec![
                PortSpec::value("actual_position"),
                PortSpec::value("actual_velocity"),
            ],
        }
    }

    pub fn handle(&self) -> MotorHandle {
        Arc::clone(&self.motor)
    }
}

impl Block for MotorBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let mut motor = self
            .motor
            .lock()
            .map_err(|_| BlockError::new("motor record lock poisoned"))?;
        motor.target_position = io.value_in(Self::TARGET_POSITION_IN);
        motor.target_velocity = io.value_in(Self::TARGET_VELOCITY_IN);
        io.set_value(Self::ACTUAL_POSITION_OUT, motor.actual_position);
        io.set_value(Self::ACTUAL_VELOCITY_OUT, motor.actual_velocity);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
