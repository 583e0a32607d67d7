//! Fieldbus adapter: the one owner of the bus connection.
//!
//! The adapter manages every motor axis on the bus. Blocking sequences —
//! homing, drive enable/disengage — run at startup or on explicit request
//! and poll each axis within a bound; the per-cycle process-data exchange is
//! the adapter's block update, which the runtime appends **last** in
//! execution order so setpoints produced earlier in the same cycle go out
//! immediately and actuals land for the next cycle.
//!
//! Batch sequences are isolated per axis: one axis timing out or faulting is
//! recorded in that axis's outcome and never aborts the others, and each
//! motor's recorded state reflects only its own statusword.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use animata_core::block::{Block, BlockError, BlockIo};
use animata_core::clock::Clock;
use animata_core::port::PortSpec;

use crate::bus::{BusError, CanBus, PdoFrame};
use crate::cia402::{next_command, Controlword, DriveState, Statusword};
use crate::dict::{self, cob, OperationMode};
use crate::motor::{Motor, MotorConfig, MotorHandle};

/// Default pause between statusword polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default bound on polls per drive transition sequence.
const DEFAULT_TRANSITION_POLLS: u32 = 64;

// ─── Errors & Reports ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("axis {node}: homing not attained within {timeout:?} (statusword {statusword:#06x})")]
    HomingTimeout {
        node: u8,
        timeout: Duration,
        statusword: u16,
    },

    #[error("axis {node}: drive fault (statusword {statusword:#06x})")]
    Fault { node: u8, statusword: u16 },

    #[error(
        "axis {node}: {target} not reached after {polls} polls \
         (state {state}, statusword {statusword:#06x})"
    )]
    TransitionTimeout {
        node: u8,
        target: DriveState,
        polls: u32,
        state: DriveState,
        statusword: u16,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result of one batch sequence for one axis.
#[derive(Debug)]
pub struct AxisOutcome {
    pub node_id: u8,
    pub name: String,
    pub result: Result<(), DriveError>,
}

/// Aggregate result of a batch sequence across all axes.
///
/// The caller decides whether partial success is acceptable.
#[derive(Debug, Default)]
pub struct DriveReport {
    pub outcomes: Vec<AxisOutcome>,
}

impl DriveReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &AxisOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// ─── Adapter ────────────────────────────────────────────────────────

/// Owns the bus connection and all motors attached to it.
pub struct CanAdapter {
    bus: Box<dyn CanBus>,
    motors: Vec<MotorHandle>,
    poll_interval: Duration,
    max_transition_polls: u32,
    released: bool,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl CanAdapter {
    pub fn new(bus: Box<dyn CanBus>) -> Self {
        Self {
            bus,
            motors: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_transition_polls: DEFAULT_TRANSITION_POLLS,
            released: false,
            inputs: vec![],
            outputs: vec![],
        }
    }

    /// Shorten the statusword poll pause (tests run with zero).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Register an axis. Returns the shared record used to build the
    /// matching [`crate::motor::MotorBlock`].
    pub fn attach_motor(&mut self, config: MotorConfig) -> MotorHandle {
        info!(
            "attaching motor {:?} at node {} (scale {})",
            config.name, config.node_id, config.scale
        );
        let handle = Arc::new(Mutex::new(Motor::new(config)));
        self.motors.push(Arc::clone(&handle));
        handle
    }

    pub fn motors(&self) -> &[MotorHandle] {
        &self.motors
    }

    // ─── Homing ─────────────────────────────────────────────────────

    /// Home every attached motor.
    ///
    /// Per axis: write the configured homing method and offset, select
    /// homing mode, pulse the homing-start bit, then poll the statusword for
    /// homing-attained until the axis's timeout. A timeout is recorded in
    /// that axis's outcome and homing proceeds with the remaining axes.
    /// Cyclic position mode is restored afterwards either way.
    pub fn home_motors(&mut self) -> DriveReport {
        let mut report = DriveReport::default();
        for i in 0..self.motors.len() {
            let (node, name, params, scale) = {
                let m = match self.motors[i].lock() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                (
                    m.config.node_id,
                    m.config.name.clone(),
                    m.config.homing.clone(),
                    m.config.scale,
                )
            };

            let offset_counts = (params.offset * scale).round() as i32;
            let result = self.home_one(node, params.method, offset_counts, params.timeout_duration());

            if let Ok(mut m) = self.motors[i].lock() {
                match &result {
                    Ok(sw) => {
                        m.homed = true;
                        m.last_statusword = *sw;
                        info!("axis {node} ({name}) homed");
                    }
                    Err(e) => warn!("axis {node} ({name}) homing failed: {e}"),
                }
            }
            report.outcomes.push(AxisOutcome {
                node_id: node,
                name,
                result: result.map(|_| ()),
            });
        }
        report
    }

    fn home_one(
        &mut self,
        node: u8,
        method: i8,
        offset_counts: i32,
        timeout: Duration,
    ) -> Result<Statusword, DriveError> {
        self.bus
            .sdo_write(node, dict::HOMING_METHOD, 0, method as u8 as u32)?;
        self.bus
            .sdo_write(node, dict::HOMING_OFFSET, 0, offset_counts as u32)?;
        self.bus.sdo_write(
            node,
            dict::MODES_OF_OPERATION,
            0,
            OperationMode::Homing as i8 as u32,
        )?;
        self.bus.sdo_write(
            node,
            dict::CONTROLWORD,
            0,
            (Controlword::ENABLE_OPERATION_CMD | Controlword::START_HOMING).bits() as u32,
        )?;

        let deadline = Instant::now() + timeout;
        let result = loop {
            let sw = self.statusword(node)?;
            if sw.contains(Statusword::FAULT) {
                break Err(DriveError::Fault {
                    node,
                    statusword: sw.bits(),
                });
            }
            if sw.contains(Statusword::HOMING_ATTAINED) {
                break Ok(sw);
            }
            if Instant::now() >= deadline {
                break Err(DriveError::HomingTimeout {
                    node,
                    timeout,
                    statusword: sw.bits(),
                });
            }
            std::thread::sleep(self.poll_interval);
        };

        // Leave homing mode regardless of outcome.
        self.bus.sdo_write(
            node,
            dict::MODES_OF_OPERATION,
            0,
            OperationMode::CyclicSyncPosition as i8 as u32,
        )?;
        result
    }

    // ─── Enable / Disengage ─────────────────────────────────────────

    /// Walk every motor toward `operation-enabled`.
    pub fn enable_drives(&mut self) -> DriveReport {
        self.batch_transition(DriveState::OperationEnabled)
    }

    /// Walk every motor back to `switch-on-disabled`.
    pub fn disengage_drives(&mut self) -> DriveReport {
        self.batch_transition(DriveState::SwitchOnDisabled)
    }

    fn batch_transition(&mut self, target: DriveState) -> DriveReport {
        let mut report = DriveReport::default();
        for i in 0..self.motors.len() {
            let (node, name) = {
                let m = match self.motors[i].lock() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                (m.config.node_id, m.config.name.clone())
            };

            let result = self.transition_one(i, node, target);
            match &result {
                Ok(()) => debug!("axis {node} ({name}) reached {target}"),
                Err(e) => warn!("axis {node} ({name}): {e}"),
            }
            report.outcomes.push(AxisOutcome {
                node_id: node,
                name,
                result,
            });
        }
        report
    }

    /// Step one axis toward `target`, bounded by `max_transition_polls`.
    ///
    /// The motor record tracks every observed statusword, so its state
    /// always reflects this axis's own drive and nothing else.
    fn transition_one(
        &mut self,
        motor_idx: usize,
        node: u8,
        target: DriveState,
    ) -> Result<(), DriveError> {
        if target == DriveState::OperationEnabled {
            self.bus.sdo_write(
                node,
                dict::MODES_OF_OPERATION,
                0,
                OperationMode::CyclicSyncPosition as i8 as u32,
            )?;
        }

        let mut last = (DriveState::default(), Statusword::default());
        for _poll in 0..self.max_transition_polls {
            let sw = self.statusword(node)?;
            let state = DriveState::from_statusword(sw);
            last = (state, sw);
            if let Ok(mut m) = self.motors[motor_idx].lock() {
                m.drive_state = state;
                m.last_statusword = sw;
            }

            if sw.contains(Statusword::FAULT) {
                return Err(DriveError::Fault {
                    node,
                    statusword: sw.bits(),
                });
            }
            if state == target {
                return Ok(());
            }
            if let Some(cw) = next_command(state, target) {
                self.bus
                    .sdo_write(node, dict::CONTROLWORD, 0, cw.bits() as u32)?;
            }
            std::thread::sleep(self.poll_interval);
        }

        Err(DriveError::TransitionTimeout {
            node,
            target,
            polls: self.max_transition_polls,
            state: last.0,
            statusword: last.1.bits(),
        })
    }

    /// Pulse the fault-reset edge on one axis and report the state after.
    ///
    /// The only way out of `fault`; nothing in the adapter resets a fault
    /// implicitly.
    pub fn fault_reset(&mut self, node: u8) -> Result<DriveState, DriveError> {
        self.bus.sdo_write(
            node,
            dict::CONTROLWORD,
            0,
            Controlword::FAULT_RESET.bits() as u32,
        )?;
        self.bus
            .sdo_write(node, dict::CONTROLWORD, 0, Controlword::DISABLE_VOLTAGE.bits() as u32)?;
        let sw = self.statusword(node)?;
        let state = DriveState::from_statusword(sw);
        if let Some(handle) = self.handle_for(node) {
            if let Ok(mut m) = handle.lock() {
                m.drive_state = state;
                m.last_statusword = sw;
            }
        }
        if state == DriveState::Fault {
            return Err(DriveError::Fault {
                node,
                statusword: sw.bits(),
            });
        }
        info!("axis {node} fault reset, now {state}");
        Ok(state)
    }

    // ─── Cyclic Process Data ────────────────────────────────────────

    /// One process-data round: per motor, transmit the current setpoints and
    /// fold received actuals back into the motor record, then emit SYNC.
    pub fn exchange(&mut self) -> Result<(), BusError> {
        for handle in &self.motors {
            let Ok(mut motor) = handle.lock() else {
                continue;
            };
            let node = motor.config.node_id;
            let (pos, vel) = motor.target_counts();

            let mut tx = PdoFrame::new(cob::PDO1_RX + node as u16);
            tx.push_i32(pos);
            tx.push_i32(vel);
            self.bus.pdo_transmit(&tx)?;

            if let Some(rx) = self.bus.pdo_receive(cob::PDO1_TX + node as u16)? {
                if let (Some(apos), Some(avel)) = (rx.read_i32(0), rx.read_i32(4)) {
                    motor.set_actual_counts(apos, avel);
                }
            }
        }
        self.bus.sync()
    }

    /// Disengage all drives and mark the bus released. Safe to call twice;
    /// also runs from `Drop` as a last resort.
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        let report = self.disengage_drives();
        for failure in report.failures() {
            warn!(
                "axis {} ({}) not disengaged at shutdown: {:?}",
                failure.node_id, failure.name, failure.result
            );
        }
        self.released = true;
        info!("fieldbus connection released");
    }

    fn statusword(&mut self, node: u8) -> Result<Statusword, BusError> {
        Ok(Statusword::from_bits_truncate(
            self.bus.sdo_read(node, dict::STATUSWORD, 0)? as u16,
        ))
    }

    fn handle_for(&self, node: u8) -> Option<MotorHandle> {
        self.motors
            .iter()
            .find(|h| h.lock().map(|m| m.config.node_id == node).unwrap_or(false))
            .cloned()
    }
}

impl Block for CanAdapter {
    fn name(&self) -> &str {
        "can_adapter"
    }

    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn update(&mut self, _io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        self.exchange()
            .map_err(|e| BlockError::new(format!("process data exchange: {e}")))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for CanAdapter {
    fn drop(&mut self) {
        if !self.released {
            warn!("adapter dropped without shutdown, disengaging drives");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::HomingParams;
    use crate::sim::{DriveProfile, SimBus};

    fn config(node: u8, timeout: f64) -> MotorConfig {
        MotorConfig {
            node_id: node,
            name: format!("axis{node}"),
            scale: 1000.0,
            homing: HomingParams {
                method: 35,
                offset: 0.0,
                timeout,
            },
        }
    }

    fn adapter_with(profiles: &[(u8, DriveProfile)]) -> CanAdapter {
        let mut bus = SimBus::new();
        for &(node, profile) in profiles {
            bus.add_node(node, profile);
        }
        let mut adapter =
            CanAdapter::new(Box::new(bus)).with_poll_interval(Duration::from_millis(1));
        for &(node, _) in profiles {
            adapter.attach_motor(config(node, 0.05));
        }
        adapter
    }

    #[test]
    fn homing_times_out_only_for_the_stuck_axis() {
        let mut adapter = adapter_with(&[
            (1, DriveProfile::Compliant { homing_polls: 2 }),
            (2, DriveProfile::HomingStuck),
            (3, DriveProfile::Compliant { homing_polls: 1 }),
        ]);

        let report = adapter.home_motors();
        assert_eq!(report.len(), 3);
        assert!(report.outcomes[0].result.is_ok());
        assert!(matches!(
            report.outcomes[1].result,
            Err(DriveError::HomingTimeout { node: 2, .. })
        ));
        assert!(report.outcomes[2].result.is_ok());

        let homed: Vec<bool> = adapter
            .motors()
            .iter()
            .map(|h| h.lock().unwrap().homed)
            .collect();
        assert_eq!(homed, vec![true, false, true]);
    }

    #[test]
    fn enable_isolates_a_faulted_axis() {
        let mut adapter = adapter_with(&[
            (1, DriveProfile::Compliant { homing_polls: 0 }),
            (2, DriveProfile::Faulted),
            (3, DriveProfile::Compliant { homing_polls: 0 }),
        ]);

        let report = adapter.enable_drives();
        assert!(report.outcomes[0].result.is_ok());
        assert!(matches!(
            report.outcomes[1].result,
            Err(DriveError::Fault { node: 2, .. })
        ));
        assert!(report.outcomes[2].result.is_ok());

        let states: Vec<DriveState> = adapter
            .motors()
            .iter()
            .map(|h| h.lock().unwrap().drive_state)
            .collect();
        assert_eq!(
            states,
            vec![
                DriveState::OperationEnabled,
                DriveState::Fault,
                DriveState::OperationEnabled
            ]
        );
    }

    #[test]
    fn enable_times_out_on_a_stalled_axis() {
        let mut adapter = adapter_with(&[(5, DriveProfile::Stalled)]);
        let report = adapter.enable_drives();
        assert!(matches!(
            report.outcomes[0].result,
            Err(DriveError::TransitionTimeout {
                node: 5,
                state: DriveState::SwitchOnDisabled,
                ..
            })
        ));
    }

    #[test]
    fn disengage_returns_axes_to_disabled() {
        let mut adapter = adapter_with(&[(1, DriveProfile::Compliant { homing_polls: 0 })]);
        assert!(adapter.enable_drives().all_ok());
        let report = adapter.disengage_drives();
        assert!(report.all_ok());
        assert_eq!(
            adapter.motors()[0].lock().unwrap().drive_state,
            DriveState::SwitchOnDisabled
        );
    }

    #[test]
    fn fault_reset_is_the_only_way_out_of_fault() {
        let mut adapter = adapter_with(&[(4, DriveProfile::Faulted)]);
        assert!(!adapter.enable_drives().all_ok());
        assert_eq!(
            adapter.motors()[0].lock().unwrap().drive_state,
            DriveState::Fault
        );

        let state = adapter.fault_reset(4).unwrap();
        assert_eq!(state, DriveState::SwitchOnDisabled);
    }

    #[test]
    fn exchange_moves_setpoints_out_and_actuals_in() {
        let mut adapter = adapter_with(&[(1, DriveProfile::Compliant { homing_polls: 0 })]);
        {
            let mut motor = adapter.motors()[0].lock().unwrap();
            motor.target_position = 2.5;
            motor.target_velocity = -1.0;
        }
        adapter.exchange().unwrap();

        let motor = adapter.motors()[0].lock().unwrap();
        // Compliant drives echo setpoints back as actuals.
        assert_eq!(motor.actual_position, 2.5);
        assert_eq!(motor.actual_velocity, -1.0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut adapter = adapter_with(&[(1, DriveProfile::Compliant { homing_polls: 0 })]);
        adapter.enable_drives();
        adapter.shutdown();
        adapter.shutdown();
        assert_eq!(
            adapter.motors()[0].lock().unwrap().drive_state,
            DriveState::SwitchOnDisabled
        );
    }
}
