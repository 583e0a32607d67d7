//! Deterministic simulation bus.
//!
//! Models just enough of a CiA 402 drive per node to exercise the adapter:
//! the power state machine reacts to controlword images, homing attains after
//! a configurable number of statusword polls, and cyclic actuals follow the
//! transmitted setpoints exactly. Misbehaving drives are scripted through
//! [`DriveProfile`], which is how the timeout and fault paths get tested
//! without hardware.

use std::collections::BTreeMap;

use tracing::trace;

use crate::bus::{BusError, CanBus, PdoFrame};
use crate::cia402::{Controlword, DriveState, Statusword};
use crate::dict::{self, cob, OperationMode};

/// How a simulated drive responds to commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveProfile {
    /// Full handshake; homing attains after this many statusword polls.
    Compliant { homing_polls: u32 },
    /// Handshake works but homing never reports attained.
    HomingStuck,
    /// Statusword frozen in switch-on-disabled; ignores every command.
    Stalled,
    /// Reports the fault bit; fault reset clears it, but enabling operation
    /// faults it again.
    Faulted,
}

/// One simulated drive node.
#[derive(Debug)]
pub struct SimNode {
    profile: DriveProfile,
    state: DriveState,
    registers: BTreeMap<(u16, u8), u32>,
    homing_active: bool,
    homing_polls_left: u32,
    homing_attained: bool,
    target_position: i32,
    target_velocity: i32,
    actual_position: i32,
    actual_velocity: i32,
}

impl SimNode {
    fn new(profile: DriveProfile) -> Self {
        let state = match profile {
            DriveProfile::Faulted => DriveState::Fault,
            _ => DriveState::SwitchOnDisabled,
        };
        Self {
            profile,
            state,
            registers: BTreeMap::new(),
            homing_active: false,
            homing_polls_left: 0,
            homing_attained: false,
            target_position: 0,
            target_velocity: 0,
            actual_position: 0,
            actual_velocity: 0,
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn register(&self, index: u16, sub: u8) -> Option<u32> {
        self.registers.get(&(index, sub)).copied()
    }

    pub fn target_position(&self) -> i32 {
        self.target_position
    }

    pub fn actual_position(&self) -> i32 {
        self.actual_position
    }

    fn operation_mode(&self) -> Option<OperationMode> {
        self.registers
            .get(&(dict::MODES_OF_OPERATION, 0))
            .and_then(|&v| OperationMode::from_i8(v as i8))
    }

    fn apply_controlword(&mut self, raw: u16) {
        let cw = Controlword::from_bits_truncate(raw);

        match self.profile {
            DriveProfile::Stalled => return,
            DriveProfile::Faulted => {
                if self.state == DriveState::Fault && cw.contains(Controlword::FAULT_RESET) {
                    self.state = DriveState::SwitchOnDisabled;
                } else if raw & 0x8F == Controlword::ENABLE_OPERATION_CMD.bits() {
                    self.state = DriveState::Fault;
                }
                return;
            }
            DriveProfile::Compliant { .. } | DriveProfile::HomingStuck => {}
        }

        if self.state == DriveState::Fault {
            if cw.contains(Controlword::FAULT_RESET) {
                self.state = DriveState::SwitchOnDisabled;
            }
            return;
        }

        // Transition decode on the low command image bits.
        match raw & 0x8F {
            0x06 => {
                if matches!(
                    self.state,
                    DriveState::SwitchOnDisabled
                        | DriveState::SwitchedOn
                        | DriveState::OperationEnabled
                ) {
                    self.state = DriveState::ReadyToSwitchOn;
                }
            }
            0x07 => {
                if self.state == DriveState::ReadyToSwitchOn {
                    self.state = DriveState::SwitchedOn;
                }
            }
            0x0F => {
                if self.state == DriveState::SwitchedOn {
                    self.state = DriveState::OperationEnabled;
                }
            }
            0x02 => {
                if self.state == DriveState::OperationEnabled {
                    self.state = DriveState::QuickStopActive;
                }
            }
            0x00 => self.state = DriveState::SwitchOnDisabled,
            _ => {}
        }

        // Homing start: bit 4 in homing mode.
        if cw.contains(Controlword::START_HOMING)
            && self.operation_mode() == Some(OperationMode::Homing)
            && !self.homing_attained
            && !self.homing_active
        {
            self.homing_active = true;
            self.homing_polls_left = match self.profile {
                DriveProfile::Compliant { homing_polls } => homing_polls,
                _ => u32::MAX,
            };
        }
    }

    fn statusword(&mut self) -> Statusword {
        if self.homing_active {
            if let DriveProfile::Compliant { .. } = self.profile {
                if self.homing_polls_left == 0 {
                    self.homing_active = false;
                    self.homing_attained = true;
                } else {
                    self.homing_polls_left -= 1;
                }
            }
        }
        let mut sw = Statusword::from_bits_truncate(self.state.statusword_bits());
        if self.homing_attained {
            sw |= Statusword::HOMING_ATTAINED;
        }
        sw
    }
}

/// Simulation implementation of [`CanBus`].
#[derive(Debug, Default)]
pub struct SimBus {
    nodes: BTreeMap<u8, SimNode>,
    syncs: u64,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated drive at `node_id`.
    pub fn add_node(&mut self, node_id: u8, profile: DriveProfile) {
        self.nodes.insert(node_id, SimNode::new(profile));
    }

    pub fn node(&self, node_id: u8) -> Option<&SimNode> {
        self.nodes.get(&node_id)
    }

    /// SYNC frames emitted so far.
    pub fn sync_count(&self) -> u64 {
        self.syncs
    }

    fn node_mut(&mut self, node_id: u8) -> Result<&mut SimNode, BusError> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(BusError::UnknownNode(node_id))
    }
}

impl CanBus for SimBus {
    fn sdo_read(&mut self, node: u8, index: u16, sub: u8) -> Result<u32, BusError> {
        let n = self.node_mut(node)?;
        match (index, sub) {
            (dict::STATUSWORD, 0) => Ok(n.statusword().bits() as u32),
            (dict::POSITION_ACTUAL_VALUE, 0) => Ok(n.actual_position as u32),
            (dict::VELOCITY_ACTUAL_VALUE, 0) => Ok(n.actual_velocity as u32),
            _ => n
                .registers
                .get(&(index, sub))
                .copied()
                .ok_or(BusError::Sdo {
                    node,
                    index,
                    sub,
                    reason: "register never written".into(),
                }),
        }
    }

    fn sdo_write(&mut self, node: u8, index: u16, sub: u8, value: u32) -> Result<(), BusError> {
        let n = self.node_mut(node)?;
        trace!("sim sdo write node {node} {index:#06x}:{sub} = {value:#010x}");
        n.registers.insert((index, sub), value);
        if (index, sub) == (dict::CONTROLWORD, 0) {
            n.apply_controlword(value as u16);
        }
        Ok(())
    }

    fn pdo_transmit(&mut self, frame: &PdoFrame) -> Result<(), BusError> {
        // Setpoint frames arrive on the PDO1 receive COB of each node.
        if !(cob::PDO1_RX..cob::PDO1_RX + 0x80).contains(&frame.cob_id) {
            return Err(BusError::Io(format!(
                "unexpected transmit COB-ID {:#05x}",
                frame.cob_id
            )));
        }
        let node_id = (frame.cob_id - cob::PDO1_RX) as u8;
        let n = self.node_mut(node_id)?;
        if let (Some(pos), Some(vel)) = (frame.read_i32(0), frame.read_i32(4)) {
            n.target_position = pos;
            n.target_velocity = vel;
            // Actuals track setpoints unless the drive misbehaves.
            if matches!(
                n.profile,
                DriveProfile::Compliant { .. } | DriveProfile::HomingStuck
            ) {
                n.actual_position = pos;
                n.actual_velocity = vel;
            }
        }
        Ok(())
    }

    fn pdo_receive(&mut self, cob_id: u16) -> Result<Option<PdoFrame>, BusError> {
        if !(cob::PDO1_TX..cob::PDO1_TX + 0x80).contains(&cob_id) {
            return Err(BusError::Io(format!("unexpected receive COB-ID {cob_id:#05x}")));
        }
        let node_id = (cob_id - cob::PDO1_TX) as u8;
        let n = self.node_mut(node_id)?;
        let mut frame = PdoFrame::new(cob_id);
        frame.push_i32(n.actual_position);
        frame.push_i32(n.actual_velocity);
        Ok(Some(frame))
    }

    fn sync(&mut self) -> Result<(), BusError> {
        self.syncs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compliant_bus() -> SimBus {
        let mut bus = SimBus::new();
        bus.add_node(1, DriveProfile::Compliant { homing_polls: 2 });
        bus
    }

    fn read_state(bus: &mut SimBus, node: u8) -> DriveState {
        let sw = Statusword::from_bits_truncate(bus.sdo_read(node, dict::STATUSWORD, 0).unwrap() as u16);
        DriveState::from_statusword(sw)
    }

    #[test]
    fn handshake_walks_to_operation_enabled() {
        let mut bus = compliant_bus();
        assert_eq!(read_state(&mut bus, 1), DriveState::SwitchOnDisabled);

        bus.sdo_write(1, dict::CONTROLWORD, 0, 0x06).unwrap();
        assert_eq!(read_state(&mut bus, 1), DriveState::ReadyToSwitchOn);

        bus.sdo_write(1, dict::CONTROLWORD, 0, 0x07).unwrap();
        assert_eq!(read_state(&mut bus, 1), DriveState::SwitchedOn);

        bus.sdo_write(1, dict::CONTROLWORD, 0, 0x0F).unwrap();
        assert_eq!(read_state(&mut bus, 1), DriveState::OperationEnabled);
    }

    #[test]
    fn homing_attains_after_configured_polls() {
        let mut bus = compliant_bus();
        bus.sdo_write(1, dict::MODES_OF_OPERATION, 0, OperationMode::Homing as i8 as u32)
            .unwrap();
        bus.sdo_write(1, dict::CONTROLWORD, 0, 0x1F).unwrap();

        // Two polls pass without the attained bit, the third reports it.
        for _ in 0..2 {
            let sw = Statusword::from_bits_truncate(
                bus.sdo_read(1, dict::STATUSWORD, 0).unwrap() as u16
            );
            assert!(!sw.contains(Statusword::HOMING_ATTAINED));
        }
        let sw =
            Statusword::from_bits_truncate(bus.sdo_read(1, dict::STATUSWORD, 0).unwrap() as u16);
        assert!(sw.contains(Statusword::HOMING_ATTAINED));
    }

    #[test]
    fn stalled_node_ignores_commands() {
        let mut bus = SimBus::new();
        bus.add_node(7, DriveProfile::Stalled);
        bus.sdo_write(7, dict::CONTROLWORD, 0, 0x06).unwrap();
        assert_eq!(read_state(&mut bus, 7), DriveState::SwitchOnDisabled);
    }

    #[test]
    fn faulted_node_resets_then_refaults_on_enable() {
        let mut bus = SimBus::new();
        bus.add_node(3, DriveProfile::Faulted);
        assert_eq!(read_state(&mut bus, 3), DriveState::Fault);

        bus.sdo_write(3, dict::CONTROLWORD, 0, 0x80).unwrap();
        assert_eq!(read_state(&mut bus, 3), DriveState::SwitchOnDisabled);

        bus.sdo_write(3, dict::CONTROLWORD, 0, 0x0F).unwrap();
        assert_eq!(read_state(&mut bus, 3), DriveState::Fault);
    }

    #[test]
    fn actuals_follow_transmitted_setpoints() {
        let mut bus = compliant_bus();
        let mut frame = PdoFrame::new(cob::PDO1_RX + 1);
        frame.push_i32(1500);
        frame.push_i32(-20);
        bus.pdo_transmit(&frame).unwrap();

        let rx = bus.pdo_receive(cob::PDO1_TX + 1).unwrap().unwrap();
        assert_eq!(rx.read_i32(0), Some(1500));
        assert_eq!(rx.read_i32(4), Some(-20));
    }

    #[test]
    fn unknown_node_is_an_error() {
        let mut bus = SimBus::new();
        assert!(matches!(
            bus.sdo_read(9, dict::STATUSWORD, 0),
            Err(BusError::UnknownNode(9))
        ));
    }
}
