//! CiA 402 device state machine: statusword decoding and controlword steps.
//!
//! Every drive exposes the standardized power state machine through two
//! registers: the host writes command images to the controlword and observes
//! the resulting state in the statusword. This module holds the bit
//! definitions, the statusword → [`DriveState`] decode table, and the
//! next-controlword step used by the batch enable/disengage sequences.
//!
//! A fault bit always decodes to [`DriveState::Fault`] no matter what was
//! commanded; leaving fault requires the explicit fault-reset edge, never an
//! implicit transition.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// CiA 402 statusword (object 0x6041).
    ///
    /// `HOMING_ATTAINED`/`HOMING_ERROR` carry their homing-mode meaning;
    /// in other modes bits 12/13 are mode dependent and unused here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Statusword: u16 {
        const READY_TO_SWITCH_ON = 0x0001;
        const SWITCHED_ON        = 0x0002;
        const OPERATION_ENABLED  = 0x0004;
        const FAULT              = 0x0008;
        const VOLTAGE_ENABLED    = 0x0010;
        const QUICK_STOP         = 0x0020;
        const SWITCH_ON_DISABLED = 0x0040;
        const WARNING            = 0x0080;
        const REMOTE             = 0x0200;
        const TARGET_REACHED     = 0x0400;
        const INTERNAL_LIMIT     = 0x0800;
        const HOMING_ATTAINED    = 0x1000;
        const HOMING_ERROR       = 0x2000;
    }
}

bitflags! {
    /// CiA 402 controlword (object 0x6040).
    ///
    /// `START_HOMING` is the bit-4 meaning in homing mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Controlword: u16 {
        const SWITCH_ON        = 0x0001;
        const ENABLE_VOLTAGE   = 0x0002;
        const QUICK_STOP       = 0x0004;
        const ENABLE_OPERATION = 0x0008;
        const START_HOMING     = 0x0010;
        const FAULT_RESET      = 0x0080;
    }
}

impl Controlword {
    /// Command images of the standard transitions.
    pub const SHUTDOWN: Self = Self::from_bits_truncate(0x0006);
    pub const SWITCH_ON_CMD: Self = Self::from_bits_truncate(0x0007);
    pub const ENABLE_OPERATION_CMD: Self = Self::from_bits_truncate(0x000F);
    pub const DISABLE_VOLTAGE: Self = Self::from_bits_truncate(0x0000);
    pub const QUICK_STOP_CMD: Self = Self::from_bits_truncate(0x0002);
}

// ─── Drive State ────────────────────────────────────────────────────

/// Decoded device state of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveState {
    Fault,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
}

impl Default for DriveState {
    fn default() -> Self {
        Self::SwitchOnDisabled
    }
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fault => "fault",
            Self::SwitchOnDisabled => "switch-on-disabled",
            Self::ReadyToSwitchOn => "ready-to-switch-on",
            Self::SwitchedOn => "switched-on",
            Self::OperationEnabled => "operation-enabled",
            Self::QuickStopActive => "quick-stop-active",
        };
        f.write_str(name)
    }
}

impl DriveState {
    /// Decode a statusword with the standard mask table.
    ///
    /// Fault-reaction-active folds into `Fault`, not-ready-to-switch-on into
    /// `SwitchOnDisabled`; both distinctions carry no information the motion
    /// layer acts on.
    pub fn from_statusword(sw: Statusword) -> Self {
        let bits = sw.bits();
        if bits & 0x4F == 0x08 || bits & 0x4F == 0x0F {
            Self::Fault
        } else if bits & 0x6F == 0x27 {
            Self::OperationEnabled
        } else if bits & 0x6F == 0x07 {
            Self::QuickStopActive
        } else if bits & 0x6F == 0x23 {
            Self::SwitchedOn
        } else if bits & 0x6F == 0x21 {
            Self::ReadyToSwitchOn
        } else {
            Self::SwitchOnDisabled
        }
    }

    /// Canonical statusword bits for this state (voltage enabled where the
    /// standard sets it). Used by the simulation bus and tests.
    pub const fn statusword_bits(&self) -> u16 {
        match self {
            Self::Fault => 0x0008,
            Self::SwitchOnDisabled => 0x0040,
            Self::ReadyToSwitchOn => 0x0031,
            Self::SwitchedOn => 0x0033,
            Self::OperationEnabled => 0x0037,
            Self::QuickStopActive => 0x0017,
        }
    }
}

/// The controlword moving one step from `current` toward `target`.
///
/// Only the two batch targets are meaningful: `OperationEnabled` (enable
/// sequence) and `SwitchOnDisabled` (disengage sequence). Returns `None`
/// when `current` already is the target, or when no implicit step exists —
/// a faulted drive stays faulted until [`Controlword::FAULT_RESET`] is
/// pulsed explicitly.
pub fn next_command(current: DriveState, target: DriveState) -> Option<Controlword> {
    use DriveState::*;
    match target {
        OperationEnabled => match current {
            Fault | OperationEnabled => None,
            SwitchOnDisabled => Some(Controlword::SHUTDOWN),
            ReadyToSwitchOn => Some(Controlword::SWITCH_ON_CMD),
            SwitchedOn => Some(Controlword::ENABLE_OPERATION_CMD),
            QuickStopActive => Some(Controlword::DISABLE_VOLTAGE),
        },
        SwitchOnDisabled => match current {
            Fault | SwitchOnDisabled => None,
            _ => Some(Controlword::DISABLE_VOLTAGE),
        },
        _ => None,
    }
}
