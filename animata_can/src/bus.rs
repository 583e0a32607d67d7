//! The fieldbus boundary: SDO register access plus cyclic process data.
//!
//! [`CanBus`] is the single seam between the motion layer and the physical
//! bus. The adapter owns the one implementation per process; everything else
//! reaches the bus through it. A deterministic simulation lives in
//! [`crate::sim`] so the whole stack runs and tests without hardware.

use heapless::Vec as FixedVec;
use static_assertions::const_assert_eq;
use thiserror::Error;

/// Maximum CAN payload length.
pub const PDO_MAX_PAYLOAD: usize = 8;

// The cyclic setpoint/actual layout packs two i32 words per frame.
const_assert_eq!(2 * core::mem::size_of::<i32>(), PDO_MAX_PAYLOAD);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown node {0}")]
    UnknownNode(u8),

    #[error("SDO transfer failed: node {node} index {index:#06x} sub {sub}: {reason}")]
    Sdo {
        node: u8,
        index: u16,
        sub: u8,
        reason: String,
    },

    #[error("bus I/O error: {0}")]
    Io(String),

    #[error("bus connection closed")]
    Closed,
}

/// One process-data frame: COB-ID plus up to 8 payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdoFrame {
    pub cob_id: u16,
    pub data: FixedVec<u8, PDO_MAX_PAYLOAD>,
}

impl PdoFrame {
    pub fn new(cob_id: u16) -> Self {
        Self {
            cob_id,
            data: FixedVec::new(),
        }
    }

    /// Append a little-endian i32 word.
    ///
    /// # Panics
    /// Panics when the payload would exceed [`PDO_MAX_PAYLOAD`] bytes.
    pub fn push_i32(&mut self, value: i32) {
        for byte in value.to_le_bytes() {
            if self.data.push(byte).is_err() {
                panic!("PDO frame overflow: payload exceeds {PDO_MAX_PAYLOAD} bytes");
            }
        }
    }

    /// Read a little-endian i32 word at byte `offset`, or `None` when the
    /// frame is shorter than that.
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        let bytes = self.data.get(offset..offset + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Fieldbus access: register transfers and cyclic process data.
///
/// Implementations must be deterministic per call — the adapter drives all
/// timing (polling, cycle pacing) itself.
pub trait CanBus: Send {
    /// Expedited SDO upload of a register value.
    fn sdo_read(&mut self, node: u8, index: u16, sub: u8) -> Result<u32, BusError>;

    /// Expedited SDO download of a register value.
    fn sdo_write(&mut self, node: u8, index: u16, sub: u8, value: u32) -> Result<(), BusError>;

    /// Queue one process-data frame for transmission.
    fn pdo_transmit(&mut self, frame: &PdoFrame) -> Result<(), BusError>;

    /// Fetch the latest received process-data frame for `cob_id`, if any.
    fn pdo_receive(&mut self, cob_id: u16) -> Result<Option<PdoFrame>, BusError>;

    /// Emit a SYNC frame, latching synchronous PDOs bus-wide.
    fn sync(&mut self) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_packs_two_words() {
        let mut frame = PdoFrame::new(0x204);
        frame.push_i32(-5);
        frame.push_i32(1_000_000);
        assert_eq!(frame.data.len(), 8);
        assert_eq!(frame.read_i32(0), Some(-5));
        assert_eq!(frame.read_i32(4), Some(1_000_000));
        assert_eq!(frame.read_i32(5), None);
    }

    #[test]
    #[should_panic(expected = "PDO frame overflow")]
    fn frame_overflow_panics() {
        let mut frame = PdoFrame::new(0x204);
        frame.push_i32(1);
        frame.push_i32(2);
        frame.push_i32(3);
    }
}
