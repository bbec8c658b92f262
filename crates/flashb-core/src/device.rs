//! Devices reachable on the bus.

use std::fmt;

/// One firmware-updatable device as reported by bus enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    /// Bus-assigned address.
    pub address: u8,
    /// Board type this device identifies as.
    pub board: String,
}

impl Device {
    pub fn new(address: u8, board: impl Into<String>) -> Self {
        Self {
            address,
            board: board.into(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@0x{:02X}", self.board, self.address)
    }
}

/// Which enumerated devices a run should update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Every device of the given board type.
    Board(String),
    /// Only the device at `address`, which must be of type `board`.
    Address { address: u8, board: String },
}
