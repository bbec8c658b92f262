//! Error taxonomy for firmware transfer runs.

use thiserror::Error;

use crate::config::ConfigError;
use crate::device::Device;
use crate::loader::LoadError;
use crate::protocol::FrameError;
use crate::transport::TransportError;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Skip the current device and carry on with the rest of the run.
    Device,
    /// Abort the whole run.
    Run,
}

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load image: {0}")]
    Load(#[from] LoadError),

    #[error("Failed to enumerate devices: {0}")]
    Enumerate(#[source] TransportError),

    #[error("No answer from {device}: {source}")]
    DeviceAbsent {
        device: Device,
        #[source]
        source: TransportError,
    },

    #[error("Failed to read next address: {0}")]
    NextAddressRead(#[source] TransportError),

    #[error("Malformed response: {0}")]
    BadResponse(#[from] FrameError),

    #[error("Failed to write data at 0x{address:04X}: {source}")]
    WriteFailed {
        address: u16,
        #[source]
        source: TransportError,
    },

    #[error("Next address reads never agreed after {attempts} attempts")]
    ConsistencyCheckFailed { attempts: usize },

    #[error(
        "Device is requesting unexpected address 0x{address:04X} (bottom 0x{bottom:04X}, top 0x{top:04X})"
    )]
    UnexpectedAddress { address: u16, bottom: u16, top: u16 },

    #[error("Wrong binary: device needs one that starts at 0x{expected:04X}, got 0x{actual:04X}")]
    WrongImage { expected: u16, actual: u16 },

    #[error("Cursor 0x{next:04X} is not a block-aligned address inside section at 0x{start:04X}")]
    MisalignedCursor { next: u16, start: u16 },

    #[error(".vectors section incorrect length: {len} should be {expected}")]
    VectorsLength { len: usize, expected: usize },

    #[error("{label} image starts at 0x{actual:04X}, expected 0x{expected:04X}")]
    ImageAddress {
        label: &'static str,
        expected: u16,
        actual: u16,
    },

    #[error("Image versions differ: bottom 0x{bottom:04X}, top 0x{top:04X}")]
    ImageMismatch { bottom: u16, top: u16 },

    #[error("{label} image .text is {len} bytes, too short to hold a version")]
    MissingVersion { label: &'static str, len: usize },

    #[error("Device at 0x{address:02X} is a {actual}, expected a {expected}")]
    BoardMismatch {
        address: u8,
        expected: String,
        actual: String,
    },

    #[error("No device at address 0x{address:02X}")]
    DeviceNotFound { address: u8 },
}

impl FlashError {
    /// Whether this error skips one device or aborts the run.
    pub fn scope(&self) -> ErrorScope {
        match self {
            FlashError::DeviceAbsent { .. } | FlashError::VectorsLength { .. } => {
                ErrorScope::Device
            }
            _ => ErrorScope::Run,
        }
    }

    pub fn is_device_local(&self) -> bool {
        self.scope() == ErrorScope::Device
    }
}
