//! Bus transport abstraction.
//!
//! Defines the `BusTransport` trait for request/response firmware
//! transactions, allowing different implementations (i2c-dev, mock, etc.).

use std::time::Duration;

use crate::device::Device;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open bus {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Failed to select device 0x{address:02X}: {message}")]
    SelectFailed { address: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Request too long: {len} bytes (max {max})")]
    RequestTooLong { len: usize, max: usize },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract bus transport interface.
///
/// This trait enables:
/// - Production implementation over Linux i2c-dev
/// - Mock and simulated implementations for unit testing
/// - Future multi-drop bus backends
pub trait BusTransport: Send + Sync {
    /// Send `opcode` + `payload` to the device at `address` and return the
    /// response payload, or fail if no valid response arrives in `timeout`.
    fn transact(
        &self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Enumerate the devices present on this bus.
    fn devices(&self) -> Result<Vec<Device>, TransportError>;
}
