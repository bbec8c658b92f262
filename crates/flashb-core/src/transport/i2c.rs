//! Linux i2c-dev transport.
//!
//! Frames on the wire carry an SMBus packet error code:
//!
//! ```text
//! write: opcode, payload.., pec      pec over (addr<<1, opcode, payload..)
//! read:  len, data[len], pec         pec over (addr<<1 | 1, len, data..)
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace};

use super::traits::{BusTransport, TransportError};
use crate::device::Device;
use crate::protocol::{MAX_REQUEST_LEN, MAX_RESPONSE_LEN};

pub static CRC8_SMBUS: crc::Crc<u8> = crc::Crc::<u8>::new(&crc::CRC_8_SMBUS);

/// `I2C_SLAVE` request from `linux/i2c-dev.h`.
const I2C_SLAVE: u16 = 0x0703;

/// Delay between response polls while the device prepares its reply.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);

/// Last slave address handed to the kernel for this fd.
#[derive(Default)]
struct SelectedSlave(Mutex<Option<u8>>);

impl SelectedSlave {
    /// A poisoned lock still holds a valid address, so it is recovered.
    fn lock(&self) -> MutexGuard<'_, Option<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-to-point i2c-dev transport for a single configured board.
pub struct I2cTransport {
    file: File,
    path: String,
    device: Device,
    selected: SelectedSlave,
}

impl I2cTransport {
    /// Open the bus at `path`; `device` is the only device it will report.
    #[instrument(level = "info", skip(device), fields(device = %device))]
    pub fn open(path: &str, device: Device) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TransportError::OpenFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        info!(path = %path, "Opened I2C bus");

        let transport = Self {
            file,
            path: path.to_string(),
            device,
            selected: SelectedSlave::default(),
        };
        transport.select(transport.device.address)?;
        Ok(transport)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn select(&self, address: u8) -> Result<(), TransportError> {
        let mut selected = self.selected.lock();
        if *selected == Some(address) {
            return Ok(());
        }
        // SAFETY: the fd is owned by `self.file` and stays open for the call.
        unsafe { i2c_set_slave(self.file.as_raw_fd(), address as i32) }.map_err(|e| {
            TransportError::SelectFailed {
                address,
                message: e.to_string(),
            }
        })?;
        debug!(address = %format!("0x{:02X}", address), "Selected slave");
        *selected = Some(address);
        Ok(())
    }

    fn write_frame(&self, address: u8, opcode: u8, payload: &[u8]) -> Result<(), TransportError> {
        let len = 1 + payload.len();
        if len > MAX_REQUEST_LEN {
            return Err(TransportError::RequestTooLong {
                len,
                max: MAX_REQUEST_LEN,
            });
        }
        let frame = encode_request(address, opcode, payload);
        (&self.file)
            .write_all(&frame)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        trace!(len = frame.len(), "Request written");
        Ok(())
    }

    fn read_frame(&self, address: u8, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let start = Instant::now();
        let mut buf = [0u8; MAX_RESPONSE_LEN + 2];
        loop {
            match (&self.file).read(&mut buf) {
                Ok(n) => match decode_response(address, &buf[..n]) {
                    Ok(data) => return Ok(data),
                    Err(e) => trace!(error = %e, "Discarding response"),
                },
                Err(e) => trace!(error = %e, "No response yet"),
            }
            if start.elapsed() >= timeout {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl BusTransport for I2cTransport {
    #[instrument(skip(self, payload, timeout), fields(len = payload.len()))]
    fn transact(
        &self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.select(address)?;
        self.write_frame(address, opcode, payload)?;
        let response = self.read_frame(address, timeout)?;
        debug!(bytes_read = response.len(), "Transaction complete");
        Ok(response)
    }

    fn devices(&self) -> Result<Vec<Device>, TransportError> {
        Ok(vec![self.device.clone()])
    }
}

/// Build a request frame with its trailing PEC.
pub fn encode_request(address: u8, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(opcode);
    frame.extend_from_slice(payload);

    let mut digest = CRC8_SMBUS.digest();
    digest.update(&[address << 1]);
    digest.update(&frame);
    frame.push(digest.finalize());
    frame
}

/// Validate a response frame and return its data bytes.
pub fn decode_response(address: u8, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
    let Some((&len, rest)) = frame.split_first() else {
        return Err(TransportError::BadResponse("empty frame".into()));
    };
    let len = len as usize;
    if len > MAX_RESPONSE_LEN || rest.len() < len + 1 {
        return Err(TransportError::BadResponse(format!(
            "length byte {} does not fit {} byte frame",
            len,
            frame.len()
        )));
    }
    let (data, tail) = rest.split_at(len);

    let mut digest = CRC8_SMBUS.digest();
    digest.update(&[(address << 1) | 1, len as u8]);
    digest.update(data);
    let expected = digest.finalize();
    if tail[0] != expected {
        return Err(TransportError::BadResponse(format!(
            "PEC mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected, tail[0]
        )));
    }
    Ok(data.to_vec())
}
