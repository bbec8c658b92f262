//! Mock bus transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{BusTransport, TransportError};
use crate::device::Device;
use crate::protocol::encode_word;

/// One captured request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub address: u8,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Mock transport for unit testing engine logic.
///
/// Responses are returned in queue order regardless of opcode; an empty
/// queue behaves like a device that never answers.
pub struct MockTransport {
    /// Queued responses (`None` = timeout).
    response_queue: Arc<Mutex<VecDeque<Option<Vec<u8>>>>>,
    /// Captured requests.
    request_log: Arc<Mutex<Vec<Request>>>,
    /// Devices reported by enumeration.
    devices: Vec<Device>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_devices(Vec::new())
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_log: Arc::new(Mutex::new(Vec::new())),
            devices,
        }
    }

    /// Queue a raw response payload.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.response_queue
            .lock()
            .unwrap()
            .push_back(Some(bytes.to_vec()));
    }

    /// Queue a 16-bit little-endian reply.
    pub fn queue_word(&self, value: u16) {
        self.queue_response(&encode_word(value));
    }

    /// Queue several 16-bit replies in order.
    pub fn queue_words(&self, values: &[u16]) {
        for &v in values {
            self.queue_word(v);
        }
    }

    /// Queue an empty acknowledgement.
    pub fn queue_ack(&self) {
        self.queue_response(&[]);
    }

    /// Queue a missing response.
    pub fn queue_timeout(&self) {
        self.response_queue.lock().unwrap().push_back(None);
    }

    /// Get all captured requests.
    pub fn get_requests(&self) -> Vec<Request> {
        self.request_log.lock().unwrap().clone()
    }

    /// Number of captured requests carrying `opcode`.
    pub fn count_opcode(&self, opcode: u8) -> usize {
        self.request_log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.opcode == opcode)
            .count()
    }

    /// Clear captured requests.
    pub fn clear_requests(&self) {
        self.request_log.lock().unwrap().clear();
    }

    /// Responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.response_queue.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for MockTransport {
    fn transact(
        &self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.request_log.lock().unwrap().push(Request {
            address,
            opcode,
            payload: payload.to_vec(),
        });
        self.response_queue
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn devices(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self.devices.clone())
    }
}
