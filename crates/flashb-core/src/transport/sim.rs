//! In-memory model of the device side of the firmware protocol.
//!
//! A `SimulatedBus` holds any number of `SimulatedDevice`s and answers
//! transactions the way the MSP430 reception code does: it tracks the next
//! address it wants, stores blocks written at that address, reports 0 once
//! every region of the idle half has been received, and switches firmware
//! on confirm without acknowledging.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{BusTransport, TransportError};
use crate::device::Device;
use crate::protocol::{
    CHUNK_SIZE, ChunkFrame, Command, CommandTable, NEXT_ADDRESS_DONE, encode_word,
};

/// Address range the device expects to receive, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u16,
    pub len: u16,
}

impl Region {
    pub fn new(start: u16, len: u16) -> Self {
        Self { start, len }
    }

    fn end(&self) -> u32 {
        self.start as u32 + self.len as u32
    }
}

/// Builder-style description of one simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    device: Device,
    commands: CommandTable,
    version: u16,
    regions: Vec<Region>,
    absent: bool,
    silent_confirm: bool,
    drop_chunks: HashSet<usize>,
    garbage_reads: usize,
    done_after_chunks: Option<usize>,
}

impl SimulatedDevice {
    /// A device running `version` that wants `regions` written next.
    pub fn new(device: Device, commands: CommandTable, version: u16, regions: Vec<Region>) -> Self {
        Self {
            device,
            commands,
            version,
            regions,
            absent: false,
            silent_confirm: true,
            drop_chunks: HashSet::new(),
            garbage_reads: 0,
            done_after_chunks: None,
        }
    }

    /// Never answer any transaction.
    pub fn absent(mut self) -> Self {
        self.absent = true;
        self
    }

    /// Acknowledge confirm commands instead of switching silently.
    pub fn acking_confirm(mut self) -> Self {
        self.silent_confirm = false;
        self
    }

    /// Acknowledge but discard the given chunk writes (0-based arrival index).
    pub fn dropping_chunks(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.drop_chunks.extend(indices);
        self
    }

    /// Corrupt this many next-address reads with changing garbage.
    pub fn with_garbage_reads(mut self, count: usize) -> Self {
        self.garbage_reads = count;
        self
    }

    /// Report completion after this many accepted chunks.
    pub fn done_after_chunks(mut self, count: usize) -> Self {
        self.done_after_chunks = Some(count);
        self
    }
}

#[derive(Debug)]
struct DeviceState {
    model: SimulatedDevice,
    region: usize,
    next: u16,
    memory: BTreeMap<u16, u8>,
    chunks_seen: usize,
    chunks_accepted: usize,
    garbage_left: usize,
    confirms: usize,
    received: Vec<ChunkFrame>,
}

impl DeviceState {
    fn new(model: SimulatedDevice) -> Self {
        let garbage_left = model.garbage_reads;
        let mut state = Self {
            model,
            region: 0,
            next: NEXT_ADDRESS_DONE,
            memory: BTreeMap::new(),
            chunks_seen: 0,
            chunks_accepted: 0,
            garbage_left,
            confirms: 0,
            received: Vec::new(),
        };
        state.reset_reception();
        state
    }

    fn reset_reception(&mut self) {
        self.region = 0;
        self.next = self
            .model
            .regions
            .first()
            .map(|r| r.start)
            .unwrap_or(NEXT_ADDRESS_DONE);
        self.memory.clear();
        self.chunks_accepted = 0;
    }

    fn complete(&self) -> bool {
        self.next == NEXT_ADDRESS_DONE
    }

    fn handle(&mut self, opcode: u8, payload: &[u8]) -> Option<Vec<u8>> {
        let commands = self.model.commands;
        if opcode == commands.opcode(Command::Version) {
            // Reception restarts whenever the version is queried.
            self.reset_reception();
            Some(encode_word(self.model.version))
        } else if opcode == commands.opcode(Command::NextAddress) {
            if self.garbage_left > 0 {
                self.garbage_left -= 1;
                let noise = 0x0101u16.wrapping_mul(self.garbage_left as u16 + 1) | 1;
                return Some(encode_word(noise));
            }
            Some(encode_word(self.next))
        } else if opcode == commands.opcode(Command::Chunk) {
            let frame = ChunkFrame::from_bytes(payload).ok()?;
            let index = self.chunks_seen;
            self.chunks_seen += 1;
            self.received.push(frame);
            if !self.model.drop_chunks.contains(&index) {
                self.accept(&frame);
            }
            Some(Vec::new())
        } else if opcode == commands.opcode(Command::Confirm) {
            self.confirms += 1;
            if self.complete() && !self.model.regions.is_empty() {
                let start = self.model.regions[0].start;
                let lo = self.memory.get(&start).copied().unwrap_or(0);
                let hi = self.memory.get(&start.wrapping_add(1)).copied().unwrap_or(0);
                self.model.version = u16::from_le_bytes([lo, hi]);
            }
            if self.model.silent_confirm {
                None
            } else {
                Some(Vec::new())
            }
        } else {
            None
        }
    }

    fn accept(&mut self, frame: &ChunkFrame) {
        if self.complete() || frame.address != self.next {
            return;
        }
        for (i, &b) in frame.data.iter().enumerate() {
            self.memory.insert(frame.address.wrapping_add(i as u16), b);
        }
        self.chunks_accepted += 1;

        let region = self.model.regions[self.region];
        let advanced = self.next as u32 + CHUNK_SIZE as u32;
        if advanced < region.end() {
            self.next = advanced as u16;
        } else if self.region + 1 < self.model.regions.len() {
            self.region += 1;
            self.next = self.model.regions[self.region].start;
        } else {
            self.next = NEXT_ADDRESS_DONE;
        }

        if self.model.done_after_chunks == Some(self.chunks_accepted) {
            self.next = NEXT_ADDRESS_DONE;
        }
    }
}

/// A bus populated with simulated devices.
pub struct SimulatedBus {
    devices: Mutex<Vec<DeviceState>>,
    transactions: Mutex<Vec<(u8, u8)>>,
}

impl SimulatedBus {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices: Mutex::new(devices.into_iter().map(DeviceState::new).collect()),
            transactions: Mutex::new(Vec::new()),
        }
    }

    fn with_device<R>(&self, address: u8, f: impl FnOnce(&DeviceState) -> R) -> Option<R> {
        let devices = self.devices.lock().unwrap();
        devices
            .iter()
            .find(|d| d.model.device.address == address)
            .map(f)
    }

    /// Firmware version the device is running.
    pub fn version(&self, address: u8) -> Option<u16> {
        self.with_device(address, |d| d.model.version)
    }

    /// Number of chunk commands that reached the device.
    pub fn chunks_seen(&self, address: u8) -> usize {
        self.with_device(address, |d| d.chunks_seen).unwrap_or(0)
    }

    /// Chunk frames in arrival order.
    pub fn received(&self, address: u8) -> Vec<ChunkFrame> {
        self.with_device(address, |d| d.received.clone())
            .unwrap_or_default()
    }

    /// Number of confirm commands that reached the device.
    pub fn confirms(&self, address: u8) -> usize {
        self.with_device(address, |d| d.confirms).unwrap_or(0)
    }

    /// Contents written to `start..start + len`, `None` for unwritten bytes.
    pub fn memory(&self, address: u8, start: u16, len: usize) -> Vec<Option<u8>> {
        self.with_device(address, |d| {
            (0..len)
                .map(|i| d.memory.get(&start.wrapping_add(i as u16)).copied())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Every `(address, opcode)` pair transacted, including unanswered ones.
    pub fn transactions(&self) -> Vec<(u8, u8)> {
        self.transactions.lock().unwrap().clone()
    }
}

impl BusTransport for SimulatedBus {
    fn transact(
        &self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.transactions.lock().unwrap().push((address, opcode));
        let timed_out = TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };
        let mut devices = self.devices.lock().unwrap();
        let Some(state) = devices
            .iter_mut()
            .find(|d| d.model.device.address == address)
        else {
            return Err(timed_out);
        };
        if state.model.absent {
            return Err(timed_out);
        }
        state.handle(opcode, payload).ok_or(timed_out)
    }

    fn devices(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.model.device.clone())
            .collect())
    }
}
