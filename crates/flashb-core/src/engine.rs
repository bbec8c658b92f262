//! Firmware transfer engine.
//!
//! Implements the four device operations (version query, next-address
//! query, chunk send, confirm) and the section streaming loop built on
//! them. The device, not the host, owns the transfer cursor: after every
//! chunk the engine asks where the device wants to continue, which is also
//! how dropped or corrupted chunks get resent.

use tracing::{debug, instrument, trace, warn};

use crate::config::ProtocolConfig;
use crate::device::Device;
use crate::error::FlashError;
use crate::events::{FlashEvent, FlashObserver};
use crate::image::Section;
use crate::protocol::{
    CHUNK_FW_VERSION, CHUNK_SIZE, CONFIRM_PASSWORD, CONFIRM_REPEATS, ChunkFrame, Command,
    MAX_NEXT_ADDRESS_ATTEMPTS, NEXT_ADDRESS_DONE, decode_word,
};
use crate::transport::{BusTransport, TransportError};

pub struct FirmwareEngine<'a, T: BusTransport + ?Sized, O: FlashObserver + ?Sized> {
    transport: &'a T,
    config: &'a ProtocolConfig,
    observer: &'a O,
    max_read_attempts: usize,
}

impl<'a, T: BusTransport + ?Sized, O: FlashObserver + ?Sized> FirmwareEngine<'a, T, O> {
    pub fn new(transport: &'a T, config: &'a ProtocolConfig, observer: &'a O) -> Self {
        Self {
            transport,
            config,
            observer,
            max_read_attempts: MAX_NEXT_ADDRESS_ATTEMPTS,
        }
    }

    /// Limit how many pairs of next-address reads may disagree.
    pub fn with_max_read_attempts(mut self, attempts: usize) -> Self {
        self.max_read_attempts = attempts.max(1);
        self
    }

    fn call(&self, device: &Device, cmd: Command, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        trace!(device = %device, command = %cmd, len = payload.len(), "Transact");
        self.transport.transact(
            device.address,
            self.config.opcode(cmd),
            payload,
            self.config.timeout,
        )
    }

    /// Query the running firmware version.
    ///
    /// The device also restarts its reception state when it sees this.
    pub fn get_fw_version(&self, device: &Device) -> Result<u16, FlashError> {
        let absent = |source: TransportError| FlashError::DeviceAbsent {
            device: device.clone(),
            source,
        };
        let response = self.call(device, Command::Version, &[]).map_err(absent)?;
        decode_word(&response).map_err(|e| absent(TransportError::BadResponse(e.to_string())))
    }

    /// One unverified read of the device's next expected address.
    pub fn get_next_address_once(&self, device: &Device) -> Result<u16, FlashError> {
        let response = self
            .call(device, Command::NextAddress, &[])
            .map_err(FlashError::NextAddressRead)?;
        Ok(decode_word(&response)?)
    }

    /// Read the next expected address until two consecutive reads agree.
    pub fn get_next_address(&self, device: &Device) -> Result<u16, FlashError> {
        for attempt in 1..=self.max_read_attempts {
            let first = self.get_next_address_once(device)?;
            let second = self.get_next_address_once(device)?;
            if first == second {
                return Ok(first);
            }
            self.observer.on_event(&FlashEvent::ReadRetry {
                attempt,
                first,
                second,
            });
        }
        Err(FlashError::ConsistencyCheckFailed {
            attempts: self.max_read_attempts,
        })
    }

    /// Write one block. Any missing acknowledgement is fatal.
    pub fn send_block(&self, device: &Device, frame: &ChunkFrame) -> Result<(), FlashError> {
        self.call(device, Command::Chunk, &frame.to_bytes())
            .map_err(|source| FlashError::WriteFailed {
                address: frame.address,
                source,
            })?;
        Ok(())
    }

    /// Stream `section` to the device, following the cursor it reports.
    ///
    /// With `check_first` the device must already be asking for the start
    /// of the section. Without it the device is assumed to be positioned
    /// there, as it is for a section sent straight after another.
    #[instrument(skip(self, device, section), fields(device = %device, section = %section.name))]
    pub fn send_section(
        &self,
        device: &Device,
        section: &Section,
        check_first: bool,
    ) -> Result<(), FlashError> {
        let start = section.start_address;
        let end = section.end_address();
        let total = section.len() as u64;

        let mut next = if check_first {
            let next = self.get_next_address(device)?;
            if next != start {
                return Err(FlashError::WrongImage {
                    expected: next,
                    actual: start,
                });
            }
            next
        } else {
            start
        };

        // The device reports 0 once it has everything.
        while (next as u32) < end && next != NEXT_ADDRESS_DONE {
            if next as usize % CHUNK_SIZE != 0 || next < start {
                return Err(FlashError::MisalignedCursor { next, start });
            }

            let offset = (next - start) as usize;
            let rem = section.len() - offset;
            self.progress(section, offset as u64, total);

            let frame = if rem < CHUNK_SIZE {
                ChunkFrame::padded(CHUNK_FW_VERSION, next, &section.data[offset..])
            } else {
                ChunkFrame::new(
                    CHUNK_FW_VERSION,
                    next,
                    &section.data[offset..offset + CHUNK_SIZE],
                )?
            };
            self.send_block(device, &frame)?;

            let reported = self.get_next_address(device)?;
            trace!(sent = %format!("0x{:04X}", next), next = %format!("0x{:04X}", reported), "Block sent");
            next = reported;

            if check_first && next < start && next != NEXT_ADDRESS_DONE {
                warn!(
                    next = %format!("0x{:04X}", next),
                    start = %format!("0x{:04X}", start),
                    "Device reported address below section, restarting from section start"
                );
                next = start;
            }
        }

        self.progress(section, total, total);
        debug!("Section complete");
        Ok(())
    }

    /// Tell the device to switch to the new firmware.
    ///
    /// The device may reset before it can acknowledge, so the command is
    /// sent [`CONFIRM_REPEATS`] times and every outcome is ignored.
    pub fn confirm_crc(&self, device: &Device) {
        for i in 0..CONFIRM_REPEATS {
            if let Err(e) = self.call(device, Command::Confirm, &CONFIRM_PASSWORD) {
                trace!(attempt = i, error = %e, "Confirm not acknowledged");
            }
        }
    }

    fn progress(&self, section: &Section, current: u64, total: u64) {
        self.observer.on_event(&FlashEvent::Progress {
            label: section.name.clone(),
            current,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NullObserver, RecordingObserver};
    use crate::protocol::{CommandTable, PAD_BYTE};
    use crate::transport::MockTransport;
    use std::time::Duration;

    const VER: u8 = 0x11;
    const CHUNK: u8 = 0x12;
    const NEXT: u8 = 0x13;
    const CONFIRM: u8 = 0x15;

    fn config() -> ProtocolConfig {
        ProtocolConfig::new(
            "motor",
            CommandTable::new(VER, CHUNK, NEXT, 0x14, CONFIRM),
            0x1000,
            0x2000,
            Duration::from_millis(200),
        )
        .unwrap()
    }

    fn device() -> Device {
        Device::new(0x0F, "motor")
    }

    fn section(start: u16, len: usize) -> Section {
        Section::new(".text", start, (0..len).map(|i| i as u8).collect())
    }

    /// Queue an agreeing pair of next-address reads.
    fn queue_next(mock: &MockTransport, value: u16) {
        mock.queue_words(&[value, value]);
    }

    fn chunk_frames(mock: &MockTransport) -> Vec<ChunkFrame> {
        mock.get_requests()
            .into_iter()
            .filter(|r| r.opcode == CHUNK)
            .map(|r| ChunkFrame::from_bytes(&r.payload).unwrap())
            .collect()
    }

    #[test]
    fn test_version_query() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        mock.queue_response(&[0x07, 0x01]);
        assert_eq!(engine.get_fw_version(&device()).unwrap(), 0x0107);

        let requests = mock.get_requests();
        assert_eq!(requests[0].address, 0x0F);
        assert_eq!(requests[0].opcode, VER);
        assert!(requests[0].payload.is_empty());
    }

    #[test]
    fn test_version_unanswered_is_device_local() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        let err = engine.get_fw_version(&device()).unwrap_err();
        assert!(matches!(err, FlashError::DeviceAbsent { .. }));
        assert!(err.is_device_local());

        mock.queue_response(&[0x07]);
        assert!(matches!(
            engine.get_fw_version(&device()),
            Err(FlashError::DeviceAbsent { .. })
        ));
    }

    #[test]
    fn test_next_address_needs_agreeing_pair() {
        let mock = MockTransport::new();
        let config = config();
        let observer = RecordingObserver::new();
        let engine = FirmwareEngine::new(&mock, &config, &observer);

        mock.queue_words(&[5, 7, 7, 7]);
        assert_eq!(engine.get_next_address(&device()).unwrap(), 7);
        assert_eq!(mock.count_opcode(NEXT), 4);
        assert_eq!(
            observer.events(),
            vec![FlashEvent::ReadRetry {
                attempt: 1,
                first: 5,
                second: 7
            }]
        );
    }

    #[test]
    fn test_next_address_reads_in_pairs() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        // 7,7 straddles two pairs and does not count as agreement.
        mock.queue_words(&[5, 7, 7, 9, 9, 9]);
        assert_eq!(engine.get_next_address(&device()).unwrap(), 9);
        assert_eq!(mock.count_opcode(NEXT), 6);
    }

    #[test]
    fn test_next_address_first_pair() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        mock.queue_words(&[5, 5, 7, 7]);
        assert_eq!(engine.get_next_address(&device()).unwrap(), 5);
        assert_eq!(mock.count_opcode(NEXT), 2);
        assert_eq!(mock.pending_responses(), 2);
    }

    #[test]
    fn test_next_address_gives_up() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver).with_max_read_attempts(3);

        mock.queue_words(&[1, 2, 1, 2, 1, 2, 3, 3]);
        assert!(matches!(
            engine.get_next_address(&device()),
            Err(FlashError::ConsistencyCheckFailed { attempts: 3 })
        ));
        assert_eq!(mock.count_opcode(NEXT), 6);
    }

    #[test]
    fn test_next_address_timeout_is_fatal() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        mock.queue_word(0x1000);
        mock.queue_timeout();
        let err = engine.get_next_address(&device()).unwrap_err();
        assert!(matches!(err, FlashError::NextAddressRead(_)));
        assert!(!err.is_device_local());
    }

    #[test]
    fn test_send_block_layout() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        mock.queue_ack();
        let frame = ChunkFrame::new(0, 0x1230, &[0x42; 16]).unwrap();
        engine.send_block(&device(), &frame).unwrap();

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].opcode, CHUNK);
        assert_eq!(requests[0].payload.len(), 20);
        assert_eq!(&requests[0].payload[..4], &[0x00, 0x00, 0x30, 0x12]);
    }

    #[test]
    fn test_send_block_unacknowledged() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        let frame = ChunkFrame::new(0, 0x1230, &[0x42; 16]).unwrap();
        let err = engine.send_block(&device(), &frame).unwrap_err();
        assert!(matches!(err, FlashError::WriteFailed { address: 0x1230, .. }));
        assert_eq!(mock.get_requests().len(), 1);
    }

    #[test]
    fn test_send_section_pads_tail() {
        let mock = MockTransport::new();
        let config = config();
        let observer = RecordingObserver::new();
        let engine = FirmwareEngine::new(&mock, &config, &observer);
        let section = section(0x1000, 20);

        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0x1010);
        mock.queue_ack();
        queue_next(&mock, 0x2000);

        engine.send_section(&device(), &section, true).unwrap();

        let frames = chunk_frames(&mock);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].address, 0x1000);
        assert_eq!(&frames[0].data[..], &section.data[..16]);
        assert_eq!(frames[1].address, 0x1010);
        assert_eq!(&frames[1].data[..4], &section.data[16..20]);
        assert!(frames[1].data[4..].iter().all(|&b| b == PAD_BYTE));
        assert!(frames.iter().all(|f| f.fw_version == 0));

        assert_eq!(
            observer.progress_for(".text"),
            vec![(0, 20), (16, 20), (20, 20)]
        );
    }

    #[test]
    fn test_send_section_stops_at_done_sentinel() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0);

        engine
            .send_section(&device(), &section(0x1000, 64), true)
            .unwrap();
        assert_eq!(mock.count_opcode(CHUNK), 1);
        assert_eq!(mock.pending_responses(), 0);
    }

    #[test]
    fn test_send_section_wrong_image() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        queue_next(&mock, 0x2000);
        let err = engine
            .send_section(&device(), &section(0x1000, 32), true)
            .unwrap_err();
        assert!(matches!(
            err,
            FlashError::WrongImage {
                expected: 0x2000,
                actual: 0x1000
            }
        ));
        assert_eq!(mock.count_opcode(CHUNK), 0);
    }

    #[test]
    fn test_send_section_resends_rejected_chunk() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0x1010);
        mock.queue_ack();
        queue_next(&mock, 0);

        engine
            .send_section(&device(), &section(0x1000, 32), true)
            .unwrap();
        let addresses: Vec<u16> = chunk_frames(&mock).iter().map(|f| f.address).collect();
        assert_eq!(addresses, vec![0x1000, 0x1000, 0x1010]);
    }

    #[test]
    fn test_send_section_clamps_low_address() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0x0800);
        mock.queue_ack();
        queue_next(&mock, 0x2000);

        engine
            .send_section(&device(), &section(0x1000, 16), true)
            .unwrap();
        let addresses: Vec<u16> = chunk_frames(&mock).iter().map(|f| f.address).collect();
        assert_eq!(addresses, vec![0x1000, 0x1000]);
    }

    #[test]
    fn test_send_section_misaligned_cursor() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        queue_next(&mock, 0x1000);
        mock.queue_ack();
        queue_next(&mock, 0x1008);

        let err = engine
            .send_section(&device(), &section(0x1000, 32), true)
            .unwrap_err();
        assert!(matches!(
            err,
            FlashError::MisalignedCursor {
                next: 0x1008,
                start: 0x1000
            }
        ));
    }

    #[test]
    fn test_send_section_unchecked_start() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);
        let vectors = Section::new(".vectors", 0xFFE0, vec![0xEE; 32]);

        mock.queue_ack();
        queue_next(&mock, 0xFFF0);
        mock.queue_ack();
        queue_next(&mock, 0);

        engine.send_section(&device(), &vectors, false).unwrap();
        let requests = mock.get_requests();
        assert_eq!(requests[0].opcode, CHUNK);
        let addresses: Vec<u16> = chunk_frames(&mock).iter().map(|f| f.address).collect();
        assert_eq!(addresses, vec![0xFFE0, 0xFFF0]);
    }

    #[test]
    fn test_send_section_unchecked_below_start_is_fatal() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);
        let vectors = Section::new(".vectors", 0xFFE0, vec![0xEE; 32]);

        mock.queue_ack();
        queue_next(&mock, 0x1000);

        assert!(matches!(
            engine.send_section(&device(), &vectors, false),
            Err(FlashError::MisalignedCursor { next: 0x1000, .. })
        ));
    }

    #[test]
    fn test_confirm_repeats_and_ignores_failures() {
        let mock = MockTransport::new();
        let config = config();
        let engine = FirmwareEngine::new(&mock, &config, &NullObserver);

        mock.queue_ack();
        engine.confirm_crc(&device());

        let requests = mock.get_requests();
        assert_eq!(requests.len(), CONFIRM_REPEATS);
        assert!(
            requests
                .iter()
                .all(|r| r.opcode == CONFIRM && r.payload == vec![0, 0, 0, 0])
        );
    }
}
