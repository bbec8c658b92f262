//! Flash session - high-level orchestrator for a run.
//!
//! Validates the image pair, picks the devices to update and walks each
//! one through probe, transfer and confirm. Errors scoped to a device skip
//! that device; anything else ends the run.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::ProtocolConfig;
use crate::device::{Device, DeviceFilter};
use crate::engine::FirmwareEngine;
use crate::error::FlashError;
use crate::events::{FlashEvent, FlashObserver, FlashPhase, TracingObserver};
use crate::image::{Half, Image, ImagePair};
use crate::transport::BusTransport;

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Devices to update.
    pub filter: DeviceFilter,
    /// Flash even when the device already runs the target version.
    pub force: bool,
}

impl SessionOptions {
    pub fn for_board(board: impl Into<String>) -> Self {
        Self {
            filter: DeviceFilter::Board(board.into()),
            force: false,
        }
    }
}

/// What happened to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// New firmware sent and confirmed.
    Updated { from: u16, to: u16, half: Half },
    /// Already running the target version.
    UpToDate { version: u16 },
    /// Left alone after a device-scoped error.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device: Device,
    pub outcome: DeviceOutcome,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Version carried by both images.
    pub target_version: u16,
    pub devices: Vec<DeviceReport>,
}

impl RunReport {
    pub fn updated(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| matches!(d.outcome, DeviceOutcome::Updated { .. }))
            .count()
    }
}

/// Flash session - drives one run over a bus.
pub struct FlashSession<'a, T: BusTransport, O: FlashObserver> {
    transport: &'a T,
    config: &'a ProtocolConfig,
    options: SessionOptions,
    observer: Arc<O>,
}

impl<'a, T: BusTransport> FlashSession<'a, T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: &'a T, config: &'a ProtocolConfig, options: SessionOptions) -> Self {
        Self::with_observer(transport, config, options, Arc::new(TracingObserver))
    }
}

impl<'a, T: BusTransport, O: FlashObserver> FlashSession<'a, T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(
        transport: &'a T,
        config: &'a ProtocolConfig,
        options: SessionOptions,
        observer: Arc<O>,
    ) -> Self {
        Self {
            transport,
            config,
            options,
            observer,
        }
    }

    fn emit(&self, event: FlashEvent) {
        self.observer.on_event(&event);
    }

    fn engine(&self) -> FirmwareEngine<'_, T, O> {
        FirmwareEngine::new(self.transport, self.config, self.observer.as_ref())
    }

    /// Update every selected device from the two images, in either order.
    #[instrument(skip_all, fields(board = %self.config.board))]
    pub fn run(&self, first: Image, second: Image) -> Result<RunReport, FlashError> {
        let images = ImagePair::new(
            first,
            second,
            self.config.bottom_address,
            self.config.top_address,
        )?;
        info!(version = %format!("{:x}", images.version()), "Images validated");

        let devices = self.select_devices()?;
        let mut reports = Vec::with_capacity(devices.len());

        for device in devices {
            let outcome = match self.update_device(&images, &device) {
                Ok(outcome) => outcome,
                Err(e) if e.is_device_local() => {
                    let reason = e.to_string();
                    self.emit(FlashEvent::DeviceSkipped {
                        device: device.clone(),
                        reason: reason.clone(),
                    });
                    DeviceOutcome::Skipped { reason }
                }
                Err(e) => return Err(e),
            };
            reports.push(DeviceReport { device, outcome });
        }

        Ok(RunReport {
            target_version: images.version(),
            devices: reports,
        })
    }

    /// Enumerate the bus and apply the device filter.
    pub fn select_devices(&self) -> Result<Vec<Device>, FlashError> {
        let devices = self.transport.devices().map_err(FlashError::Enumerate)?;

        match &self.options.filter {
            DeviceFilter::Board(board) => Ok(devices
                .into_iter()
                .filter(|d| &d.board == board)
                .collect()),
            DeviceFilter::Address { address, board } => {
                let device = devices
                    .into_iter()
                    .find(|d| d.address == *address)
                    .ok_or(FlashError::DeviceNotFound { address: *address })?;
                if &device.board != board {
                    return Err(FlashError::BoardMismatch {
                        address: *address,
                        expected: board.clone(),
                        actual: device.board,
                    });
                }
                Ok(vec![device])
            }
        }
    }

    /// Probe one device, send it the half it asks for and confirm.
    #[instrument(skip(self, images, device), fields(device = %device))]
    pub fn update_device(
        &self,
        images: &ImagePair,
        device: &Device,
    ) -> Result<DeviceOutcome, FlashError> {
        let engine = self.engine();
        self.emit(FlashEvent::DeviceFound {
            device: device.clone(),
        });
        self.phase(device, FlashPhase::Probe);

        let version = engine.get_fw_version(device)?;
        self.emit(FlashEvent::VersionRead {
            device: device.clone(),
            version,
        });

        let target = images.version();
        if version == target && !self.options.force {
            self.emit(FlashEvent::DeviceSkipped {
                device: device.clone(),
                reason: format!("already running version {:x}", version),
            });
            return Ok(DeviceOutcome::UpToDate { version });
        }

        let half = self.requested_half(engine.get_next_address(device)?)?;
        self.emit(FlashEvent::HalfSelected {
            device: device.clone(),
            half,
        });

        let image = images.get(half);
        image.check_vectors()?;

        self.phase(device, FlashPhase::Transfer);
        engine.send_section(device, &image.text, true)?;
        engine.send_section(device, &image.vectors, false)?;

        self.phase(device, FlashPhase::Confirm);
        engine.confirm_crc(device);

        self.phase(device, FlashPhase::Complete);
        self.emit(FlashEvent::DeviceComplete {
            device: device.clone(),
            version: target,
        });
        Ok(DeviceOutcome::Updated {
            from: version,
            to: target,
            half,
        })
    }

    fn requested_half(&self, next: u16) -> Result<Half, FlashError> {
        if next == self.config.bottom_address {
            Ok(Half::Bottom)
        } else if next == self.config.top_address {
            Ok(Half::Top)
        } else {
            Err(FlashError::UnexpectedAddress {
                address: next,
                bottom: self.config.bottom_address,
                top: self.config.top_address,
            })
        }
    }

    fn phase(&self, device: &Device, phase: FlashPhase) {
        self.emit(FlashEvent::PhaseChanged {
            device: device.clone(),
            phase,
        });
    }
}
