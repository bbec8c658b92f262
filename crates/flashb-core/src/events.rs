//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a run without tight
//! coupling to the transfer logic.

use std::fmt;

use crate::device::Device;
use crate::image::Half;

/// Stages of a single device update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// Querying version and next address.
    Probe,
    /// Streaming sections.
    Transfer,
    /// Sending the confirm handshake.
    Confirm,
    /// Device update finished.
    Complete,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Probe => write!(f, "Probe"),
            FlashPhase::Transfer => write!(f, "Transfer"),
            FlashPhase::Confirm => write!(f, "Confirm"),
            FlashPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// Device matched the filter and is about to be probed.
    DeviceFound { device: Device },
    /// Device reported its running firmware version.
    VersionRead { device: Device, version: u16 },
    /// Device was left alone.
    DeviceSkipped { device: Device, reason: String },
    /// Phase changed for the current device.
    PhaseChanged { device: Device, phase: FlashPhase },
    /// The device asked for this half.
    HalfSelected { device: Device, half: Half },
    /// Section progress: bytes of `label` delivered so far.
    Progress {
        label: String,
        current: u64,
        total: u64,
    },
    /// Next-address reads disagreed and were retried.
    ReadRetry { attempt: usize, first: u16, second: u16 },
    /// Device update finished.
    DeviceComplete { device: Device, version: u16 },
}

/// Observer trait for receiving flash events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceFound { device } => {
                tracing::info!(device = %device, "Device found");
            }
            FlashEvent::VersionRead { device, version } => {
                tracing::info!(device = %device, version = %format!("{:x}", version), "Existing firmware version");
            }
            FlashEvent::DeviceSkipped { device, reason } => {
                tracing::warn!(device = %device, "Skipping device: {}", reason);
            }
            FlashEvent::PhaseChanged { device, phase } => {
                tracing::debug!(device = %device, phase = %phase, "Phase changed");
            }
            FlashEvent::HalfSelected { device, half } => {
                tracing::info!(device = %device, "Sending {}", half);
            }
            FlashEvent::Progress {
                label,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::trace!(section = %label, progress = %format!("{}%", pct), "Progress");
            }
            FlashEvent::ReadRetry {
                attempt,
                first,
                second,
            } => {
                tracing::debug!(
                    attempt,
                    first = %format!("0x{:04X}", first),
                    second = %format!("0x{:04X}", second),
                    "Next address reads disagree"
                );
            }
            FlashEvent::DeviceComplete { device, version } => {
                tracing::info!(device = %device, version = %format!("{:x}", version), "Update complete");
            }
        }
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingObserver;
