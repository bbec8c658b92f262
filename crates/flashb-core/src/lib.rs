//! flashb-core: host side of the MSP430 firmware update protocol.
//!
//! This crate streams a firmware image to a microcontroller over a
//! request/response bus, letting the device drive the transfer cursor, and
//! then commits the update with a repeated confirm handshake.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command table, chunk frame layout
//! - **Transport**: Bus abstraction (i2c-dev, mock, simulated devices)
//! - **Image / Loader**: Sections, bottom/top image pair, ELF extraction
//! - **Config**: TOML configuration and per-board protocol settings
//! - **Engine**: Version/next-address/chunk/confirm operations and the
//!   section streaming loop
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator (image selection, per-device flow)
//!
//! # Example
//!
//! ```no_run
//! use flashb_core::config::FlashConfig;
//! use flashb_core::device::Device;
//! use flashb_core::loader::load_sections;
//! use flashb_core::session::{FlashSession, SessionOptions};
//! use flashb_core::transport::I2cTransport;
//!
//! let file = FlashConfig::load_from_file("flashb.toml").unwrap();
//! let config = file.protocol_config("motor").unwrap();
//! let device = Device::new(file.board_address("motor").unwrap(), "motor");
//! let bus = I2cTransport::open(file.bus_device().unwrap(), device).unwrap();
//!
//! let session = FlashSession::new(&bus, &config, SessionOptions::for_board("motor"));
//! let report = session
//!     .run(load_sections("bottom.elf").unwrap(), load_sections("top.elf").unwrap())
//!     .expect("update failed");
//! println!("updated {} device(s)", report.updated());
//! ```

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod image;
pub mod loader;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{ConfigError, FlashConfig, ProtocolConfig};
pub use device::{Device, DeviceFilter};
pub use engine::FirmwareEngine;
pub use error::{ErrorScope, FlashError};
pub use events::{FlashEvent, FlashObserver, FlashPhase, NullObserver, TracingObserver};
pub use image::{Half, Image, ImagePair, Section};
pub use loader::{LoadError, load_sections};
pub use protocol::{ChunkFrame, Command, CommandTable};
pub use session::{DeviceOutcome, DeviceReport, FlashSession, RunReport, SessionOptions};
pub use transport::{BusTransport, I2cTransport, MockTransport, TransportError};
