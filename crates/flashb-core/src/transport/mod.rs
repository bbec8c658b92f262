//! Transport layer module.

pub mod i2c;
pub mod mock;
pub mod sim;
pub mod traits;

pub use i2c::I2cTransport;
pub use mock::MockTransport;
pub use sim::{Region, SimulatedBus, SimulatedDevice};
pub use traits::{BusTransport, TransportError};
