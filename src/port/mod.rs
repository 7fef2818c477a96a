//! Port abstraction layer for serial communication.
//!
//! Provides the adapter trait, the `serialport`-backed implementation and a
//! mock, so the transport above it can be tested without hardware.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockPortOpener, MockSerialPort};
pub use sync_port::{SyncSerialPort, SystemPortOpener};
pub use traits::*;
