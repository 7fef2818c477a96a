//! Core traits and types for the serial port abstraction.
//!
//! `SerialPortAdapter` lets the transport drive either a real port or a
//! `MockSerialPort` without knowing which.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Baud rates a printer link may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B250000,
}

impl BaudRate {
    /// Every supported rate, slowest first.
    pub const ALL: [BaudRate; 7] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
        BaudRate::B250000,
    ];

    /// Bits per second.
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
            BaudRate::B230400 => 230400,
            BaudRate::B250000 => 250000,
        }
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        BaudRate::B115200
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = PortError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or_else(|| PortError::config(format!("unsupported baud rate {value}")))
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.as_u32()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Parameters used when opening a printer port.
///
/// Printers always talk 8N1 without flow control, so only the rate and the
/// read timeout are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfiguration {
    pub baud_rate: BaudRate,

    /// How long a single read may block before reporting "no data".
    pub read_timeout: Duration,
}

impl PortConfiguration {
    pub fn new(baud_rate: BaudRate) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::default(),
            read_timeout: Duration::from_millis(250),
        }
    }
}

/// Trait for serial port I/O operations.
///
/// This trait abstracts over synchronous serial port operations, allowing both
/// real hardware ports and mock implementations for testing.
pub trait SerialPortAdapter: Send + fmt::Debug {
    /// Write bytes to the serial port.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read bytes from the serial port into the provided buffer.
    ///
    /// A read that times out without data returns an error for which
    /// [`PortError::is_timeout`] is true.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Discard unread input and unsent output.
    fn clear_buffers(&mut self) -> Result<(), PortError>;

    /// Second handle to the same device, so reads and writes can happen on
    /// different threads.
    fn try_clone(&self) -> Result<Box<dyn SerialPortAdapter>, PortError>;
}

/// Opens adapters by address. The serial transport goes through this seam so
/// tests can substitute `MockSerialPort`.
pub trait PortOpener: Send + Sync {
    fn open(
        &self,
        address: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError>;
}
