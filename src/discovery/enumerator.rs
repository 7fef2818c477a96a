//! Serial port enumeration.

use serde::Serialize;
use serialport::SerialPortType;
use std::collections::HashSet;
use tracing::warn;

/// Source of the current set of serial addresses. Queried fresh on every
/// call; implementations must not cache.
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Vec<String>;
}

/// Enumerates ports through the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemPortEnumerator {
    exclude: HashSet<String>,
}

impl SystemPortEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never report these addresses (e.g. a modem or debug console).
    pub fn excluding<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude: ports.into_iter().map(Into::into).collect(),
        }
    }

    /// Port list with USB identification where the OS provides it.
    pub fn describe_ports(&self) -> Vec<PortDetails> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .filter(|port| !self.exclude.contains(&port.port_name))
                .map(PortDetails::from)
                .collect(),
            Err(e) => {
                warn!(error = %e, "serial port enumeration failed");
                Vec::new()
            }
        }
    }
}

impl PortEnumerator for SystemPortEnumerator {
    fn list_ports(&self) -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|port| port.port_name)
                .filter(|name| !self.exclude.contains(name))
                .collect(),
            Err(e) => {
                warn!(error = %e, "serial port enumeration failed");
                Vec::new()
            }
        }
    }
}

/// One enumerated port, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDetails {
    pub port_name: String,
    pub transport: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl From<serialport::SerialPortInfo> for PortDetails {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut details = PortDetails {
            port_name: info.port_name,
            transport: "unknown",
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        };
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                details.transport = "usb";
                details.vid = Some(format!("0x{:04x}", usb.vid));
                details.pid = Some(format!("0x{:04x}", usb.pid));
                details.manufacturer = usb.manufacturer;
                details.product = usb.product;
            }
            SerialPortType::BluetoothPort => details.transport = "bluetooth",
            SerialPortType::PciPort => details.transport = "pci",
            SerialPortType::Unknown => {}
        }
        details
    }
}
