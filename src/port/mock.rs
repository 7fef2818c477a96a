//! Mock serial port implementation for testing.
//!
//! `MockSerialPort` simulates a printer's serial line without hardware. Clones
//! share state, so a test can keep one handle to feed replies while the
//! transport owns another.

use super::error::PortError;
use super::traits::{PortConfiguration, PortOpener, SerialPortAdapter};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockPortState {
    /// Bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Every buffer passed to `write_bytes`.
    write_log: Vec<Vec<u8>>,
    /// Replies queued to be released only after the next write.
    replies_after_write: VecDeque<Vec<u8>>,
    /// Once set, every read and write fails as if the cable was pulled.
    unplugged: bool,
    buffers_cleared: bool,
}

/// Mock serial port implementation for testing.
///
/// # Example
/// ```
/// use serial_print_host::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
/// port.enqueue_read(b"start\n");
///
/// let mut buffer = [0u8; 16];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"start\n");
///
/// port.write_bytes(b"M105\n").unwrap();
/// assert_eq!(port.written_lines(), vec!["M105".to_string()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
        }
    }

    /// Enqueue bytes to be returned by subsequent reads.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Queue a reply that becomes readable after the next write, the way a
    /// device answers a command.
    pub fn reply_after_write(&self, data: &[u8]) {
        self.state.lock().replies_after_write.push_back(data.to_vec());
    }

    /// Simulate the device disappearing.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
    }

    /// Get a copy of all data written to the port.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Written data decoded as text lines, terminators removed.
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .write_log
            .iter()
            .flat_map(|chunk| {
                String::from_utf8_lossy(chunk)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn was_cleared(&self) -> bool {
        self.state.lock().buffers_cleared
    }

    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if state.unplugged {
            return Err(PortError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }

        state.write_log.push(data.to_vec());
        if let Some(reply) = state.replies_after_write.pop_front() {
            state.read_queue.extend(reply);
        }

        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if state.unplugged {
            return Err(PortError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            match state.read_queue.pop_front() {
                Some(queued) => {
                    *byte = queued;
                    bytes_read += 1;
                }
                None => break,
            }
        }

        if bytes_read == 0 {
            drop(state);
            // Behave like a real port blocking for a short read timeout.
            std::thread::sleep(std::time::Duration::from_millis(5));
            Err(PortError::Io(std::io::Error::from(
                std::io::ErrorKind::TimedOut,
            )))
        } else {
            Ok(bytes_read)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        let mut state = self.state.lock();
        state.read_queue.clear();
        state.buffers_cleared = true;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        Ok(Box::new(self.clone()))
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

/// Hands out registered mock ports by address; unknown addresses fail with
/// [`PortError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct MockPortOpener {
    ports: Arc<Mutex<HashMap<String, MockSerialPort>>>,
}

impl MockPortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port and return a handle sharing its state.
    pub fn register(&self, address: &str) -> MockSerialPort {
        let port = MockSerialPort::new(address);
        self.ports.lock().insert(address.to_string(), port.clone());
        port
    }
}

impl PortOpener for MockPortOpener {
    fn open(
        &self,
        address: &str,
        _config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        self.ports
            .lock()
            .get(address)
            .cloned()
            .map(|port| Box::new(port) as Box<dyn SerialPortAdapter>)
            .ok_or_else(|| PortError::not_found(address))
    }
}
