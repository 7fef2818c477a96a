//! Serial-port transport with a blocking reader thread.
//!
//! The reader thread owns one clone of the port handle; writes go through a
//! second handle behind a mutex (the reader only writes during the handshake).
//! The thread holds the address claim, so the address becomes available again
//! only once the last handle is really closed.

use super::{
    terminated, ClaimGuard, LineBuffer, PortClaims, Transport, TransportError, TransportEvent,
    TransportFactory, TransportSink,
};
use crate::port::{
    BaudRate, PortConfiguration, PortOpener, SerialPortAdapter, SystemPortOpener,
};
use crate::protocol::commands::REQUEST_TEMPERATURE;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

type SharedPort = Arc<Mutex<Box<dyn SerialPortAdapter>>>;

/// Lines a device sends once its firmware is up and talking.
const ONLINE_GREETINGS: [&str; 2] = ["start", "Grbl "];

/// Tunables for [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct SerialTransportSettings {
    /// How long one read blocks before the reader re-checks its stop flag.
    pub read_timeout: Duration,
    /// Consecutive empty reads before the handshake probe is resent. Boards
    /// that reset on open (bootloader) can swallow the first probe.
    pub handshake_idle_reads: u32,
}

impl Default for SerialTransportSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(250),
            handshake_idle_reads: 15,
        }
    }
}

/// True if `line` proves the firmware is listening.
pub fn is_online_greeting(line: &str) -> bool {
    ONLINE_GREETINGS.iter().any(|greeting| line.starts_with(greeting))
        || line.starts_with("ok")
        || line.contains("T:")
}

struct Link {
    address: String,
    writer: SharedPort,
    sink: TransportSink,
    stop: Arc<AtomicBool>,
    offline_sent: Arc<AtomicBool>,
}

/// [`Transport`] over a real (or mock) serial port.
pub struct SerialTransport {
    opener: Arc<dyn PortOpener>,
    claims: PortClaims,
    settings: SerialTransportSettings,
    link: Option<Link>,
}

impl SerialTransport {
    pub fn new(
        opener: Arc<dyn PortOpener>,
        claims: PortClaims,
        settings: SerialTransportSettings,
    ) -> Self {
        Self {
            opener,
            claims,
            settings,
            link: None,
        }
    }

    fn spawn_reader(
        &self,
        reader: Box<dyn SerialPortAdapter>,
        link: &Link,
        claim: ClaimGuard,
    ) -> Result<(), TransportError> {
        let worker = ReaderWorker {
            reader,
            writer: Arc::clone(&link.writer),
            sink: link.sink.clone(),
            stop: Arc::clone(&link.stop),
            offline_sent: Arc::clone(&link.offline_sent),
            idle_reads_before_probe: self.settings.handshake_idle_reads.max(1),
            _claim: claim,
        };

        thread::Builder::new()
            .name(format!("serial-reader {}", link.address))
            .spawn(move || worker.run())
            .map(|_| ())
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, address: &str, baud: BaudRate, sink: TransportSink) -> Result<(), TransportError> {
        if self.link.is_some() {
            return Err(TransportError::PortUnavailable(address.to_string()));
        }

        let claim = self
            .claims
            .try_claim(address)
            .ok_or_else(|| TransportError::PortUnavailable(address.to_string()))?;

        let config = PortConfiguration {
            baud_rate: baud,
            read_timeout: self.settings.read_timeout,
        };
        let mut writer = self
            .opener
            .open(address, &config)
            .map_err(|e| TransportError::from_port(address, e))?;
        if let Err(e) = writer.clear_buffers() {
            debug!(address, error = %e, "could not clear port buffers");
        }
        let reader = writer
            .try_clone()
            .map_err(|e| TransportError::from_port(address, e))?;

        let link = Link {
            address: address.to_string(),
            writer: Arc::new(Mutex::new(writer)),
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            offline_sent: Arc::new(AtomicBool::new(false)),
        };
        self.spawn_reader(reader, &link, claim)?;

        info!(address, baud = %baud, "serial port opened");
        self.link = Some(link);
        Ok(())
    }

    fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        link.stop.store(true, Ordering::SeqCst);
        if !link.offline_sent.swap(true, Ordering::SeqCst) {
            link.sink.emit(TransportEvent::Offline);
        }
        info!(address = %link.address, "serial port closed");
    }

    fn write_line(&mut self, line: &str) {
        let Some(link) = self.link.as_ref() else {
            debug!(line, "write after close ignored");
            return;
        };
        if link.offline_sent.load(Ordering::SeqCst) {
            debug!(address = %link.address, line, "write on dead link ignored");
            return;
        }

        let payload = terminated(line);
        let result = link.writer.lock().write_bytes(payload.as_bytes());
        match result {
            Ok(_) => debug!(address = %link.address, line = payload.trim_end(), "sent"),
            Err(e) => {
                warn!(address = %link.address, error = %e, "serial write failed");
                link.sink.emit(TransportEvent::Error(e.to_string()));
                self.close();
            }
        }
    }

    fn is_open(&self) -> bool {
        self.link
            .as_ref()
            .map(|link| !link.offline_sent.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("address", &self.link.as_ref().map(|link| link.address.as_str()))
            .field("settings", &self.settings)
            .finish()
    }
}

struct ReaderWorker {
    reader: Box<dyn SerialPortAdapter>,
    writer: SharedPort,
    sink: TransportSink,
    stop: Arc<AtomicBool>,
    offline_sent: Arc<AtomicBool>,
    idle_reads_before_probe: u32,
    _claim: ClaimGuard,
}

impl ReaderWorker {
    fn run(mut self) {
        let mut lines = LineBuffer::new();
        let mut chunk = [0u8; 256];
        let mut online = false;
        let mut idle_reads = 0u32;

        self.probe();

        while !self.stop.load(Ordering::SeqCst) {
            match self.reader.read_bytes(&mut chunk) {
                Ok(0) => idle_reads += 1,
                Ok(n) => {
                    idle_reads = 0;
                    for line in lines.push(&chunk[..n]) {
                        if !online && is_online_greeting(&line) {
                            online = true;
                            info!(address = %self.sink.address(), "device online");
                            self.sink.emit(TransportEvent::Online);
                        }
                        self.sink.emit(TransportEvent::Line(line));
                    }
                }
                Err(e) if e.is_timeout() => idle_reads += 1,
                Err(e) => {
                    if !self.stop.load(Ordering::SeqCst) {
                        warn!(address = %self.sink.address(), error = %e, "serial read failed");
                        self.sink.emit(TransportEvent::Error(e.to_string()));
                        if !self.offline_sent.swap(true, Ordering::SeqCst) {
                            self.sink.emit(TransportEvent::Offline);
                        }
                    }
                    break;
                }
            }

            if !online && idle_reads >= self.idle_reads_before_probe {
                idle_reads = 0;
                self.probe();
            }
        }
        debug!(address = %self.sink.address(), "reader thread exiting");
    }

    /// Nudge the firmware with a temperature request; any answer counts as
    /// the handshake.
    fn probe(&self) {
        let payload = terminated(REQUEST_TEMPERATURE);
        if let Err(e) = self.writer.lock().write_bytes(payload.as_bytes()) {
            debug!(address = %self.sink.address(), error = %e, "handshake probe failed");
        }
    }
}

/// Builds [`SerialTransport`]s that share one claim registry.
#[derive(Clone)]
pub struct SerialTransportFactory {
    opener: Arc<dyn PortOpener>,
    claims: PortClaims,
    settings: SerialTransportSettings,
}

impl SerialTransportFactory {
    /// Factory for real hardware.
    pub fn system(settings: SerialTransportSettings) -> Self {
        Self::with_opener(Arc::new(SystemPortOpener), settings)
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>, settings: SerialTransportSettings) -> Self {
        Self {
            opener,
            claims: PortClaims::new(),
            settings,
        }
    }

    pub fn claims(&self) -> &PortClaims {
        &self.claims
    }
}

impl TransportFactory for SerialTransportFactory {
    fn create(&self, _address: &str) -> Box<dyn Transport> {
        Box::new(SerialTransport::new(
            Arc::clone(&self.opener),
            self.claims.clone(),
            self.settings.clone(),
        ))
    }
}
