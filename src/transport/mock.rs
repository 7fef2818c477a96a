//! In-memory transport for driving sessions and the engine in tests.
//!
//! A [`MockLink`] is the test's end of the wire: it records what the host
//! wrote and lets the test inject device lines and lifecycle events.

use super::{Transport, TransportError, TransportEvent, TransportFactory, TransportSink};
use crate::port::BaudRate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct LinkState {
    written: Vec<String>,
    sink: Option<TransportSink>,
    open: bool,
    fail_next_open: bool,
    baud: Option<BaudRate>,
    opens: usize,
}

/// Test-side handle shared with one or more [`MockTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written by the host so far.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Drain the written lines.
    pub fn take_written(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// Push an event as if the device or driver produced it. Ignored while
    /// the link has never been opened.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn go_online(&self) {
        self.emit(TransportEvent::Online);
    }

    /// Deliver one device line.
    pub fn receive(&self, line: &str) {
        self.emit(TransportEvent::Line(line.to_string()));
    }

    /// Make the next `open` fail with `PortUnavailable`.
    pub fn fail_next_open(&self) {
        self.state.lock().fail_next_open = true;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Rate used by the most recent open.
    pub fn baud_rate(&self) -> Option<BaudRate> {
        self.state.lock().baud
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }
}

/// [`Transport`] backed by a [`MockLink`].
#[derive(Debug)]
pub struct MockTransport {
    link: MockLink,
}

impl MockTransport {
    pub fn new(link: MockLink) -> Self {
        Self { link }
    }
}

impl Transport for MockTransport {
    fn open(&mut self, address: &str, baud: BaudRate, sink: TransportSink) -> Result<(), TransportError> {
        let mut state = self.link.state.lock();
        if state.fail_next_open {
            state.fail_next_open = false;
            return Err(TransportError::PortUnavailable(address.to_string()));
        }
        if state.open {
            return Err(TransportError::PortUnavailable(address.to_string()));
        }
        state.open = true;
        state.opens += 1;
        state.baud = Some(baud);
        state.sink = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        let sink = {
            let mut state = self.link.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Offline);
        }
    }

    fn write_line(&mut self, line: &str) {
        let mut state = self.link.state.lock();
        if state.open {
            state.written.push(line.trim_end().to_string());
        }
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }
}

/// Hands out [`MockTransport`]s, one [`MockLink`] per address.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    links: Arc<Mutex<HashMap<String, MockLink>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The link for `address`, created on first use.
    pub fn link(&self, address: &str) -> MockLink {
        self.links
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, address: &str) -> Box<dyn Transport> {
        Box::new(MockTransport::new(self.link(address)))
    }
}
