//! Line-oriented transport over one serial address.
//!
//! A [`Transport`] owns the byte channel for one address. Inbound lines and
//! lifecycle changes are pushed into a [`TransportSink`], which forwards them
//! to whichever task consumes the engine's event queue; nothing in this layer
//! calls back into session state directly.

pub mod line_buffer;
pub mod mock;
pub mod serial;

use crate::port::{BaudRate, PortError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

pub use line_buffer::LineBuffer;
pub use mock::{MockLink, MockTransport, MockTransportFactory};
pub use serial::{SerialTransport, SerialTransportFactory, SerialTransportSettings};

/// Errors surfaced by [`Transport::open`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address does not exist or is held by someone else.
    #[error("port {0} is unavailable")]
    PortUnavailable(String),

    #[error("transport I/O failure: {0}")]
    Io(String),
}

impl TransportError {
    pub(crate) fn from_port(address: &str, err: PortError) -> Self {
        match err {
            PortError::NotFound(_) | PortError::Busy(_) => Self::PortUnavailable(address.to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device answered the handshake.
    Online,
    /// The link is gone (closed locally or lost).
    Offline,
    /// I/O failure; usually followed by `Offline`.
    Error(String),
    /// One complete inbound line, terminator removed.
    Line(String),
}

/// A [`TransportEvent`] tagged with the address it came from.
///
/// `generation` identifies which open of that address produced the event, so
/// a late `Offline` from a closed link cannot tear down its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub address: String,
    pub generation: u64,
    pub event: TransportEvent,
}

/// Sending half handed to a transport on open.
#[derive(Debug, Clone)]
pub struct TransportSink {
    address: String,
    generation: u64,
    tx: mpsc::UnboundedSender<TransportMessage>,
}

impl TransportSink {
    pub fn new(address: impl Into<String>, tx: mpsc::UnboundedSender<TransportMessage>) -> Self {
        Self {
            address: address.into(),
            generation: 0,
            tx,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A sink plus the receiver it feeds; handy when no engine is running.
    pub fn channel(address: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<TransportMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(address, tx), rx)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Deliver an event. A dropped receiver means nobody is listening any
    /// more, which is not an error for the producer.
    pub fn emit(&self, event: TransportEvent) {
        let message = TransportMessage {
            address: self.address.clone(),
            generation: self.generation,
            event,
        };
        if self.tx.send(message).is_err() {
            trace!(address = %self.address, "transport event dropped, receiver closed");
        }
    }
}

/// One serial byte channel.
pub trait Transport: Send + fmt::Debug {
    /// Claim `address` and start delivering events into `sink`.
    fn open(&mut self, address: &str, baud: BaudRate, sink: TransportSink) -> Result<(), TransportError>;

    /// Release the link. Idempotent.
    fn close(&mut self);

    /// Send one command line; a missing `\n` is appended. No-op when closed.
    fn write_line(&mut self, line: &str);

    fn is_open(&self) -> bool;
}

/// Builds the transport for a newly attached address.
pub trait TransportFactory: Send + Sync {
    fn create(&self, address: &str) -> Box<dyn Transport>;
}

/// Addresses currently held open. Shared by every transport a factory builds
/// so the same address can never be opened twice.
#[derive(Debug, Clone, Default)]
pub struct PortClaims {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `address`; `None` if it is already held.
    pub fn try_claim(&self, address: &str) -> Option<ClaimGuard> {
        if self.held.lock().insert(address.to_string()) {
            Some(ClaimGuard {
                claims: self.clone(),
                address: address.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, address: &str) -> bool {
        self.held.lock().contains(address)
    }
}

/// Releases its address when dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    claims: PortClaims,
    address: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.held.lock().remove(&self.address);
    }
}

/// Append the newline terminator if the caller left it off.
pub(crate) fn terminated(line: &str) -> String {
    let mut out = line.trim_end_matches(&['\r', '\n'][..]).to_string();
    out.push('\n');
    out
}
