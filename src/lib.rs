//! Serial print host library.
//!
//! Streams G-code to 3D printers over serial links: discovers ports, opens
//! and handshakes the link, feeds job lines paced by the device's `ok`
//! replies, and tracks firmware identity, temperatures and job progress.
//!
//! # Modules
//!
//! - `discovery`: periodic port enumeration and attach/detach events
//! - `port`: serial port abstraction (real ports and mocks)
//! - `transport`: line-oriented link with the online handshake
//! - `feeder`: ack-paced line streaming
//! - `protocol`: command vocabulary, reply classifier, G-code framing
//! - `session`: per-printer state machine
//! - `engine`: single-task owner of all sessions, driven through `EngineHandle`
//! - `profile`: printer profile storage boundary
//! - `config`: configuration management with TOML support
//! - `error` / `logging`: binary-level error type and tracing setup

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod feeder;
pub mod logging;
pub mod port;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use discovery::{DiscoveryEvent, DiscoveryLoop, PortEnumerator, PortWatcher, SystemPortEnumerator};
pub use engine::{Engine, EngineError, EngineHandle, EngineSettings, ShutdownPrompt};
pub use error::{AppError, AppResult};
pub use feeder::{FeederError, FeederEvent, LineFeeder};
pub use port::{BaudRate, MockSerialPort, PortConfiguration, PortError, SerialPortAdapter};
pub use profile::{MemoryProfileStore, PrinterProfile, ProfileStore};
pub use protocol::{classify, prepare_lines, ReplyEvent};
pub use session::{
    ConnectionState, DeviceCallbacks, JobState, PrintSession, SessionError, SessionSnapshot,
};
pub use transport::{Transport, TransportError, TransportEvent, TransportFactory};

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
