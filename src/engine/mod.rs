//! Device engine.
//!
//! Owns one [`PrintSession`] per discovered address and is the only place
//! session state is touched. Discovery events, transport messages, poll
//! ticks and [`EngineHandle`] commands all arrive on channels consumed by a
//! single task, and each is handled to completion before the next.

pub mod handle;
pub mod shutdown;

use crate::config::Config;
use crate::discovery::DiscoveryEvent;
use crate::port::BaudRate;
use crate::profile::{PrinterProfile, ProfileStore, KEY_SERIAL_AUTO_CONNECT, KEY_SERIAL_RATE};
use crate::session::{ConnectionState, PrintSession, SessionSettings, SessionSnapshot};
use crate::transport::{TransportFactory, TransportMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

pub use handle::{EngineCommand, EngineError, EngineHandle};
pub use shutdown::{FixedAnswer, ShutdownPrompt};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Rate for printers that are not the profile's printer.
    pub default_baud: BaudRate,
    pub session: SessionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_baud: BaudRate::default(),
            session: SessionSettings::default(),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_baud: config.serial.default_baud,
            session: SessionSettings {
                poll_interval: Duration::from_millis(config.session.poll_interval_ms),
                poll_response_timeout: Duration::from_millis(config.session.poll_response_timeout_ms),
                home_command: config.session.home_command.clone(),
            },
        }
    }
}

/// Whether the event loop keeps going after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct EngineState {
    sessions: BTreeMap<String, PrintSession>,
    ports: Vec<String>,
    factory: Arc<dyn TransportFactory>,
    profile: Arc<dyn ProfileStore>,
    settings: EngineSettings,
    transport_tx: mpsc::UnboundedSender<TransportMessage>,
}

/// Engine not yet running. Build it, take a handle and a discovery sender,
/// then [`spawn`](Engine::spawn) it.
pub struct Engine {
    state: EngineState,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    discovery_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    discovery_rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportMessage>,
}

impl Engine {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        profile: Arc<dyn ProfileStore>,
        settings: EngineSettings,
    ) -> (Self, EngineHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let engine = Self {
            state: EngineState {
                sessions: BTreeMap::new(),
                ports: Vec::new(),
                factory,
                profile,
                settings,
                transport_tx,
            },
            commands,
            discovery_tx,
            discovery_rx,
            transport_rx,
        };
        (engine, EngineHandle::new(command_tx))
    }

    /// Where the discovery loop should deliver its events.
    pub fn discovery_sender(&self) -> mpsc::UnboundedSender<DiscoveryEvent> {
        self.discovery_tx.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Event loop. Returns after a `Shutdown` command or once every
    /// [`EngineHandle`] is gone.
    pub async fn run(self) {
        let Engine {
            mut state,
            mut commands,
            discovery_tx,
            mut discovery_rx,
            mut transport_rx,
        } = self;
        // Only the discovery loop sends on this channel.
        drop(discovery_tx);

        let mut ticker = tokio::time::interval(state.settings.session.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("engine started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if state.handle_command(command) == Flow::Stop {
                            break;
                        }
                    }
                    None => {
                        debug!("all engine handles dropped");
                        state.close_all();
                        break;
                    }
                },
                Some(event) = discovery_rx.recv() => state.handle_discovery(event),
                Some(message) = transport_rx.recv() => state.route(message),
                _ = ticker.tick() => state.poll_tick(Instant::now()),
            }
        }
        info!("engine stopped");
    }
}

impl EngineState {
    fn profile(&self) -> PrinterProfile {
        PrinterProfile::read_from(self.profile.as_ref())
    }

    fn session_mut(&mut self, address: &str) -> Result<&mut PrintSession, EngineError> {
        self.sessions
            .get_mut(address)
            .ok_or_else(|| EngineError::UnknownAddress(address.to_string()))
    }

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Attached(address) => self.attach(address),
            DiscoveryEvent::Detached(address) => {
                if let Some(mut session) = self.sessions.remove(&address) {
                    info!(address = %address, "printer detached");
                    session.disconnect();
                }
            }
            DiscoveryEvent::PortsChanged(ports) => {
                debug!(?ports, "port list changed");
                self.ports = ports;
            }
        }
    }

    fn attach(&mut self, address: String) {
        if self.sessions.contains_key(&address) {
            debug!(address = %address, "already attached");
            return;
        }

        let transport = self.factory.create(&address);
        let mut session = PrintSession::new(
            address.clone(),
            transport,
            self.transport_tx.clone(),
            self.settings.session.clone(),
        );
        session.set_baud_rate(self.settings.default_baud);

        let profile = self.profile();
        if profile.port.as_deref() == Some(address.as_str()) {
            session.set_baud_rate(profile.baud_rate);
            session.set_auto_connect(profile.auto_connect);
        }
        info!(address = %address, "printer attached");

        if profile.wants_auto_connect(&address) {
            if let Err(e) = session.connect() {
                warn!(address = %address, error = %e, "auto-connect failed");
            }
        }
        self.sessions.insert(address, session);
    }

    fn route(&mut self, message: TransportMessage) {
        match self.sessions.get_mut(&message.address) {
            Some(session) => session.handle_transport_message(message),
            None => trace!(address = %message.address, "event for unknown address"),
        }
    }

    fn poll_tick(&mut self, now: Instant) {
        for session in self.sessions.values_mut() {
            session.poll_tick(now);
        }
    }

    /// Connect the profile's printer if it is attached and not connected.
    /// Unlike attach, this ignores the auto-connect flag.
    fn profile_changed(&mut self) {
        let profile = self.profile();
        let Some(port) = profile.port else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&port) else {
            debug!(address = %port, "profile printer not attached");
            return;
        };
        session.set_auto_connect(profile.auto_connect);
        if session.state() == ConnectionState::Connected {
            return;
        }
        session.set_baud_rate(profile.baud_rate);
        if let Err(e) = session.connect() {
            warn!(address = %port, error = %e, "connect after profile change failed");
        }
    }

    fn is_profile_printer(&self, address: &str) -> bool {
        self.profile().port.as_deref() == Some(address)
    }

    fn close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.abandon();
        }
    }

    fn handle_command(&mut self, command: EngineCommand) -> Flow {
        match command {
            EngineCommand::Connect { address, respond_to } => {
                let result = self
                    .session_mut(&address)
                    .and_then(|session| session.connect().map_err(EngineError::from));
                let _ = respond_to.send(result);
            }
            EngineCommand::Disconnect { address, respond_to } => {
                let result = self.session_mut(&address).map(|session| session.disconnect());
                let _ = respond_to.send(result);
            }
            EngineCommand::SetBaudRate {
                address,
                baud_rate,
                respond_to,
            } => {
                let result = self
                    .session_mut(&address)
                    .map(|session| session.set_baud_rate(baud_rate));
                if result.is_ok() && self.is_profile_printer(&address) {
                    self.profile.set(KEY_SERIAL_RATE, &baud_rate.to_string());
                }
                let _ = respond_to.send(result);
            }
            EngineCommand::SetAutoConnect {
                address,
                enabled,
                respond_to,
            } => {
                let result = self
                    .session_mut(&address)
                    .map(|session| session.set_auto_connect(enabled));
                if result.is_ok() && self.is_profile_printer(&address) {
                    self.profile
                        .set(KEY_SERIAL_AUTO_CONNECT, if enabled { "true" } else { "false" });
                }
                let _ = respond_to.send(result);
            }
            EngineCommand::RequestWrite {
                address,
                lines,
                estimated_total_seconds,
                respond_to,
            } => {
                let result = self.session_mut(&address).and_then(|session| {
                    session
                        .request_write(lines, estimated_total_seconds)
                        .map(|job| job.id)
                        .map_err(EngineError::from)
                });
                let _ = respond_to.send(result);
            }
            EngineCommand::CancelPrint { address, respond_to } => {
                let result = self
                    .session_mut(&address)
                    .and_then(|session| session.cancel_print().map_err(EngineError::from));
                let _ = respond_to.send(result);
            }
            EngineCommand::PausePrint { address, respond_to } => {
                let result = self
                    .session_mut(&address)
                    .and_then(|session| session.pause_print().map_err(EngineError::from));
                let _ = respond_to.send(result);
            }
            EngineCommand::ResumePrint { address, respond_to } => {
                let result = self
                    .session_mut(&address)
                    .and_then(|session| session.resume_print().map_err(EngineError::from));
                let _ = respond_to.send(result);
            }
            EngineCommand::SendCommand {
                address,
                command,
                respond_to,
            } => {
                let result = self
                    .session_mut(&address)
                    .and_then(|session| session.send_command(&command).map_err(EngineError::from));
                let _ = respond_to.send(result);
            }
            EngineCommand::Snapshot { address, respond_to } => {
                let result = self.session_mut(&address).map(|session| session.snapshot());
                let _ = respond_to.send(result);
            }
            EngineCommand::Snapshots { respond_to } => {
                let snapshots: Vec<SessionSnapshot> =
                    self.sessions.values().map(PrintSession::snapshot).collect();
                let _ = respond_to.send(snapshots);
            }
            EngineCommand::ListPorts { respond_to } => {
                let _ = respond_to.send(self.ports.clone());
            }
            EngineCommand::OutputDevices { respond_to } => {
                let connected = self
                    .sessions
                    .values()
                    .filter(|session| session.state() == ConnectionState::Connected)
                    .map(|session| session.address().to_string())
                    .collect();
                let _ = respond_to.send(connected);
            }
            EngineCommand::ActivePrints { respond_to } => {
                let active = self
                    .sessions
                    .values()
                    .filter(|session| session.has_active_job())
                    .map(|session| session.address().to_string())
                    .collect();
                let _ = respond_to.send(active);
            }
            EngineCommand::ProfileChanged { respond_to } => {
                self.profile_changed();
                let _ = respond_to.send(());
            }
            EngineCommand::Shutdown { respond_to } => {
                info!(sessions = self.sessions.len(), "shutting down");
                self.close_all();
                let _ = respond_to.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}
