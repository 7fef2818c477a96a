//! Shared test utilities for the integration suites.
//!
//! - a scripted port enumerator for discovery tests
//! - an engine fixture wired to mock transports
//! - polling helpers for state that settles asynchronously

#![allow(dead_code)]

use parking_lot::Mutex;
use serial_print_host::discovery::{DiscoveryEvent, PortEnumerator};
use serial_print_host::engine::{Engine, EngineHandle, EngineSettings};
use serial_print_host::port::BaudRate;
use serial_print_host::profile::{MemoryProfileStore, PrinterProfile};
use serial_print_host::session::SessionSettings;
use serial_print_host::transport::{MockLink, MockTransportFactory, TransportEvent, TransportMessage};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PRINTER: &str = "/dev/ttyACM0";
pub const OTHER_PRINTER: &str = "/dev/ttyUSB1";

/// Upper bound for anything the tests wait on.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Returns a fixed sequence of port lists, one per call; the last list
/// repeats once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedEnumerator {
    script: Mutex<VecDeque<Vec<String>>>,
    last: Mutex<Vec<String>>,
}

impl ScriptedEnumerator {
    pub fn new(cycles: &[&[&str]]) -> Self {
        let script = cycles
            .iter()
            .map(|ports| ports.iter().map(|p| p.to_string()).collect())
            .collect();
        Self {
            script: Mutex::new(script),
            last: Mutex::new(Vec::new()),
        }
    }
}

impl PortEnumerator for ScriptedEnumerator {
    fn list_ports(&self) -> Vec<String> {
        match self.script.lock().pop_front() {
            Some(ports) => {
                *self.last.lock() = ports.clone();
                ports
            }
            None => self.last.lock().clone(),
        }
    }
}

/// Session settings that keep the poll timer out of the way.
pub fn quiet_session_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_secs(3600),
        ..SessionSettings::default()
    }
}

/// Profile naming [`PRINTER`] at 115200 baud.
pub fn printer_profile(auto_connect: bool) -> PrinterProfile {
    PrinterProfile {
        port: Some(PRINTER.to_string()),
        baud_rate: BaudRate::B115200,
        auto_connect,
    }
}

/// A running engine backed by mock transports.
pub struct EngineFixture {
    pub handle: EngineHandle,
    pub transports: MockTransportFactory,
    pub profile: MemoryProfileStore,
    pub discovery: mpsc::UnboundedSender<DiscoveryEvent>,
    pub task: JoinHandle<()>,
}

impl EngineFixture {
    pub fn start(profile: PrinterProfile) -> Self {
        let transports = MockTransportFactory::new();
        let store = MemoryProfileStore::from_profile(&profile);
        let settings = EngineSettings {
            default_baud: BaudRate::B250000,
            session: quiet_session_settings(),
        };
        let (engine, handle) = Engine::new(
            Arc::new(transports.clone()),
            Arc::new(store.clone()),
            settings,
        );
        let discovery = engine.discovery_sender();
        let task = engine.spawn();
        Self {
            handle,
            transports,
            profile: store,
            discovery,
            task,
        }
    }

    pub fn link(&self, address: &str) -> MockLink {
        self.transports.link(address)
    }

    /// Announce `address` and wait until the engine knows about it.
    pub async fn attach(&self, address: &str) {
        self.discovery
            .send(DiscoveryEvent::Attached(address.to_string()))
            .expect("engine running");
        let handle = self.handle.clone();
        let address = address.to_string();
        assert!(
            eventually(|| {
                let handle = handle.clone();
                let address = address.clone();
                async move { handle.snapshot(&address).await.is_ok() }
            })
            .await,
            "{address} never attached"
        );
    }

    /// Attach, connect and complete the handshake for `address`.
    pub async fn connect(&self, address: &str) -> MockLink {
        self.attach(address).await;
        let link = self.link(address);
        if !link.is_open() {
            self.handle.connect(address).await.expect("connect");
        }
        link.go_online();
        self.wait_connected(address).await;
        link
    }

    pub async fn wait_connected(&self, address: &str) {
        let handle = self.handle.clone();
        let address = address.to_string();
        assert!(
            eventually(|| {
                let handle = handle.clone();
                let address = address.clone();
                async move {
                    handle
                        .snapshot(&address)
                        .await
                        .map(|s| s.state == serial_print_host::ConnectionState::Connected)
                        .unwrap_or(false)
                }
            })
            .await,
            "{address} never connected"
        );
    }
}

/// Re-evaluate `check` until it yields true or [`SETTLE`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Block (on a plain thread) until `check` holds or [`SETTLE`] passes.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + SETTLE;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Next transport event, or `None` if nothing arrives in time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportMessage>) -> Option<TransportEvent> {
    tokio::time::timeout(SETTLE, rx.recv())
        .await
        .ok()
        .flatten()
        .map(|message| message.event)
}
