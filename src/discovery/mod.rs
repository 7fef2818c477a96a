//! Serial port discovery.
//!
//! A background task re-enumerates ports on a fixed interval and reports
//! arrivals and departures as [`DiscoveryEvent`]s. Within one cycle all
//! `Attached` events come before any `Detached` event, and `PortsChanged`
//! comes last.

pub mod enumerator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use enumerator::{PortDetails, PortEnumerator, SystemPortEnumerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Attached(String),
    Detached(String),
    /// The full current list, emitted whenever it differs from the last one.
    PortsChanged(Vec<String>),
}

/// Pure diffing state of the discovery loop.
#[derive(Debug, Default)]
pub struct PortWatcher {
    ports: Vec<String>,
}

impl PortWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Compare `current` with the previous cycle and return the events, in
    /// emission order.
    pub fn update(&mut self, current: Vec<String>) -> Vec<DiscoveryEvent> {
        let known: HashSet<&str> = self.ports.iter().map(String::as_str).collect();
        let present: HashSet<&str> = current.iter().map(String::as_str).collect();

        let mut events: Vec<DiscoveryEvent> = current
            .iter()
            .filter(|port| !known.contains(port.as_str()))
            .map(|port| DiscoveryEvent::Attached(port.clone()))
            .collect();
        events.extend(
            self.ports
                .iter()
                .filter(|port| !present.contains(port.as_str()))
                .map(|port| DiscoveryEvent::Detached(port.clone())),
        );

        if current != self.ports {
            events.push(DiscoveryEvent::PortsChanged(current.clone()));
            self.ports = current;
        }
        events
    }
}

/// Periodic enumeration task.
pub struct DiscoveryLoop;

impl DiscoveryLoop {
    /// Start polling `enumerator` every `interval`, sending events into `tx`.
    /// The first cycle runs immediately.
    pub fn spawn(
        enumerator: Arc<dyn PortEnumerator>,
        interval: Duration,
        tx: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> DiscoveryHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut watcher = PortWatcher::new();
            info!(interval_ms = interval.as_millis() as u64, "port discovery started");

            while !*stop_rx.borrow() {
                let source = Arc::clone(&enumerator);
                let ports = match tokio::task::spawn_blocking(move || source.list_ports()).await {
                    Ok(ports) => ports,
                    Err(e) => {
                        warn!(error = %e, "port enumeration task failed");
                        Vec::new()
                    }
                };

                for event in watcher.update(ports) {
                    debug!(?event, "discovery");
                    if tx.send(event).is_err() {
                        debug!("discovery receiver closed");
                        return;
                    }
                }

                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("port discovery stopped");
        });

        DiscoveryHandle { stop_tx, task }
    }
}

/// Control handle for a running [`DiscoveryLoop`].
pub struct DiscoveryHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Ask the loop to stop. Returns immediately; a cycle already emitting
    /// finishes first.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the task to end.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "discovery task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
