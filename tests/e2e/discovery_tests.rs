//! E2E tests for port discovery.
//!
//! These tests verify that:
//! - arrivals are reported before departures within one cycle
//! - an unchanged port list produces no events
//! - discovery events drive the engine's attach/detach handling

use crate::common::{eventually, printer_profile, EngineFixture, ScriptedEnumerator, PRINTER};
use pretty_assertions::assert_eq;
use serial_print_host::discovery::{DiscoveryEvent, DiscoveryLoop};
use serial_print_host::engine::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn names(ports: &[&str]) -> Vec<String> {
    ports.iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn test_discovery_cycle_ordering() {
    let enumerator = ScriptedEnumerator::new(&[&["COM1", "COM2"], &["COM2", "COM3"]]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let discovery = DiscoveryLoop::spawn(Arc::new(enumerator), Duration::from_millis(10), tx);

    let mut events = Vec::new();
    while events.len() < 6 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            _ => break,
        }
    }

    assert_eq!(
        events,
        vec![
            DiscoveryEvent::Attached("COM1".into()),
            DiscoveryEvent::Attached("COM2".into()),
            DiscoveryEvent::PortsChanged(names(&["COM1", "COM2"])),
            DiscoveryEvent::Attached("COM3".into()),
            DiscoveryEvent::Detached("COM1".into()),
            DiscoveryEvent::PortsChanged(names(&["COM2", "COM3"])),
        ]
    );

    // The list stays {COM2, COM3} from here on.
    let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(quiet.is_err(), "unexpected event: {quiet:?}");

    discovery.shutdown().await;
}

#[tokio::test]
async fn test_empty_system_emits_nothing() {
    let enumerator = ScriptedEnumerator::new(&[&[]]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let discovery = DiscoveryLoop::spawn(Arc::new(enumerator), Duration::from_millis(10), tx);

    let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(quiet.is_err());

    discovery.shutdown().await;
}

#[tokio::test]
async fn test_discovery_stops_when_receiver_dropped() {
    let enumerator = ScriptedEnumerator::new(&[&["COM1"], &["COM2"]]);
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let discovery = DiscoveryLoop::spawn(Arc::new(enumerator), Duration::from_millis(10), tx);

    let finished = eventually(|| {
        let done = discovery.is_finished();
        async move { done }
    })
    .await;
    assert!(finished);
}

#[tokio::test]
async fn test_discovery_drives_engine() {
    let fixture = EngineFixture::start(printer_profile(true));
    let enumerator = ScriptedEnumerator::new(&[&[PRINTER, "COM9"], &[PRINTER, "COM9"], &["COM9"]]);
    let discovery = DiscoveryLoop::spawn(
        Arc::new(enumerator),
        Duration::from_millis(50),
        fixture.discovery.clone(),
    );

    let link = fixture.link(PRINTER);
    assert!(eventually(|| {
        let opened = link.open_count() == 1;
        async move { opened }
    })
    .await);

    // The profile printer was opened with the profile rate, then torn down
    // when it disappeared.
    let handle = fixture.handle.clone();
    assert!(
        eventually(|| {
            let handle = handle.clone();
            async move {
                matches!(
                    handle.snapshot(PRINTER).await,
                    Err(EngineError::UnknownAddress(_))
                )
            }
        })
        .await
    );
    assert!(!link.is_open());
    assert_eq!(link.baud_rate(), Some(serial_print_host::BaudRate::B115200));

    // A port that is not the profile printer is tracked but never opened.
    assert!(fixture.handle.snapshot("COM9").await.is_ok());
    assert_eq!(fixture.link("COM9").open_count(), 0);
    assert!(
        eventually(|| {
            let handle = handle.clone();
            async move { handle.list_ports().await.unwrap() == names(&["COM9"]) }
        })
        .await
    );

    discovery.shutdown().await;
}
