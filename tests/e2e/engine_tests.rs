//! E2E tests for the device engine.
//!
//! These tests verify that:
//! - attach honours the profile (rate, auto-connect)
//! - detach tears the session down
//! - baud and auto-connect changes are written back to the profile
//! - the shutdown guard asks only when a print is running

use crate::common::{eventually, printer_profile, EngineFixture, OTHER_PRINTER, PRINTER};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serial_print_host::discovery::DiscoveryEvent;
use serial_print_host::engine::{EngineError, FixedAnswer, ShutdownPrompt};
use serial_print_host::port::BaudRate;
use serial_print_host::profile::{ProfileStore, KEY_SERIAL_AUTO_CONNECT, KEY_SERIAL_RATE};
use serial_print_host::session::{ConnectionState, SessionError};
use std::time::Duration;

/// Fails the test if the engine ever asks.
struct MustNotAsk;

#[async_trait]
impl ShutdownPrompt for MustNotAsk {
    async fn confirm_shutdown(&self, active: &[String]) -> bool {
        panic!("prompted although no print is running: {active:?}");
    }
}

fn job(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("G1 X{i} F3000")).collect()
}

#[tokio::test]
async fn test_attach_auto_connects_profile_printer() {
    let fixture = EngineFixture::start(printer_profile(true));
    fixture.attach(PRINTER).await;

    let link = fixture.link(PRINTER);
    assert!(link.is_open());
    assert_eq!(link.baud_rate(), Some(BaudRate::B115200));

    let snapshot = fixture.handle.snapshot(PRINTER).await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connecting);
    assert!(snapshot.auto_connect);
}

#[tokio::test]
async fn test_attach_without_auto_connect_stays_disconnected() {
    let fixture = EngineFixture::start(printer_profile(false));
    fixture.attach(PRINTER).await;
    fixture.attach(OTHER_PRINTER).await;

    let printer = fixture.handle.snapshot(PRINTER).await.unwrap();
    assert_eq!(printer.state, ConnectionState::Disconnected);
    assert_eq!(printer.baud_rate, BaudRate::B115200);
    assert_eq!(fixture.link(PRINTER).open_count(), 0);

    // Not the profile printer: engine default rate, never opened.
    let other = fixture.handle.snapshot(OTHER_PRINTER).await.unwrap();
    assert_eq!(other.baud_rate, BaudRate::B250000);
    assert_eq!(fixture.link(OTHER_PRINTER).open_count(), 0);
}

#[tokio::test]
async fn test_profile_changed_connects_profile_printer() {
    let fixture = EngineFixture::start(printer_profile(false));
    fixture.attach(PRINTER).await;

    fixture.handle.profile_changed().await.unwrap();
    assert!(fixture.link(PRINTER).is_open());

    // Already connecting: a second notification does not reopen.
    fixture.handle.profile_changed().await.unwrap();
    assert_eq!(fixture.link(PRINTER).open_count(), 1);
}

#[tokio::test]
async fn test_detach_removes_session() {
    let fixture = EngineFixture::start(printer_profile(true));
    let link = fixture.connect(PRINTER).await;

    fixture
        .discovery
        .send(DiscoveryEvent::Detached(PRINTER.to_string()))
        .unwrap();

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
}

#[tokio::test]
async fn test_unknown_address_rejected() {
    let fixture = EngineFixture::start(printer_profile(false));

    let err = fixture.handle.connect("COM42").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownAddress(ref address) if address == "COM42"));
}

#[tokio::test]
async fn test_baud_and_auto_connect_written_back_to_profile() {
    let fixture = EngineFixture::start(printer_profile(false));
    fixture.attach(PRINTER).await;
    fixture.attach(OTHER_PRINTER).await;

    fixture
        .handle
        .set_baud_rate(PRINTER, BaudRate::B250000)
        .await
        .unwrap();
    assert_eq!(fixture.profile.get(KEY_SERIAL_RATE).as_deref(), Some("250000"));

    fixture
        .handle
        .set_auto_connect(PRINTER, true)
        .await
        .unwrap();
    assert_eq!(
        fixture.profile.get(KEY_SERIAL_AUTO_CONNECT).as_deref(),
        Some("true")
    );

    // Changes to another printer stay out of the profile.
    fixture
        .handle
        .set_baud_rate(OTHER_PRINTER, BaudRate::B57600)
        .await
        .unwrap();
    assert_eq!(fixture.profile.get(KEY_SERIAL_RATE).as_deref(), Some("250000"));
    assert_eq!(
        fixture.handle.snapshot(OTHER_PRINTER).await.unwrap().baud_rate,
        BaudRate::B57600
    );
}

#[tokio::test]
async fn test_output_devices_lists_connected_printers() {
    let fixture = EngineFixture::start(printer_profile(true));
    fixture.connect(PRINTER).await;
    fixture.attach(OTHER_PRINTER).await;

    assert_eq!(
        fixture.handle.output_devices().await.unwrap(),
        vec![PRINTER.to_string()]
    );
}

#[tokio::test]
async fn test_print_requires_connection() {
    let fixture = EngineFixture::start(printer_profile(false));
    fixture.attach(PRINTER).await;

    let err = fixture
        .handle
        .request_write(PRINTER, job(3), 60.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Session(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_shutdown_without_prints_does_not_prompt() {
    let fixture = EngineFixture::start(printer_profile(true));
    fixture.connect(PRINTER).await;

    assert!(fixture.handle.request_shutdown(&MustNotAsk).await.unwrap());
    tokio::time::timeout(Duration::from_secs(5), fixture.task)
        .await
        .expect("engine stopped")
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_guard() {
    let fixture = EngineFixture::start(printer_profile(true));
    let link = fixture.connect(PRINTER).await;
    fixture
        .handle
        .request_write(PRINTER, job(5), 120.0)
        .await
        .unwrap();
    assert_eq!(
        fixture.handle.active_prints().await.unwrap(),
        vec![PRINTER.to_string()]
    );

    // Declined: nothing changes.
    assert!(!fixture
        .handle
        .request_shutdown(&FixedAnswer(false))
        .await
        .unwrap());
    let snapshot = fixture.handle.snapshot(PRINTER).await.unwrap();
    assert!(snapshot.job.is_some());
    assert!(link.is_open());

    // Accepted: the print is abandoned without the end-of-print sequence.
    link.take_written();
    assert!(fixture
        .handle
        .request_shutdown(&FixedAnswer(true))
        .await
        .unwrap());
    tokio::time::timeout(Duration::from_secs(5), fixture.task)
        .await
        .expect("engine stopped")
        .unwrap();

    assert!(!link.is_open());
    assert!(link.written().is_empty());
    assert!(matches!(
        fixture.handle.snapshot(PRINTER).await,
        Err(EngineError::Closed)
    ));
}

#[tokio::test]
async fn test_dropping_all_handles_stops_engine() {
    let EngineFixture {
        handle,
        transports,
        task,
        discovery,
        ..
    } = EngineFixture::start(printer_profile(true));
    discovery
        .send(DiscoveryEvent::Attached(PRINTER.to_string()))
        .unwrap();
    let link = transports.link(PRINTER);
    assert!(eventually(|| {
        let open = link.is_open();
        async move { open }
    })
    .await);

    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("engine stopped")
        .unwrap();
    assert!(!link.is_open());
}
