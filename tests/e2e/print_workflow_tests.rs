//! E2E tests for complete print workflows through the engine handle.
//!
//! A simulated printer answers on a mock link; the tests check what the
//! host wrote and how the session state ends up.

use crate::common::{eventually, printer_profile, EngineFixture, PRINTER};
use pretty_assertions::assert_eq;
use serial_print_host::engine::EngineHandle;
use serial_print_host::session::{ConnectionState, JobState, SessionSnapshot};
use serial_print_host::transport::{MockLink, TransportEvent};
use std::time::Duration;

const SAFETY: [&str; 5] = ["M140 S0", "M104 S0", "M107", "G28 X Y", "M84"];

fn job(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("G1 X{i} F3000")).collect()
}

fn with_safety(lines: &[&str]) -> Vec<String> {
    lines.iter().chain(SAFETY.iter()).map(|l| l.to_string()).collect()
}

/// Wait until the snapshot satisfies `check`, returning it.
async fn wait_for(
    handle: &EngineHandle,
    check: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + crate::common::SETTLE;
    loop {
        let snapshot = handle.snapshot(PRINTER).await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never met, last snapshot {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn connected_printer() -> (EngineFixture, MockLink) {
    let fixture = EngineFixture::start(printer_profile(true));
    let link = fixture.connect(PRINTER).await;
    assert!(eventually(|| {
        let sent = link.written() == vec!["M115".to_string()];
        async move { sent }
    })
    .await);
    link.take_written();

    // Answer M115 the way Marlin does; the trailing temperature line only
    // marks that the ok has been handled.
    link.receive("FIRMWARE_NAME:Marlin 2.1.2; SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin");
    link.receive("ok");
    link.receive("T:21.0 /0.0 B:20.0 /0.0 @:0 B@:0");
    wait_for(&fixture.handle, |s| s.temperatures.bed.is_some()).await;
    (fixture, link)
}

#[tokio::test]
async fn test_firmware_and_temperature_tracking() {
    let (fixture, link) = connected_printer().await;

    link.receive("Cap:EEPROM:1");
    link.receive("Cap:AUTOREPORT_TEMP:1");
    link.receive("T:204.3 /210.0 B:59.8 /60.0 @:127 B@:0");

    let snapshot = wait_for(&fixture.handle, |s| {
        s.temperatures.bed.map(|bed| bed.target) == Some(60.0)
    })
    .await;
    assert_eq!(snapshot.firmware.name, "Marlin 2.1.2");
    assert_eq!(snapshot.firmware.capabilities.get("EEPROM"), Some(&true));
    assert!(snapshot.autoreport_temperatures);
    assert_eq!(snapshot.temperatures.extruders[&0].current, 204.3);
    assert_eq!(snapshot.temperatures.extruders[&0].target, 210.0);
    assert_eq!(snapshot.temperatures.bed.unwrap().target, 60.0);

    assert_eq!(link.written(), vec!["M155 S2".to_string()]);
}

#[tokio::test]
async fn test_print_runs_to_completion() {
    let (fixture, link) = connected_printer().await;

    let id = fixture
        .handle
        .request_write(PRINTER, job(3), 30.0)
        .await
        .unwrap();
    for _ in 0..3 {
        link.receive("ok");
    }

    let snapshot = wait_for(&fixture.handle, |s| s.last_job.is_some()).await;
    let finished = snapshot.last_job.unwrap();
    assert_eq!(finished.id, id);
    assert_eq!(finished.state, JobState::Completed);
    assert_eq!(finished.lines_sent, 3);
    assert_eq!(finished.progress, 1.0);
    assert!(snapshot.job.is_none());
    assert_eq!(snapshot.state, ConnectionState::Connected);

    assert_eq!(
        link.written(),
        with_safety(&["G1 X0 F3000", "G1 X1 F3000", "G1 X2 F3000"])
    );
}

#[tokio::test]
async fn test_second_print_rejected_while_running() {
    let (fixture, _link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(2), 10.0)
        .await
        .unwrap();
    let err = fixture
        .handle
        .request_write(PRINTER, job(2), 10.0)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "a print is already in progress");
}

#[tokio::test]
async fn test_manual_command_waits_for_in_flight_line() {
    let (fixture, link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(2), 10.0)
        .await
        .unwrap();
    fixture.handle.send_command(PRINTER, "M106 S255").await.unwrap();
    assert_eq!(link.written(), vec!["G1 X0 F3000".to_string()]);

    link.receive("ok");
    link.receive("ok");
    let snapshot = wait_for(&fixture.handle, |s| s.job.as_ref().map(|j| j.lines_sent) == Some(2)).await;
    assert!(snapshot.job.is_some());
    assert_eq!(
        link.written(),
        vec!["G1 X0 F3000", "M106 S255", "G1 X1 F3000"]
    );
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (fixture, link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(3), 10.0)
        .await
        .unwrap();
    fixture.handle.pause_print(PRINTER).await.unwrap();
    link.receive("ok");

    let snapshot = wait_for(&fixture.handle, |s| s.job.as_ref().map(|j| j.paused) == Some(true)).await;
    assert_eq!(snapshot.job.unwrap().lines_sent, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(link.written(), vec!["G1 X0 F3000".to_string()]);

    fixture.handle.resume_print(PRINTER).await.unwrap();
    assert!(eventually(|| {
        let written = link.written();
        async move { written == vec!["G1 X0 F3000", "G1 X1 F3000"] }
    })
    .await);
}

#[tokio::test]
async fn test_cancel_runs_safety_sequence() {
    let (fixture, link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(10), 100.0)
        .await
        .unwrap();
    fixture.handle.cancel_print(PRINTER).await.unwrap();

    let snapshot = fixture.handle.snapshot(PRINTER).await.unwrap();
    assert!(snapshot.job.is_none());
    assert_eq!(snapshot.last_job.unwrap().state, JobState::Cancelled);
    assert_eq!(link.written(), with_safety(&["G1 X0 F3000"]));

    // A late ack for the cancelled line sends nothing more.
    link.receive("ok");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(link.written().len(), 6);
}

#[tokio::test]
async fn test_fatal_error_aborts_print_but_keeps_link() {
    let (fixture, link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(4), 40.0)
        .await
        .unwrap();
    link.receive("ok");
    link.receive("!! Heating failed, system stopped! Heater_ID: 0");

    let snapshot = wait_for(&fixture.handle, |s| s.last_job.is_some()).await;
    assert_eq!(snapshot.last_job.unwrap().state, JobState::Error);
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("!! Heating failed"));
    assert_eq!(
        link.written(),
        with_safety(&["G1 X0 F3000", "G1 X1 F3000"])
    );
    assert!(link.is_open());
}

#[tokio::test]
async fn test_link_loss_fails_print() {
    let (fixture, link) = connected_printer().await;

    fixture
        .handle
        .request_write(PRINTER, job(4), 40.0)
        .await
        .unwrap();
    link.emit(TransportEvent::Error("device unplugged".into()));
    link.emit(TransportEvent::Offline);

    let snapshot = wait_for(&fixture.handle, |s| s.last_job.is_some()).await;
    assert_eq!(snapshot.last_job.unwrap().state, JobState::Error);
    assert_eq!(snapshot.state, ConnectionState::Error);
    assert_eq!(snapshot.last_error.as_deref(), Some("device unplugged"));
    assert!(eventually(|| {
        let open = link.is_open();
        async move { !open }
    })
    .await);
}

#[tokio::test]
async fn test_first_line_waits_for_firmware_query_ack() {
    let fixture = EngineFixture::start(printer_profile(true));
    let link = fixture.connect(PRINTER).await;
    assert!(eventually(|| {
        let sent = link.written() == vec!["M115".to_string()];
        async move { sent }
    })
    .await);
    link.take_written();

    fixture
        .handle
        .request_write(PRINTER, job(3), 30.0)
        .await
        .unwrap();
    assert!(link.written().is_empty());

    link.receive("ok");
    let snapshot = wait_for(&fixture.handle, |s| s.job.as_ref().map(|j| j.lines_sent) == Some(1)).await;
    assert!(snapshot.last_job.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(link.written(), vec!["G1 X0 F3000".to_string()]);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (fixture, link) = connected_printer().await;

    fixture.handle.disconnect(PRINTER).await.unwrap();
    assert!(!link.is_open());
    assert_eq!(
        fixture.handle.snapshot(PRINTER).await.unwrap().state,
        ConnectionState::Disconnected
    );

    fixture.handle.connect(PRINTER).await.unwrap();
    link.go_online();
    fixture.wait_connected(PRINTER).await;
    assert_eq!(link.open_count(), 2);
}
