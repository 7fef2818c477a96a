//! E2E tests for the serial transport over mock ports.
//!
//! These tests verify that:
//! - opening probes the device and reports `Online` before the first line
//! - the probe is repeated for boards that swallow it while resetting
//! - losing the device reports `Error` then exactly one `Offline`
//! - an address can only be held by one transport at a time

use crate::common::{next_event, wait_until};
use pretty_assertions::assert_eq;
use serial_print_host::port::{BaudRate, MockPortOpener};
use serial_print_host::transport::{
    SerialTransportFactory, SerialTransportSettings, TransportError, TransportEvent,
    TransportFactory, TransportSink,
};
use std::sync::Arc;
use std::time::Duration;

const ADDRESS: &str = "/dev/ttyMOCK0";

fn fast_settings() -> SerialTransportSettings {
    SerialTransportSettings {
        read_timeout: Duration::from_millis(5),
        handshake_idle_reads: 3,
    }
}

fn factory() -> (SerialTransportFactory, MockPortOpener) {
    let opener = MockPortOpener::new();
    let factory = SerialTransportFactory::with_opener(Arc::new(opener.clone()), fast_settings());
    (factory, opener)
}

#[tokio::test]
async fn test_handshake_reports_online_before_first_line() {
    let (factory, opener) = factory();
    let port = opener.register(ADDRESS);
    port.reply_after_write(b"ok T:21.4 /0.0 B:20.9 /0.0 @:0 B@:0\n");

    let mut transport = factory.create(ADDRESS);
    let (sink, mut rx) = TransportSink::channel(ADDRESS);
    transport.open(ADDRESS, BaudRate::B115200, sink).unwrap();

    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Online));
    assert_eq!(
        next_event(&mut rx).await,
        Some(TransportEvent::Line("ok T:21.4 /0.0 B:20.9 /0.0 @:0 B@:0".into()))
    );
    assert_eq!(port.written_lines()[0], "M105");
    assert!(port.was_cleared());
    assert!(transport.is_open());

    transport.close();
}

#[tokio::test]
async fn test_probe_repeats_until_device_answers() {
    let (factory, opener) = factory();
    let port = opener.register(ADDRESS);

    let mut transport = factory.create(ADDRESS);
    let (sink, mut rx) = TransportSink::channel(ADDRESS);
    transport.open(ADDRESS, BaudRate::B250000, sink).unwrap();

    assert!(wait_until(|| port.written_lines().len() >= 2));
    assert!(port.written_lines().iter().all(|line| line == "M105"));
    assert!(rx.try_recv().is_err(), "no event before the device talks");

    port.enqueue_read(b"start\n");
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Online));
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Line("start".into())));

    transport.close();
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Offline));
}

#[tokio::test]
async fn test_lines_split_across_reads() {
    let (factory, opener) = factory();
    let port = opener.register(ADDRESS);

    let mut transport = factory.create(ADDRESS);
    let (sink, mut rx) = TransportSink::channel(ADDRESS);
    transport.open(ADDRESS, BaudRate::B115200, sink).unwrap();

    port.enqueue_read(b"sta");
    assert!(wait_until(|| port.available_bytes() == 0));
    port.enqueue_read(b"rt\r\nok\n");
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Online));
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Line("start".into())));
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Line("ok".into())));
}

#[tokio::test]
async fn test_write_line_appends_terminator() {
    let (factory, opener) = factory();
    let port = opener.register(ADDRESS);

    let mut transport = factory.create(ADDRESS);
    let (sink, _rx) = TransportSink::channel(ADDRESS);
    transport.open(ADDRESS, BaudRate::B115200, sink).unwrap();

    transport.write_line("G28 X Y");
    transport.write_line("M84\n");
    let log = port.write_log();
    assert!(log.contains(&b"G28 X Y\n".to_vec()));
    assert!(log.contains(&b"M84\n".to_vec()));

    transport.close();
    let before = port.write_log().len();
    transport.write_line("M104 S0");
    assert_eq!(port.write_log().len(), before);
}

#[tokio::test]
async fn test_unplug_reports_error_then_single_offline() {
    let (factory, opener) = factory();
    let port = opener.register(ADDRESS);
    port.reply_after_write(b"ok\n");

    let mut transport = factory.create(ADDRESS);
    let (sink, mut rx) = TransportSink::channel(ADDRESS);
    transport.open(ADDRESS, BaudRate::B115200, sink).unwrap();
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Online));
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Line("ok".into())));

    port.unplug();
    assert!(matches!(next_event(&mut rx).await, Some(TransportEvent::Error(_))));
    assert_eq!(next_event(&mut rx).await, Some(TransportEvent::Offline));
    assert!(!transport.is_open());

    // Closing afterwards must not report the loss twice.
    transport.close();
    let quiet = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(!matches!(quiet, Ok(Some(_))));
}

#[tokio::test]
async fn test_address_claimed_exclusively() {
    let (factory, opener) = factory();
    opener.register(ADDRESS);

    let mut first = factory.create(ADDRESS);
    let mut second = factory.create(ADDRESS);
    let (sink, _rx) = TransportSink::channel(ADDRESS);

    first.open(ADDRESS, BaudRate::B115200, sink.clone()).unwrap();
    assert_eq!(
        second.open(ADDRESS, BaudRate::B115200, sink.clone()),
        Err(TransportError::PortUnavailable(ADDRESS.to_string()))
    );

    // The claim is released once the reader thread has let go of the port.
    first.close();
    assert!(wait_until(|| !factory.claims().is_claimed(ADDRESS)));
    second.open(ADDRESS, BaudRate::B115200, sink).unwrap();
    second.close();
}

#[tokio::test]
async fn test_missing_port_is_unavailable() {
    let (factory, _opener) = factory();

    let mut transport = factory.create("/dev/ttyGONE");
    let (sink, _rx) = TransportSink::channel("/dev/ttyGONE");
    assert_eq!(
        transport.open("/dev/ttyGONE", BaudRate::B115200, sink),
        Err(TransportError::PortUnavailable("/dev/ttyGONE".to_string()))
    );
    assert!(!transport.is_open());
    assert!(!factory.claims().is_claimed("/dev/ttyGONE"));
}
