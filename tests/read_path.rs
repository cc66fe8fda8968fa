//! Read path tests.

mod support;

use kiteconn::prelude::*;
use std::io::ErrorKind;
use support::*;

#[test]
fn read_appends_to_input_buffer() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.push_inbound(b"hello");
    script.push_inbound(b" world");

    assert_eq!(conn.read(), ReadOutcome::Data(5));
    assert_eq!(conn.read(), ReadOutcome::Data(6));
    assert_eq!(conn.input(), b"hello world");

    conn.consume_input(6);
    assert_eq!(conn.input(), b"world");
    assert_eq!(conn.read_bytes(), 11);
    assert_eq!(conn.pending(), 0);
}

#[test]
fn end_of_stream_closes_for_reading_only() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.lock().eof = true;

    assert_eq!(conn.read(), ReadOutcome::Closed);
    assert!(conn.status().contains(Status::CLOSED_READ));
    assert!(!conn.status().contains(Status::BROKEN));
}

#[test]
fn transient_errors_ask_for_a_retry() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.push_error(ErrorKind::Interrupted);
    script.push_error(ErrorKind::TimedOut);

    assert_eq!(conn.read(), ReadOutcome::Retry);
    assert_eq!(conn.read(), ReadOutcome::Retry);
    // Empty queue would block
    assert_eq!(conn.read(), ReadOutcome::Retry);
    assert_eq!(conn.status(), Status::ALLOCATED);
}

#[test]
fn fatal_read_error_breaks_connection() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.push_error(ErrorKind::ConnectionReset);

    assert_eq!(conn.read(), ReadOutcome::Broken);
    assert!(conn.status().contains(Status::BROKEN));
    assert!(!conn.status().contains(Status::CLOSED_READ));
}

#[test]
fn unknown_read_error_breaks_connection() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.push_error(ErrorKind::PermissionDenied);

    assert_eq!(conn.read(), ReadOutcome::Broken);
    assert!(conn.status().contains(Status::BROKEN));
}

#[test]
fn full_input_buffer_is_reported() {
    init_tracing();
    let config = ConnectionConfig {
        in_buffer_size: 4,
        ..ConnectionConfig::default()
    };
    let (mut conn, script) = mock_connection(config);
    script.push_inbound(b"abcdef");

    assert_eq!(conn.read(), ReadOutcome::Data(4));
    assert_eq!(conn.read(), ReadOutcome::Full);

    conn.consume_input(4);
    assert_eq!(conn.read(), ReadOutcome::Data(2));
    assert_eq!(conn.input(), b"ef");
}

#[test]
fn received_bytes_roll_over_into_kb() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    script.push_inbound(&[7u8; 1500]);
    script.push_inbound(&[7u8; 600]);

    assert_eq!(conn.read(), ReadOutcome::Data(1500));
    assert_eq!((conn.read_kb(), conn.read_bytes()), (1, 476));
    assert_eq!(conn.read(), ReadOutcome::Data(600));
    assert_eq!((conn.read_kb(), conn.read_bytes()), (2, 52));
}

#[test]
fn read_refreshes_activity() {
    init_tracing();
    let (mut conn, script) = mock_connection(ConnectionConfig::default());
    let before = conn.activity();
    std::thread::sleep(std::time::Duration::from_millis(5));
    script.push_inbound(b"ping");

    conn.read();
    assert!(conn.activity() > before);
}
