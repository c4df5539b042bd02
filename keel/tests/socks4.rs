//! SOCKS4/4a tunnel handshakes, checked against scripted wire data.

use std::sync::Arc;
use std::time::Duration;

use keel::aio::{CommunicationObject, Controller};
use keel::net::tunnel::Socks4NetworkStack;
use keel::net::{AcceptOperation, Listener, Name, NetworkStack};
use keel::testing::MockNetworkStack;
use keel::ErrorKind;

fn server() -> Name {
    Name::new("s4host", "1080")
}

/// Send two bytes, receive two bytes, to prove the socket is in plain
/// data-transfer mode after the handshake.
fn verify_passthrough(socket: &Arc<dyn keel::net::Socket>) {
    let ctl = Controller::new();
    socket.full_send(&ctl, b"ab", None).unwrap();
    let reply = socket.full_receive(&ctl, 2, None).unwrap();
    assert_eq!(&reply[..], b"xy");
}

#[test]
fn connect_to_ip_uses_socks4() {
    let mock = MockNetworkStack::new();
    let tx = [
        4, 1, 0x1F, 0x90, 141, 30, 6, 1, 0, // CONNECT 141.30.6.1:8080
        b'a', b'b',
    ];
    let rx = [
        0, 90, 0x4D, 0x4D, 0x4D, 0x4D, 0x4D, 0x4D, // granted
        b'x', b'y',
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock.clone(), server());
    let socket = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap();
    verify_passthrough(&socket);
    assert!(mock.is_done());
}

#[test]
fn connect_to_domain_uses_socks4a() {
    let mock = MockNetworkStack::new();
    let tx = [
        4, 1, 0x00, 0x4D, 0, 0, 0, 1, 0, b'd', b'o', b'm', b'a', b'i', b'n', 0,
    ];
    let rx = [0, 90, 0, 0, 0, 0, 0, 0];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock.clone(), server());
    stack
        .connect(&Name::new("domain", "77"), Some(Duration::from_secs(1)))
        .unwrap();
    assert!(mock.is_done());
}

#[test]
fn bad_port_fails_before_any_handshake() {
    let mock = MockNetworkStack::new();
    // The proxy connection is still opened; no bytes cross it.
    mock.expect_connection(server(), &b""[..], &b""[..]);

    let stack = Socks4NetworkStack::new(mock.clone(), server());
    let err = stack
        .connect(&Name::new("141.30.6.1", "foo"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "bad port");
    assert!(mock.is_done());
}

#[test]
fn rejection_reports_the_status_code() {
    let mock = MockNetworkStack::new();
    let tx = [4, 1, 0x1F, 0x90, 141, 30, 6, 1, 0];
    let rx = [0, 91, 0, 0, 0, 0, 0, 0];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(
        err.message(),
        "Request rejected or failed (SOCKS4 error code: 91)"
    );
}

#[test]
fn server_closing_instead_of_replying_is_an_error() {
    let mock = MockNetworkStack::new();
    let tx = [4, 1, 0x1F, 0x90, 141, 30, 6, 1, 0];
    mock.expect_connection(server(), &b""[..], tx.as_slice());

    let stack = Socks4NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.message(), "Network connection lost");
}

#[test]
fn garbage_version_byte_is_a_syntax_error() {
    let mock = MockNetworkStack::new();
    let tx = [4, 1, 0x1F, 0x90, 141, 30, 6, 1, 0];
    let rx = [7, 90, 0, 0, 0, 0, 0, 0];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "Syntax error");
}

#[test]
fn bind_accept_performs_the_two_reply_handshake() {
    let mock = MockNetworkStack::new();
    let tx = [4, 2, 0x07, 0xD0, 127, 0, 0, 1, 0]; // BIND 127.0.0.1:2000
    let rx = [
        0, 90, 0, 0, 0, 0, 0, 0, // bound endpoint
        0, 90, 0x05, 0x06, 192, 168, 3, 4, // connected peer 192.168.3.4:1286
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock.clone(), server());
    let listener = stack.listen(&Name::parse("127.0.0.1:2000", "0"), 10).unwrap();
    let socket = listener.accept(Some(Duration::from_secs(1))).unwrap().unwrap();

    assert_eq!(socket.name(), "127.0.0.1:2000");
    assert_eq!(socket.peer_name(), Name::new("192.168.3.4", "1286"));
    assert!(mock.is_done());
}

#[test]
fn bind_accept_async_completes_on_the_callers_controller() {
    let mock = MockNetworkStack::new();
    let tx = [4, 2, 0x07, 0xD0, 127, 0, 0, 1, 0];
    let rx = [
        0, 90, 0, 0, 0, 0, 0, 0, //
        0, 90, 0x05, 0x06, 10, 0, 0, 1,
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock, server());
    let listener = stack.listen(&Name::parse("127.0.0.1:2000", "0"), 10).unwrap();

    let ctl = Controller::new();
    let op = AcceptOperation::new();
    listener.accept_async(&ctl, &op).unwrap();
    assert!(ctl.wait_for(op.as_operation(), Some(Duration::from_secs(1))));
    let socket = op.result().unwrap();
    assert_eq!(socket.peer_name(), Name::new("10.0.0.1", "1286"));
}

#[test]
fn bind_rejection_yields_no_socket() {
    let mock = MockNetworkStack::new();
    let tx = [4, 2, 0x07, 0xD0, 127, 0, 0, 1, 0];
    let rx = [
        0, 90, 0, 0, 0, 0, 0, 0, //
        0, 91, 0, 0, 0, 0, 0, 0, // second reply rejected
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks4NetworkStack::new(mock, server());
    let listener = stack.listen(&Name::parse("127.0.0.1:2000", "0"), 10).unwrap();
    let accepted = listener.accept(Some(Duration::from_secs(1))).unwrap();
    assert!(accepted.is_none());
}

#[test]
fn bind_fails_when_the_proxy_is_unreachable() {
    let stack = Socks4NetworkStack::new(Arc::new(keel::testing::NullNetworkStack), server());
    let listener = stack.listen(&Name::parse("127.0.0.1:2000", "0"), 10).unwrap();
    assert!(listener.accept(Some(Duration::from_secs(1))).is_err());
}
