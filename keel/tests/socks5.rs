//! SOCKS5 tunnel handshakes, checked against scripted wire data.

use std::sync::Arc;
use std::time::Duration;

use keel::aio::{CommunicationObject, Controller};
use keel::net::tunnel::Socks5NetworkStack;
use keel::net::{Name, NetworkStack};
use keel::testing::{MockNetworkStack, NullNetworkStack};
use keel::ErrorKind;

fn server() -> Name {
    Name::new("s5host", "1080")
}

fn verify_passthrough(socket: &Arc<dyn keel::net::Socket>) {
    let ctl = Controller::new();
    socket.full_send(&ctl, b"ab", None).unwrap();
    let reply = socket.full_receive(&ctl, 2, None).unwrap();
    assert_eq!(&reply[..], b"xy");
}

#[test]
fn connect_to_ip() {
    let mock = MockNetworkStack::new();
    let tx = [
        5, 1, 0, // greeting: no-auth only
        5, 1, 0, 1, 141, 30, 6, 1, 0x1F, 0x90, // CONNECT 141.30.6.1:8080
        b'a', b'b',
    ];
    let rx = [
        5, 0, // no-auth accepted
        5, 0, 0, 1, 7, 6, 5, 4, 99, 22, // granted, bound 7.6.5.4:25366
        b'x', b'y',
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks5NetworkStack::new(mock.clone(), server());
    let socket = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap();
    verify_passthrough(&socket);
    assert!(mock.is_done());
}

#[test]
fn connect_to_domain_resolves_remotely() {
    let mock = MockNetworkStack::new();
    let tx = [
        5, 1, 0, //
        5, 1, 0, 3, 6, b'd', b'o', b'm', b'a', b'i', b'n', 0x1F, 0x90,
    ];
    // The proxy may answer with a domain-typed bound address; its
    // length-prefixed field must be skipped correctly.
    let rx = [
        5, 0, //
        5, 0, 0, 3, 7, b'a', b'd', b'd', b'r', b'e', b's', b's', 99, 22, //
        b'x', b'y',
    ];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks5NetworkStack::new(mock.clone(), server());
    let socket = stack
        .connect(&Name::parse("domain:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap();
    verify_passthrough(&socket);
    assert!(mock.is_done());
}

#[test]
fn ipv6_bound_addresses_are_skipped() {
    let mock = MockNetworkStack::new();
    let tx = [5, 1, 0, 5, 1, 0, 1, 141, 30, 6, 1, 0x1F, 0x90, b'a', b'b'];
    let mut rx = vec![5, 0, 5, 0, 0, 4];
    rx.extend_from_slice(&[0x11; 16]); // 16-byte IPv6 bound address
    rx.extend_from_slice(&[99, 22]);
    rx.extend_from_slice(b"xy");
    mock.expect_connection(server(), rx, tx.as_slice());

    let stack = Socks5NetworkStack::new(mock, server());
    let socket = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap();
    verify_passthrough(&socket);
}

#[test]
fn bad_port_fails_after_the_greeting() {
    let mock = MockNetworkStack::new();
    let tx = [5, 1, 0];
    let rx = [5, 0];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks5NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::new("141.30.6.1", "foo"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "bad port");
}

#[test]
fn rejection_reports_the_reply_code() {
    let mock = MockNetworkStack::new();
    let tx = [5, 1, 0, 5, 1, 0, 1, 141, 30, 6, 1, 0x1F, 0x90];
    let rx = [5, 0, 5, 4, 0, 1, 7, 6, 5, 4, 99, 22];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks5NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "Host unreachable (SOCKS5 error code: 4)");
}

#[test]
fn auth_mismatch_is_an_error() {
    let mock = MockNetworkStack::new();
    let tx = [5, 1, 0];
    let rx = [5, 0xFF];
    mock.expect_connection(server(), rx.as_slice(), tx.as_slice());

    let stack = Socks5NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "No acceptable authentication method");
}

#[test]
fn server_closing_during_the_greeting_is_an_error() {
    let mock = MockNetworkStack::new();
    let tx = [5, 1, 0];
    mock.expect_connection(server(), &b""[..], tx.as_slice());

    let stack = Socks5NetworkStack::new(mock, server());
    let err = stack
        .connect(&Name::parse("141.30.6.1:8080", "0"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[test]
fn unreachable_server_propagates_the_connect_error() {
    let stack = Socks5NetworkStack::new(Arc::new(NullNetworkStack), server());
    let err = stack
        .connect(&Name::new("a", "1"), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[test]
fn listen_is_unsupported() {
    let stack = Socks5NetworkStack::new(MockNetworkStack::new(), server());
    let err = stack.listen(&Name::new("0.0.0.0", "10000"), 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}
