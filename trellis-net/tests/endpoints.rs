//! End-to-end tests for UDP and TCP endpoints on the loopback interface.
//!
//! Every test binds ephemeral ports so runs never collide. Tests that block on sockets carry a
//! watchdog timeout well above any wait they configure.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use ntest_timeout::timeout;
use pretty_assertions::assert_eq;
use trellis_net::{
    AddressSpec, TcpClient, TcpPeer, TcpServer, TimeoutPolicy, TransportError, UdpClient,
    UdpServer, Wait,
};
use trellis_protocol::{Field, FieldValue, ProtocolTemplate};

const LOCAL_IP: &str = "127.0.0.1";

/// Receive failures must stay close to the configured wait; anything past this is a hang.
const TIMEOUT_TOLERANCE: Duration = Duration::from_millis(500);

fn loopback() -> AddressSpec {
    AddressSpec::new(LOCAL_IP, None).expect("loopback address is valid")
}

/// A default generous enough that tests never trip it by accident.
fn generous() -> TimeoutPolicy {
    TimeoutPolicy::new(Duration::from_secs(5))
}

fn udp_pair(timeouts: TimeoutPolicy) -> (UdpServer, UdpClient) {
    let server = UdpServer::bind(&loopback(), timeouts).expect("failed to bind udp server");
    let mut client = UdpClient::new(timeouts);
    client
        .connect_to(LOCAL_IP, server.local_address().port())
        .expect("failed to connect udp client");
    (server, client)
}

fn tcp_pair(timeouts: TimeoutPolicy) -> (TcpServer, TcpPeer) {
    let server = TcpServer::bind(&loopback(), timeouts).expect("failed to bind tcp server");
    let peer = TcpClient::new(timeouts)
        .connect_to(LOCAL_IP, server.local_address().port())
        .expect("failed to connect tcp client");
    (server, peer)
}

#[track_caller]
fn assert_times_out(result: Result<Vec<u8>, TransportError>, started: Instant) {
    let error = result.expect_err("receive should have timed out");
    assert!(error.is_timeout(), "expected a timeout, got: {error:?}");
    assert!(
        started.elapsed() < TIMEOUT_TOLERANCE,
        "timeout took {:?}",
        started.elapsed(),
    );
}

#[test]
#[timeout(10000)]
fn udp_client_to_server() {
    let (server, client) = udp_pair(generous());
    client.send(b"foofaa").unwrap();
    assert_eq!(server.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn udp_server_to_client() {
    let (server, client) = udp_pair(generous());
    let client_port = client.local_address().unwrap().port();
    server.send_to(b"foofaa", LOCAL_IP, client_port).unwrap();
    assert_eq!(client.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn udp_round_trip_is_byte_exact() {
    let (server, client) = udp_pair(generous());
    let payload: Vec<u8> = (0..=255).collect();

    client.send(&payload).unwrap();
    let (received, sender) = server.receive_from(Wait::Default).unwrap();
    assert_eq!(received, payload);
    assert_eq!(sender, client.local_address().unwrap());

    server
        .send_to(&payload, LOCAL_IP, sender.port())
        .unwrap();
    assert_eq!(client.receive(Wait::Default).unwrap(), payload);
}

#[test]
#[timeout(10000)]
fn udp_client_with_wildcard_host_is_reachable() {
    let server = UdpServer::bind(&loopback(), generous()).unwrap();
    let mut client = UdpClient::new(generous());
    client.bind(&AddressSpec::any()).unwrap();
    client
        .connect_to(LOCAL_IP, server.local_address().port())
        .unwrap();

    // The concrete ephemeral port is discoverable even though the bind left it to the OS.
    let client_port = client.local_address().unwrap().port();
    assert_ne!(client_port, 0);
    server.send_to(b"foofaa", LOCAL_IP, client_port).unwrap();
    assert_eq!(client.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn udp_client_with_ephemeral_port_is_reachable() {
    let server = UdpServer::bind(&loopback(), generous()).unwrap();
    let mut client = UdpClient::new(generous());
    client.bind(&loopback()).unwrap();
    client
        .connect_to(LOCAL_IP, server.local_address().port())
        .unwrap();

    let client_address = client.local_address().unwrap();
    server
        .send_to(b"foofaa", &client_address.ip().to_string(), client_address.port())
        .unwrap();
    assert_eq!(client.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn udp_default_timeout_expires() {
    let (server, client) = udp_pair(TimeoutPolicy::new(Duration::from_millis(100)));

    let started = Instant::now();
    assert_times_out(server.receive(Wait::Default), started);

    let started = Instant::now();
    assert_times_out(client.receive(Wait::Default), started);
}

#[test]
#[timeout(10000)]
fn udp_override_beats_longer_default() {
    let (server, client) = udp_pair(generous());

    let started = Instant::now();
    assert_times_out(
        server.receive(Wait::For(Duration::from_millis(100))),
        started,
    );

    let started = Instant::now();
    assert_times_out(
        client.receive(Wait::For(Duration::from_millis(100))),
        started,
    );
}

#[test]
#[timeout(10000)]
fn udp_blocking_override_outwaits_short_default() {
    let (server, client) = udp_pair(TimeoutPolicy::new(Duration::from_millis(100)));

    let sender = client.endpoint().unwrap().clone();
    let timer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        sender.send(b"foofaa").unwrap();
    });

    // With a 100ms default this would time out before the send; the sentinel must outwait it.
    assert_eq!(server.receive(Wait::Blocking).unwrap(), b"foofaa");
    timer.join().unwrap();
}

#[test]
#[timeout(10000)]
fn udp_close_fails_blocked_receive() {
    let (server, _client) = udp_pair(generous());

    let closer = server.endpoint().clone();
    let timer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        closer.close();
    });

    assert!(matches!(
        server.receive(Wait::Blocking),
        Err(TransportError::Closed),
    ));
    timer.join().unwrap();
}

#[test]
#[timeout(10000)]
fn tcp_client_to_server() {
    let (server, client_peer) = tcp_pair(generous());

    // Data sent before the accept must survive once the connection is established.
    client_peer.send(b"foofaa").unwrap();
    server.accept_connection(None, Wait::Default).unwrap();
    assert_eq!(server.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn tcp_server_to_client() {
    let (server, client_peer) = tcp_pair(generous());
    server.accept_connection(None, Wait::Default).unwrap();
    server.send(b"foofaa").unwrap();
    assert_eq!(client_peer.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn tcp_queued_connections_drain_in_arrival_order() {
    let (server, first_peer) = tcp_pair(generous());
    let second_peer = TcpClient::new(generous())
        .connect_to(LOCAL_IP, server.local_address().port())
        .unwrap();

    let first = server.accept_connection(None, Wait::Default).unwrap();
    let second = server.accept_connection(None, Wait::Default).unwrap();

    assert_eq!(first.peer_address(), first_peer.local_address());
    assert_eq!(second.peer_address(), second_peer.local_address());
}

#[test]
#[timeout(10000)]
fn tcp_alias_table_tracks_named_connections() {
    let (server, _client_peer) = tcp_pair(generous());
    let accepted = server
        .accept_connection(Some("Connection alias1"), Wait::Default)
        .unwrap();

    let named = server.connection("Connection alias1").unwrap();
    assert_eq!(named.peer_address(), accepted.peer_address());
    assert!(server.connection("Connection alias2").is_none());
}

#[test]
#[timeout(10000)]
fn tcp_unnamed_connections_leave_no_alias() {
    let (server, _client_peer) = tcp_pair(generous());
    server.accept_connection(None, Wait::Default).unwrap();
    assert!(server.connection("Connection alias1").is_none());
}

#[test]
#[timeout(10000)]
fn tcp_accept_honors_override() {
    let server = TcpServer::bind(&loopback(), generous()).unwrap();
    let started = Instant::now();
    let error = server
        .accept_connection(None, Wait::For(Duration::from_millis(100)))
        .expect_err("accept should have timed out");
    assert!(error.is_timeout(), "expected a timeout, got: {error:?}");
    assert!(started.elapsed() < TIMEOUT_TOLERANCE);
}

#[test]
#[timeout(10000)]
fn tcp_peer_close_fails_blocked_receive() {
    let (server, client_peer) = tcp_pair(generous());
    server.accept_connection(None, Wait::Default).unwrap();

    let closer = client_peer.clone();
    let timer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        closer.close();
    });

    assert!(matches!(
        client_peer.receive(Wait::Blocking),
        Err(TransportError::Closed),
    ));
    timer.join().unwrap();
}

#[test]
#[timeout(10000)]
fn tcp_server_close_leaves_accepted_peers_usable() {
    let (server, client_peer) = tcp_pair(generous());
    let accepted = server.accept_connection(None, Wait::Default).unwrap();

    server.close();
    assert!(matches!(
        server.accept_connection(None, Wait::Default),
        Err(TransportError::Closed),
    ));

    // The accepted connection is an independent resource.
    accepted.send(b"foofaa").unwrap();
    assert_eq!(client_peer.receive(Wait::Default).unwrap(), b"foofaa");
}

#[test]
#[timeout(10000)]
fn templated_message_over_udp() {
    let mut template = ProtocolTemplate::new("Framed");
    template.add(Field::uint(1, "id", 1)).unwrap();
    template.add(Field::uint(2, "length", None)).unwrap();
    template.add(Field::payload("length-2").unwrap()).unwrap();

    let mut message = BTreeMap::new();
    message.insert("id".to_owned(), FieldValue::Uint(1));
    message.insert("payload".to_owned(), FieldValue::from(&b"foofaa"[..]));
    let encoded = template.encode(&message).unwrap();

    let (server, client) = udp_pair(generous());
    client.send(&encoded).unwrap();
    let received = server.receive(Wait::Default).unwrap();

    let decoded = template.decode(&received).unwrap();
    assert_eq!(decoded.uint("id"), Some(1));
    assert_eq!(decoded.bytes("payload"), Some(&b"foofaa"[..]));
}
