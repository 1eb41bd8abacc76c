//! Integration tests: the client's discovery pipeline against a real server.
//!
//! # Purpose
//!
//! Each test starts the server side from the `btremote-server` library on
//! loopback (RPC listener on an OS-assigned port, discovery responder on an
//! OS-assigned UDP port) and points the client's requester at it by using
//! `127.0.0.1` as the only broadcast target.  This exercises the same code
//! paths as a LAN broadcast without needing one.
//!
//! ```text
//! DiscoveryRequester ──query──► DiscoveryResponder
//!        ▲                             │
//!        └─────────response────────────┘
//!        │
//!  SessionRegistry ──RPC──► RpcServer → AuthenticatedHandler → InMemoryAdapter
//! ```

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use btremote_client::application::{RegistryConfig, RegistryError, SessionRegistry};
use btremote_client::infrastructure::network::{DiscoveryRequester, TcpSessionFactory};
use btremote_core::{CallError, Credential, DeviceSnapshot, DiscoveryConfig, PeerAddress};
use btremote_server::application::{AuthenticatedHandler, DeviceService};
use btremote_server::infrastructure::adapter::InMemoryAdapter;
use btremote_server::infrastructure::network::{DiscoveryResponder, RpcServer};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

const SECRET: &str = "s3cret";
const KEYBOARD: &str = "AA:BB:CC:DD:EE:01";
const MOUSE: &str = "AA:BB:CC:DD:EE:02";

// ── Helpers ───────────────────────────────────────────────────────────────────

fn device(address: &str, name: &str) -> DeviceSnapshot {
    DeviceSnapshot {
        address: address.to_string(),
        name: name.to_string(),
        trusted: true,
        paired: true,
        connected: false,
        battery: None,
        icon: None,
    }
}

fn loopback_discovery() -> DiscoveryConfig {
    DiscoveryConfig {
        broadcast_port: 0,
        ..DiscoveryConfig::default()
    }
}

/// A running server: RPC listener plus a responder advertising its port.
struct TestServer {
    rpc: RpcServer,
    responder: DiscoveryResponder,
}

impl TestServer {
    async fn start() -> Self {
        let handler = AuthenticatedHandler::new(
            Credential::new(SECRET),
            DeviceService::new(InMemoryAdapter::new(vec![
                device(KEYBOARD, "Keyboard"),
                device(MOUSE, "Mouse"),
            ])),
        );
        let rpc = RpcServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(handler))
            .await
            .unwrap();
        let responder = DiscoveryResponder::start(
            &loopback_discovery(),
            Ipv4Addr::LOCALHOST.into(),
            rpc.local_addr().port(),
        )
        .await
        .unwrap();
        Self { rpc, responder }
    }

    fn requester(&self) -> DiscoveryRequester {
        DiscoveryRequester::new(DiscoveryConfig {
            broadcast_port: self.responder.local_addr().port(),
            ..DiscoveryConfig::default()
        })
        .with_bind_ip(Ipv4Addr::LOCALHOST)
    }

    fn peer(&self) -> PeerAddress {
        PeerAddress::from(self.rpc.local_addr())
    }

    async fn shutdown(self) {
        self.responder.shutdown().await;
        self.rpc.shutdown().await;
    }
}

fn client_registry(secret: &str, local_ips: HashSet<std::net::IpAddr>) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(
        RegistryConfig {
            local_ips,
            ..RegistryConfig::default()
        },
        Arc::new(TcpSessionFactory::new(Credential::new(secret))),
    ))
}

// ── Discovery ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_requester_yields_exactly_one_peer_with_advertised_port() {
    // Arrange: a responder advertising 9001 (nothing needs to listen there)
    let responder = DiscoveryResponder::start(&loopback_discovery(), Ipv4Addr::LOCALHOST.into(), 9001)
        .await
        .unwrap();
    let requester = DiscoveryRequester::new(DiscoveryConfig {
        broadcast_port: responder.local_addr().port(),
        ..DiscoveryConfig::default()
    })
    .with_bind_ip(Ipv4Addr::LOCALHOST)
    .with_timeout(Some(Duration::from_millis(500)));

    // Act
    let mut discovery = requester.discover(&[Ipv4Addr::LOCALHOST]).await.unwrap();
    let mut found = Vec::new();
    while let Some(peer) = timeout(Duration::from_secs(5), discovery.recv())
        .await
        .expect("queue must close after the attempt's timeout")
    {
        found.push(peer);
    }

    // Assert
    assert_eq!(found.len(), 1);
    assert!(found[0].as_str().ends_with(":9001"));
    assert_eq!(found[0].port(), 9001);

    responder.shutdown().await;
}

// ── Discovery → sessions → events ─────────────────────────────────────────────

#[tokio::test]
async fn test_discovered_server_devices_arrive_as_events() {
    // Arrange
    let server = TestServer::start().await;
    let registry = client_registry(SECRET, HashSet::new());
    let discovery = server.requester().discover(&[Ipv4Addr::LOCALHOST]).await.unwrap();
    let (peers, handle) = discovery.into_parts();

    // Act
    let pump = registry.run_discovery(peers);
    let events = registry.events();
    let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();

    // Assert: adapter order, tagged with the RPC address
    assert_eq!(first.peer, server.peer());
    assert_eq!(first.device.address, KEYBOARD);
    assert_eq!(second.device.address, MOUSE);
    assert_eq!(registry.peers(), vec![server.peer()]);

    handle.shutdown().await;
    registry.shutdown().await;
    pump.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_through_registry_changes_server_state() {
    // Arrange
    let server = TestServer::start().await;
    let registry = client_registry(SECRET, HashSet::new());
    registry.on_peer_discovered(server.peer()).await;

    // Act
    registry.connect_device(&server.peer(), MOUSE).await.unwrap();

    // Assert: a fresh listing shows the new state
    assert_eq!(registry.on_peer_discovered(server.peer()).await, 2);
    let events = registry.events();
    let mut mouse_connected = None;
    while let Some(event) = events.try_recv() {
        if event.device.address == MOUSE {
            mouse_connected = Some(event.device.connected);
        }
    }
    assert_eq!(mouse_connected, Some(true));

    registry.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_wrong_secret_yields_no_events_and_unauthorized_commands() {
    // Arrange
    let server = TestServer::start().await;
    let registry = client_registry("wrong", HashSet::new());

    // Act
    let published = registry.on_peer_discovered(server.peer()).await;
    let result = registry.connect_device(&server.peer(), KEYBOARD).await;

    // Assert
    assert_eq!(published, 0);
    assert!(registry.peers().contains(&server.peer()), "session stays registered");
    assert_eq!(result, Err(RegistryError::Call(CallError::Unauthorized)));

    registry.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_own_address_is_suppressed_end_to_end() {
    // Arrange: the client treats 127.0.0.1 as one of its own addresses
    let server = TestServer::start().await;
    let registry = client_registry(SECRET, HashSet::from([Ipv4Addr::LOCALHOST.into()]));
    let discovery = server
        .requester()
        .with_timeout(Some(Duration::from_millis(500)))
        .discover(&[Ipv4Addr::LOCALHOST])
        .await
        .unwrap();
    let (peers, handle) = discovery.into_parts();

    // Act
    let pump = registry.run_discovery(peers);
    timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump must end with the discovery attempt")
        .unwrap();

    // Assert
    assert!(registry.peers().is_empty());
    assert!(registry.events().try_recv().is_none());

    handle.shutdown().await;
    registry.shutdown().await;
    server.shutdown().await;
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_is_not_held_up_by_a_silent_peer() {
    // Arrange: a peer that accepts the connection and never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = PeerAddress::from(listener.local_addr().unwrap());
    let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(());
        let mut sink = [0u8; 256];
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    });
    let registry = client_registry(SECRET, HashSet::new());
    let lookup = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.on_peer_discovered(silent).await }
    });
    timeout(Duration::from_secs(5), accepted_rx)
        .await
        .expect("the session must dial the peer")
        .unwrap();

    // Act
    timeout(Duration::from_secs(3), registry.shutdown())
        .await
        .expect("shutdown must not wait for the silent peer");

    // Assert
    let published = timeout(Duration::from_secs(3), lookup)
        .await
        .expect("the lookup must end with the registry")
        .unwrap();
    assert_eq!(published, 0);
    assert!(registry.peers().is_empty());
}
