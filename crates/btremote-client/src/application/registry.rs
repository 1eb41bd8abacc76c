//! SessionRegistry: discovered peers, their sessions, and the device event
//! stream.
//!
//! The registry is the controller's only piece of shared mutable state.  It
//! maps every discovered [`PeerAddress`] to an open [`PeerSession`] and owns
//! the bounded queue of [`DeviceEvent`]s that callers consume through
//! [`SessionRegistry::events`].
//!
//! # Discovery pipeline (for beginners)
//!
//! ```text
//! DiscoveryRequester ──PeerAddress──► run_discovery ──spawn──► on_peer_discovered
//!                                                                  │
//!                       open session, ListTrustedDevices ◄─────────┘
//!                                │
//!                                └──DeviceEvent──► events() consumer
//! ```
//!
//! Each discovered address is handled on its own task, so a slow peer never
//! holds up the others.  Events from one peer keep the order that peer
//! listed its devices in; events from different peers interleave in arrival
//! order.
//!
//! # Backpressure
//!
//! The event queue is bounded (20 by default).  When it is full, publishing
//! waits until a consumer reads; events are never dropped.
//!
//! # Locking
//!
//! The session map sits behind a `std::sync::Mutex` that is only held for an
//! insert, lookup, or removal.  Network calls always run on a cloned
//! `Arc<PeerSession>` after the lock is released.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use btremote_core::{CallError, DeviceEvent, PeerAddress};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::application::session::{PeerSession, SessionFactory};

/// Default capacity of the device event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 20;

/// Error type for commands routed through the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No session is registered for this peer.
    #[error("no session for peer {0}")]
    PeerNotFound(PeerAddress),
    /// The session's call failed.
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("session registry is shut down")]
    ShutDown,
}

/// Behaviour switches for a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Ignore peers whose IP is one of `local_ips`.
    pub suppress_self_discovery: bool,
    /// This machine's own addresses.
    pub local_ips: HashSet<IpAddr>,
    pub event_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            suppress_self_discovery: true,
            local_ips: HashSet::new(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Consumer handle of the registry's device event queue.
///
/// Clones share the same queue: every event is delivered to exactly one
/// `recv` call, in insertion order.  The stream ends (returns `None`) after
/// [`SessionRegistry::shutdown`] once every queued event has been read.
#[derive(Clone)]
pub struct DeviceEvents {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DeviceEvent>>>,
}

impl DeviceEvents {
    pub async fn recv(&self) -> Option<DeviceEvent> {
        self.rx.lock().await.recv().await
    }

    /// Returns a queued event without waiting, if there is one.
    pub fn try_recv(&self) -> Option<DeviceEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

/// Registry of open peer sessions and publisher of device events.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<PeerAddress, Arc<PeerSession>>>,
    factory: Arc<dyn SessionFactory>,
    config: RegistryConfig,
    events_tx: Mutex<Option<mpsc::Sender<DeviceEvent>>>,
    events: DeviceEvents,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            config,
            events_tx: Mutex::new(Some(tx)),
            events: DeviceEvents {
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
            shutdown_tx,
        }
    }

    /// Handles one discovered address.
    ///
    /// Opens a session (replacing any existing one for the same address),
    /// lists the peer's trusted devices, and publishes one [`DeviceEvent`]
    /// per device.  Waits while the event queue is full.
    ///
    /// Returns the number of events published.  A failed listing is logged
    /// and publishes nothing, but the session stays registered.  After
    /// [`shutdown`](Self::shutdown) no session is opened, and a listing or
    /// publish still in flight is abandoned.
    pub async fn on_peer_discovered(&self, peer: PeerAddress) -> usize {
        if self.is_own_address(&peer) {
            debug!("ignoring own address {peer}");
            return 0;
        }

        let session = {
            // Checked under the map lock: shutdown raises the flag before it
            // drains, so a session inserted here is always drained.
            let mut sessions = self.lock_sessions();
            if self.is_shut_down() {
                debug!("registry shut down; ignoring {peer}");
                return 0;
            }
            let session = Arc::new(self.factory.open(&peer));
            match sessions.insert(peer.clone(), Arc::clone(&session)) {
                Some(old) => info!(
                    "replaced session {} for {peer} with {}",
                    old.id(),
                    session.id()
                ),
                None => info!("opened session {} for {peer}", session.id()),
            }
            session
        };

        let devices = match self.unless_shut_down(session.list_trusted_devices()).await {
            Some(Ok(devices)) => devices,
            Some(Err(e)) => {
                warn!("listing devices of {peer} failed: {e}");
                return 0;
            }
            None => {
                debug!("registry shut down while listing {peer}");
                return 0;
            }
        };

        let Some(tx) = self.sender() else {
            debug!("registry shut down; dropping listing of {peer}");
            return 0;
        };
        let mut published = 0;
        for device in devices {
            let event = DeviceEvent {
                peer: peer.clone(),
                device,
            };
            match self.unless_shut_down(tx.send(event)).await {
                Some(Ok(())) => {}
                _ => break,
            }
            published += 1;
        }
        debug!("published {published} device events for {peer}");
        published
    }

    /// Connects `device_address` on `peer`.
    ///
    /// Does not re-list the peer afterwards; callers that need the new state
    /// must rediscover.
    ///
    /// # Errors
    ///
    /// [`RegistryError::PeerNotFound`] if no session is registered for
    /// `peer` (nothing is sent), [`RegistryError::Call`] if the call fails,
    /// or [`RegistryError::ShutDown`] if the registry shuts down first.
    pub async fn connect_device(&self, peer: &PeerAddress, device_address: &str) -> Result<(), RegistryError> {
        let session = self.require_session(peer)?;
        let result = self
            .unless_shut_down(session.connect(device_address))
            .await
            .ok_or(RegistryError::ShutDown)?;
        result.map_err(|e| {
            warn!("connecting {device_address} on {peer} failed: {e}");
            RegistryError::Call(e)
        })
    }

    /// Disconnects `device_address` on `peer`.
    ///
    /// # Errors
    ///
    /// Same as [`connect_device`](Self::connect_device).
    pub async fn disconnect_device(&self, peer: &PeerAddress, device_address: &str) -> Result<(), RegistryError> {
        let session = self.require_session(peer)?;
        let result = self
            .unless_shut_down(session.disconnect(device_address))
            .await
            .ok_or(RegistryError::ShutDown)?;
        result.map_err(|e| {
            warn!("disconnecting {device_address} on {peer} failed: {e}");
            RegistryError::Call(e)
        })
    }

    /// Returns a consumer handle for the device event queue.
    pub fn events(&self) -> DeviceEvents {
        self.events.clone()
    }

    pub fn session(&self, peer: &PeerAddress) -> Option<Arc<PeerSession>> {
        self.lock_sessions().get(peer).cloned()
    }

    /// Registered peer addresses, sorted.
    pub fn peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self.lock_sessions().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Removes and closes the session for `peer`.  Returns `false` if there
    /// was none.
    pub async fn close_peer(&self, peer: &PeerAddress) -> bool {
        let removed = self.lock_sessions().remove(peer);
        match removed {
            Some(session) => {
                session.close().await;
                info!("closed session {} for {peer}", session.id());
                true
            }
            None => false,
        }
    }

    /// Feeds every address received on `peers` into
    /// [`on_peer_discovered`](Self::on_peer_discovered), one task per address.
    ///
    /// The returned task ends when `peers` closes and every lookup finished,
    /// or when [`shutdown`](Self::shutdown) is called (pending lookups are
    /// aborted).
    pub fn run_discovery(self: &Arc<Self>, peers: mpsc::Receiver<PeerAddress>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(discovery_pump(registry, peers, shutdown))
    }

    /// Stops every discovery pipeline, closes every session, and closes the
    /// event queue.  Consumers still receive events queued before this call.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let sessions: Vec<_> = self.lock_sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
        info!("session registry shut down");
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Runs `work` until it finishes or the registry shuts down, whichever
    /// comes first.  `None` means shutdown won.
    async fn unless_shut_down<T>(&self, work: impl Future<Output = T>) -> Option<T> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            out = work => Some(out),
            _ = stopped(&mut shutdown) => None,
        }
    }

    fn is_own_address(&self, peer: &PeerAddress) -> bool {
        self.config.suppress_self_discovery
            && peer
                .ip()
                .is_some_and(|ip| self.config.local_ips.contains(&ip))
    }

    fn require_session(&self, peer: &PeerAddress) -> Result<Arc<PeerSession>, RegistryError> {
        self.session(peer)
            .ok_or_else(|| RegistryError::PeerNotFound(peer.clone()))
    }

    fn sender(&self) -> Option<mpsc::Sender<DeviceEvent>> {
        self.events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<PeerAddress, Arc<PeerSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn discovery_pump(
    registry: Arc<SessionRegistry>,
    mut peers: mpsc::Receiver<PeerAddress>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lookups = JoinSet::new();

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            next = peers.recv() => match next {
                Some(peer) => {
                    let registry = Arc::clone(&registry);
                    lookups.spawn(async move {
                        registry.on_peer_discovered(peer).await;
                    });
                }
                None => {
                    debug!("discovery queue closed; waiting for {} lookups", lookups.len());
                    tokio::select! {
                        _ = stopped(&mut shutdown) => {}
                        _ = drain(&mut lookups) => {}
                    }
                    break;
                }
            },
            Some(_) = lookups.join_next(), if !lookups.is_empty() => {}
        }
    }

    lookups.shutdown().await;
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn drain(lookups: &mut JoinSet<()>) {
    while lookups.join_next().await.is_some() {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use btremote_core::{CallContext, Credential, DeviceSnapshot, RpcMethod, RpcReply};
    use tokio::sync::Notify;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use crate::application::channel::{AuthenticatedChannel, CallTransport};

    // ── Test doubles ──────────────────────────────────────────────────────────

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Answers every call from a fixed table and records what was asked.
    struct FakeTransport {
        peer: PeerAddress,
        listing: Result<Vec<DeviceSnapshot>, CallError>,
        log: CallLog,
    }

    #[async_trait]
    impl CallTransport for FakeTransport {
        async fn call(&self, _context: CallContext, method: RpcMethod) -> Result<RpcReply, CallError> {
            let entry = match &method {
                RpcMethod::ListTrustedDevices => format!("list {}", self.peer),
                RpcMethod::Connect { address } => format!("connect {} {address}", self.peer),
                RpcMethod::Disconnect { address } => format!("disconnect {} {address}", self.peer),
            };
            self.log.lock().unwrap().push(entry);
            match method {
                RpcMethod::ListTrustedDevices => self.listing.clone().map(RpcReply::Devices),
                _ => Ok(RpcReply::Done),
            }
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        listings: HashMap<String, Result<Vec<DeviceSnapshot>, CallError>>,
        log: CallLog,
    }

    impl FakeFactory {
        fn with_listing(mut self, peer: &str, listing: Result<Vec<DeviceSnapshot>, CallError>) -> Self {
            self.listings.insert(peer.to_string(), listing);
            self
        }
    }

    impl SessionFactory for FakeFactory {
        fn open(&self, peer: &PeerAddress) -> PeerSession {
            self.log.lock().unwrap().push(format!("open {peer}"));
            let transport = FakeTransport {
                peer: peer.clone(),
                listing: self
                    .listings
                    .get(peer.as_str())
                    .cloned()
                    .unwrap_or_else(|| Ok(Vec::new())),
                log: Arc::clone(&self.log),
            };
            PeerSession::new(
                peer.clone(),
                AuthenticatedChannel::new(Credential::new("s3cret"), Arc::new(transport)),
            )
        }
    }

    /// Never answers the calls selected by `hang_listing` and
    /// `hang_commands`, like a peer that accepted the connection and went
    /// silent.  `started` is notified when a hanging call begins.
    #[derive(Clone)]
    struct SilentTransport {
        hang_listing: bool,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl CallTransport for SilentTransport {
        async fn call(&self, _context: CallContext, method: RpcMethod) -> Result<RpcReply, CallError> {
            if matches!(method, RpcMethod::ListTrustedDevices) && !self.hang_listing {
                return Ok(RpcReply::Devices(Vec::new()));
            }
            self.started.notify_one();
            std::future::pending().await
        }
    }

    impl SessionFactory for SilentTransport {
        fn open(&self, peer: &PeerAddress) -> PeerSession {
            PeerSession::new(
                peer.clone(),
                AuthenticatedChannel::new(Credential::new("s3cret"), Arc::new(self.clone())),
            )
        }
    }

    fn silent_registry(hang_listing: bool) -> (Arc<SessionRegistry>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let factory = SilentTransport {
            hang_listing,
            started: Arc::clone(&started),
        };
        let registry = SessionRegistry::new(RegistryConfig::default(), Arc::new(factory));
        (Arc::new(registry), started)
    }

    fn device(address: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            address: address.to_string(),
            name: format!("dev-{address}"),
            trusted: true,
            paired: true,
            connected: false,
            battery: None,
            icon: None,
        }
    }

    fn peer(s: &str) -> PeerAddress {
        PeerAddress::parse(s).unwrap()
    }

    fn registry(factory: FakeFactory, config: RegistryConfig) -> (SessionRegistry, CallLog) {
        let log = Arc::clone(&factory.log);
        (SessionRegistry::new(config, Arc::new(factory)), log)
    }

    // ── on_peer_discovered ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_discovered_peer_publishes_one_event_per_device_in_order() {
        // Arrange
        let factory = FakeFactory::default().with_listing(
            "10.0.0.2:9001",
            Ok(vec![device("AA:AA:AA:AA:AA:AA"), device("BB:BB:BB:BB:BB:BB")]),
        );
        let (registry, _log) = registry(factory, RegistryConfig::default());
        let events = registry.events();

        // Act
        let published = registry.on_peer_discovered(peer("10.0.0.2:9001")).await;

        // Assert
        assert_eq!(published, 2);
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.peer, peer("10.0.0.2:9001"));
        assert_eq!(first.device.address, "AA:AA:AA:AA:AA:AA");
        assert_eq!(second.device.address, "BB:BB:BB:BB:BB:BB");
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_own_address_is_ignored_when_suppression_enabled() {
        // Arrange
        let factory = FakeFactory::default().with_listing("192.168.1.10:9001", Ok(vec![device("AA:AA:AA:AA:AA:AA")]));
        let config = RegistryConfig {
            local_ips: HashSet::from(["192.168.1.10".parse().unwrap()]),
            ..RegistryConfig::default()
        };
        let (registry, log) = registry(factory, config);

        // Act
        let published = registry.on_peer_discovered(peer("192.168.1.10:9001")).await;

        // Assert
        assert_eq!(published, 0);
        assert!(registry.peers().is_empty());
        assert!(registry.events().try_recv().is_none());
        assert!(log.lock().unwrap().is_empty(), "no session may be opened");
    }

    #[tokio::test]
    async fn test_own_address_is_accepted_when_suppression_disabled() {
        let factory = FakeFactory::default().with_listing("192.168.1.10:9001", Ok(vec![device("AA:AA:AA:AA:AA:AA")]));
        let config = RegistryConfig {
            suppress_self_discovery: false,
            local_ips: HashSet::from(["192.168.1.10".parse().unwrap()]),
            ..RegistryConfig::default()
        };
        let (registry, _log) = registry(factory, config);

        assert_eq!(registry.on_peer_discovered(peer("192.168.1.10:9001")).await, 1);
        assert_eq!(registry.peers(), vec![peer("192.168.1.10:9001")]);
    }

    #[tokio::test]
    async fn test_failed_listing_publishes_nothing_but_keeps_session() {
        let factory = FakeFactory::default().with_listing("10.0.0.3:9001", Err(CallError::Unauthorized));
        let (registry, _log) = registry(factory, RegistryConfig::default());

        let published = registry.on_peer_discovered(peer("10.0.0.3:9001")).await;

        assert_eq!(published, 0);
        assert!(registry.events().try_recv().is_none());
        assert!(registry.session(&peer("10.0.0.3:9001")).is_some());
    }

    #[tokio::test]
    async fn test_rediscovery_replaces_the_session() {
        let (registry, _log) = registry(FakeFactory::default(), RegistryConfig::default());
        let addr = peer("10.0.0.2:9001");

        registry.on_peer_discovered(addr.clone()).await;
        let first = registry.session(&addr).unwrap().id();
        registry.on_peer_discovered(addr.clone()).await;
        let second = registry.session(&addr).unwrap().id();

        assert_ne!(first, second);
        assert_eq!(registry.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_publisher_until_a_read() {
        // Arrange: room for one event, two devices to publish
        let factory = FakeFactory::default().with_listing(
            "10.0.0.2:9001",
            Ok(vec![device("AA:AA:AA:AA:AA:AA"), device("BB:BB:BB:BB:BB:BB")]),
        );
        let config = RegistryConfig {
            event_queue_capacity: 1,
            ..RegistryConfig::default()
        };
        let (registry, _log) = registry(factory, config);
        let events = registry.events();

        // Act: the second send cannot complete
        let mut publish = task::spawn(registry.on_peer_discovered(peer("10.0.0.2:9001")));
        assert_pending!(publish.poll());
        assert_pending!(publish.poll());

        let first = events.recv().await.unwrap();

        // Assert: one read frees the slot and the publisher finishes
        assert_eq!(first.device.address, "AA:AA:AA:AA:AA:AA");
        assert_ready_eq!(publish.poll(), 2);
        assert_eq!(events.recv().await.unwrap().device.address, "BB:BB:BB:BB:BB:BB");
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_unknown_peer_is_not_found_without_any_call() {
        // Arrange
        let (registry, log) = registry(FakeFactory::default(), RegistryConfig::default());

        // Act
        let result = registry
            .connect_device(&peer("unknown:1234"), "AA:BB:CC:DD:EE:FF")
            .await;

        // Assert
        assert_eq!(result, Err(RegistryError::PeerNotFound(peer("unknown:1234"))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_peer_is_not_found() {
        let (registry, _log) = registry(FakeFactory::default(), RegistryConfig::default());
        let result = registry
            .disconnect_device(&peer("10.9.9.9:1"), "AA:BB:CC:DD:EE:FF")
            .await;
        assert!(matches!(result, Err(RegistryError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_route_to_the_peer_session() {
        let (registry, log) = registry(FakeFactory::default(), RegistryConfig::default());
        let addr = peer("10.0.0.2:9001");
        registry.on_peer_discovered(addr.clone()).await;

        registry.connect_device(&addr, "AA:BB:CC:DD:EE:FF").await.unwrap();
        registry.disconnect_device(&addr, "AA:BB:CC:DD:EE:FF").await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "open 10.0.0.2:9001".to_string(),
                "list 10.0.0.2:9001".to_string(),
                "connect 10.0.0.2:9001 AA:BB:CC:DD:EE:FF".to_string(),
                "disconnect 10.0.0.2:9001 AA:BB:CC:DD:EE:FF".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_peer_removes_the_session() {
        let (registry, _log) = registry(FakeFactory::default(), RegistryConfig::default());
        let addr = peer("10.0.0.2:9001");
        registry.on_peer_discovered(addr.clone()).await;

        assert!(registry.close_peer(&addr).await);
        assert!(!registry.close_peer(&addr).await);
        assert!(matches!(
            registry.connect_device(&addr, "AA:BB:CC:DD:EE:FF").await,
            Err(RegistryError::PeerNotFound(_))
        ));
    }

    // ── Pipeline and lifecycle ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_discovery_turns_addresses_into_events() {
        // Arrange
        let factory = FakeFactory::default()
            .with_listing("10.0.0.2:9001", Ok(vec![device("AA:AA:AA:AA:AA:AA")]))
            .with_listing("10.0.0.3:9001", Ok(vec![device("BB:BB:BB:BB:BB:BB")]));
        let registry = Arc::new(SessionRegistry::new(RegistryConfig::default(), Arc::new(factory)));
        let (tx, rx) = mpsc::channel(10);

        // Act
        let pump = registry.run_discovery(rx);
        tx.send(peer("10.0.0.2:9001")).await.unwrap();
        tx.send(peer("10.0.0.3:9001")).await.unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump must finish once the queue closes")
            .unwrap();

        // Assert
        let events = registry.events();
        let mut seen: Vec<_> = [events.try_recv(), events.try_recv()]
            .into_iter()
            .map(|e| e.unwrap().device.address)
            .collect();
        seen.sort();
        assert_eq!(seen, ["AA:AA:AA:AA:AA:AA", "BB:BB:BB:BB:BB:BB"]);
        assert_eq!(registry.peers().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_pump_and_ends_event_stream() {
        // Arrange: a pump whose discovery queue never closes
        let registry = Arc::new(SessionRegistry::new(
            RegistryConfig::default(),
            Arc::new(FakeFactory::default().with_listing("10.0.0.2:9001", Ok(vec![device("AA:AA:AA:AA:AA:AA")]))),
        ));
        let (tx, rx) = mpsc::channel(10);
        let pump = registry.run_discovery(rx);
        registry.on_peer_discovered(peer("10.0.0.2:9001")).await;

        // Act
        registry.shutdown().await;

        // Assert
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump must observe shutdown")
            .unwrap();
        let events = registry.events();
        assert!(events.recv().await.is_some(), "queued event survives shutdown");
        assert!(events.recv().await.is_none());
        assert!(registry.peers().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_shutdown_completes_while_a_listing_never_answers() {
        // Arrange: a lookup stuck in ListTrustedDevices, outside any pump
        let (registry, started) = silent_registry(true);
        let lookup = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.on_peer_discovered(peer("10.0.0.7:9001")).await }
        });
        started.notified().await;

        // Act
        tokio::time::timeout(Duration::from_secs(2), registry.shutdown())
            .await
            .expect("shutdown must not wait for a silent peer");

        // Assert
        let published = tokio::time::timeout(Duration::from_secs(2), lookup)
            .await
            .expect("the stuck lookup must end")
            .unwrap();
        assert_eq!(published, 0);
        assert!(registry.peers().is_empty());
        assert!(registry.events().recv().await.is_none());
    }

    #[tokio::test]
    async fn test_command_in_flight_at_shutdown_reports_shut_down() {
        // Arrange
        let (registry, started) = silent_registry(false);
        let addr = peer("10.0.0.7:9001");
        registry.on_peer_discovered(addr.clone()).await;
        let command = tokio::spawn({
            let registry = Arc::clone(&registry);
            let addr = addr.clone();
            async move { registry.connect_device(&addr, "AA:BB:CC:DD:EE:FF").await }
        });
        started.notified().await;

        // Act
        tokio::time::timeout(Duration::from_secs(2), registry.shutdown())
            .await
            .expect("shutdown must not wait for the command");

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(2), command)
            .await
            .expect("the command must end")
            .unwrap();
        assert_eq!(result, Err(RegistryError::ShutDown));
    }

    #[tokio::test]
    async fn test_discovery_after_shutdown_opens_no_session() {
        // Arrange
        let factory = FakeFactory::default().with_listing("10.0.0.2:9001", Ok(vec![device("AA:AA:AA:AA:AA:AA")]));
        let (registry, log) = registry(factory, RegistryConfig::default());
        registry.shutdown().await;

        // Act
        let published = registry.on_peer_discovered(peer("10.0.0.2:9001")).await;

        // Assert
        assert_eq!(published, 0);
        assert!(registry.peers().is_empty());
        assert!(log.lock().unwrap().is_empty(), "no session may be opened");
    }
}
