//! UDP broadcast discovery: the requester role.
//!
//! [`DiscoveryRequester::discover`] binds one ephemeral UDP socket, starts a
//! receive loop on it, and broadcasts a query carrying that socket's port to
//! every target.  Responders answer to that port with their RPC port; the
//! loop turns each answer into a [`PeerAddress`] and queues it.
//!
//! ```text
//! query    bt-discovery:50123         → 192.168.1.255:8829
//! response bt-discovery-server:09001  ← 192.168.1.20 (any source port)
//! queued   192.168.1.20:9001
//! ```
//!
//! The queue is bounded (10 by default); the loop waits while it is full.
//! The same peer can be queued more than once, for example when it is
//! reachable through two local subnets.  Consumers deduplicate if needed.
//!
//! The loop runs until [`DiscoveryHandle::shutdown`], until the optional
//! timeout elapses, or until the consumer drops the queue.  Each of these
//! closes the socket.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use btremote_core::protocol::discovery::{decode, encode};
use btremote_core::{DiscoveryConfig, PeerAddress};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default capacity of the discovered-peer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Size of the receive buffer.  Longer datagrams are truncated by the OS.
pub const RECV_BUFFER_LEN: usize = 1024;

/// Error type for discovery requester operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The reply socket could not be bound or configured.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// A query datagram could not be sent.
    #[error("failed to send discovery query to {dest}: {source}")]
    SendFailed {
        dest: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred while receiving a datagram.
    #[error("recv error: {0}")]
    Recv(#[source] io::Error),
}

/// Issues discovery queries.  One requester can run any number of attempts.
#[derive(Debug, Clone)]
pub struct DiscoveryRequester {
    config: DiscoveryConfig,
    bind_ip: Ipv4Addr,
    queue_capacity: usize,
    timeout: Option<Duration>,
}

impl DiscoveryRequester {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout: None,
        }
    }

    pub fn with_bind_ip(mut self, bind_ip: Ipv4Addr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Ends each attempt's receive loop after `timeout`.  `None` keeps it
    /// running until shutdown.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts one discovery attempt towards the broadcast addresses in
    /// `targets` and returns its queue immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] if the reply socket cannot be
    /// set up.  Sending to an individual target never fails the attempt; the
    /// failure is logged and the next target is tried.
    pub async fn discover(&self, targets: &[Ipv4Addr]) -> Result<Discovery, DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(self.bind_ip), 0);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket
            .set_broadcast(true)
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        let socket = Arc::new(socket);

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            self.config.response_tag_bytes().to_vec(),
            tx,
            shutdown_rx,
            self.timeout,
        ));

        let query = encode(self.config.query_tag_bytes(), local_addr.port());
        let mut sent = 0;
        for target in targets {
            let dest = SocketAddr::new(IpAddr::V4(*target), self.config.broadcast_port);
            match socket.send_to(&query, dest).await {
                Ok(_) => {
                    debug!("sent discovery query to {dest}");
                    sent += 1;
                }
                Err(source) => warn!("{}", DiscoveryError::SendFailed { dest, source }),
            }
        }
        info!(
            "discovery query sent to {sent}/{} targets, listening on {local_addr}",
            targets.len()
        );

        Ok(Discovery {
            peers: rx,
            handle: DiscoveryHandle {
                local_addr,
                shutdown_tx,
                task,
            },
        })
    }
}

/// One running discovery attempt: the peer queue plus its control handle.
pub struct Discovery {
    peers: mpsc::Receiver<PeerAddress>,
    handle: DiscoveryHandle,
}

impl Discovery {
    /// Next discovered peer, or `None` once the attempt has ended.
    pub async fn recv(&mut self) -> Option<PeerAddress> {
        self.peers.recv().await
    }

    /// The reply socket's address; its port is the one embedded in queries.
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    /// Splits the queue from its handle, e.g. to hand the queue to
    /// `SessionRegistry::run_discovery` while keeping control of the loop.
    pub fn into_parts(self) -> (mpsc::Receiver<PeerAddress>, DiscoveryHandle) {
        (self.peers, self.handle)
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

/// Controls the receive loop of one discovery attempt.
pub struct DiscoveryHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receive loop and waits until its socket is closed.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("discovery receive task ended abnormally: {e}");
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    response_tag: Vec<u8>,
    tx: mpsc::Sender<PeerAddress>,
    mut shutdown: watch::Receiver<bool>,
    timeout: Option<Duration>,
) {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut buf = [0u8; RECV_BUFFER_LEN];
    loop {
        let peer = tokio::select! {
            _ = shutdown.changed() => break,
            _ = &mut deadline => {
                debug!("discovery attempt timed out");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => match peer_from_response(&buf[..len], src, &response_tag) {
                    Some(peer) => peer,
                    None => continue,
                },
                Err(e) => {
                    warn!("{}", DiscoveryError::Recv(e));
                    continue;
                }
            },
        };

        info!("discovered peer {peer}");
        let sent = tokio::select! {
            _ = shutdown.changed() => break,
            _ = &mut deadline => break,
            sent = tx.send(peer) => sent,
        };
        if sent.is_err() {
            debug!("discovery queue dropped by consumer");
            break;
        }
    }

    debug!("discovery receive loop on {:?} stopped", socket.local_addr().ok());
}

/// Turns a response datagram into the peer it advertises.
///
/// The peer is the datagram's source IP combined with the embedded port.
/// Malformed datagrams are logged; foreign tags are ignored silently.
fn peer_from_response(datagram: &[u8], src: SocketAddr, response_tag: &[u8]) -> Option<PeerAddress> {
    let msg = match decode(datagram) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("discarding discovery datagram from {src}: {e}");
            return None;
        }
    };
    if !msg.has_tag(response_tag) {
        return None;
    }
    Some(PeerAddress::from(SocketAddr::new(src.ip(), msg.port)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
