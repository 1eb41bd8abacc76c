//! UDP broadcast discovery: the responder role.
//!
//! The server binds a UDP socket on the well-known broadcast port (default
//! 8829) and answers every query datagram carrying the configured query tag.
//! The answer carries the response tag and the port of this server's RPC
//! listener, and goes back to the sender's IP at the reply port the sender
//! embedded in its query.
//!
//! # How the exchange works (for beginners)
//!
//! 1. A client binds an ephemeral UDP socket (say port 50123) and broadcasts
//!    `bt-discovery:50123` to every local subnet on port 8829.
//!
//! 2. Every server on the LAN receives the broadcast.  Each one decodes it,
//!    checks the tag, and sends `bt-discovery-server:<rpc port>` back to
//!    `<client ip>:50123`.
//!
//! 3. The client's receive loop turns every response into a peer address
//!    `<server ip>:<rpc port>` and opens an RPC session to it.
//!
//! The server never remembers who asked: duplicate queries produce duplicate
//! responses and nothing is rate-limited.
//!
//! # Task layout
//!
//! One receive loop owns the listening socket.  Each matched query spawns a
//! short-lived send task that binds its own ephemeral socket, so a slow or
//! failing send never stalls the receive loop.  [`DiscoveryResponder::shutdown`]
//! stops the loop, aborts outstanding sends, and closes every socket.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use btremote_core::protocol::discovery::{decode, encode};
use btremote_core::DiscoveryConfig;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Size of the receive buffer.  Longer datagrams are truncated by the OS.
pub const RECV_BUFFER_LEN: usize = 1024;

/// Error type for discovery responder operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// A response datagram could not be sent.
    #[error("failed to send discovery response to {dest}: {source}")]
    SendFailed {
        dest: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred while receiving a datagram.
    #[error("recv error: {0}")]
    Recv(#[source] io::Error),
}

/// Handle to a running discovery responder.
///
/// Dropping the handle also stops the receive loop (the shutdown channel
/// closes), but only [`shutdown`](Self::shutdown) waits for it to finish.
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DiscoveryResponder {
    /// Binds `bind_ip:config.broadcast_port` and starts answering queries
    /// with `service_port`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
    /// This is the only error that stops the role; everything after startup
    /// is logged and the loop keeps listening.
    pub async fn start(
        config: &DiscoveryConfig,
        bind_ip: IpAddr,
        service_port: u16,
    ) -> Result<Self, DiscoveryError> {
        let addr = SocketAddr::new(bind_ip, config.broadcast_port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(responder_loop(
            socket,
            config.query_tag_bytes().to_vec(),
            encode(config.response_tag_bytes(), service_port),
            shutdown_rx,
        ));

        info!("discovery responder listening on UDP {local_addr}, advertising port {service_port}");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    /// The address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receive loop and waits until its socket and every pending
    /// send task are gone.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("discovery responder task ended abnormally: {e}");
        }
    }
}

/// The receive loop executed on its own task.
async fn responder_loop(
    socket: UdpSocket,
    query_tag: Vec<u8>,
    reply: Vec<u8>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    let mut senders = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("{}", DiscoveryError::Recv(e));
                        continue;
                    }
                };
                debug!("discovery datagram of {len} bytes from {src}");

                if let Some(dest) = reply_destination(&buf[..len], src, &query_tag) {
                    let reply = reply.clone();
                    senders.spawn(async move {
                        if let Err(e) = send_reply(&reply, dest).await {
                            warn!("{e}");
                        }
                    });
                }

                // Reap finished sends so the set does not grow without bound.
                while senders.try_join_next().is_some() {}
            }
        }
    }

    senders.shutdown().await;
    info!("discovery responder stopped");
}

/// Decides where the answer to `datagram` goes, if anywhere.
///
/// Returns `None` for malformed datagrams (logged) and for datagrams with a
/// foreign tag (ignored silently).
fn reply_destination(datagram: &[u8], src: SocketAddr, query_tag: &[u8]) -> Option<SocketAddr> {
    let msg = match decode(datagram) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("discarding discovery datagram from {src}: {e}");
            return None;
        }
    };
    if !msg.has_tag(query_tag) {
        return None;
    }
    Some(SocketAddr::new(src.ip(), msg.port))
}

/// Sends one response datagram from a fresh ephemeral socket.
async fn send_reply(reply: &[u8], dest: SocketAddr) -> Result<(), DiscoveryError> {
    let local = match dest {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr: local, source })?;
    socket
        .send_to(reply, dest)
        .await
        .map_err(|source| DiscoveryError::SendFailed { dest, source })?;
    debug!("sent discovery response to {dest}");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
