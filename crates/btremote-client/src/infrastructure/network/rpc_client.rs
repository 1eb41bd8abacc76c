//! TCP transport for the authenticated device RPC channel.
//!
//! [`TcpCallTransport`] connects lazily: creating it (and therefore opening a
//! [`PeerSession`]) never touches the network.  The first call dials the
//! peer; later calls reuse the connection.  A call that fails at the
//! transport level drops the connection, and the next call dials again.
//! Calls on one transport are serialized, one request/response exchange at a
//! time.
//!
//! A peer that accepts the connection and never answers cannot pin a call:
//! every exchange is bounded by the call timeout, and [`close`] cancels the
//! exchange in flight.
//!
//! [`close`]: CallTransport::close

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btremote_core::protocol::rpc::{
    decode_payload, encode_frame, payload_len, FRAME_HEADER_LEN,
};
use btremote_core::{CallContext, CallError, Credential, PeerAddress, RpcMethod, RpcReply, RpcRequest, RpcResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::application::{AuthenticatedChannel, CallTransport, PeerSession, SessionFactory};

/// Default limit for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default limit for one request/response exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Lazily connected TCP transport to one peer.
pub struct TcpCallTransport {
    peer: PeerAddress,
    connect_timeout: Duration,
    call_timeout: Option<Duration>,
    stream: Mutex<Option<TcpStream>>,
    next_call_id: AtomicU64,
    /// Bumped by `close`; calls started before the bump give up.
    closed_tx: watch::Sender<u64>,
}

impl TcpCallTransport {
    pub fn new(peer: PeerAddress) -> Self {
        let (closed_tx, _) = watch::channel(0);
        Self {
            peer,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            stream: Mutex::new(None),
            next_call_id: AtomicU64::new(1),
            closed_tx,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `None` lets an exchange wait for as long as the peer keeps the
    /// connection open.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn dial(&self) -> Result<TcpStream, CallError> {
        let connect = TcpStream::connect(self.peer.as_str());
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| CallError::Transport(format!("connecting to {} timed out", self.peer)))?
            .map_err(|e| CallError::Transport(format!("connecting to {}: {e}", self.peer)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CallError::Transport(e.to_string()))?;
        debug!("connected to {}", self.peer);
        Ok(stream)
    }

    /// One exchange on the shared connection.  Dropping this future drops
    /// the connection with it.
    async fn round_trip(&self, call_id: u64, frame: &[u8]) -> Result<RpcResponse, CallError> {
        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.dial().await?,
        };

        let exchanged = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange(&mut stream, frame))
                .await
                .map_err(|_| {
                    CallError::Transport(format!("{} did not answer within {limit:?}", self.peer))
                })?,
            None => exchange(&mut stream, frame).await,
        };
        let response =
            exchanged.map_err(|e| CallError::Transport(format!("{}: {e}", self.peer)))?;
        if response.call_id != call_id {
            return Err(CallError::Protocol(format!(
                "reply for call {} while waiting for {call_id}",
                response.call_id
            )));
        }

        // Only a clean exchange returns the connection for reuse.
        *slot = Some(stream);
        Ok(response)
    }
}

#[async_trait]
impl CallTransport for TcpCallTransport {
    async fn call(&self, context: CallContext, method: RpcMethod) -> Result<RpcReply, CallError> {
        let request = RpcRequest {
            call_id: self.next_call_id.fetch_add(1, Ordering::Relaxed),
            context,
            method,
        };
        let frame = encode_frame(&request)?;

        // Subscribing marks the current close count as seen.
        let mut closed = self.closed_tx.subscribe();
        tokio::select! {
            response = self.round_trip(request.call_id, &frame) => response?.result,
            _ = closed.changed() => {
                debug!("call {} to {} cancelled by close", request.call_id, self.peer);
                Err(CallError::Transport(format!("connection to {} closed", self.peer)))
            }
        }
    }

    async fn close(&self) {
        self.closed_tx.send_modify(|count| *count += 1);
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// Writes one request frame and reads the response frame.
async fn exchange(stream: &mut TcpStream, frame: &[u8]) -> io::Result<RpcResponse> {
    stream.write_all(frame).await?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = payload_len(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    decode_payload(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Opens [`PeerSession`]s backed by [`TcpCallTransport`].
pub struct TcpSessionFactory {
    credential: Credential,
    connect_timeout: Duration,
    call_timeout: Option<Duration>,
}

impl TcpSessionFactory {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl SessionFactory for TcpSessionFactory {
    fn open(&self, peer: &PeerAddress) -> PeerSession {
        let transport = TcpCallTransport::new(peer.clone())
            .with_connect_timeout(self.connect_timeout)
            .with_call_timeout(self.call_timeout);
        PeerSession::new(
            peer.clone(),
            AuthenticatedChannel::new(self.credential.clone(), Arc::new(transport)),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
