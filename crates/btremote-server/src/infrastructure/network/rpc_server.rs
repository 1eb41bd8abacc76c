//! RpcServer: TCP listener for the authenticated device RPC channel.
//!
//! Each accepted connection gets its own task.  The task reads one
//! length-prefixed [`RpcRequest`] frame at a time, hands the call to the
//! configured [`RpcHandler`], and writes the [`RpcResponse`] back before
//! reading the next frame, so calls on one connection are answered in order.
//!
//! The handler is usually an
//! [`AuthenticatedHandler`](crate::application::AuthenticatedHandler)
//! wrapping a [`DeviceService`](crate::application::DeviceService).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use btremote_core::protocol::rpc::{
    decode_payload, encode_frame, payload_len, FrameError, FRAME_HEADER_LEN,
};
use btremote_core::{CallError, RpcRequest, RpcResponse};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::RpcHandler;

/// Error type for the RPC listener.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Why a connection task stopped reading.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

/// Handle to a running RPC listener.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RpcServer {
    /// Binds `addr` and starts accepting connections.
    ///
    /// Port 0 binds an OS-assigned port; read it back with
    /// [`local_addr`](Self::local_addr) before advertising it.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the listener cannot be bound.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn RpcHandler>) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NetworkError::BindFailed { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, shutdown_rx));

        info!("RPC server listening on TCP {local_addr}");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes every open connection, and waits for the
    /// listener task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("RPC server task ended abnormally: {e}");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted RPC connection from {peer}");
                        let handler = Arc::clone(&handler);
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            match serve_connection(stream, handler, shutdown).await {
                                Ok(()) => debug!("RPC connection from {peer} closed"),
                                Err(e) => warn!("RPC connection from {peer} dropped: {e}"),
                            }
                        });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
                while connections.try_join_next().is_some() {}
            }
        }
    }

    connections.shutdown().await;
    info!("RPC server stopped");
}

/// Serves calls on one connection until the client hangs up or shutdown is
/// signalled.
async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn RpcHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            read = read_request(&mut stream) => match read? {
                Some(request) => request,
                None => return Ok(()),
            },
        };

        let RpcRequest {
            call_id,
            context,
            method,
        } = request;
        let result = handler.handle(&context, method).await;
        let response = RpcResponse { call_id, result };

        let bytes = match encode_frame(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Report the failure in place of a reply that cannot be framed.
                error!("failed to encode response to call {call_id}: {e}");
                encode_frame(&RpcResponse {
                    call_id,
                    result: Err(CallError::from(e)),
                })?
            }
        };
        stream.write_all(&bytes).await?;
    }
}

/// Reads one request frame.  Returns `Ok(None)` on a clean end of stream.
async fn read_request(stream: &mut TcpStream) -> Result<Option<RpcRequest>, ConnectionError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = payload_len(header)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(decode_payload(&payload)?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
