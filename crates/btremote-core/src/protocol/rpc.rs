//! Request/response frames for the authenticated device RPC channel.
//!
//! Wire format:
//! ```text
//! [payload_len:4][payload:N]
//! ```
//! `payload_len` is big-endian.  The payload is a `bincode`-encoded
//! [`RpcRequest`] (client → server) or [`RpcResponse`] (server → client).
//!
//! Every request carries a [`CallContext`] holding the credentials attached by
//! the caller.  The server verifies it before the method reaches any handler.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::auth::CallContext;
use crate::domain::device::DeviceSnapshot;

/// Size of the length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted by [`decode_frame`] and [`payload_len`] (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Error returned by a remote call.
///
/// The type is serializable so a server can send it back inside an
/// [`RpcResponse`]; transport-level failures are produced locally.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallError {
    /// The credential was missing, duplicated, or did not match.
    #[error("unauthorized: missing or invalid credential")]
    Unauthorized,
    /// The remote handler ran and failed.
    #[error("remote error: {0}")]
    Remote(String),
    /// The connection could not be opened or broke mid-call.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be encoded or decoded, or the reply did not match.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors that can occur while framing a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes for the header or the declared payload.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
    /// The declared payload exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge { len: usize },
    /// `bincode` rejected the payload.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<FrameError> for CallError {
    fn from(e: FrameError) -> Self {
        CallError::Protocol(e.to_string())
    }
}

/// The operations a peer exposes over the RPC channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMethod {
    /// Lists every device the peer's adapter trusts.
    ListTrustedDevices,
    /// Connects the device with the given MAC-style address.
    Connect { address: String },
    /// Disconnects the device with the given MAC-style address.
    Disconnect { address: String },
}

impl RpcMethod {
    /// Short method name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::ListTrustedDevices => "ListTrustedDevices",
            RpcMethod::Connect { .. } => "Connect",
            RpcMethod::Disconnect { .. } => "Disconnect",
        }
    }
}

/// Successful result of an [`RpcMethod`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcReply {
    /// Reply to [`RpcMethod::ListTrustedDevices`], in adapter order.
    Devices(Vec<DeviceSnapshot>),
    /// Reply to `Connect` / `Disconnect`.
    Done,
}

/// A single call from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Echoed in the matching [`RpcResponse`].
    pub call_id: u64,
    /// Out-of-band call attributes (credentials).
    pub context: CallContext,
    pub method: RpcMethod,
}

/// The server's answer to one [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub call_id: u64,
    pub result: Result<RpcReply, CallError>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes `msg` and prepends the 4-byte length header.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if `bincode` fails, or
/// [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_LEN`].
///
/// # Examples
///
/// ```rust
/// use btremote_core::protocol::rpc::{decode_frame, encode_frame, RpcMethod};
///
/// let bytes = encode_frame(&RpcMethod::ListTrustedDevices).unwrap();
/// let (decoded, consumed): (RpcMethod, usize) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, RpcMethod::ListTrustedDevices);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let payload =
        bincode::serialize(msg).map_err(|e| FrameError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: payload.len() });
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed so callers reading a
/// stream can advance their buffer.
///
/// # Errors
///
/// Returns [`FrameError::InsufficientData`] when the frame is incomplete (the
/// caller should read more bytes), [`FrameError::TooLarge`] for an oversized
/// header, and [`FrameError::Serialization`] for a corrupt payload.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::InsufficientData {
            needed: FRAME_HEADER_LEN,
            available: bytes.len(),
        });
    }

    let header = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let len = payload_len(header)?;
    let total = FRAME_HEADER_LEN + len;
    if bytes.len() < total {
        return Err(FrameError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let msg = decode_payload(&bytes[FRAME_HEADER_LEN..total])?;
    Ok((msg, total))
}

/// Reads the payload length out of a frame header.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the length exceeds [`MAX_FRAME_LEN`].
pub fn payload_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len });
    }
    Ok(len)
}

/// Deserializes a frame payload (the bytes after the header).
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] for a corrupt payload.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    bincode::deserialize(payload).map_err(|e| FrameError::Serialization(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
