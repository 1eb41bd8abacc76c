//! # btremote-core
//!
//! Shared library for btremote containing the discovery datagram codec, the
//! RPC frame codec, the credential contract, and the device domain types.
//!
//! This crate is used by both the server (the peer that owns the Bluetooth
//! adapter) and the client (the controller that discovers peers).  It has no
//! dependencies on sockets, async runtimes, or OS APIs.
//!
//! # Architecture overview (for beginners)
//!
//! btremote lets one machine control Bluetooth devices attached to other
//! machines on the same LAN.  Each machine that owns devices runs a server;
//! the controller runs a client which:
//!
//! 1. Broadcasts a small UDP "query" datagram to every local subnet.
//! 2. Receives "response" datagrams carrying each server's RPC port.
//! 3. Opens an authenticated RPC session per server and lists its devices.
//!
//! This crate defines the pieces both sides must agree on:
//!
//! - **`protocol::discovery`** – The `<tag>:<5-digit port>` datagram format.
//! - **`protocol::rpc`** – Length-prefixed request/response frames.
//! - **`auth`** – The shared-secret credential attached to every call.
//! - **`domain`** – Devices, peer addresses, and broadcast address maths.
//! - **`config`** – The discovery settings both roles must share.

pub mod auth;
pub mod config;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `btremote_core::PeerAddress` instead of `btremote_core::domain::peer::PeerAddress`.
pub use auth::{verify_call, CallContext, Credential};
pub use config::DiscoveryConfig;
pub use domain::broadcast::{broadcast_address, BroadcastTarget};
pub use domain::device::{DeviceEvent, DeviceSnapshot};
pub use domain::peer::{PeerAddress, PeerAddressError};
pub use protocol::discovery::{DiscoveryMessage, MessageError};
pub use protocol::rpc::{CallError, RpcMethod, RpcReply, RpcRequest, RpcResponse};
