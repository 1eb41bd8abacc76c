//! DeviceService: dispatches RPC methods to the device adapter.
//!
//! The adapter is an opaque collaborator (a BlueZ binding on Linux, an
//! in-memory table in tests and headless runs).  This use case only turns
//! each [`RpcMethod`] into one adapter call and maps the outcome onto the
//! wire-level [`CallError`].

use async_trait::async_trait;
use btremote_core::{CallContext, CallError, DeviceSnapshot, RpcMethod, RpcReply};
use thiserror::Error;
use tracing::{debug, warn};

/// Error reported by a [`DeviceAdapter`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// No device with this address is known to the adapter.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    /// The adapter backend failed.
    #[error("adapter error: {0}")]
    Backend(String),
}

/// The device capability exposed by the host.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Lists trusted devices, in adapter order.
    async fn list_trusted_devices(&self) -> Result<Vec<DeviceSnapshot>, AdapterError>;

    /// Connects the device with the given address.
    async fn connect(&self, address: &str) -> Result<(), AdapterError>;

    /// Disconnects the device with the given address.
    async fn disconnect(&self, address: &str) -> Result<(), AdapterError>;
}

/// Anything that can answer an RPC call.
///
/// The RPC listener only knows this trait, so the authentication wrapper and
/// the device service compose as `AuthenticatedHandler<DeviceService<A>>`.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, context: &CallContext, method: RpcMethod) -> Result<RpcReply, CallError>;
}

/// Use case answering device RPC calls from an adapter.
pub struct DeviceService<A> {
    adapter: A,
}

impl<A: DeviceAdapter> DeviceService<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

#[async_trait]
impl<A: DeviceAdapter> RpcHandler for DeviceService<A> {
    async fn handle(&self, _context: &CallContext, method: RpcMethod) -> Result<RpcReply, CallError> {
        debug!(method = method.name(), "handling device call");
        match method {
            RpcMethod::ListTrustedDevices => self
                .adapter
                .list_trusted_devices()
                .await
                .map(RpcReply::Devices)
                .map_err(|e| remote_failure("listing trusted devices failed", e)),
            RpcMethod::Connect { address } => self
                .adapter
                .connect(&address)
                .await
                .map(|()| RpcReply::Done)
                .map_err(|e| remote_failure("connecting to device failed", e)),
            RpcMethod::Disconnect { address } => self
                .adapter
                .disconnect(&address)
                .await
                .map(|()| RpcReply::Done)
                .map_err(|e| remote_failure("disconnecting from device failed", e)),
        }
    }
}

fn remote_failure(what: &str, e: AdapterError) -> CallError {
    warn!("{what}: {e}");
    CallError::Remote(format!("{what}: {e}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
