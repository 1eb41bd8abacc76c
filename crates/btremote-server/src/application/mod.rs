//! Application layer of the peer service.
//!
//! # Sub-modules
//!
//! - **`device_service`** – Maps each RPC method onto the [`DeviceAdapter`]
//!   collaborator that owns the actual Bluetooth devices.
//!
//! - **`auth`** – The server half of the authenticated call wrapper: rejects
//!   calls without exactly one matching credential before any handler runs.
//!
//! Both depend only on traits and `btremote_core` types; sockets live in
//! `infrastructure`.
//!
//! [`DeviceAdapter`]: device_service::DeviceAdapter

pub mod auth;
pub mod device_service;

pub use auth::AuthenticatedHandler;
pub use device_service::{AdapterError, DeviceAdapter, DeviceService, RpcHandler};
