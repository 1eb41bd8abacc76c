//! Network infrastructure for the controller.
//!
//! - **`discovery`** – UDP requester broadcasting queries and collecting
//!   peer addresses.
//! - **`interfaces`** – Local IPv4 interfaces as broadcast targets, and the
//!   set of this machine's own addresses.
//! - **`rpc_client`** – TCP [`CallTransport`](crate::application::CallTransport)
//!   and the session factory built on it.

pub mod discovery;
pub mod interfaces;
pub mod rpc_client;

pub use discovery::{Discovery, DiscoveryError, DiscoveryHandle, DiscoveryRequester};
pub use interfaces::{scan_interfaces, LocalInterfaces};
pub use rpc_client::{TcpCallTransport, TcpSessionFactory};
