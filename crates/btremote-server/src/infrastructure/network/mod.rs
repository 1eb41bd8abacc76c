//! Network infrastructure for the peer service.
//!
//! - **`discovery`** – UDP responder answering broadcast queries with this
//!   service's RPC port.
//! - **`rpc_server`** – TCP listener decoding RPC frames and handing each
//!   call to an [`RpcHandler`](crate::application::RpcHandler).

pub mod discovery;
pub mod rpc_server;

pub use discovery::{DiscoveryError, DiscoveryResponder};
pub use rpc_server::{NetworkError, RpcServer};
