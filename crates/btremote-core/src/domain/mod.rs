//! Domain types shared by the server and the client.
//!
//! - **`device`** – Point-in-time device snapshots and the events that carry them.
//! - **`peer`** – The `host:port` identity of a discovered peer service.
//! - **`broadcast`** – Subnet broadcast address calculation.

pub mod broadcast;
pub mod device;
pub mod peer;
