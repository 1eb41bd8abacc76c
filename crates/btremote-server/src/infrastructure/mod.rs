//! Infrastructure layer: sockets, the device adapter, and config files.

pub mod adapter;
pub mod network;
pub mod storage;
