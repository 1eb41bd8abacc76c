//! Infrastructure layer: sockets, interface enumeration, and config files.

pub mod network;
pub mod storage;
