//! Device snapshots reported by a peer and the events that publish them.

use serde::{Deserialize, Serialize};

use crate::domain::peer::PeerAddress;

/// A point-in-time description of one remotely controlled device.
///
/// Snapshots are immutable values: a newer listing supersedes an older one,
/// nothing is updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// MAC-style address, e.g. `"AA:BB:CC:DD:EE:FF"`.  Identifies the device.
    pub address: String,
    /// Display name (alias) of the device.
    pub name: String,
    pub trusted: bool,
    pub paired: bool,
    pub connected: bool,
    /// Battery percentage, when the device is connected and reports one.
    ///
    /// Snapshots travel as bincode, which needs every field present, so
    /// `None` is never skipped on output.
    #[serde(default)]
    pub battery: Option<u8>,
    /// Freedesktop icon name, e.g. `"audio-headphones"`.
    #[serde(default)]
    pub icon: Option<String>,
}

/// One entry of the client's aggregated event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// The peer that reported the device.
    pub peer: PeerAddress,
    pub device: DeviceSnapshot,
}
