//! PeerSession: the device operations of one discovered peer.
//!
//! A session wraps one [`AuthenticatedChannel`] and turns the generic
//! [`RpcReply`] values into typed results.  Opening a session does not touch
//! the network; the transport connects on the first call.

use btremote_core::{CallError, DeviceSnapshot, PeerAddress, RpcMethod, RpcReply};
use uuid::Uuid;

use crate::application::channel::AuthenticatedChannel;

/// Opens sessions to peers.  The registry calls this for every discovered
/// address.
pub trait SessionFactory: Send + Sync {
    fn open(&self, peer: &PeerAddress) -> PeerSession;
}

/// An authenticated call channel to one peer.
pub struct PeerSession {
    id: Uuid,
    peer: PeerAddress,
    channel: AuthenticatedChannel,
}

impl PeerSession {
    pub fn new(peer: PeerAddress, channel: AuthenticatedChannel) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            channel,
        }
    }

    /// Unique per opened session; distinguishes a session from the one it
    /// replaced for the same address.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Lists the peer's trusted devices, in the order the peer returns them.
    pub async fn list_trusted_devices(&self) -> Result<Vec<DeviceSnapshot>, CallError> {
        match self.channel.call(RpcMethod::ListTrustedDevices).await? {
            RpcReply::Devices(devices) => Ok(devices),
            other => Err(unexpected("ListTrustedDevices", &other)),
        }
    }

    pub async fn connect(&self, device_address: &str) -> Result<(), CallError> {
        let method = RpcMethod::Connect {
            address: device_address.to_string(),
        };
        match self.channel.call(method).await? {
            RpcReply::Done => Ok(()),
            other => Err(unexpected("Connect", &other)),
        }
    }

    pub async fn disconnect(&self, device_address: &str) -> Result<(), CallError> {
        let method = RpcMethod::Disconnect {
            address: device_address.to_string(),
        };
        match self.channel.call(method).await? {
            RpcReply::Done => Ok(()),
            other => Err(unexpected("Disconnect", &other)),
        }
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

fn unexpected(method: &str, reply: &RpcReply) -> CallError {
    CallError::Protocol(format!("unexpected reply to {method}: {reply:?}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
