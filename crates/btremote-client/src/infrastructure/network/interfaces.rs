//! Local network interfaces as discovery targets.
//!
//! Every non-loopback IPv4 interface becomes a [`BroadcastTarget`]; its
//! directed broadcast address (e.g. `192.168.1.255` for `192.168.1.20/24`)
//! is where the requester sends its query.  Loopback and IPv6 addresses are
//! skipped as targets, but every address, loopback included, goes into
//! [`LocalInterfaces::local_ips`] for self-discovery suppression.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

use btremote_core::BroadcastTarget;
use if_addrs::IfAddr;
use tracing::debug;

/// This machine's addresses, as seen by discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInterfaces {
    /// One entry per distinct IPv4 subnet, in interface order.
    pub targets: Vec<BroadcastTarget>,
    pub local_ips: HashSet<IpAddr>,
}

impl LocalInterfaces {
    /// Broadcast address of every target, without duplicates.
    pub fn broadcast_addrs(&self) -> Vec<Ipv4Addr> {
        let mut addrs = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let addr = target.broadcast_addr();
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }
}

/// Enumerates the host's interfaces.
///
/// # Errors
///
/// Returns the OS error if the interface list cannot be read.
pub fn scan_interfaces() -> io::Result<LocalInterfaces> {
    let entries = if_addrs::get_if_addrs()?.into_iter().map(|iface| {
        let netmask = match &iface.addr {
            IfAddr::V4(v4) => Some(v4.netmask),
            IfAddr::V6(_) => None,
        };
        debug!("interface {} has {}", iface.name, iface.ip());
        (iface.ip(), netmask)
    });
    Ok(collect(entries))
}

/// Builds [`LocalInterfaces`] from `(address, IPv4 netmask)` pairs.
fn collect(entries: impl IntoIterator<Item = (IpAddr, Option<Ipv4Addr>)>) -> LocalInterfaces {
    let mut result = LocalInterfaces::default();
    for (ip, netmask) in entries {
        result.local_ips.insert(ip);
        if let (IpAddr::V4(v4), Some(mask)) = (ip, netmask) {
            if v4.is_loopback() {
                continue;
            }
            let target = BroadcastTarget::new(v4, mask);
            if !result.targets.contains(&target) {
                result.targets.push(target);
            }
        }
    }
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
