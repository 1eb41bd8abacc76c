//! Subnet broadcast address calculation.
//!
//! The broadcast address of a subnet keeps the network bits of the local
//! address and sets every host bit:
//!
//! ```text
//! broadcast[i] = (addr[i] & mask[i]) | !mask[i]
//! ```
//!
//! Filtering out loopback and IPv6 interfaces is the caller's job; this module
//! accepts any address/mask pair.

use std::net::Ipv4Addr;

/// Computes the broadcast address byte by byte.
///
/// `addr` may be longer than `mask` (for instance an IPv4 address stored in
/// 16-byte IPv4-mapped form); only its last `mask.len()` bytes are used, so
/// the result always has the mask's length.
///
/// # Examples
///
/// ```rust
/// use btremote_core::broadcast_address;
///
/// let b = broadcast_address(&[192, 168, 1, 42], &[255, 255, 255, 0]);
/// assert_eq!(b, vec![192, 168, 1, 255]);
/// ```
pub fn broadcast_address(addr: &[u8], mask: &[u8]) -> Vec<u8> {
    let aligned = &addr[addr.len().saturating_sub(mask.len())..];
    aligned
        .iter()
        .zip(mask)
        .map(|(a, m)| (a & m) | !m)
        .collect()
}

/// A local IPv4 interface binding used to derive one broadcast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl BroadcastTarget {
    pub fn new(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { ip, netmask }
    }

    /// Builds a target from a CIDR prefix length (values above 32 saturate).
    pub fn from_prefix(ip: Ipv4Addr, prefix_len: u8) -> Self {
        let bits = u32::MAX
            .checked_shl(32 - u32::from(prefix_len.min(32)))
            .unwrap_or(0);
        Self::new(ip, Ipv4Addr::from(bits))
    }

    /// The subnet's broadcast address.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        let bytes = broadcast_address(&self.ip.octets(), &self.netmask.octets());
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&bytes);
        Ipv4Addr::from(octets)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
