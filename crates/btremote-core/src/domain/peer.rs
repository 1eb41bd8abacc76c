//! `PeerAddress`: the `host:port` identity of a discovered peer service.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string is not a valid `host:port` pair.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid peer address {0:?}: expected host:port")]
pub struct PeerAddressError(pub String);

/// The endpoint of a peer's RPC service, written `host:port`.
///
/// This is the key of the client's session registry.  Two addresses are the
/// same peer exactly when their strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Parses `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`PeerAddressError`] if the host is empty or the port is not a
    /// valid `u16`.
    pub fn parse(s: &str) -> Result<Self, PeerAddressError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PeerAddressError(s.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(PeerAddressError(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The host part (for IPv6 socket addresses this keeps the brackets).
    pub fn host(&self) -> &str {
        self.split().0
    }

    pub fn port(&self) -> u16 {
        // Validated by every constructor.
        self.split().1.parse().unwrap_or_default()
    }

    /// The host as an IP address, when it is a literal address.
    pub fn ip(&self) -> Option<IpAddr> {
        let host = self.host().trim_start_matches('[').trim_end_matches(']');
        host.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        self.0.rsplit_once(':').unwrap_or((self.0.as_str(), ""))
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl FromStr for PeerAddress {
    type Err = PeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_peer() {
        let peer = PeerAddress::parse("192.168.1.20:9001").unwrap();
        assert_eq!(peer.host(), "192.168.1.20");
        assert_eq!(peer.port(), 9001);
        assert_eq!(peer.ip(), Some("192.168.1.20".parse().unwrap()));
    }

    #[test]
    fn test_parse_hostname_peer_has_no_ip() {
        let peer = PeerAddress::parse("unknown:1234").unwrap();
        assert_eq!(peer.host(), "unknown");
        assert_eq!(peer.ip(), None);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!(PeerAddress::parse("192.168.1.20").is_err());
        assert!(PeerAddress::parse("192.168.1.20:").is_err());
        assert!(PeerAddress::parse(":80").is_err());
        assert!(PeerAddress::parse("host:70000").is_err());
    }

    #[test]
    fn test_from_socket_addr_matches_display() {
        let addr: SocketAddr = "10.0.0.5:8080".parse().unwrap();
        let peer = PeerAddress::from(addr);
        assert_eq!(peer.to_string(), "10.0.0.5:8080");
        assert_eq!(peer.ip(), Some(addr.ip()));
    }

    #[test]
    fn test_ipv6_socket_addr_ip_strips_brackets() {
        let addr: SocketAddr = "[::1]:9001".parse().unwrap();
        let peer = PeerAddress::from(addr);
        assert_eq!(peer.host(), "[::1]");
        assert_eq!(peer.ip(), Some(addr.ip()));
    }
}
