//! Client identity derivation.

use std::net::{IpAddr, SocketAddr};

use crate::error::AdmissionError;

/// A key that uniquely identifies a rate-limited client.
///
/// The key is the canonical textual form of the client IP: the port is
/// dropped and IPv4-mapped IPv6 addresses collapse to plain IPv4, so the
/// same client always lands on the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity for a client IP.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    /// Identity for a connected peer, ignoring its port.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip())
    }

    /// Parse a transport remote address of the form `host:port`.
    ///
    /// Addresses without a port, or whose host is not an IP, are rejected.
    pub fn from_remote_addr(remote: &str) -> Result<Self, AdmissionError> {
        remote
            .trim()
            .parse::<SocketAddr>()
            .map(Self::from_socket_addr)
            .map_err(|e| {
                AdmissionError::IdentityUnavailable(format!(
                    "malformed remote address {:?}: {}",
                    remote, e
                ))
            })
    }

    /// Parse a bare IP address, as carried in forwarding headers.
    pub fn from_ip_str(ip: &str) -> Result<Self, AdmissionError> {
        ip.trim()
            .parse::<IpAddr>()
            .map(Self::from_ip)
            .map_err(|e| {
                AdmissionError::IdentityUnavailable(format!("malformed client ip {:?}: {}", ip, e))
            })
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
