//! Node addressing.
//!
//! A [`NetworkAddress`] names a node in the cluster. It doubles as the key
//! of the membership table and as the tie-breaker on the placement ring, so
//! its ordering is the lexical order of its textual form (`"10.0.0.2:11111"`
//! sorts before `"10.0.0.3:11111"`, and `"10.0.0.10:1"` sorts before both).

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network address of a node (IP + port).
///
/// # Examples
///
/// ```
/// use adventure::NetworkAddress;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let addr = NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 11111);
/// assert_eq!(addr.to_string(), "127.0.0.1:11111");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NetworkAddress {
    /// Create a new network address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Loopback address on the given port. Handy for in-process clusters.
    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port)
    }

    /// Convert to a standard socket address.
    pub fn as_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_socket_addr())
    }
}

impl PartialOrd for NetworkAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetworkAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// Error returned when parsing a [`NetworkAddress`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid network address: {input}")]
pub struct AddressParseError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for NetworkAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let socket: SocketAddr = s.parse().map_err(|_| AddressParseError {
            input: s.to_string(),
        })?;
        Ok(Self::new(socket.ip(), socket.port()))
    }
}

impl From<SocketAddr> for NetworkAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}
