//! Endpoint identity: a packed IPv4 address plus port.
//!
//! The address is stored the way it appears in the recording header: the
//! dotted quad packed big-endian-style into one `u32`, so `10.0.0.5` is
//! `0x0A000005`.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use crate::error::{BagError, Result};

/// Identity of an endpoint: `(address, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    /// Packed IPv4 address.
    pub address: u32,
    /// Port number.
    pub port: u16,
}

impl EndpointKey {
    /// Create a key from a packed address and port.
    pub fn new(address: u32, port: u16) -> Self {
        Self { address, port }
    }

    /// The address as an [`Ipv4Addr`].
    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    /// Render a transport URI such as `tcp://10.0.0.5:9090`.
    pub fn uri(&self, scheme: &str) -> String {
        format!("{}://{}:{}", scheme, self.ip(), self.port)
    }
}

impl From<SocketAddrV4> for EndpointKey {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<(Ipv4Addr, u16)> for EndpointKey {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self::new(u32::from(ip), port)
    }
}

impl From<EndpointKey> for SocketAddrV4 {
    fn from(key: EndpointKey) -> Self {
        SocketAddrV4::new(key.ip(), key.port)
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

impl FromStr for EndpointKey {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<SocketAddrV4>()
            .map(Self::from)
            .map_err(|e| BagError::Config(format!("invalid endpoint '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_address_is_big_endian_style() {
        let key = EndpointKey::from((Ipv4Addr::new(10, 0, 0, 5), 9090));
        assert_eq!(key.address, 0x0A00_0005);
        assert_eq!(key.port, 0x2382);
    }

    #[test]
    fn test_uri_format() {
        let key = EndpointKey::new(0x0A00_0005, 9090);
        assert_eq!(key.uri("tcp"), "tcp://10.0.0.5:9090");
        assert_eq!(key.to_string(), "10.0.0.5:9090");
    }

    #[test]
    fn test_parse_roundtrip() {
        let key: EndpointKey = "192.168.1.20:5555".parse().unwrap();
        assert_eq!(key.ip(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(key.port, 5555);
        assert_eq!(SocketAddrV4::from(key).to_string(), "192.168.1.20:5555");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-address".parse::<EndpointKey>().is_err());
        assert!("10.0.0.5".parse::<EndpointKey>().is_err());
    }
}
