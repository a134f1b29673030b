//! Peer endpoint identity.
//!
//! An authority is a normalized (IPv6 address, port) pair. IPv4 addresses are
//! stored in IPv4-mapped IPv6 form (`::ffff:a.b.c.d`) so that equality and
//! hashing are well defined regardless of how the address was written. The
//! text form is `1.2.3.4:port` for mapped addresses and `[2001:db8::2]:port`
//! otherwise; a zero port means "no port" and is omitted.

use crate::error::{NetworkError, NetworkResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// A normalized peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Authority {
    ip: Ipv6Addr,
    port: u16,
}

impl Authority {
    /// Construct from any IP address, normalizing IPv4 to mapped form.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self { ip, port }
    }

    /// Construct from the fixed 16-byte wire representation.
    pub fn from_ip_address(ip: [u8; 16], port: u16) -> Self {
        Self { ip: Ipv6Addr::from(ip), port }
    }

    /// The all-zero authority (no address, no port).
    pub fn unspecified() -> Self {
        Self { ip: Ipv6Addr::UNSPECIFIED, port: 0 }
    }

    /// The normalized IPv6 address.
    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The fixed 16-byte wire representation.
    pub fn to_ip_address(&self) -> [u8; 16] {
        self.ip.octets()
    }

    /// A dialable socket address, unmapping IPv4 where possible.
    pub fn to_socket_addr(&self) -> SocketAddr {
        match self.ip.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(self.ip), self.port),
        }
    }

    /// Whether the address is unspecified (all zero).
    pub fn is_unspecified(&self) -> bool {
        self.ip == Ipv6Addr::UNSPECIFIED
            || self.ip.to_ipv4_mapped() == Some(Ipv4Addr::UNSPECIFIED)
    }

    /// Policy match: equal addresses, with a zero port matching any port.
    pub fn matches(&self, other: &Authority) -> bool {
        self.ip == other.ip && (self.port == 0 || self.port == other.port)
    }
}

impl From<SocketAddr> for Authority {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl Default for Authority {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip.to_ipv4_mapped() {
            Some(v4) => write!(f, "{}", v4)?,
            None => write!(f, "[{}]", self.ip)?,
        }
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

impl FromStr for Authority {
    type Err = NetworkError;

    // host: [2001:db8::2] or 2001:db8::2 or 1.2.240.1, with optional :port.
    fn from_str(s: &str) -> NetworkResult<Self> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest.find(']').ok_or(NetworkError::InvalidConfiguration)?;
            let host = &rest[..close];
            let tail = &rest[close + 1..];
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p)?,
                None if tail.is_empty() => 0,
                None => return Err(NetworkError::InvalidConfiguration),
            };
            (host, port)
        } else if s.matches(':').count() > 1 {
            // Bare IPv6, cannot carry a port.
            (s, 0)
        } else {
            match s.split_once(':') {
                Some((host, p)) => (host, parse_port(p)?),
                None => (s, 0),
            }
        };

        let ip: IpAddr = host.parse().map_err(|_| NetworkError::InvalidConfiguration)?;
        Ok(Self::new(ip, port))
    }
}

fn parse_port(s: &str) -> NetworkResult<u16> {
    s.parse().map_err(|_| NetworkError::InvalidConfiguration)
}

impl Serialize for Authority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Authority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_round_trip() {
        let authority: Authority = "[2001:db8::2]:42".parse().unwrap();
        assert_eq!(authority.port(), 42);

        let bytes = authority.to_ip_address();
        assert_eq!(&bytes[..4], &[0x20, 0x01, 0x0d, 0xb8]);
        assert_eq!(bytes[15], 0x02);

        assert_eq!(authority.to_string(), "[2001:db8::2]:42");
    }

    #[test]
    fn test_ipv4_round_trip() {
        let authority: Authority = "1.2.240.1:42".parse().unwrap();
        assert_eq!(authority.port(), 42);

        let bytes = authority.to_ip_address();
        assert_eq!(&bytes[..10], &[0u8; 10]);
        assert_eq!(&bytes[10..], &[0xff, 0xff, 0x01, 0x02, 0xf0, 0x01]);

        assert_eq!(authority.to_string(), "1.2.240.1:42");
    }

    #[test]
    fn test_portless_forms() {
        let v4: Authority = "10.0.0.1".parse().unwrap();
        assert_eq!(v4.port(), 0);
        assert_eq!(v4.to_string(), "10.0.0.1");

        let v6: Authority = "2001:db8::2".parse().unwrap();
        assert_eq!(v6.port(), 0);
        assert_eq!(v6.to_string(), "[2001:db8::2]");

        let bracketed: Authority = "[2001:db8::2]".parse().unwrap();
        assert_eq!(bracketed, v6);
    }

    #[test]
    fn test_mapped_equality() {
        let from_v4 = Authority::new("1.2.3.4".parse().unwrap(), 8333);
        let from_v6: Authority = "[::ffff:1.2.3.4]:8333".parse().unwrap();
        assert_eq!(from_v4, from_v6);
    }

    #[test]
    fn test_socket_addr_unmaps() {
        let authority: Authority = "1.2.3.4:8333".parse().unwrap();
        assert_eq!(authority.to_socket_addr(), "1.2.3.4:8333".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_zero_port_matches_any() {
        let rule: Authority = "1.2.3.4".parse().unwrap();
        let peer: Authority = "1.2.3.4:8333".parse().unwrap();
        assert!(rule.matches(&peer));
        assert!(!peer.matches(&rule));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-address".parse::<Authority>().is_err());
        assert!("[2001:db8::2]:70000".parse::<Authority>().is_err());
        assert!("1.2.3.4:x".parse::<Authority>().is_err());
    }
}
