use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Keyword selecting the IPv4 address family.
pub const PROTO_IPV4: &str = "IPV4";

/// Keyword selecting the IPv6 address family.
pub const PROTO_IPV6: &str = "IPV6";

/// Address family of the server endpoint, as named on the wire of the
/// configuration surfaces (`IPV4`/`IPV6`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("unknown protocol keyword {0:?}, expected IPV4 or IPV6")]
    UnknownFamily(String),
    #[error("{address:?} is not a valid {family} address")]
    InvalidAddress { family: &'static str, address: String },
    #[error("{0:?} is not a valid TCP port number")]
    InvalidPort(String),
}

impl AddrFamily {
    pub fn from_keyword(keyword: &str) -> Result<Self, AddrError> {
        match keyword {
            PROTO_IPV4 => Ok(Self::Ipv4),
            PROTO_IPV6 => Ok(Self::Ipv6),
            other => Err(AddrError::UnknownFamily(other.to_owned())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ipv4 => PROTO_IPV4,
            Self::Ipv6 => PROTO_IPV6,
        }
    }

    /// Parses an address string of this family. A literal of the other
    /// family is rejected, matching the strictness of the original
    /// per-family socket setup.
    pub fn parse_ip(self, address: &str) -> Result<IpAddr, AddrError> {
        match self {
            Self::Ipv4 => address.parse::<Ipv4Addr>().map(IpAddr::V4).map_err(|_| {
                AddrError::InvalidAddress { family: PROTO_IPV4, address: address.to_owned() }
            }),
            Self::Ipv6 => address.parse::<Ipv6Addr>().map(IpAddr::V6).map_err(|_| {
                AddrError::InvalidAddress { family: PROTO_IPV6, address: address.to_owned() }
            }),
        }
    }
}

/// Parses a non-zero TCP port from its text form.
pub fn parse_port(port: &str) -> Result<u16, AddrError> {
    match port.parse::<u16>() {
        Ok(value) if value != 0 => Ok(value),
        _ => Err(AddrError::InvalidPort(port.to_owned())),
    }
}

/// Resolves a `(family, address, port)` triple into a socket address.
pub fn resolve(family: AddrFamily, address: &str, port: &str) -> Result<SocketAddr, AddrError> {
    let port = parse_port(port)?;
    Ok(SocketAddr::new(family.parse_ip(address)?, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_round_trip() {
        assert_eq!(AddrFamily::from_keyword("IPV4"), Ok(AddrFamily::Ipv4));
        assert_eq!(AddrFamily::from_keyword("IPV6"), Ok(AddrFamily::Ipv6));
        assert!(matches!(
            AddrFamily::from_keyword("ipv4"),
            Err(AddrError::UnknownFamily(_))
        ));
    }

    #[test]
    fn families_are_strict() {
        assert!(AddrFamily::Ipv4.parse_ip("127.0.0.1").is_ok());
        assert!(AddrFamily::Ipv4.parse_ip("::1").is_err());
        assert!(AddrFamily::Ipv6.parse_ip("::1").is_ok());
        assert!(AddrFamily::Ipv6.parse_ip("127.0.0.1").is_err());
    }

    #[test]
    fn port_must_be_non_zero() {
        assert_eq!(parse_port("2111"), Ok(2111));
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("twenty").is_err());
    }

    #[test]
    fn resolve_builds_the_socket_addr() {
        let addr = resolve(AddrFamily::Ipv6, "::1", "2111").unwrap();
        assert_eq!(addr.to_string(), "[::1]:2111");
    }
}
