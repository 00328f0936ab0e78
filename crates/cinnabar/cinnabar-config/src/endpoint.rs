//! Endpoint triples: `<family:?|4|6><kind:C|L><address>|<port>`.
//!
//! Examples: `4C127.0.0.1|5001` connects over IPv4, `?Lfix.example.com|9880`
//! listens with whatever family the address resolves to.

use crate::config::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// Actively connect to the address.
    Connect,
    /// Listen on the address and accept.
    Listen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub family: AddressFamily,
    pub kind: EndpointKind,
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadEndpoint {
            value: s.to_string(),
        };
        let mut chars = s.chars();
        let family = match chars.next().ok_or_else(bad)? {
            '?' => AddressFamily::Any,
            '4' => AddressFamily::V4,
            '6' => AddressFamily::V6,
            _ => return Err(bad()),
        };
        let kind = match chars.next().ok_or_else(bad)? {
            'C' => EndpointKind::Connect,
            'L' => EndpointKind::Listen,
            _ => return Err(bad()),
        };
        let rest = chars.as_str();
        let (address, port) = rest.rsplit_once('|').ok_or_else(bad)?;
        if address.is_empty() {
            return Err(bad());
        }
        let port: u16 = port.parse().map_err(|_| bad())?;
        Ok(Self {
            family,
            kind,
            address: address.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_families_and_both_kinds() {
        let e = Endpoint::parse("4C127.0.0.1|5001").unwrap();
        assert_eq!(e.family, AddressFamily::V4);
        assert_eq!(e.kind, EndpointKind::Connect);
        assert_eq!(e.address, "127.0.0.1");
        assert_eq!(e.port, 5001);

        let e = Endpoint::parse("6L::1|9880").unwrap();
        assert_eq!(e.family, AddressFamily::V6);
        assert_eq!(e.kind, EndpointKind::Listen);
        assert_eq!(e.address, "::1");

        let e = Endpoint::parse("?Lfix.example.com|9880").unwrap();
        assert_eq!(e.family, AddressFamily::Any);
    }

    #[test]
    fn rejects_malformed_triples() {
        for bad in ["", "4", "4X127.0.0.1|1", "xC127.0.0.1|1", "4C127.0.0.1", "4C|5001", "4Chost|notaport"] {
            assert!(Endpoint::parse(bad).is_err(), "{bad}");
        }
    }
}
