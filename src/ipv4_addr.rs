//! IPv4 addresses, used as the local/remote halves of a flow's 4-tuple and as
//! the source/destination fields of the pseudo-header checksum.
//!
//! IPv6 is out of scope; see the crate-level documentation.

use std::fmt::{self, Display};
use std::str::FromStr;

/// A 32-bit IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    /// The address `0.0.0.0`.
    pub const CURRENT_NETWORK: Self = Self([0u8, 0, 0, 0]);

    /// The address `10.0.0.0`.
    pub const PRIVATE_NETWORK: Self = Self([10u8, 0, 0, 0]);

    /// The address `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127u8, 0, 0, 1]);

    /// The address `255.255.255.255`.
    pub const SUBNET: Self = Self([255u8, 255, 255, 255]);

    /// Creates a new address from four octets.
    pub const fn new(address: [u8; 4]) -> Self {
        Self(address)
    }

    /// Gets the address as a `u32`.
    pub fn to_u32(self) -> u32 {
        self.into()
    }

    /// Gets the address as a `[u8; 4]`.
    pub fn to_bytes(self) -> [u8; 4] {
        self.into()
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = <[u8; 4]>::from(*self);
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl From<u32> for Ipv4Address {
    fn from(n: u32) -> Self {
        Self::from(n.to_be_bytes())
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(n: [u8; 4]) -> Self {
        Self(n)
    }
}

impl From<Ipv4Address> for u32 {
    fn from(address: Ipv4Address) -> Self {
        u32::from_be_bytes(address.0)
    }
}

impl From<Ipv4Address> for [u8; 4] {
    fn from(address: Ipv4Address) -> Self {
        address.0
    }
}

/// An error parsing a dotted-quad string into an [`Ipv4Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseIpv4AddressError;

impl Display for ParseIpv4AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid IPv4 dotted-quad address")
    }
}

impl std::error::Error for ParseIpv4AddressError {}

impl FromStr for Ipv4Address {
    type Err = ParseIpv4AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(ParseIpv4AddressError)?;
            *octet = part.parse().map_err(|_| ParseIpv4AddressError)?;
        }
        if parts.next().is_some() {
            return Err(ParseIpv4AddressError);
        }
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u32() {
        let addr = Ipv4Address::new([192, 168, 61, 12]);
        assert_eq!(Ipv4Address::from(addr.to_u32()), addr);
    }

    #[test]
    fn displays_dotted_quad() {
        assert_eq!(Ipv4Address::LOCALHOST.to_string(), "127.0.0.1");
    }

    #[test]
    fn parses_dotted_quad() {
        assert_eq!("192.168.61.12".parse(), Ok(Ipv4Address::new([192, 168, 61, 12])));
        assert!("300.1.1.1".parse::<Ipv4Address>().is_err());
        assert!("1.2.3".parse::<Ipv4Address>().is_err());
    }
}
