
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::igmp::IgmpError;

/// In IGMPv3, General Queries are sent to the all-systems group.
/// Reception from this group is permanently enabled and it is never reported.
pub const ALL_SYSTEMS: MulticastAddress = MulticastAddress(Ipv4Addr::new(224, 0, 0, 1));

/// Version 3 Reports are sent to this group, which every IGMPv3 router listens to.
pub const ALL_V3_ROUTERS: MulticastAddress = MulticastAddress(Ipv4Addr::new(224, 0, 0, 22));

/// An IPv4 address inside 224.0.0.0/4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MulticastAddress(Ipv4Addr);

impl MulticastAddress {
    pub fn new(addr: Ipv4Addr) -> Result<Self, IgmpError> {
        if !addr.is_multicast() {
            return Err(IgmpError::NotMulticast(addr));
        }
        Ok(Self(addr))
    }

    pub const fn addr(&self) -> Ipv4Addr {
        self.0
    }

    /// Reserved groups are never the subject of an outgoing report.
    pub fn is_reserved(&self) -> bool {
        *self == ALL_SYSTEMS || *self == ALL_V3_ROUTERS
    }
}

impl TryFrom<Ipv4Addr> for MulticastAddress {
    type Error = IgmpError;

    fn try_from(addr: Ipv4Addr) -> Result<Self, Self::Error> {
        Self::new(addr)
    }
}

impl From<MulticastAddress> for Ipv4Addr {
    fn from(addr: MulticastAddress) -> Self {
        addr.0
    }
}

impl FromStr for MulticastAddress {
    type Err = IgmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = Ipv4Addr::from_str(s.trim()).map_err(|_| IgmpError::InvalidAddress(s.to_string()))?;
        Self::new(addr)
    }
}

impl std::fmt::Display for MulticastAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
