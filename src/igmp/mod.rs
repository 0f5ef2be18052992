
pub mod checksum;
pub mod code;
pub mod message;
pub mod socket;

pub use socket::RawIgmpSocket;
pub use socket::AsyncIgmpSocket;

use std::net::Ipv4Addr;

use message::*;

/// IP protocol number of IGMP.
pub const IPPROTO_IGMP: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpError {
    /// buffer ends before the named structure does
    Truncated(&'static str),
    BadChecksum { stored: u16, computed: u16 },
    UnknownType(u8),
    BadRecordType(u8),
    NotMulticast(Ipv4Addr),
    InvalidAddress(String),
    TooLarge(&'static str),
    Malformed(&'static str),
}

impl std::fmt::Display for IgmpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IgmpError::Truncated(what) => write!(f, "{} truncated", what),
            IgmpError::BadChecksum { stored, computed } => {
                write!(f, "bad checksum: stored {:#06x}, computed {:#06x}", stored, computed)
            }
            IgmpError::UnknownType(t) => write!(f, "unrecognized IGMP message type {:#04x}", t),
            IgmpError::BadRecordType(t) => write!(f, "unrecognized group record type {}", t),
            IgmpError::NotMulticast(addr) => write!(f, "{} is not a multicast address", addr),
            IgmpError::InvalidAddress(s) => write!(f, "invalid IPv4 address: {:?}", s),
            IgmpError::TooLarge(what) => write!(f, "{}", what),
            IgmpError::Malformed(what) => write!(f, "malformed packet: {}", what),
        }
    }
}

impl std::error::Error for IgmpError {}

/// Message kind, read once from byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgmpMessageType {
    MembershipQuery,
    V3MembershipReport,
    Unknown(u8),
}

impl From<u8> for IgmpMessageType {
    fn from(value: u8) -> Self {
        match value {
            MEMBERSHIP_QUERY_TYPE => IgmpMessageType::MembershipQuery,
            V3_MEMBERSHIP_REPORT_TYPE => IgmpMessageType::V3MembershipReport,
            other => IgmpMessageType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpMessage {
    /// type 0x11
    MembershipQuery(MembershipQuery),

    /// type 0x22
    V3MembershipReport(V3MembershipReport),
}

impl IgmpMessage {
    pub fn message_type(&self) -> IgmpMessageType {
        match self {
            IgmpMessage::MembershipQuery(_) => IgmpMessageType::MembershipQuery,
            IgmpMessage::V3MembershipReport(_) => IgmpMessageType::V3MembershipReport,
        }
    }

    /// Serializes the message with a valid checksum.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IgmpError> {
        let mut data = Vec::new();
        match self {
            IgmpMessage::MembershipQuery(query) => query.write(&mut data)?,
            IgmpMessage::V3MembershipReport(report) => report.write(&mut data)?,
        }
        checksum::set_checksum(&mut data).ok_or(IgmpError::Malformed("message shorter than its header"))?;
        Ok(data)
    }
}

/// Decodes an IGMP message (the IP payload). The checksum is verified
/// before any other field is trusted.
pub fn parse(data: &[u8]) -> Result<IgmpMessage, IgmpError> {
    if data.len() < 8 {
        return Err(IgmpError::Truncated("IGMP message"));
    }

    let stored = checksum::stored_checksum(data).unwrap_or_default();
    let computed = checksum::compute_checksum(data).unwrap_or_default();
    if stored != computed {
        return Err(IgmpError::BadChecksum { stored, computed });
    }

    match IgmpMessageType::from(data[0]) {
        IgmpMessageType::MembershipQuery => Ok(IgmpMessage::MembershipQuery(MembershipQuery::decode(data)?)),
        IgmpMessageType::V3MembershipReport => Ok(IgmpMessage::V3MembershipReport(V3MembershipReport::decode(data)?)),
        IgmpMessageType::Unknown(t) => Err(IgmpError::UnknownType(t)),
    }
}
