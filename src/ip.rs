
use std::net::Ipv4Addr;

use crate::igmp::checksum::internet_checksum;
use crate::igmp::message::read_addr;
use crate::igmp::IgmpError;

/// IP option type of Router Alert (copied flag set, option 20).
pub const ROUTER_ALERT_OPTION: u8 = 0x94;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,

    /// header length in bytes, options included
    pub header_len: usize,

    /// total length claimed by the header
    pub total_len: usize,

    pub router_alert: bool,
}

/// A borrowed IPv4 datagram with a validated header.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Packet<'a> {
    pub header: Ipv4Header,
    payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    pub const MIN_HEADER_LEN: usize = 20;

    /// Validates the header and locates the payload. Link-layer padding past
    /// the total length is ignored.
    pub fn parse(data: &'a [u8]) -> Result<Self, IgmpError> {
        if data.len() < Self::MIN_HEADER_LEN {
            return Err(IgmpError::Truncated("IPv4 header"));
        }
        let version = data[0] >> 4;
        if version != 4 {
            return Err(IgmpError::Malformed("not IPv4"));
        }
        let header_len = ((data[0] & 0x0f) as usize) * 4;
        if header_len < Self::MIN_HEADER_LEN {
            return Err(IgmpError::Malformed("IPv4 header length below minimum"));
        }
        if header_len > data.len() {
            return Err(IgmpError::Truncated("IPv4 options"));
        }
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_len < header_len {
            return Err(IgmpError::Malformed("IPv4 total length shorter than header"));
        }
        if total_len > data.len() {
            return Err(IgmpError::Truncated("IPv4 payload"));
        }

        if internet_checksum(&data[..header_len]) != 0 {
            return Err(IgmpError::Malformed("IPv4 header checksum"));
        }

        let router_alert = Self::has_router_alert(&data[Self::MIN_HEADER_LEN..header_len]);

        Ok(Self {
            header: Ipv4Header {
                source: read_addr(data, 12),
                destination: read_addr(data, 16),
                protocol: data[9],
                ttl: data[8],
                header_len,
                total_len,
                router_alert,
            },
            payload: &data[header_len..total_len],
        })
    }

    fn has_router_alert(options: &[u8]) -> bool {
        let mut i = 0;
        while i < options.len() {
            match options[i] {
                // end of option list
                0 => break,
                // no-op
                1 => {
                    i += 1;
                }
                kind => {
                    if i + 1 >= options.len() {
                        break;
                    }
                    let len = options[i + 1] as usize;
                    if len < 2 || i + len > options.len() {
                        break;
                    }
                    if kind == ROUTER_ALERT_OPTION {
                        return true;
                    }
                    i += len;
                }
            }
        }
        false
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

impl Ipv4Header {
    /// Builds a header for `payload_len` bytes, with the Router Alert option
    /// when `router_alert` is set.
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, ttl: u8, router_alert: bool, payload_len: usize) -> Self {
        let header_len = if router_alert { 24 } else { 20 };
        Self {
            source,
            destination,
            protocol,
            ttl,
            header_len,
            total_len: header_len + payload_len,
            router_alert,
        }
    }

    /// Serializes the header followed by `payload`, filling in the header checksum.
    pub fn encode_with_payload(&self, payload: &[u8]) -> Result<Vec<u8>, IgmpError> {
        let total_len = u16::try_from(self.header_len + payload.len())
            .map_err(|_| IgmpError::TooLarge("IPv4 datagram too long"))?;
        let mut data = Vec::with_capacity(total_len as usize);
        data.push(0x40 | (self.header_len / 4) as u8);
        // DSCP: internetwork control, as IGMP traffic is sent
        data.push(0xc0);
        data.extend_from_slice(&total_len.to_be_bytes());
        // identification, flags, fragment offset
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.push(self.ttl);
        data.push(self.protocol);
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&self.source.octets());
        data.extend_from_slice(&self.destination.octets());
        if self.router_alert {
            data.extend_from_slice(&[ROUTER_ALERT_OPTION, 4, 0, 0]);
        }
        let checksum = internet_checksum(&data);
        data[10..12].copy_from_slice(&checksum.to_be_bytes());
        data.extend_from_slice(payload);
        Ok(data)
    }
}
