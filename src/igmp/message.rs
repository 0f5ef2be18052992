
use std::net::Ipv4Addr;

use super::code::{code_to_value, value_to_code};
use super::IgmpError;

/// Type byte of a Membership Query (any version).
pub const MEMBERSHIP_QUERY_TYPE: u8 = 0x11;

/// Type byte of a Version 3 Membership Report.
pub const V3_MEMBERSHIP_REPORT_TYPE: u8 = 0x22;

pub(crate) fn read_addr(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Fixed part of a Membership Query.
///
/// ```text
/// type(1)=0x11 | max_resp_code(1) | checksum(2)
/// group_address(4)
/// resv(4 bits) S(1 bit) QRV(3 bits) | QQIC(1) | number_of_sources(2)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipQueryHeader {
    pub max_resp_code: u8,
    pub checksum: u16,
    pub group_address: Ipv4Addr,
    pub flags: u8,
    pub query_interval_code: u8,
    pub number_of_sources: u16,
}

impl MembershipQueryHeader {
    pub const SIZE: usize = 12;

    /// IGMPv1/v2 queries stop after the group address.
    pub const LEGACY_SIZE: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, IgmpError> {
        if data.len() < Self::LEGACY_SIZE {
            return Err(IgmpError::Truncated("membership query"));
        }
        let max_resp_code = data[1];
        let checksum = read_u16(data, 2);
        let group_address = read_addr(data, 4);
        if data.len() > Self::LEGACY_SIZE && data.len() < Self::SIZE {
            return Err(IgmpError::Malformed("membership query of 9 to 11 bytes"));
        }
        if data.len() == Self::LEGACY_SIZE {
            return Ok(Self {
                max_resp_code,
                checksum,
                group_address,
                flags: 0,
                query_interval_code: 0,
                number_of_sources: 0,
            });
        }
        Ok(Self {
            max_resp_code,
            checksum,
            group_address,
            flags: data[8],
            query_interval_code: data[9],
            number_of_sources: read_u16(data, 10),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(MEMBERSHIP_QUERY_TYPE);
        buf.push(self.max_resp_code);
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf.extend_from_slice(&self.group_address.octets());
        buf.push(self.flags);
        buf.push(self.query_interval_code);
        buf.extend_from_slice(&self.number_of_sources.to_be_bytes());
    }

    pub fn suppress_router_processing(&self) -> bool {
        self.flags & 0x08 != 0
    }

    pub fn qrv(&self) -> u8 {
        self.flags & 0x07
    }

    /// Max Resp Time in units of 1/10 second.
    pub fn max_resp_time(&self) -> u32 {
        code_to_value(self.max_resp_code)
    }

    /// Querier's Query Interval in seconds.
    pub fn query_interval(&self) -> u32 {
        code_to_value(self.query_interval_code)
    }
}

/// Fixed part of a Version 3 Membership Report.
///
/// ```text
/// type(1)=0x22 | reserved(1) | checksum(2)
/// reserved(2) | number_of_group_records(2)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipReportHeader {
    pub checksum: u16,
    pub number_of_group_records: u16,
}

impl MembershipReportHeader {
    pub const SIZE: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, IgmpError> {
        if data.len() < Self::SIZE {
            return Err(IgmpError::Truncated("membership report"));
        }
        // reserved fields are ignored on reception
        Ok(Self {
            checksum: read_u16(data, 2),
            number_of_group_records: read_u16(data, 6),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(V3_MEMBERSHIP_REPORT_TYPE);
        buf.push(0);
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.number_of_group_records.to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GroupRecordType {
    /// MODE_IS_INCLUDE: current state, INCLUDE with the listed sources.
    ModeIsInclude = 1,

    /// MODE_IS_EXCLUDE: current state, EXCLUDE with the listed sources.
    ModeIsExclude = 2,

    /// CHANGE_TO_INCLUDE_MODE: filter changed to INCLUDE with the listed sources.
    ChangeToIncludeMode = 3,

    /// CHANGE_TO_EXCLUDE_MODE: filter changed to EXCLUDE with the listed sources.
    ChangeToExcludeMode = 4,
}

impl TryFrom<u8> for GroupRecordType {
    type Error = IgmpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ModeIsInclude),
            2 => Ok(Self::ModeIsExclude),
            3 => Ok(Self::ChangeToIncludeMode),
            4 => Ok(Self::ChangeToExcludeMode),
            other => Err(IgmpError::BadRecordType(other)),
        }
    }
}

impl From<GroupRecordType> for u8 {
    fn from(value: GroupRecordType) -> Self {
        value as u8
    }
}

/// Fixed part of one group record inside a report.
///
/// ```text
/// record_type(1) | aux_data_len(1) | number_of_sources(2)
/// multicast_address(4)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRecordHeader {
    pub record_type: GroupRecordType,
    pub aux_data_length: u8,
    pub number_of_sources: u16,
    pub multicast_address: Ipv4Addr,
}

impl GroupRecordHeader {
    pub const SIZE: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, IgmpError> {
        if data.len() < Self::SIZE {
            return Err(IgmpError::Truncated("group record"));
        }
        Ok(Self {
            record_type: GroupRecordType::try_from(data[0])?,
            aux_data_length: data[1],
            number_of_sources: read_u16(data, 2),
            multicast_address: read_addr(data, 4),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.record_type.into());
        buf.push(self.aux_data_length);
        buf.extend_from_slice(&self.number_of_sources.to_be_bytes());
        buf.extend_from_slice(&self.multicast_address.octets());
    }

    /// Bytes following the header: sources, then auxiliary data.
    pub fn payload_size(&self) -> usize {
        4 * (self.number_of_sources as usize + self.aux_data_length as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipQuery {
    pub max_resp_code: u8,
    pub group_address: Ipv4Addr,
    pub suppress_router_processing: bool,
    pub qrv: u8,
    pub qqic: u8,
    pub source_addresses: Vec<Ipv4Addr>,
}

impl MembershipQuery {
    /// Builds a General Query from a Max Resp Time (1/10 s) and a query interval (s).
    pub fn general(max_resp_time: u32, qrv: u8, query_interval: u32) -> Self {
        Self {
            max_resp_code: value_to_code(max_resp_time),
            group_address: Ipv4Addr::UNSPECIFIED,
            suppress_router_processing: false,
            qrv,
            qqic: value_to_code(query_interval),
            source_addresses: Vec::new(),
        }
    }

    pub fn is_general(&self) -> bool {
        self.group_address.is_unspecified()
    }

    pub fn max_resp_time(&self) -> u32 {
        code_to_value(self.max_resp_code)
    }

    pub fn query_interval(&self) -> u32 {
        code_to_value(self.qqic)
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, IgmpError> {
        let header = MembershipQueryHeader::decode(data)?;
        let count = header.number_of_sources as usize;
        let end = MembershipQueryHeader::SIZE + 4 * count;
        if count > 0 && end > data.len() {
            return Err(IgmpError::Truncated("membership query sources"));
        }
        let source_addresses = (0..count)
            .map(|i| read_addr(data, MembershipQueryHeader::SIZE + 4 * i))
            .collect();
        Ok(Self {
            max_resp_code: header.max_resp_code,
            group_address: header.group_address,
            suppress_router_processing: header.suppress_router_processing(),
            qrv: header.qrv(),
            qqic: header.query_interval_code,
            source_addresses,
        })
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<(), IgmpError> {
        let number_of_sources = u16::try_from(self.source_addresses.len())
            .map_err(|_| IgmpError::TooLarge("membership query source addresses too many"))?;
        let mut flags = self.qrv & 0x07;
        if self.suppress_router_processing {
            flags |= 0x08;
        }
        let header = MembershipQueryHeader {
            max_resp_code: self.max_resp_code,
            checksum: 0,
            group_address: self.group_address,
            flags,
            query_interval_code: self.qqic,
            number_of_sources,
        };
        header.encode(buf);
        for source in &self.source_addresses {
            buf.extend_from_slice(&source.octets());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub record_type: GroupRecordType,
    pub multicast_address: Ipv4Addr,
    pub source_addresses: Vec<Ipv4Addr>,
}

impl GroupRecord {
    /// Encoded size; this crate never emits auxiliary data.
    pub fn size(&self) -> usize {
        GroupRecordHeader::SIZE + 4 * self.source_addresses.len()
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<(), IgmpError> {
        let number_of_sources = u16::try_from(self.source_addresses.len())
            .map_err(|_| IgmpError::TooLarge("group record source addresses too many"))?;
        let header = GroupRecordHeader {
            record_type: self.record_type,
            aux_data_length: 0,
            number_of_sources,
            multicast_address: self.multicast_address,
        };
        header.encode(buf);
        for source in &self.source_addresses {
            buf.extend_from_slice(&source.octets());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct V3MembershipReport {
    pub records: Vec<GroupRecord>,
}

impl V3MembershipReport {
    pub fn size(&self) -> usize {
        MembershipReportHeader::SIZE + self.records.iter().map(GroupRecord::size).sum::<usize>()
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, IgmpError> {
        let header = MembershipReportHeader::decode(data)?;
        let mut records = Vec::with_capacity(header.number_of_group_records as usize);
        let mut offset = MembershipReportHeader::SIZE;
        for _ in 0..header.number_of_group_records {
            let record = GroupRecordHeader::decode(&data[offset..])?;
            let sources_at = offset + GroupRecordHeader::SIZE;
            let end = sources_at + record.payload_size();
            if end > data.len() {
                return Err(IgmpError::Truncated("group record payload"));
            }
            let source_addresses = (0..record.number_of_sources as usize)
                .map(|i| read_addr(data, sources_at + 4 * i))
                .collect();
            records.push(GroupRecord {
                record_type: record.record_type,
                multicast_address: record.multicast_address,
                source_addresses,
            });
            offset = end;
        }
        Ok(Self { records })
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<(), IgmpError> {
        let number_of_group_records = u16::try_from(self.records.len())
            .map_err(|_| IgmpError::TooLarge("membership report group records too many"))?;
        buf.reserve(self.size());
        MembershipReportHeader { checksum: 0, number_of_group_records }.encode(buf);
        for record in &self.records {
            record.write(buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_header_layout() {
        let header = MembershipQueryHeader {
            max_resp_code: 0x64,
            checksum: 0xbeef,
            group_address: Ipv4Addr::new(230, 1, 2, 3),
            flags: 0x0a,
            query_interval_code: 125,
            number_of_sources: 2,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf, [0x11, 0x64, 0xbe, 0xef, 230, 1, 2, 3, 0x0a, 125, 0, 2]);
        assert_eq!(buf.len(), MembershipQueryHeader::SIZE);

        let decoded = MembershipQueryHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.suppress_router_processing());
        assert_eq!(decoded.qrv(), 2);
        assert_eq!(decoded.max_resp_time(), 100);
        assert_eq!(decoded.query_interval(), 125);
    }

    #[test]
    fn legacy_query_header() {
        let decoded = MembershipQueryHeader::decode(&[0x11, 100, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(decoded.number_of_sources, 0);
        assert_eq!(decoded.qrv(), 0);
        assert!(MembershipQueryHeader::decode(&[0x11, 100, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn nine_to_eleven_byte_queries_are_rejected() {
        for len in 9..MembershipQueryHeader::SIZE {
            let data = vec![0x11; len];
            assert!(matches!(MembershipQueryHeader::decode(&data), Err(IgmpError::Malformed(_))), "length {}", len);
        }
    }

    #[test]
    fn report_header_layout() {
        let mut buf = Vec::new();
        MembershipReportHeader { checksum: 0x1234, number_of_group_records: 3 }.encode(&mut buf);
        assert_eq!(buf, [0x22, 0, 0x12, 0x34, 0, 0, 0, 3]);
    }

    #[test]
    fn group_record_payload_size() {
        let data = [4, 2, 0, 3, 230, 1, 2, 3];
        let header = GroupRecordHeader::decode(&data).unwrap();
        assert_eq!(header.record_type, GroupRecordType::ChangeToExcludeMode);
        assert_eq!(header.payload_size(), 4 * (3 + 2));
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let data = [5, 0, 0, 0, 230, 1, 2, 3];
        assert_eq!(GroupRecordHeader::decode(&data), Err(IgmpError::BadRecordType(5)));
    }

    #[test]
    fn report_skips_aux_data() {
        let data = [
            0x22, 0, 0, 0, 0, 0, 0, 2,
            // record 1: IS_IN {10.0.0.5}, one word of aux data
            1, 1, 0, 1, 232, 1, 1, 1, 10, 0, 0, 5, 0xde, 0xad, 0xbe, 0xef,
            // record 2: TO_EX {}
            4, 0, 0, 0, 230, 1, 2, 3,
        ];
        let report = V3MembershipReport::decode(&data).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].source_addresses, vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert_eq!(report.records[1].record_type, GroupRecordType::ChangeToExcludeMode);
        assert_eq!(report.records[1].multicast_address, Ipv4Addr::new(230, 1, 2, 3));
    }

    #[test]
    fn oversized_source_count_is_truncation() {
        let data = [0x22, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0xff, 0xff, 232, 1, 1, 1, 10, 0, 0, 5];
        assert!(matches!(V3MembershipReport::decode(&data), Err(IgmpError::Truncated(_))));

        let query = [0x11, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9, 10, 0, 0, 1];
        assert!(matches!(MembershipQuery::decode(&query), Err(IgmpError::Truncated(_))));
    }

    #[test]
    fn general_query_codes() {
        let query = MembershipQuery::general(100, 2, 125);
        assert_eq!(query.max_resp_code, 100);
        assert_eq!(query.qqic, 125);
        assert!(query.is_general());

        let query = MembershipQuery::general(1000, 2, 300);
        assert!(query.max_resp_time() <= 1000);
        assert!(query.query_interval() <= 300);
        assert_eq!(query.query_interval(), 288);
    }
}
