
use crate::group::GroupRecordDelta;
use crate::igmp::message::{GroupRecord, MembershipReportHeader, V3MembershipReport};
use crate::igmp::{IgmpError, IgmpMessage};

/// IGMP payload that fits a 1500-byte MTU after a 24-byte IP header
/// carrying the Router Alert option.
pub const DEFAULT_MAX_REPORT_SIZE: usize = 1476;

/// Serializes group-record deltas into Version 3 Membership Reports.
#[derive(Debug, Clone, Copy)]
pub struct ReportBuilder {
    max_size: usize,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPORT_SIZE)
    }
}

impl ReportBuilder {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// One report holding every delta, in order, with its checksum set.
    pub fn build_report(&self, deltas: &[GroupRecordDelta]) -> Result<Vec<u8>, IgmpError> {
        let report = V3MembershipReport {
            records: deltas.iter().map(GroupRecord::from).collect(),
        };
        IgmpMessage::V3MembershipReport(report).to_bytes()
    }

    /// As many reports as needed to keep each within the size limit.
    /// Records are never split; one that cannot fit on its own is an error.
    pub fn build_reports(&self, deltas: &[GroupRecordDelta]) -> Result<Vec<Vec<u8>>, IgmpError> {
        let mut reports = Vec::new();
        let mut start = 0;
        let mut size = MembershipReportHeader::SIZE;
        for (i, delta) in deltas.iter().enumerate() {
            let record_size = GroupRecord::from(delta).size();
            if MembershipReportHeader::SIZE + record_size > self.max_size {
                return Err(IgmpError::TooLarge("group record does not fit in a report"));
            }
            if size + record_size > self.max_size {
                reports.push(self.build_report(&deltas[start..i])?);
                start = i;
                size = MembershipReportHeader::SIZE;
            }
            size += record_size;
        }
        if start < deltas.len() {
            reports.push(self.build_report(&deltas[start..])?);
        }
        Ok(reports)
    }
}
