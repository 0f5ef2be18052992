
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::addr::{MulticastAddress, ALL_SYSTEMS};
use crate::group::{FilterMode, GroupFilterState, GroupRecordDelta, MembershipFilter, SourceSet};
use crate::igmp::{self, IgmpError, IgmpMessage, IPPROTO_IGMP};
use crate::ip::Ipv4Packet;
use crate::report::ReportBuilder;

/// Record types used for unsolicited reports.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStyle {
    /// CHANGE_TO_INCLUDE_MODE / CHANGE_TO_EXCLUDE_MODE
    #[default]
    StateChange,

    /// MODE_IS_INCLUDE / MODE_IS_EXCLUDE
    CurrentState,
}

/// Where an inbound datagram should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// multicast the host wants
    ForHost,

    /// multicast the host's filter rejects
    FilteredOut,

    /// not multicast; forwarded unmodified
    PassThrough,

    /// unparseable IP header or IGMP message
    Dropped(IgmpError),
}

/// Reports answering a Membership Query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    /// Max Resp Time of the query, in 1/10 second
    pub max_resp_time: u32,
    pub reports: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub verdict: Verdict,
    pub response: Option<QueryResponse>,
}

impl Inbound {
    fn verdict(verdict: Verdict) -> Self {
        Self { verdict, response: None }
    }
}

/// Host-side IGMPv3 endpoint for one interface.
///
/// Control requests update the filter and return the report to transmit;
/// inbound datagrams are classified against the filter.
#[derive(Debug, Default)]
pub struct IgmpInputHandler {
    filter: MembershipFilter,
    builder: ReportBuilder,
    style: ReportStyle,
}

impl IgmpInputHandler {
    pub fn new(builder: ReportBuilder, style: ReportStyle) -> Self {
        Self {
            filter: MembershipFilter::new(),
            builder,
            style,
        }
    }

    pub fn filter(&self) -> &MembershipFilter {
        &self.filter
    }

    /// Join request carrying a textual group address.
    pub fn handle_join(&mut self, conf: &str) -> Result<Option<Vec<u8>>, IgmpError> {
        let group: MulticastAddress = conf.parse()?;
        self.join(group)
    }

    /// Leave request carrying a textual group address.
    pub fn handle_leave(&mut self, conf: &str) -> Result<Option<Vec<u8>>, IgmpError> {
        let group: MulticastAddress = conf.parse()?;
        self.leave(group)
    }

    pub fn join(&mut self, group: MulticastAddress) -> Result<Option<Vec<u8>>, IgmpError> {
        log::info!("IGMP join {}", group);
        let delta = self.filter.join(group);
        self.report_for(delta)
    }

    pub fn leave(&mut self, group: MulticastAddress) -> Result<Option<Vec<u8>>, IgmpError> {
        log::info!("IGMP leave {}", group);
        let delta = self.filter.leave(group);
        self.report_for(delta)
    }

    pub fn update_sources(&mut self, group: MulticastAddress, mode: FilterMode, sources: SourceSet) -> Result<Option<Vec<u8>>, IgmpError> {
        log::info!("IGMP filter {} {:?} {:?}", group, mode, sources);
        let delta = self.filter.update_sources(group, mode, sources);
        self.report_for(delta)
    }

    /// Brings the filter to `desired`: listed groups get their state, other
    /// non-reserved groups are left. All resulting records are packed into
    /// as few reports as fit.
    pub fn reconcile(&mut self, desired: &BTreeMap<MulticastAddress, GroupFilterState>) -> Result<Vec<Vec<u8>>, IgmpError> {
        let stale: Vec<MulticastAddress> = self.filter.groups()
            .map(|(group, _)| *group)
            .filter(|group| !group.is_reserved() && !desired.contains_key(group))
            .collect();

        let mut deltas = Vec::new();
        for group in stale {
            log::info!("IGMP leave {} (no longer configured)", group);
            deltas.extend(self.filter.leave(group));
        }
        for (group, state) in desired {
            if let Some(delta) = self.filter.update_sources(*group, state.mode, state.sources.clone()) {
                log::info!("IGMP filter {} {:?} {:?}", group, state.mode, state.sources);
                deltas.push(delta);
            }
        }

        if self.style == ReportStyle::CurrentState {
            deltas = deltas.iter().map(GroupRecordDelta::as_current_state).collect();
        }
        self.builder.build_reports(&deltas)
    }

    /// The filter has already changed when this runs; a build failure
    /// leaves it changed with nothing sent.
    fn report_for(&self, delta: Option<GroupRecordDelta>) -> Result<Option<Vec<u8>>, IgmpError> {
        let delta = match delta {
            Some(delta) => delta,
            None => return Ok(None),
        };
        let delta = match self.style {
            ReportStyle::StateChange => delta,
            ReportStyle::CurrentState => delta.as_current_state(),
        };
        let mut reports = self.builder.build_reports(&[delta])?;
        Ok(reports.pop())
    }

    /// Classifies one inbound IP datagram.
    pub fn handle_inbound(&self, packet: &[u8]) -> Inbound {
        let packet = match Ipv4Packet::parse(packet) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("dropping inbound datagram: {}", e);
                return Inbound::verdict(Verdict::Dropped(e));
            }
        };

        let destination = packet.header.destination;
        let group = match MulticastAddress::new(destination) {
            Ok(group) => group,
            Err(_) => return Inbound::verdict(Verdict::PassThrough),
        };

        let verdict = if self.accepts(group, packet.header.source) {
            Verdict::ForHost
        } else {
            log::debug!("filtered out {} -> {}", packet.header.source, destination);
            Verdict::FilteredOut
        };

        if packet.header.protocol != IPPROTO_IGMP {
            return Inbound::verdict(verdict);
        }

        // Queries are answered whatever the data filter says about the querier.
        match igmp::parse(packet.payload()) {
            Ok(IgmpMessage::MembershipQuery(query)) => {
                let records = self.filter.current_state(&query);
                log::debug!("query for {} from {}, {} record(s) to report", query.group_address, packet.header.source, records.len());
                let reports = match self.builder.build_reports(&records) {
                    Ok(reports) => reports,
                    Err(e) => {
                        log::warn!("failed to build query response: {}", e);
                        Vec::new()
                    }
                };
                let response = if reports.is_empty() {
                    None
                } else {
                    Some(QueryResponse {
                        max_resp_time: query.max_resp_time(),
                        reports,
                    })
                };
                Inbound { verdict, response }
            }
            Ok(IgmpMessage::V3MembershipReport(_)) => Inbound::verdict(verdict),
            Err(e) => {
                log::debug!("dropping IGMP message from {}: {}", packet.header.source, e);
                Inbound::verdict(Verdict::Dropped(e))
            }
        }
    }

    /// Reception from the all-systems group is always enabled.
    fn accepts(&self, group: MulticastAddress, source: Ipv4Addr) -> bool {
        group == ALL_SYSTEMS || self.filter.should_accept(group, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igmp::message::{GroupRecordType, MembershipQuery};
    use crate::ip::Ipv4Header;

    fn datagram(src: [u8; 4], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
        Ipv4Header::new(src.into(), dst.into(), protocol, 1, protocol == IPPROTO_IGMP, payload.len())
            .encode_with_payload(payload)
            .unwrap()
    }

    fn query_datagram(query: MembershipQuery) -> Vec<u8> {
        let dst = if query.is_general() { [224, 0, 0, 1] } else { query.group_address.octets() };
        let payload = IgmpMessage::MembershipQuery(query).to_bytes().unwrap();
        datagram([10, 0, 0, 1], dst, IPPROTO_IGMP, &payload)
    }

    #[test]
    fn invalid_control_input_is_an_error() {
        let mut handler = IgmpInputHandler::default();
        assert!(matches!(handler.handle_join("230.1.2"), Err(IgmpError::InvalidAddress(_))));
        assert!(matches!(handler.handle_leave("10.0.0.1"), Err(IgmpError::NotMulticast(_))));
        assert!(handler.filter().is_empty());
    }

    #[test]
    fn current_state_style_reports_mode_is_exclude() {
        let mut handler = IgmpInputHandler::new(ReportBuilder::default(), ReportStyle::CurrentState);
        let report = handler.handle_join("230.1.2.3").unwrap().unwrap();
        assert_eq!(report[8], GroupRecordType::ModeIsExclude as u8);
    }

    #[test]
    fn oversized_update_keeps_state() {
        let mut handler = IgmpInputHandler::new(ReportBuilder::new(24), ReportStyle::StateChange);
        let sources: SourceSet = (1..=4u32).map(|i| Ipv4Addr::from(0x0a00_0000 + i)).collect();
        let group: MulticastAddress = "232.1.1.1".parse().unwrap();
        let result = handler.update_sources(group, FilterMode::Include, sources);
        assert!(matches!(result, Err(IgmpError::TooLarge(_))));
        assert!(handler.filter().should_accept(group, Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn reconcile_applies_and_prunes() {
        let mut handler = IgmpInputHandler::default();
        handler.handle_join("230.1.2.3").unwrap();
        handler.handle_join("230.1.2.4").unwrap();

        let mut desired = BTreeMap::new();
        desired.insert("230.1.2.4".parse().unwrap(), GroupFilterState::any_source());
        let mut ssm = SourceSet::new();
        ssm.insert(Ipv4Addr::new(10, 0, 0, 5));
        desired.insert("232.1.1.1".parse().unwrap(), GroupFilterState::new(FilterMode::Include, ssm));

        let reports = handler.reconcile(&desired).unwrap();
        assert_eq!(reports.len(), 1);
        match igmp::parse(&reports[0]).unwrap() {
            IgmpMessage::V3MembershipReport(report) => {
                // leave of 230.1.2.3, then the new SSM group; 230.1.2.4 is unchanged
                assert_eq!(report.records.len(), 2);
                assert_eq!(report.records[0].record_type, GroupRecordType::ChangeToIncludeMode);
                assert_eq!(report.records[0].multicast_address, Ipv4Addr::new(230, 1, 2, 3));
                assert_eq!(report.records[1].multicast_address, Ipv4Addr::new(232, 1, 1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(handler.filter().len(), 2);
        assert!(handler.reconcile(&desired).unwrap().is_empty());
    }

    #[test]
    fn unicast_passes_through() {
        let handler = IgmpInputHandler::default();
        let packet = datagram([10, 0, 0, 5], [10, 0, 0, 9], 17, b"data");
        assert_eq!(handler.handle_inbound(&packet).verdict, Verdict::PassThrough);
    }

    #[test]
    fn truncated_datagram_is_dropped() {
        let handler = IgmpInputHandler::default();
        assert!(matches!(handler.handle_inbound(&[0x45, 0, 0]).verdict, Verdict::Dropped(_)));
    }

    #[test]
    fn all_systems_is_always_accepted() {
        let handler = IgmpInputHandler::default();
        let packet = datagram([10, 0, 0, 5], [224, 0, 0, 1], 17, b"data");
        assert_eq!(handler.handle_inbound(&packet).verdict, Verdict::ForHost);
    }

    #[test]
    fn general_query_is_answered_with_current_state() {
        let mut handler = IgmpInputHandler::default();
        handler.handle_join("230.1.2.3").unwrap();

        let inbound = handler.handle_inbound(&query_datagram(MembershipQuery::general(100, 2, 125)));
        assert_eq!(inbound.verdict, Verdict::ForHost);
        let response = inbound.response.unwrap();
        assert_eq!(response.max_resp_time, 100);
        assert_eq!(response.reports.len(), 1);
        match igmp::parse(&response.reports[0]).unwrap() {
            IgmpMessage::V3MembershipReport(report) => {
                assert_eq!(report.records.len(), 1);
                assert_eq!(report.records[0].record_type, GroupRecordType::ModeIsExclude);
                assert_eq!(report.records[0].multicast_address, Ipv4Addr::new(230, 1, 2, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn group_query_from_unlisted_querier_is_answered() {
        let mut handler = IgmpInputHandler::default();
        let group: MulticastAddress = "232.1.1.1".parse().unwrap();
        let mut sources = SourceSet::new();
        sources.insert(Ipv4Addr::new(10, 0, 0, 5));
        handler.update_sources(group, FilterMode::Include, sources).unwrap();

        let mut query = MembershipQuery::general(100, 2, 125);
        query.group_address = group.addr();
        // sent by 10.0.0.1, which the INCLUDE list does not name
        let inbound = handler.handle_inbound(&query_datagram(query));
        assert_eq!(inbound.verdict, Verdict::FilteredOut);

        let response = inbound.response.expect("group-specific query must be answered");
        match igmp::parse(&response.reports[0]).unwrap() {
            IgmpMessage::V3MembershipReport(report) => {
                assert_eq!(report.records.len(), 1);
                assert_eq!(report.records[0].record_type, GroupRecordType::ModeIsInclude);
                assert_eq!(report.records[0].multicast_address, Ipv4Addr::new(232, 1, 1, 1));
                assert_eq!(report.records[0].source_addresses, vec![Ipv4Addr::new(10, 0, 0, 5)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn query_with_nothing_to_report_has_no_response() {
        let handler = IgmpInputHandler::default();
        let inbound = handler.handle_inbound(&query_datagram(MembershipQuery::general(100, 2, 125)));
        assert_eq!(inbound.verdict, Verdict::ForHost);
        assert!(inbound.response.is_none());
    }

    #[test]
    fn corrupt_igmp_is_dropped() {
        let handler = IgmpInputHandler::default();
        let mut packet = query_datagram(MembershipQuery::general(100, 2, 125));
        let last = packet.len() - 1;
        packet[last] ^= 0x01;
        assert!(matches!(
            handler.handle_inbound(&packet).verdict,
            Verdict::Dropped(IgmpError::BadChecksum { .. })
        ));
    }

    #[test]
    fn unknown_igmp_type_is_dropped() {
        let handler = IgmpInputHandler::default();
        let mut payload = vec![0x17, 0, 0, 0, 224, 0, 0, 2];
        igmp::checksum::set_checksum(&mut payload).unwrap();
        let packet = datagram([10, 0, 0, 5], [224, 0, 0, 1], IPPROTO_IGMP, &payload);
        assert_eq!(handler.handle_inbound(&packet).verdict, Verdict::Dropped(IgmpError::UnknownType(0x17)));
    }
}
