
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::addr::MulticastAddress;
use crate::igmp::message::{GroupRecord, GroupRecordType, MembershipQuery};

/// Source addresses for one group. Ordered so that reports are deterministic.
pub type SourceSet = BTreeSet<Ipv4Addr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Reception policy for one group.
///
/// `Exclude` with no sources receives from everyone (a plain join);
/// `Include` with no sources receives nothing and is the same as not listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFilterState {
    pub mode: FilterMode,
    pub sources: SourceSet,
}

impl GroupFilterState {
    pub fn new(mode: FilterMode, sources: SourceSet) -> Self {
        Self { mode, sources }
    }

    pub fn any_source() -> Self {
        Self::new(FilterMode::Exclude, SourceSet::new())
    }

    pub fn no_source() -> Self {
        Self::new(FilterMode::Include, SourceSet::new())
    }

    /// True when this state is indistinguishable from not listening.
    pub fn is_empty(&self) -> bool {
        self.mode == FilterMode::Include && self.sources.is_empty()
    }

    pub fn accepts(&self, source: Ipv4Addr) -> bool {
        match self.mode {
            FilterMode::Include => self.sources.contains(&source),
            FilterMode::Exclude => !self.sources.contains(&source),
        }
    }
}

/// A reportable state transition for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecordDelta {
    pub group: MulticastAddress,
    pub record_type: GroupRecordType,
    pub sources: SourceSet,
}

impl GroupRecordDelta {
    /// The same state announced as a current-state record, as sent for
    /// unsolicited joins by hosts that report full state.
    pub fn as_current_state(&self) -> Self {
        let record_type = match self.record_type {
            GroupRecordType::ChangeToIncludeMode => GroupRecordType::ModeIsInclude,
            GroupRecordType::ChangeToExcludeMode => GroupRecordType::ModeIsExclude,
            other => other,
        };
        Self { record_type, ..self.clone() }
    }
}

impl From<&GroupRecordDelta> for GroupRecord {
    fn from(delta: &GroupRecordDelta) -> Self {
        GroupRecord {
            record_type: delta.record_type,
            multicast_address: delta.group.addr(),
            source_addresses: delta.sources.iter().copied().collect(),
        }
    }
}

/// Per-interface multicast reception state.
///
/// A group with no entry is not listened to. Entries are never stored in the
/// INCLUDE/empty state; reaching it removes the entry.
#[derive(Debug, Default, Clone)]
pub struct MembershipFilter {
    groups: BTreeMap<MulticastAddress, GroupFilterState>,
}

impl MembershipFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving `group` from every source.
    pub fn join(&mut self, group: MulticastAddress) -> Option<GroupRecordDelta> {
        self.update_sources(group, FilterMode::Exclude, SourceSet::new())
    }

    /// Stop receiving `group` entirely.
    pub fn leave(&mut self, group: MulticastAddress) -> Option<GroupRecordDelta> {
        self.update_sources(group, FilterMode::Include, SourceSet::new())
    }

    /// Replaces the filter for `group` and returns the record that tells
    /// routers about it, if anything observable changed.
    ///
    /// Reserved groups are tracked but never reported.
    pub fn update_sources(&mut self, group: MulticastAddress, mode: FilterMode, sources: SourceSet) -> Option<GroupRecordDelta> {
        let new_state = GroupFilterState::new(mode, sources);
        let old_state = self.groups.get(&group).cloned().unwrap_or_else(GroupFilterState::no_source);
        if old_state == new_state {
            return None;
        }

        if new_state.is_empty() {
            self.groups.remove(&group);
        } else {
            self.groups.insert(group, new_state.clone());
        }

        if group.is_reserved() {
            log::debug!("filter for reserved group {} changed, not reported", group);
            return None;
        }

        let record_type = match new_state.mode {
            FilterMode::Include => GroupRecordType::ChangeToIncludeMode,
            FilterMode::Exclude => GroupRecordType::ChangeToExcludeMode,
        };
        log::debug!("group {}: {:?} -> {:?}", group, old_state, new_state);
        Some(GroupRecordDelta {
            group,
            record_type,
            sources: new_state.sources,
        })
    }

    pub fn should_accept(&self, group: MulticastAddress, source: Ipv4Addr) -> bool {
        self.groups.get(&group).map(|state| state.accepts(source)).unwrap_or(false)
    }

    pub fn state(&self, group: MulticastAddress) -> Option<&GroupFilterState> {
        self.groups.get(&group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&MulticastAddress, &GroupFilterState)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn current_state_record(group: MulticastAddress, state: &GroupFilterState) -> GroupRecordDelta {
        let record_type = match state.mode {
            FilterMode::Include => GroupRecordType::ModeIsInclude,
            FilterMode::Exclude => GroupRecordType::ModeIsExclude,
        };
        GroupRecordDelta {
            group,
            record_type,
            sources: state.sources.clone(),
        }
    }

    /// Current-state records answering `query`.
    ///
    /// General queries get every listened, non-reserved group. Group-specific
    /// queries get that group's state. Group-and-source-specific queries get
    /// an IS_IN record naming the queried sources this host still wants.
    pub fn current_state(&self, query: &MembershipQuery) -> Vec<GroupRecordDelta> {
        if query.is_general() {
            return self.groups.iter()
                .filter(|(group, _)| !group.is_reserved())
                .map(|(group, state)| Self::current_state_record(*group, state))
                .collect();
        }

        let group = match MulticastAddress::new(query.group_address) {
            Ok(group) if !group.is_reserved() => group,
            _ => return Vec::new(),
        };
        let state = match self.groups.get(&group) {
            Some(state) => state,
            None => return Vec::new(),
        };

        if query.source_addresses.is_empty() {
            return vec![Self::current_state_record(group, state)];
        }

        let wanted: SourceSet = query.source_addresses.iter()
            .copied()
            .filter(|source| state.accepts(*source))
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }
        vec![GroupRecordDelta {
            group,
            record_type: GroupRecordType::ModeIsInclude,
            sources: wanted,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(s: &str) -> MulticastAddress {
        s.parse().unwrap()
    }

    fn sources(addrs: &[[u8; 4]]) -> SourceSet {
        addrs.iter().map(|a| Ipv4Addr::from(*a)).collect()
    }

    #[test]
    fn first_join_changes_to_exclude() {
        let mut filter = MembershipFilter::new();
        let delta = filter.join(group("230.1.2.3")).unwrap();
        assert_eq!(delta.group, group("230.1.2.3"));
        assert_eq!(delta.record_type, GroupRecordType::ChangeToExcludeMode);
        assert!(delta.sources.is_empty());
        assert_eq!(delta.as_current_state().record_type, GroupRecordType::ModeIsExclude);
        assert_eq!(filter.state(group("230.1.2.3")), Some(&GroupFilterState::any_source()));
    }

    #[test]
    fn join_is_idempotent() {
        let mut filter = MembershipFilter::new();
        assert!(filter.join(group("230.1.2.3")).is_some());
        assert!(filter.join(group("230.1.2.3")).is_none());
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn leave_without_join_is_silent() {
        let mut filter = MembershipFilter::new();
        assert!(filter.leave(group("230.1.2.3")).is_none());
        assert!(filter.is_empty());
    }

    #[test]
    fn join_then_leave_restores_nothing_accepted() {
        let mut filter = MembershipFilter::new();
        filter.join(group("230.1.2.3"));
        let delta = filter.leave(group("230.1.2.3")).unwrap();
        assert_eq!(delta.record_type, GroupRecordType::ChangeToIncludeMode);
        assert!(delta.sources.is_empty());
        assert!(filter.is_empty());
        for source in [[10, 0, 0, 5], [192, 168, 1, 1], [0, 0, 0, 0]] {
            assert!(!filter.should_accept(group("230.1.2.3"), Ipv4Addr::from(source)));
        }
    }

    #[test]
    fn exclude_accepts_everyone_but_the_list() {
        let mut filter = MembershipFilter::new();
        filter.join(group("230.1.2.3"));
        assert!(filter.should_accept(group("230.1.2.3"), Ipv4Addr::new(10, 0, 0, 5)));
        assert!(filter.should_accept(group("230.1.2.3"), Ipv4Addr::new(172, 16, 0, 1)));

        let delta = filter.update_sources(group("230.1.2.3"), FilterMode::Exclude, sources(&[[10, 0, 0, 5]])).unwrap();
        assert_eq!(delta.record_type, GroupRecordType::ChangeToExcludeMode);
        assert_eq!(delta.sources, sources(&[[10, 0, 0, 5]]));
        assert!(!filter.should_accept(group("230.1.2.3"), Ipv4Addr::new(10, 0, 0, 5)));
        assert!(filter.should_accept(group("230.1.2.3"), Ipv4Addr::new(10, 0, 0, 6)));
    }

    #[test]
    fn include_accepts_only_the_list() {
        let mut filter = MembershipFilter::new();
        filter.join(group("232.1.1.1"));
        let delta = filter.update_sources(group("232.1.1.1"), FilterMode::Include, sources(&[[10, 0, 0, 5]])).unwrap();
        assert_eq!(delta.record_type, GroupRecordType::ChangeToIncludeMode);
        assert_eq!(delta.sources, sources(&[[10, 0, 0, 5]]));
        assert!(filter.should_accept(group("232.1.1.1"), Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!filter.should_accept(group("232.1.1.1"), Ipv4Addr::new(10, 0, 0, 6)));

        assert!(filter.update_sources(group("232.1.1.1"), FilterMode::Include, sources(&[[10, 0, 0, 5]])).is_none());
    }

    #[test]
    fn include_empty_is_a_leave() {
        let mut filter = MembershipFilter::new();
        filter.update_sources(group("232.1.1.1"), FilterMode::Include, sources(&[[10, 0, 0, 5]]));
        let delta = filter.update_sources(group("232.1.1.1"), FilterMode::Include, SourceSet::new()).unwrap();
        assert_eq!(delta.record_type, GroupRecordType::ChangeToIncludeMode);
        assert!(filter.state(group("232.1.1.1")).is_none());
    }

    #[test]
    fn groups_are_independent() {
        let mut filter = MembershipFilter::new();
        filter.join(group("230.1.2.3"));
        filter.join(group("230.1.2.4"));
        filter.leave(group("230.1.2.3"));
        assert!(!filter.should_accept(group("230.1.2.3"), Ipv4Addr::new(10, 0, 0, 5)));
        assert!(filter.should_accept(group("230.1.2.4"), Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn reserved_groups_are_never_reported() {
        let mut filter = MembershipFilter::new();
        assert!(filter.join(crate::addr::ALL_SYSTEMS).is_none());
        assert!(filter.should_accept(crate::addr::ALL_SYSTEMS, Ipv4Addr::new(10, 0, 0, 1)));
        assert!(filter.leave(crate::addr::ALL_SYSTEMS).is_none());
        assert!(filter.join(crate::addr::ALL_V3_ROUTERS).is_none());
    }

    #[test]
    fn general_query_reports_all_groups() {
        let mut filter = MembershipFilter::new();
        filter.join(group("230.1.2.3"));
        filter.update_sources(group("232.1.1.1"), FilterMode::Include, sources(&[[10, 0, 0, 5]]));
        filter.join(crate::addr::ALL_SYSTEMS);

        let records = filter.current_state(&MembershipQuery::general(100, 2, 125));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].group, group("230.1.2.3"));
        assert_eq!(records[0].record_type, GroupRecordType::ModeIsExclude);
        assert_eq!(records[1].group, group("232.1.1.1"));
        assert_eq!(records[1].record_type, GroupRecordType::ModeIsInclude);
        assert_eq!(records[1].sources, sources(&[[10, 0, 0, 5]]));
    }

    #[test]
    fn group_specific_queries() {
        let mut filter = MembershipFilter::new();
        filter.join(group("230.1.2.3"));

        let mut query = MembershipQuery::general(100, 2, 125);
        query.group_address = Ipv4Addr::new(230, 1, 2, 3);
        let records = filter.current_state(&query);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, GroupRecordType::ModeIsExclude);

        query.group_address = Ipv4Addr::new(230, 9, 9, 9);
        assert!(filter.current_state(&query).is_empty());
    }

    #[test]
    fn group_and_source_specific_queries() {
        let mut filter = MembershipFilter::new();
        filter.update_sources(group("230.1.2.3"), FilterMode::Exclude, sources(&[[10, 0, 0, 5]]));
        filter.update_sources(group("232.1.1.1"), FilterMode::Include, sources(&[[10, 0, 0, 5], [10, 0, 0, 7]]));

        let mut query = MembershipQuery::general(100, 2, 125);
        query.group_address = Ipv4Addr::new(230, 1, 2, 3);
        query.source_addresses = vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)];
        let records = filter.current_state(&query);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, GroupRecordType::ModeIsInclude);
        assert_eq!(records[0].sources, sources(&[[10, 0, 0, 6]]));

        query.group_address = Ipv4Addr::new(232, 1, 1, 1);
        let records = filter.current_state(&query);
        assert_eq!(records[0].sources, sources(&[[10, 0, 0, 5]]));

        query.source_addresses = vec![Ipv4Addr::new(10, 0, 0, 9)];
        assert!(filter.current_state(&query).is_empty());
    }
}
