//! Turns raw master server replies into region-grouped status

use chrono::{DateTime, Utc};
use log::debug;
use shared::{AggregatedStatus, HazelParser, MasterServerRecord, PacketParser, RegionGroup};
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct RecordAggregator<P = HazelParser> {
    parser: P,
}

impl RecordAggregator<HazelParser> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: PacketParser> RecordAggregator<P> {
    pub fn with_parser(parser: P) -> Self {
        Self { parser }
    }

    /// Records carried by one reply.
    ///
    /// Replies without a server list, or that fail to parse, contribute
    /// nothing rather than failing the cycle.
    pub fn records_from(&self, response: &[u8]) -> Vec<MasterServerRecord> {
        match self.parser.parse(response) {
            Ok(packet) => packet
                .server_list()
                .map(|servers| servers.iter().cloned().map(MasterServerRecord::from).collect())
                .unwrap_or_default(),
            Err(e) => {
                debug!("Ignoring malformed reply ({} bytes): {}", response.len(), e);
                Vec::new()
            }
        }
    }

    pub fn aggregate(&self, responses: &[Vec<u8>]) -> AggregatedStatus {
        let records = responses
            .iter()
            .flat_map(|response| self.records_from(response))
            .collect();
        group_records(records, Utc::now())
    }
}

/// Groups records by region in precedence order, each group sorted by name.
///
/// The sort is stable, so records sharing a name keep their input order.
pub fn group_records(
    records: Vec<MasterServerRecord>,
    computed_at: DateTime<Utc>,
) -> AggregatedStatus {
    let mut by_region: BTreeMap<_, Vec<MasterServerRecord>> = BTreeMap::new();
    for record in records {
        by_region.entry(record.region).or_default().push(record);
    }

    let groups = by_region
        .into_iter()
        .map(|(region, mut servers)| {
            servers.sort_by(|a, b| a.name.cmp(&b.name));
            RegionGroup { region, servers }
        })
        .collect();

    AggregatedStatus {
        groups,
        computed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::encode_reselect_server;
    use shared::{ParseError, ParsedPacket, Region, ServerEntry};
    use std::net::Ipv4Addr;

    fn entry(name: &str, connections: u32) -> ServerEntry {
        ServerEntry {
            name: name.to_string(),
            ip_address: Ipv4Addr::new(104, 237, 135, 186),
            port: 22023,
            number_of_connections: connections,
        }
    }

    fn record(name: &str, connections: u32) -> MasterServerRecord {
        MasterServerRecord::from(entry(name, connections))
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap()
    }

    #[test]
    fn test_groups_follow_region_precedence() {
        let status = group_records(
            vec![
                record("Europe-1", 3),
                record("Asia-1", 2),
                record("NA-1", 1),
            ],
            epoch(),
        );

        let regions: Vec<Region> = status.groups.iter().map(|g| g.region).collect();
        assert_eq!(regions, vec![Region::NorthAmerica, Region::Asia, Region::Europe]);
    }

    #[test]
    fn test_names_sorted_within_group() {
        let status = group_records(
            vec![
                record("US-West", 1),
                record("US-East", 2),
                record("Master-1", 3),
            ],
            epoch(),
        );

        assert_eq!(status.groups.len(), 1);
        let names: Vec<&str> = status.groups[0]
            .servers
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Master-1", "US-East", "US-West"]);
        for pair in status.groups[0].servers.windows(2) {
            assert!(pair[0].name <= pair[1].name);
        }
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let status = group_records(vec![record("Asia-1", 10), record("Asia-1", 20)], epoch());

        let servers = &status.groups[0].servers;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].number_of_connections, 10);
        assert_eq!(servers[1].number_of_connections, 20);
    }

    #[test]
    fn test_absent_regions_have_no_group() {
        let status = group_records(vec![record("Europe-1", 3)], epoch());
        assert_eq!(status.groups.len(), 1);
        assert!(status.group(Region::Asia).is_none());
        assert!(status.groups.iter().all(|g| !g.servers.is_empty()));

        let empty = group_records(Vec::new(), epoch());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let aggregator = RecordAggregator::new();
        let forward = vec![
            encode_reselect_server(&[entry("Europe-2", 5), entry("US-East", 9)]),
            encode_reselect_server(&[entry("Asia-1", 1), entry("Europe-1", 7)]),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let a = aggregator.aggregate(&forward);
        let b = aggregator.aggregate(&backward);
        assert_eq!(a.groups, b.groups);
        assert_eq!(a.server_count(), 4);
    }

    #[test]
    fn test_non_list_replies_contribute_nothing() {
        let aggregator = RecordAggregator::new();
        let responses = vec![
            Vec::new(),
            shared::REQUEST_PAYLOAD.to_vec(),
            vec![0xff, 0x00],
            encode_reselect_server(&[entry("Asia-1", 4)]),
        ];

        let status = aggregator.aggregate(&responses);
        assert_eq!(status.server_count(), 1);
        assert_eq!(status.groups[0].region, Region::Asia);
    }

    struct FixedParser(Vec<ServerEntry>);

    impl PacketParser for FixedParser {
        fn parse(&self, bytes: &[u8]) -> Result<ParsedPacket, ParseError> {
            if bytes.is_empty() {
                return Err(ParseError::Empty);
            }
            Ok(ParsedPacket::Normal {
                messages: vec![shared::protocol::Message::ReselectServer {
                    version: 0,
                    servers: self.0.clone(),
                }],
            })
        }
    }

    #[test]
    fn test_custom_parser_seam() {
        let aggregator = RecordAggregator::with_parser(FixedParser(vec![entry("US-1", 42)]));
        let status = aggregator.aggregate(&[vec![1], Vec::new(), vec![2]]);

        assert_eq!(status.server_count(), 2);
        assert_eq!(status.groups[0].region, Region::NorthAmerica);
    }
}
