use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod protocol;

pub use protocol::{HazelParser, PacketParser, ParseError, ParsedPacket, ServerEntry};

/// Hazel hello packet sent to every master server.
///
/// Send option `0x08`, nonce `1`, hazel version `0`, client version
/// `0x0302e24a` and the player name `"Innersroth"`. Master servers answer
/// it with a reselect-server message listing their regional servers.
pub const REQUEST_PAYLOAD: [u8; 19] = [
    0x08, 0x00, 0x01, 0x00, 0x4a, 0xe2, 0x02, 0x03, 0x0a, 0x49, 0x6e, 0x6e, 0x65, 0x72, 0x73, 0x72,
    0x6f, 0x74, 0x68,
];

pub const DEFAULT_MASTER_PORT: u16 = 22023;

pub const DEFAULT_ROSTER: [&str; 3] = [
    "104.237.135.186:22023",
    "139.162.111.196:22023",
    "172.105.251.170:22023",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint `{0}` is missing a port")]
    MissingPort(String),
    #[error("endpoint `{0}` has an empty host")]
    EmptyHost(String),
    #[error("endpoint `{0}` has an invalid port")]
    InvalidPort(String),
}

/// A master server address as configured, before name resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The three production master servers.
    pub fn default_roster() -> Vec<Endpoint> {
        DEFAULT_ROSTER
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;

        // IPv6 literals come bracketed: [::1]:22023
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;

        Ok(Endpoint::new(host, port))
    }
}

/// Geographic region a master server belongs to.
///
/// Ordering follows display precedence: North America first, then Asia,
/// then Europe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    NorthAmerica,
    Asia,
    Europe,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::NorthAmerica, Region::Asia, Region::Europe];

    /// Classifies a server by its name prefix
    pub fn from_server_name(name: &str) -> Self {
        if name.starts_with("Asia") {
            Region::Asia
        } else if name.starts_with("Europe") {
            Region::Europe
        } else {
            Region::NorthAmerica
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            Region::NorthAmerica => 1,
            Region::Asia => 2,
            Region::Europe => 3,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Region::NorthAmerica => "North America",
            Region::Asia => "Asia",
            Region::Europe => "Europe",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Region::NorthAmerica => "🌎",
            Region::Asia => "🌏",
            Region::Europe => "🌍",
        }
    }
}

impl Ord for Region {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

impl PartialOrd for Region {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One regional server as advertised by a master server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterServerRecord {
    pub region: Region,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub number_of_connections: u32,
}

impl From<ServerEntry> for MasterServerRecord {
    fn from(entry: ServerEntry) -> Self {
        Self {
            region: Region::from_server_name(&entry.name),
            ip_address: entry.ip_address.to_string(),
            port: entry.port,
            number_of_connections: entry.number_of_connections,
            name: entry.name,
        }
    }
}

/// Records of a single region, sorted by name. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGroup {
    pub region: Region,
    pub servers: Vec<MasterServerRecord>,
}

impl RegionGroup {
    pub fn total_connections(&self) -> u64 {
        self.servers
            .iter()
            .map(|s| u64::from(s.number_of_connections))
            .sum()
    }
}

/// Region groups in precedence order plus the time they were computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStatus {
    pub groups: Vec<RegionGroup>,
    pub computed_at: DateTime<Utc>,
}

impl AggregatedStatus {
    pub fn group(&self, region: Region) -> Option<&RegionGroup> {
        self.groups.iter().find(|g| g.region == region)
    }

    pub fn server_count(&self) -> usize {
        self.groups.iter().map(|g| g.servers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
