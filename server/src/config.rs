//! Command line and environment configuration

use crate::cache::DEFAULT_TTL;
use crate::fetcher::{FailurePolicy, StatusFetcher};
use crate::pipeline::StatusPipeline;
use crate::render::{EmbedConfig, DEFAULT_EMBED_TITLE, DEFAULT_EMBED_URL};
use clap::Parser;
use shared::Endpoint;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one master server endpoint is required")]
    EmptyRoster,
    #[error("transaction timeout must be greater than zero")]
    ZeroTimeout,
}

/// Options shared by everything that queries the master servers
#[derive(clap::Args, Debug, Clone)]
pub struct QueryArgs {
    /// Master server to query as host:port; repeat or comma separate
    #[arg(
        short,
        long = "endpoint",
        env = "STATUS_ENDPOINTS",
        value_delimiter = ',',
        default_values_t = Endpoint::default_roster()
    )]
    pub endpoints: Vec<Endpoint>,

    /// Per-server reply timeout in milliseconds
    #[arg(long, env = "STATUS_TIMEOUT_MS", default_value_t = 3000)]
    pub timeout_ms: u64,

    /// Local address UDP queries are sent from; the wildcard follows each remote's family
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_host: IpAddr,

    /// Aggregate whichever servers answered instead of failing the refresh
    #[arg(long)]
    pub partial_results: bool,
}

impl QueryArgs {
    pub fn policy(&self) -> FailurePolicy {
        if self.partial_results {
            FailurePolicy::PartialResults
        } else {
            FailurePolicy::FailFast
        }
    }

    pub fn fetcher(&self) -> Result<StatusFetcher, ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(StatusFetcher::new(
            self.endpoints.clone(),
            &shared::REQUEST_PAYLOAD[..],
            self.bind_host,
            Duration::from_millis(self.timeout_ms),
        ))
    }

    pub fn pipeline(&self) -> Result<StatusPipeline, ConfigError> {
        Ok(StatusPipeline::new(self.fetcher()?, self.policy()))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Serves live player counts of the game master servers")]
pub struct ServerArgs {
    /// HTTP address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Seconds a fetched status is served before refreshing
    #[arg(long, env = "STATUS_TTL_SECS", default_value_t = DEFAULT_TTL.as_secs())]
    pub ttl_secs: u64,

    /// Title of the chat embed
    #[arg(long, default_value = DEFAULT_EMBED_TITLE)]
    pub embed_title: String,

    /// Link of the chat embed
    #[arg(long, default_value = DEFAULT_EMBED_URL)]
    pub embed_url: String,

    #[command(flatten)]
    pub query: QueryArgs,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn embed(&self) -> EmbedConfig {
        EmbedConfig {
            title: self.embed_title.clone(),
            url: self.embed_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ServerArgs::try_parse_from(["status-server", "--port", "9000"]).unwrap();

        assert_eq!(args.listen_addr().port(), 9000);
        assert_eq!(args.query.endpoints, Endpoint::default_roster());
        assert_eq!(args.query.timeout_ms, 3000);
        assert_eq!(args.query.policy(), FailurePolicy::FailFast);
        assert_eq!(args.embed(), EmbedConfig::default());
    }

    #[test]
    fn test_custom_roster_and_policy() {
        let args = ServerArgs::try_parse_from([
            "status-server",
            "--endpoint",
            "127.0.0.1:4000,127.0.0.1:4001",
            "-e",
            "[::1]:4002",
            "--partial-results",
            "--ttl-secs",
            "60",
        ])
        .unwrap();

        assert_eq!(args.query.endpoints.len(), 3);
        assert_eq!(args.query.endpoints[2], Endpoint::new("::1", 4002));
        assert_eq!(args.query.policy(), FailurePolicy::PartialResults);
        assert_eq!(args.ttl(), Duration::from_secs(60));

        let fetcher = args.query.fetcher().unwrap();
        assert_eq!(fetcher.roster().len(), 3);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = ServerArgs::try_parse_from(["status-server", "--endpoint", "nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fetcher_validation() {
        let mut query = ServerArgs::try_parse_from(["status-server"]).unwrap().query;

        query.timeout_ms = 0;
        assert_eq!(query.fetcher().unwrap_err(), ConfigError::ZeroTimeout);

        query.timeout_ms = 100;
        query.endpoints.clear();
        assert_eq!(query.fetcher().unwrap_err(), ConfigError::EmptyRoster);
    }
}
