//! Fetch-and-aggregate cycle behind the status cache

use crate::aggregator::RecordAggregator;
use crate::error::StatusError;
use crate::fetcher::{FailurePolicy, StatusFetcher};
use async_trait::async_trait;
use log::info;
use shared::{AggregatedStatus, HazelParser, PacketParser};
use std::time::Instant;

/// Produces a fresh aggregated status on demand
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn fetch_status(&self) -> Result<AggregatedStatus, StatusError>;
}

/// Fans out to the roster, then aggregates every reply
#[derive(Debug, Clone)]
pub struct StatusPipeline<P = HazelParser> {
    fetcher: StatusFetcher,
    aggregator: RecordAggregator<P>,
    policy: FailurePolicy,
}

impl StatusPipeline<HazelParser> {
    pub fn new(fetcher: StatusFetcher, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            aggregator: RecordAggregator::new(),
            policy,
        }
    }
}

impl<P: PacketParser> StatusPipeline<P> {
    pub fn with_aggregator(
        fetcher: StatusFetcher,
        aggregator: RecordAggregator<P>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            fetcher,
            aggregator,
            policy,
        }
    }

    pub fn fetcher(&self) -> &StatusFetcher {
        &self.fetcher
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn run(&self) -> Result<AggregatedStatus, StatusError> {
        let started = Instant::now();
        let responses = self.fetcher.fetch(self.policy).await?;
        let status = self.aggregator.aggregate(&responses);

        info!(
            "Refreshed status: {} servers in {} regions from {} replies ({:?})",
            status.server_count(),
            status.groups.len(),
            responses.len(),
            started.elapsed()
        );
        Ok(status)
    }
}

#[async_trait]
impl<P: PacketParser + 'static> StatusSource for StatusPipeline<P> {
    async fn fetch_status(&self) -> Result<AggregatedStatus, StatusError> {
        self.run().await
    }
}
