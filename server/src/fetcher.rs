//! Parallel fan-out over the master server roster

use crate::error::StatusError;
use crate::transaction::UdpTransaction;
use log::{debug, error, warn};
use shared::Endpoint;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};

/// Per-endpoint budget covering name resolution and the UDP exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// What a fetch cycle does when some endpoints fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Any failed endpoint fails the whole cycle
    #[default]
    FailFast,
    /// Use whichever endpoints answered; fail only if none did
    PartialResults,
}

/// Queries every master server in the roster at once
#[derive(Debug, Clone)]
pub struct StatusFetcher {
    roster: Vec<Endpoint>,
    payload: Arc<[u8]>,
    bind_ip: IpAddr,
    timeout: Duration,
}

impl StatusFetcher {
    /// Creates a fetcher sending `payload` to each endpoint of `roster`.
    ///
    /// Sockets bind to `bind_ip`; a wildcard follows each remote's address
    /// family. `timeout` bounds each endpoint separately.
    pub fn new(
        roster: Vec<Endpoint>,
        payload: impl Into<Arc<[u8]>>,
        bind_ip: IpAddr,
        timeout: Duration,
    ) -> Self {
        Self {
            roster,
            payload: payload.into(),
            bind_ip,
            timeout,
        }
    }

    /// Default roster and hello payload, bound to the IPv4 wildcard
    pub fn with_defaults() -> Self {
        Self::new(
            Endpoint::default_roster(),
            &shared::REQUEST_PAYLOAD[..],
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            DEFAULT_TIMEOUT,
        )
    }

    /// Endpoints queried on every fetch, in result order
    pub fn roster(&self) -> &[Endpoint] {
        &self.roster
    }

    /// Budget for one endpoint, resolution included
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one transaction per endpoint concurrently and waits for all.
    ///
    /// Results line up with the roster order regardless of completion order.
    /// Dropping the returned future aborts every transaction still running.
    pub async fn fetch_all(&self) -> Vec<Result<Vec<u8>, StatusError>> {
        let mut tasks = JoinSet::new();

        // One task per endpoint
        for (index, endpoint) in self.roster.iter().cloned().enumerate() {
            let payload = Arc::clone(&self.payload);
            let bind_addr = SocketAddr::new(self.bind_ip, 0);
            let deadline = self.timeout;

            tasks.spawn(async move {
                let resolve = UdpTransaction::resolve(&endpoint, bind_addr, payload);
                let result = query_within(&endpoint, deadline, resolve).await;
                (index, result)
            });
        }
        debug!("Querying {} master servers", self.roster.len());

        // Slots keep roster order whatever order the tasks finish in
        let mut results: Vec<Option<Result<Vec<u8>, StatusError>>> =
            (0..self.roster.len()).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Transaction task failed: {}", e),
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(StatusError::RefreshAborted(
                        "transaction task did not finish".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Fetches every endpoint and applies `policy` to the outcome
    pub async fn fetch(&self, policy: FailurePolicy) -> Result<Vec<Vec<u8>>, StatusError> {
        let results = self.fetch_all().await;
        settle(&self.roster, results, policy)
    }
}

/// Resolves then exchanges, both inside one `deadline`.
///
/// A lookup that outlives the deadline fails as a timed out resolution; the
/// exchange only gets what is left of the budget.
async fn query_within<F>(
    endpoint: &Endpoint,
    deadline: Duration,
    resolve: F,
) -> Result<Vec<u8>, StatusError>
where
    F: Future<Output = Result<UdpTransaction, StatusError>>,
{
    let started = Instant::now();

    let transaction = match timeout(deadline, resolve).await {
        Ok(resolved) => resolved?,
        Err(_) => {
            debug!("Resolving {} took longer than {:?}", endpoint, deadline);
            return Err(StatusError::AddressResolution {
                endpoint: endpoint.clone(),
                source: Some(Arc::new(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "name lookup timed out",
                ))),
            });
        }
    };

    let remaining = deadline.saturating_sub(started.elapsed());
    transaction.execute(remaining).await
}

/// Collapses per-endpoint results into the responses to aggregate.
///
/// Failures are reported against the first failing endpoint in roster order.
pub fn settle(
    roster: &[Endpoint],
    results: Vec<Result<Vec<u8>, StatusError>>,
    policy: FailurePolicy,
) -> Result<Vec<Vec<u8>>, StatusError> {
    let mut responses = Vec::with_capacity(results.len());
    let mut first_failure = None;

    for (endpoint, result) in roster.iter().zip(results) {
        match result {
            Ok(bytes) => responses.push(bytes),
            Err(err) => {
                warn!("Master server {} failed: {}", endpoint, err.root_cause());
                if first_failure.is_none() {
                    first_failure = Some(StatusError::Aggregation {
                        endpoint: endpoint.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    match (policy, first_failure) {
        (_, None) => Ok(responses),
        (FailurePolicy::FailFast, Some(err)) => Err(err),
        (FailurePolicy::PartialResults, Some(err)) if responses.is_empty() => Err(err),
        (FailurePolicy::PartialResults, Some(_)) => Ok(responses),
    }
}
