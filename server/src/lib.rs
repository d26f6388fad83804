//! # Master Server Status Service
//!
//! Reports live player counts for the game's master servers. The servers are
//! only reachable over Hazel/UDP, so every status refresh is a small burst of
//! UDP exchanges whose replies get merged into one region-grouped view.
//!
//! ## Pipeline
//!
//! ```text
//! http / probe ──> StatusCache ──(miss)──> StatusPipeline
//!                                             │
//!                     StatusFetcher ──> N x UdpTransaction
//!                                             │
//!                     RecordAggregator <──────┘
//! ```
//!
//! ### Transactions (`transaction`)
//! One socket, one request, one reply. Every exchange carries a deadline and
//! the socket is released however the exchange ends.
//!
//! ### Fan-out (`fetcher`)
//! One transaction per configured master server, all running at once. By
//! default a single failed server fails the whole refresh; the
//! `PartialResults` policy aggregates whatever answered instead.
//!
//! ### Aggregation (`aggregator`)
//! Parses each reply, classifies servers by region and orders the result:
//! North America, then Asia, then Europe, servers sorted by name.
//!
//! ### Caching (`cache`)
//! A TTL cache whose refreshes are single-flight. Concurrent callers that
//! find the entry stale share one refresh instead of each querying the
//! master servers.
//!
//! ### Presentation (`render`, `http`)
//! HTML index page, chat-embed JSON and a raw JSON status document served
//! over HTTP/1.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use status_server::cache::StatusCache;
//! use status_server::fetcher::{FailurePolicy, StatusFetcher};
//! use status_server::pipeline::StatusPipeline;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = StatusPipeline::new(StatusFetcher::with_defaults(), FailurePolicy::FailFast);
//!     let cache = StatusCache::new(Arc::new(pipeline), Duration::from_secs(300));
//!
//!     let status = cache.get_status().await?;
//!     for group in &status.groups {
//!         println!("{}: {} players", group.region, group.total_connections());
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod pipeline;
pub mod render;
pub mod transaction;

pub use cache::StatusCache;
pub use error::StatusError;
