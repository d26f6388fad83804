//! Time-to-live cache with single-flight refresh
//!
//! The cache holds one entry. Callers that find it stale or missing either
//! start a refresh or, when one is already running, wait on that refresh's
//! shared result. At most one fetch cycle is in flight at any time, so the
//! master servers see at most one burst per TTL window however many callers
//! arrive.
//!
//! The refresh itself runs in a spawned task. It finishes and stores its
//! result even when every caller waiting on it has gone away. A panicking
//! source ends that refresh with `RefreshAborted` and frees the slot, so the
//! next caller starts over.

use crate::error::StatusError;
use crate::pipeline::StatusSource;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use parking_lot::Mutex;
use shared::AggregatedStatus;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// How long a computed status is served before refreshing
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

type Refresh = Shared<BoxFuture<'static, Result<AggregatedStatus, StatusError>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AggregatedStatus,
    computed_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.computed_at) < ttl
    }
}

#[derive(Default)]
struct CacheState {
    entry: Option<CacheEntry>,
    in_flight: Option<(u64, Refresh)>,
    next_generation: u64,
}

struct Inner {
    source: Arc<dyn StatusSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Inner {
    /// Stores a refresh outcome and releases the in-flight slot
    fn finish(&self, generation: u64, result: &Result<AggregatedStatus, StatusError>) {
        let mut state = self.state.lock();
        if matches!(state.in_flight, Some((g, _)) if g == generation) {
            state.in_flight = None;
        }

        match result {
            Ok(status) => {
                state.entry = Some(CacheEntry {
                    value: status.clone(),
                    computed_at: Instant::now(),
                });
            }
            Err(e) => warn!("Status refresh failed, keeping previous entry: {}", e),
        }
    }
}

/// Process-wide status cache handle. Clones share the same entry.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Inner>,
}

impl StatusCache {
    /// Creates an empty cache; the first `get_status` fetches from `source`
    pub fn new(source: Arc<dyn StatusSource>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Age after which the entry is refreshed
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Last successfully computed status, fresh or not. Never does I/O.
    pub fn peek(&self) -> Option<AggregatedStatus> {
        self.inner
            .state
            .lock()
            .entry
            .as_ref()
            .map(|entry| entry.value.clone())
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// `get_status_at` on the runtime clock
    pub async fn get_status(&self) -> Result<AggregatedStatus, StatusError> {
        self.get_status_at(Instant::now()).await
    }

    /// Serves the cached status if it is younger than the TTL at `now`,
    /// otherwise joins or starts a refresh.
    ///
    /// A failed refresh leaves the previous entry in place and hands the
    /// same error to every caller that waited on it.
    pub async fn get_status_at(&self, now: Instant) -> Result<AggregatedStatus, StatusError> {
        let refresh = {
            let mut state = self.inner.state.lock();

            // Fresh hit
            if let Some(entry) = &state.entry {
                if entry.is_fresh(now, self.inner.ttl) {
                    debug!("Status cache hit");
                    return Ok(entry.value.clone());
                }
            }

            match &state.in_flight {
                Some((_, refresh)) => {
                    debug!("Joining in-flight status refresh");
                    refresh.clone()
                }
                None => {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    debug!("Status cache miss, starting refresh {}", generation);

                    let refresh = self.start_refresh(generation);
                    state.in_flight = Some((generation, refresh.clone()));
                    refresh
                }
            }
        };

        refresh.await
    }

    fn start_refresh(&self, generation: u64) -> Refresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(inner.source.fetch_status())
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(StatusError::RefreshAborted(panic_message(&*panic))),
            };
            inner.finish(generation, &result);
            result
        });

        // Weak so the stored future does not keep the cache alive
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let err = StatusError::RefreshAborted(e.to_string());
                    if let Some(inner) = inner.upgrade() {
                        inner.finish(generation, &Err(err.clone()));
                    }
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "status source panicked".to_string()
    }
}
