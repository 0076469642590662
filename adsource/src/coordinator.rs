use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ads::{AdCache, Advertisement};
use tracing::{debug, warn};

use crate::protocol::AdSource;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: attempt 1 waits one unit, attempt 2 waits two.
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    pub requests_issued: u64,
    pub retries: u64,
    pub degraded_settles: u64,
    pub forced_fetches: u64,
}

/// Single-flight fetch of the active-advertisement list.
///
/// Any number of callers may invoke `request_fetch` concurrently; the
/// cache's claim protocol guarantees at most one fetch cycle runs at a
/// time and everyone else returns immediately. Failures never surface to
/// callers: exhausted retries settle the cache to an empty list.
pub struct FetchCoordinator<A: AdSource> {
    source: A,
    cache: Arc<AdCache>,
    policy: RetryPolicy,
    requests_issued: AtomicU64,
    retries: AtomicU64,
    degraded_settles: AtomicU64,
    forced_fetches: AtomicU64,
}

impl<A: AdSource> FetchCoordinator<A> {
    pub fn new(source: A, cache: Arc<AdCache>) -> Self {
        Self::with_policy(source, cache, RetryPolicy::default())
    }

    pub fn with_policy(source: A, cache: Arc<AdCache>, policy: RetryPolicy) -> Self {
        Self {
            source,
            cache,
            policy,
            requests_issued: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            degraded_settles: AtomicU64::new(0),
            forced_fetches: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> Arc<AdCache> {
        self.cache.clone()
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            degraded_settles: self.degraded_settles.load(Ordering::Relaxed),
            forced_fetches: self.forced_fetches.load(Ordering::Relaxed),
        }
    }

    /// Fetch the list unless someone already did, is doing it right now,
    /// or it settled. No-op when the claim is lost.
    pub async fn request_fetch(&self) {
        if !self.cache.try_claim_fetch(false) {
            return;
        }
        self.run_cycle().await;
    }

    /// Refetch regardless of the settled state. When a cycle is already
    /// in flight the invalidation is queued and the running cycle re-runs
    /// after its commit.
    pub async fn force_fetch(&self) {
        self.forced_fetches.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate();
        if !self.cache.try_claim_fetch(true) {
            return;
        }
        self.run_cycle().await;
    }

    // Owns the in-flight guard on entry. Retries are sequential inside
    // the one owning cycle, so the last commit always wins.
    async fn run_cycle(&self) {
        loop {
            let list = self.fetch_with_retries().await;
            let rerun = self.cache.commit(list);
            if !rerun {
                return;
            }
            if !self.cache.try_claim_fetch(true) {
                return;
            }
            debug!("invalidation arrived mid-cycle, refetching");
        }
    }

    async fn fetch_with_retries(&self) -> Vec<Advertisement> {
        let mut attempt = 0u32;
        loop {
            self.requests_issued.fetch_add(1, Ordering::Relaxed);
            match self.source.fetch_active().await {
                Ok(list) => {
                    debug!(count = list.len(), "active advertisements fetched");
                    return list;
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    self.cache.mark_retry_scheduled(attempt);
                    warn!(attempt, error = %err, "advertisement fetch failed, backing off");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    self.cache.mark_fetching();
                }
                Err(err) => {
                    self.degraded_settles.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "advertisement fetch degraded to empty list");
                    return Vec::new();
                }
            }
        }
    }
}

impl<A: AdSource> std::fmt::Debug for FetchCoordinator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}
