//! Shared fetch-state cache.
//!
//! Single writable location for the advertisement list and its fetch
//! lifecycle. Reads are snapshot reads, a commit replaces the whole list,
//! and every state change is broadcast so slot assignments can be
//! recomputed by whoever owns them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::{Advertisement, SharedAdList};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Fetch lifecycle phases.
///
/// Exactly one fetch cycle may own the in-flight guard at a time; the
/// guard is claimed and released only through [`AdCache`] methods, each a
/// single locked transition with no await inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
	/// No fetch attempted since construction or the last invalidation.
	Idle,
	/// A fetch cycle owns the in-flight guard and has a request out.
	Fetching,
	/// The owning cycle is waiting out a backoff delay before `attempt`.
	RetryScheduled { attempt: u32 },
	/// A fetch cycle ran to completion, successfully or by exhausting
	/// its retries. Not retried again until invalidated.
	Settled,
}

impl FetchPhase {
	/// True while a fetch cycle owns the in-flight guard.
	pub fn in_flight(&self) -> bool {
		matches!(self, FetchPhase::Fetching | FetchPhase::RetryScheduled { .. })
	}
}

/// Cache change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
	/// The advertisement list was wholesale-replaced.
	ListReplaced,
	/// The settled state was invalidated; a refetch is expected. The old
	/// list stays readable until the refetch commits.
	Invalidated,
}

/// Read-only view of the cache at one point in time.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
	pub list: SharedAdList,
	pub phase: FetchPhase,
}

impl CacheSnapshot {
	/// True once a fetch cycle has run to completion. Empty results
	/// settle too, so they are not refetched forever.
	pub fn fetch_attempted(&self) -> bool {
		self.phase == FetchPhase::Settled
	}
}

/// Cache metrics snapshot.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
	/// Committed list replacements.
	pub commits: u64,
	/// Invalidations accepted (settled state cleared or queued against a
	/// running cycle).
	pub invalidations: u64,
	/// Current change-notification subscribers.
	pub subscribers: usize,
}

#[derive(Debug)]
struct CacheInner {
	list: SharedAdList,
	phase: FetchPhase,
	pending_invalidation: bool,
}

/// Process-wide store for the last fetched advertisement list.
///
/// Constructible service rather than an ambient global: every test can
/// build an isolated instance.
#[derive(Debug)]
pub struct AdCache {
	inner: Mutex<CacheInner>,
	notify: broadcast::Sender<CacheEvent>,
	commits: AtomicU64,
	invalidations: AtomicU64,
}

impl Default for AdCache {
	fn default() -> Self {
		Self::new()
	}
}

impl AdCache {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
	}

	/// Create a cache with a custom notification channel capacity.
	pub fn with_capacity(channel_capacity: usize) -> Self {
		let (notify, _) = broadcast::channel(channel_capacity.max(1));
		Self {
			inner: Mutex::new(CacheInner {
				list: Arc::new(Vec::new()),
				phase: FetchPhase::Idle,
				pending_invalidation: false,
			}),
			notify,
			commits: AtomicU64::new(0),
			invalidations: AtomicU64::new(0),
		}
	}

	/// Current snapshot of list and phase.
	pub fn snapshot(&self) -> CacheSnapshot {
		let inner = self.inner.lock().expect("ad cache lock poisoned");
		CacheSnapshot {
			list: inner.list.clone(),
			phase: inner.phase,
		}
	}

	/// Current advertisement list.
	pub fn list(&self) -> SharedAdList {
		self.inner
			.lock()
			.expect("ad cache lock poisoned")
			.list
			.clone()
	}

	/// Atomically claim the in-flight guard for one fetch cycle.
	///
	/// An unforced claim wins only when nothing was ever fetched: phase
	/// `Idle` and an empty list. A forced claim wins whenever no cycle is
	/// in flight; forcing against a running cycle queues a pending
	/// invalidation instead, which the running cycle picks up on commit.
	pub fn try_claim_fetch(&self, forced: bool) -> bool {
		let mut inner = self.inner.lock().expect("ad cache lock poisoned");
		match inner.phase {
			FetchPhase::Fetching | FetchPhase::RetryScheduled { .. } => {
				if forced {
					inner.pending_invalidation = true;
				}
				false
			}
			FetchPhase::Idle => {
				if forced || inner.list.is_empty() {
					inner.phase = FetchPhase::Fetching;
					true
				} else {
					false
				}
			}
			FetchPhase::Settled => {
				if forced {
					inner.phase = FetchPhase::Fetching;
					true
				} else {
					false
				}
			}
		}
	}

	/// Record that the owning cycle scheduled retry `attempt`.
	pub fn mark_retry_scheduled(&self, attempt: u32) {
		let mut inner = self.inner.lock().expect("ad cache lock poisoned");
		if inner.phase.in_flight() {
			inner.phase = FetchPhase::RetryScheduled { attempt };
		}
	}

	/// Record that the owning cycle issued its next request.
	pub fn mark_fetching(&self) {
		let mut inner = self.inner.lock().expect("ad cache lock poisoned");
		if inner.phase.in_flight() {
			inner.phase = FetchPhase::Fetching;
		}
	}

	/// Wholesale-replace the list and settle the cycle.
	///
	/// Returns true when an invalidation arrived while the cycle was in
	/// flight (and clears it), in which case the caller is expected to
	/// immediately claim and run another cycle.
	pub fn commit(&self, list: Vec<Advertisement>) -> bool {
		let pending = {
			let mut inner = self.inner.lock().expect("ad cache lock poisoned");
			inner.list = Arc::new(list);
			inner.phase = FetchPhase::Settled;
			std::mem::take(&mut inner.pending_invalidation)
		};
		self.commits.fetch_add(1, Ordering::Relaxed);
		let _ = self.notify.send(CacheEvent::ListReplaced);
		tracing::debug!(pending_invalidation = pending, "advertisement list committed");
		pending
	}

	/// Clear the settled state so the next claim refetches.
	///
	/// The list is retained until the refetch commits, so readers keep
	/// displaying the previous ads instead of flashing empty.
	pub fn invalidate(&self) {
		{
			let mut inner = self.inner.lock().expect("ad cache lock poisoned");
			if inner.phase == FetchPhase::Settled {
				inner.phase = FetchPhase::Idle;
			}
		}
		self.invalidations.fetch_add(1, Ordering::Relaxed);
		let _ = self.notify.send(CacheEvent::Invalidated);
	}

	/// Subscribe to cache change notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
		self.notify.subscribe()
	}

	/// Current metrics snapshot.
	pub fn metrics(&self) -> CacheMetrics {
		CacheMetrics {
			commits: self.commits.load(Ordering::Relaxed),
			invalidations: self.invalidations.load(Ordering::Relaxed),
			subscribers: self.notify.receiver_count(),
		}
	}
}
