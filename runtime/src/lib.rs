//! Banner coordination runtime.
//!
//! Wires the shared ad cache, the single-flight fetch coordinator, the
//! slot assigner and the realtime invalidator into one service the UI
//! layer registers banner instances against.

mod logging;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ads::{AdCache, Advertisement, CacheEvent, CacheMetrics};
use adsource::{AdSource, ChangeStream, FetchCoordinator, FetchStats, RetryPolicy};
use slots::{SlotAssigner, SlotEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use logging::init_logging;

/// Runtime knobs.
#[derive(Debug, Clone, Copy)]
pub struct BannerRuntimeConfig {
	pub retry: RetryPolicy,
	/// How often the invalidator polls its change stream when idle.
	pub change_poll_interval_ms: u64,
}

impl Default for BannerRuntimeConfig {
	fn default() -> Self {
		Self {
			retry: RetryPolicy::default(),
			change_poll_interval_ms: 250,
		}
	}
}

/// Coordinates every mounted banner instance in the process.
///
/// Registration returns an opaque instance id; the instance's slice is
/// read through [`BannerRuntime::slice_for`] and change notifications
/// come from [`BannerRuntime::subscribe_slots`]. The realtime
/// subscription is reference counted: acquired when the first instance
/// registers, released when the last one unregisters.
pub struct BannerRuntime<A: AdSource + 'static> {
	cache: Arc<AdCache>,
	coordinator: Arc<FetchCoordinator<A>>,
	assigner: Arc<SlotAssigner>,
	active: watch::Sender<usize>,
	next_instance: AtomicU64,
	reassign_task: JoinHandle<()>,
	invalidator_task: JoinHandle<()>,
}

impl<A: AdSource + 'static> BannerRuntime<A> {
	/// Spawn the runtime's background tasks. Must be called inside a
	/// tokio runtime.
	pub fn start<C>(source: A, stream: C, config: BannerRuntimeConfig) -> Self
	where
		C: ChangeStream + 'static,
	{
		let cache = Arc::new(AdCache::new());
		let coordinator = Arc::new(FetchCoordinator::with_policy(
			source,
			cache.clone(),
			config.retry,
		));
		let assigner = Arc::new(SlotAssigner::new());
		let (active, active_rx) = watch::channel(0usize);

		let reassign_task = {
			let cache = cache.clone();
			let assigner = assigner.clone();
			let mut events = cache.subscribe();
			tokio::spawn(async move {
				loop {
					match events.recv().await {
						Ok(CacheEvent::ListReplaced) => {
							assigner.reassign(cache.list());
						}
						// The old list stays assigned until the
						// refetch commits.
						Ok(CacheEvent::Invalidated) => {}
						Err(broadcast::error::RecvError::Lagged(_)) => {
							assigner.reassign(cache.list());
						}
						Err(broadcast::error::RecvError::Closed) => return,
					}
				}
			})
		};

		let invalidator_task = tokio::spawn(run_invalidator(
			stream,
			coordinator.clone(),
			active_rx,
			Duration::from_millis(config.change_poll_interval_ms.max(1)),
		));

		Self {
			cache,
			coordinator,
			assigner,
			active,
			next_instance: AtomicU64::new(0),
			reassign_task,
			invalidator_task,
		}
	}

	/// Register one mounted banner location and return its instance id.
	///
	/// The very first registration against a never-populated cache
	/// triggers the initial fetch; the claim inside the coordinator is
	/// what actually enforces single-flight, so racing registrations are
	/// harmless.
	pub fn register_banner(&self) -> String {
		let sequence = self.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
		let instance_id = format!("banner-{}", sequence);

		self.assigner.register(&instance_id);
		self.assigner.reassign(self.cache.list());
		self.active.send_modify(|count| *count += 1);

		let snapshot = self.cache.snapshot();
		if !snapshot.fetch_attempted()
			&& snapshot.list.is_empty()
			&& !snapshot.phase.in_flight()
		{
			let coordinator = self.coordinator.clone();
			tokio::spawn(async move { coordinator.request_fetch().await });
		}

		debug!(instance_id = %instance_id, "banner instance registered");
		instance_id
	}

	/// Unregister a banner instance; remaining instances are reassigned.
	/// Repeated unregistration of the same id is a no-op: the refcount
	/// only drops when the registry actually removed the instance, so a
	/// double unmount cannot release the subscription out from under the
	/// surviving banners.
	pub fn unregister_banner(&self, instance_id: &str) {
		if !self.assigner.unregister(instance_id) {
			return;
		}
		self.active.send_modify(|count| *count = count.saturating_sub(1));
		debug!(instance_id = %instance_id, "banner instance unregistered");
	}

	/// Current slice for an instance; empty for unknown ids.
	pub fn slice_for(&self, instance_id: &str) -> Vec<Advertisement> {
		self.assigner.slice_for(instance_id)
	}

	/// Subscribe to slot reassignment notifications.
	pub fn subscribe_slots(&self) -> broadcast::Receiver<SlotEvent> {
		self.assigner.subscribe()
	}

	pub fn instance_count(&self) -> usize {
		self.assigner.instance_count()
	}

	pub fn fetch_stats(&self) -> FetchStats {
		self.coordinator.stats()
	}

	pub fn cache_metrics(&self) -> CacheMetrics {
		self.cache.metrics()
	}

	pub fn cache(&self) -> Arc<AdCache> {
		self.cache.clone()
	}

	/// Stop the background tasks. In-flight fetches spawned by the
	/// invalidator are detached and run to completion regardless.
	pub fn shutdown(&self) {
		self.reassign_task.abort();
		self.invalidator_task.abort();
	}
}

impl<A: AdSource + 'static> Drop for BannerRuntime<A> {
	fn drop(&mut self) {
		self.shutdown();
	}
}

/// Owns the realtime change stream for the whole process.
///
/// The stream is connected while at least one banner instance is
/// registered and disconnected when the count returns to zero; connect is
/// idempotent, so the subscription can be re-acquired any number of
/// times. Relevant events force a refetch through the coordinator on a
/// detached task, so tearing the subscription down never cancels a fetch
/// already in flight.
async fn run_invalidator<A, C>(
	mut stream: C,
	coordinator: Arc<FetchCoordinator<A>>,
	mut active: watch::Receiver<usize>,
	poll_interval: Duration,
) where
	A: AdSource + 'static,
	C: ChangeStream,
{
	let mut connected = false;
	loop {
		let active_now = *active.borrow_and_update() > 0;
		if !active_now {
			if connected {
				if let Err(error) = stream.disconnect() {
					warn!(%error, "realtime change stream disconnect failed");
				}
				connected = false;
				info!("realtime subscription released");
			}
			if active.changed().await.is_err() {
				return;
			}
			continue;
		}

		if !connected {
			match stream.connect() {
				Ok(()) => {
					connected = true;
					info!("realtime subscription acquired");
				}
				Err(error) => {
					warn!(%error, "realtime change stream connect failed");
					tokio::time::sleep(poll_interval).await;
					continue;
				}
			}
		}

		match stream.poll_event() {
			Ok(Some(event)) if event.is_relevant() => {
				debug!(table = %event.table, "relevant change event, forcing refetch");
				let coordinator = coordinator.clone();
				tokio::spawn(async move { coordinator.force_fetch().await });
			}
			Ok(Some(_)) => {}
			Ok(None) => {
				if stream.heartbeat().is_err() {
					connected = false;
					continue;
				}
				tokio::select! {
					_ = tokio::time::sleep(poll_interval) => {}
					changed = active.changed() => {
						if changed.is_err() {
							return;
						}
					}
				}
			}
			Err(error) => {
				warn!(%error, "realtime change stream poll failed");
				connected = false;
				tokio::time::sleep(poll_interval).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use adsource::{MockAdSource, MockChangeStream};

	use super::{BannerRuntime, BannerRuntimeConfig};

	fn test_config() -> BannerRuntimeConfig {
		BannerRuntimeConfig {
			retry: adsource::RetryPolicy {
				base_delay_ms: 5,
				max_retries: 2,
			},
			change_poll_interval_ms: 10,
		}
	}

	async fn wait_until(deadline_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
		let rounds = (deadline_ms / 5).max(1);
		for _ in 0..rounds {
			if condition() {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		condition()
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn subscription_is_reference_counted() {
		let (stream, handle) = MockChangeStream::channel();
		let runtime = BannerRuntime::start(
			MockAdSource::returning(Vec::new()),
			stream,
			test_config(),
		);

		let first = runtime.register_banner();
		let second = runtime.register_banner();
		assert!(wait_until(500, || handle.connect_count() == 1).await);

		runtime.unregister_banner(&first);
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(handle.disconnect_count(), 0);

		runtime.unregister_banner(&second);
		assert!(wait_until(500, || handle.disconnect_count() == 1).await);

		// Re-acquiring after a full release works.
		let _third = runtime.register_banner();
		assert!(wait_until(500, || handle.connect_count() == 2).await);

		runtime.shutdown();
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn double_unregister_keeps_the_subscription_for_survivors() {
		let (stream, handle) = MockChangeStream::channel();
		let runtime = BannerRuntime::start(
			MockAdSource::returning(Vec::new()),
			stream,
			test_config(),
		);

		let first = runtime.register_banner();
		let _second = runtime.register_banner();
		assert!(wait_until(500, || handle.connect_count() == 1).await);

		// A component unmount that fires its cleanup twice.
		runtime.unregister_banner(&first);
		runtime.unregister_banner(&first);
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert_eq!(runtime.instance_count(), 1);
		assert_eq!(handle.disconnect_count(), 0);

		runtime.shutdown();
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn dropping_the_runtime_stops_its_background_tasks() {
		let (stream, _handle) = MockChangeStream::channel();
		let runtime = BannerRuntime::start(
			MockAdSource::returning(Vec::new()),
			stream,
			test_config(),
		);
		let weak = std::sync::Arc::downgrade(&runtime.cache());

		drop(runtime);

		// The reassign task held the cache; an aborted task releases it.
		assert!(wait_until(500, || weak.upgrade().is_none()).await);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn instance_ids_are_unique_and_ordered() {
		let (stream, _handle) = MockChangeStream::channel();
		let runtime = BannerRuntime::start(
			MockAdSource::returning(Vec::new()),
			stream,
			test_config(),
		);

		let a = runtime.register_banner();
		let b = runtime.register_banner();
		assert_ne!(a, b);
		assert_eq!(runtime.instance_count(), 2);

		runtime.shutdown();
	}
}
