//! Slot assignment.
//!
//! Deterministic partition of the shared advertisement list across all
//! registered banner instances: contiguous chunks in registration order,
//! at most `MAX_SLOT_SIZE` ads per instance, never overlapping. Once the
//! list is exhausted, later instances receive empty slices; non-overlap
//! takes priority over full coverage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ads::{Advertisement, SharedAdList};
use tokio::sync::broadcast;

/// Maximum number of ads one banner instance may display.
pub const MAX_SLOT_SIZE: usize = 5;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Assignment change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
	/// All slices were recomputed; readers should re-read their slice.
	Reassigned,
}

#[derive(Debug)]
struct AssignerInner {
	/// Instance ids in registration (mount) order.
	order: Vec<String>,
	slices: HashMap<String, SharedAdList>,
	last_list: SharedAdList,
}

/// Partitions the current advertisement list across registered banner
/// instances.
///
/// Recomputation is full, not incremental: both the instance count and
/// the list size are small, so correctness wins over micro-optimization.
#[derive(Debug)]
pub struct SlotAssigner {
	inner: Mutex<AssignerInner>,
	notify: broadcast::Sender<SlotEvent>,
	slot_size: usize,
}

impl Default for SlotAssigner {
	fn default() -> Self {
		Self::new()
	}
}

impl SlotAssigner {
	pub fn new() -> Self {
		Self::with_slot_size(MAX_SLOT_SIZE)
	}

	/// Create an assigner with a custom per-instance slice bound.
	pub fn with_slot_size(slot_size: usize) -> Self {
		let (notify, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
		Self {
			inner: Mutex::new(AssignerInner {
				order: Vec::new(),
				slices: HashMap::new(),
				last_list: Arc::new(Vec::new()),
			}),
			notify,
			slot_size: slot_size.max(1),
		}
	}

	/// Register an instance at the end of the mount order and recompute
	/// all slices. Re-registering an existing id keeps its position.
	pub fn register(&self, instance_id: impl Into<String>) {
		let instance_id = instance_id.into();
		let mut inner = self.inner.lock().expect("slot assigner lock poisoned");
		if !inner.order.iter().any(|id| id == &instance_id) {
			inner.order.push(instance_id);
			self.recompute_locked(&mut inner);
		}
	}

	/// Remove an instance and recompute slices for the remaining ones.
	/// Returns whether the id was registered; unknown ids are ignored.
	pub fn unregister(&self, instance_id: &str) -> bool {
		let mut inner = self.inner.lock().expect("slot assigner lock poisoned");
		let before = inner.order.len();
		inner.order.retain(|id| id != instance_id);
		if inner.order.len() == before {
			return false;
		}
		inner.slices.remove(instance_id);
		self.recompute_locked(&mut inner);
		true
	}

	/// Replace the advertisement list and recompute all slices.
	pub fn reassign(&self, list: SharedAdList) {
		let mut inner = self.inner.lock().expect("slot assigner lock poisoned");
		inner.last_list = list;
		self.recompute_locked(&mut inner);
	}

	/// Current slice for an instance; empty for unknown ids.
	pub fn slice_for(&self, instance_id: &str) -> Vec<Advertisement> {
		let inner = self.inner.lock().expect("slot assigner lock poisoned");
		inner
			.slices
			.get(instance_id)
			.map(|slice| slice.as_ref().clone())
			.unwrap_or_default()
	}

	/// Number of currently registered instances.
	pub fn instance_count(&self) -> usize {
		self.inner
			.lock()
			.expect("slot assigner lock poisoned")
			.order
			.len()
	}

	/// Registered instance ids in mount order.
	pub fn registered_ids(&self) -> Vec<String> {
		self.inner
			.lock()
			.expect("slot assigner lock poisoned")
			.order
			.clone()
	}

	/// Subscribe to assignment change notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<SlotEvent> {
		self.notify.subscribe()
	}

	fn recompute_locked(&self, inner: &mut AssignerInner) {
		let spans = chunk_spans(inner.last_list.len(), inner.order.len(), self.slot_size);
		inner.slices.clear();
		for (instance_id, (start, end)) in inner.order.iter().zip(spans) {
			let slice: Vec<Advertisement> = inner.last_list[start..end].to_vec();
			inner.slices.insert(instance_id.clone(), Arc::new(slice));
		}
		tracing::debug!(
			instances = inner.order.len(),
			ads = inner.last_list.len(),
			"slot assignments recomputed"
		);
		let _ = self.notify.send(SlotEvent::Reassigned);
	}
}

/// Contiguous chunk boundaries: instance `k` covers
/// `[k * slot_size, min((k + 1) * slot_size, len))`, and every instance
/// past the end of the list gets an empty span.
pub fn chunk_spans(len: usize, instances: usize, slot_size: usize) -> Vec<(usize, usize)> {
	let mut spans = Vec::with_capacity(instances);
	let mut cursor = 0usize;
	for _ in 0..instances {
		let end = (cursor + slot_size).min(len);
		spans.push((cursor, end));
		cursor = end;
	}
	spans
}

#[cfg(test)]
mod tests {
	use super::{chunk_spans, MAX_SLOT_SIZE};

	#[test]
	fn spans_are_contiguous_and_bounded() {
		let spans = chunk_spans(12, 3, MAX_SLOT_SIZE);
		assert_eq!(spans, vec![(0, 5), (5, 10), (10, 12)]);
	}

	#[test]
	fn exhausted_list_leaves_trailing_instances_empty() {
		let spans = chunk_spans(7, 4, MAX_SLOT_SIZE);
		assert_eq!(spans, vec![(0, 5), (5, 7), (7, 7), (7, 7)]);
	}

	#[test]
	fn empty_list_leaves_every_instance_empty() {
		let spans = chunk_spans(0, 3, MAX_SLOT_SIZE);
		assert_eq!(spans, vec![(0, 0), (0, 0), (0, 0)]);
	}

	#[test]
	fn no_instances_yields_no_spans() {
		assert!(chunk_spans(12, 0, MAX_SLOT_SIZE).is_empty());
	}

	#[test]
	fn unregister_reports_whether_the_id_was_registered() {
		let assigner = super::SlotAssigner::new();
		assigner.register("a");

		assert!(assigner.unregister("a"));
		assert!(!assigner.unregister("a"));
		assert!(!assigner.unregister("never-mounted"));
	}

	#[test]
	fn spans_never_overlap_and_never_exceed_slot_size() {
		for len in 0..40usize {
			for instances in 0..8usize {
				let spans = chunk_spans(len, instances, MAX_SLOT_SIZE);
				let mut previous_end = 0usize;
				for (start, end) in spans {
					assert!(start >= previous_end);
					assert!(end - start <= MAX_SLOT_SIZE);
					assert!(end <= len);
					previous_end = end;
				}
			}
		}
	}
}
