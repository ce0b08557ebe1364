use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Stable identifier of one worker context within a registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl From<u64> for WorkerId {
	fn from(raw: u64) -> Self {
		Self(raw)
	}
}

impl fmt::Display for WorkerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Issues worker ids.
///
/// Preload reserves `0..n` up front so ids equal manifest positions. Every
/// later id is strictly greater than any id issued or observed before it.
/// Freed ids only become reusable through [`IdAllocator::compact`].
#[derive(Debug, Default)]
pub struct IdAllocator {
	next: AtomicU64,
}

impl IdAllocator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reserves ids `0..count` in one step.
	///
	/// Returns `None` once any id has been issued, since the manifest
	/// positions could then collide with a live worker.
	pub fn reserve_sequential(&self, count: u64) -> Option<Vec<WorkerId>> {
		if count == 0 {
			return (self.next.load(Ordering::Acquire) == 0).then(Vec::new);
		}
		self.next
			.compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| (0..count).map(WorkerId).collect())
	}

	/// Returns the next id, strictly greater than every id issued so far.
	pub fn reserve_next(&self) -> WorkerId {
		WorkerId(self.next.fetch_add(1, Ordering::AcqRel))
	}

	/// Records an explicitly chosen id so later reservations skip past it.
	pub fn observe(&self, id: WorkerId) {
		self.next.fetch_max(id.0.saturating_add(1), Ordering::AcqRel);
	}

	/// Rewinds the counter to one past `highest_live`, or to zero when nothing
	/// is live. Ids above the highest live id become reusable.
	///
	/// Callers must serialize this against reservations.
	pub fn compact(&self, highest_live: Option<WorkerId>) -> WorkerId {
		let next = highest_live.map_or(0, |id| id.0.saturating_add(1));
		self.next.store(next, Ordering::Release);
		WorkerId(next)
	}

	/// Returns the id the next [`Self::reserve_next`] call would hand out.
	pub fn peek_next(&self) -> WorkerId {
		WorkerId(self.next.load(Ordering::Acquire))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;
	use std::sync::Arc;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn sequential_reservation_matches_positions() {
		let ids = IdAllocator::new();
		let reserved = ids.reserve_sequential(3).expect("fresh allocator accepts preload");
		assert_eq!(reserved, vec![WorkerId(0), WorkerId(1), WorkerId(2)]);
		assert_eq!(ids.reserve_next(), WorkerId(3));
	}

	#[test]
	fn sequential_reservation_rejected_after_issue() {
		let ids = IdAllocator::new();
		let _ = ids.reserve_next();
		assert_eq!(ids.reserve_sequential(2), None);
		assert_eq!(ids.reserve_sequential(0), None);
	}

	#[test]
	fn sequential_reservation_only_once() {
		let ids = IdAllocator::new();
		assert!(ids.reserve_sequential(2).is_some());
		assert_eq!(ids.reserve_sequential(2), None);
	}

	#[test]
	fn observe_keeps_next_strictly_greater() {
		let ids = IdAllocator::new();
		ids.observe(WorkerId(10));
		assert_eq!(ids.reserve_next(), WorkerId(11));
		ids.observe(WorkerId(4));
		assert_eq!(ids.reserve_next(), WorkerId(12));
	}

	#[test]
	fn compact_rewinds_to_highest_live() {
		let ids = IdAllocator::new();
		for _ in 0..6 {
			let _ = ids.reserve_next();
		}
		assert_eq!(ids.compact(Some(WorkerId(2))), WorkerId(3));
		assert_eq!(ids.reserve_next(), WorkerId(3));
		assert_eq!(ids.compact(None), WorkerId(0));
		assert_eq!(ids.peek_next(), WorkerId(0));
	}

	#[test]
	fn concurrent_reservations_never_collide() {
		let ids = Arc::new(IdAllocator::new());
		let handles: Vec<_> = (0..8)
			.map(|n| {
				let ids = Arc::clone(&ids);
				skein_worker::spawn_named_thread(format!("alloc-{n}"), move || (0..100).map(|_| ids.reserve_next()).collect::<Vec<_>>()).unwrap()
			})
			.collect();

		let mut seen = HashSet::new();
		for handle in handles {
			for id in handle.join().unwrap() {
				assert!(seen.insert(id), "id {id} issued twice");
			}
		}
		assert_eq!(seen.len(), 800);
	}
}
