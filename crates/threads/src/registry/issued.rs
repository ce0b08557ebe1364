use std::collections::BTreeMap;

use crate::WorkerId;

/// Every id that has held a context since the last compaction, stored as
/// disjoint half-open runs keyed by start.
///
/// Ids are issued mostly in sequence, so the runs coalesce and the set stays
/// small no matter how many workers come and go.
#[derive(Debug, Default)]
pub(super) struct IssuedIds {
	runs: BTreeMap<u64, u64>,
}

impl IssuedIds {
	pub(super) fn insert(&mut self, id: WorkerId) {
		let id = id.get();
		let mut start = id;
		let mut end = id.saturating_add(1);
		if let Some((&prev_start, &prev_end)) = self.runs.range(..=id).next_back() {
			if prev_end > id {
				return;
			}
			if prev_end == id {
				start = prev_start;
			}
		}
		if let Some(next_end) = self.runs.remove(&end) {
			end = next_end;
		}
		self.runs.insert(start, end);
	}

	pub(super) fn contains(&self, id: WorkerId) -> bool {
		let id = id.get();
		self.runs.range(..=id).next_back().is_some_and(|(_, &end)| id < end)
	}

	/// Forgets every id at or above `from`.
	pub(super) fn truncate(&mut self, from: WorkerId) {
		let from = from.get();
		self.runs.split_off(&from);
		if let Some((_, end)) = self.runs.range_mut(..from).next_back() {
			*end = (*end).min(from);
		}
	}

	/// Number of disjoint runs held.
	pub(super) fn runs(&self) -> usize {
		self.runs.len()
	}
}
