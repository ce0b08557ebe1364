//! Mapping from [`WorkerId`] to live worker contexts.
//!
//! Every table mutation goes through one mutex. Worker code never runs under
//! it: contexts execute on their own threads and only the bookkeeping
//! (insert, remove, state reads, mailbox enqueue) happens while locked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::context::{StatusWatch, WorkerContext};

mod issued;

use issued::IssuedIds;
use crate::{ContextOptions, EngineFactory, IdAllocator, Message, Result, ThreadError, WorkerEntry, WorkerEvent, WorkerId, WorkerSnapshot, WorkerState};

#[derive(Default)]
struct RegistryTable {
	live: HashMap<WorkerId, WorkerContext>,
	/// Ids that have held a context. Any of them not in `live` was destroyed,
	/// so repeated `destroy` calls succeed.
	issued: IssuedIds,
	/// Set once preload ran or any id was issued; preload never runs after that.
	preload_closed: bool,
}

impl RegistryTable {
	fn insert(&mut self, id: WorkerId, context: WorkerContext) {
		self.issued.insert(id);
		self.preload_closed = true;
		self.live.insert(id, context);
	}
}

struct RegistryInner {
	table: Mutex<RegistryTable>,
	ids: IdAllocator,
	factory: Arc<dyn EngineFactory>,
	options: ContextOptions,
}

/// Registry of worker contexts. Cheap to clone; clones share one table.
#[derive(Clone)]
pub struct ThreadRegistry {
	inner: Arc<RegistryInner>,
}

impl ThreadRegistry {
	/// Creates an empty registry whose workers run engines from `factory`.
	pub fn new(factory: impl EngineFactory, options: ContextOptions) -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				table: Mutex::new(RegistryTable::default()),
				ids: IdAllocator::new(),
				factory: Arc::new(factory),
				options,
			}),
		}
	}

	/// Returns the id allocator backing this registry.
	pub fn ids(&self) -> &IdAllocator {
		&self.inner.ids
	}

	/// Creates a worker under an explicit id.
	///
	/// Returns as soon as the context exists in `Initializing`; loading
	/// continues on the worker thread.
	pub fn create(&self, id: WorkerId, entry: WorkerEntry) -> Result<WorkerId> {
		let mut table = self.inner.table.lock();
		if table.live.contains_key(&id) {
			tracing::debug!(worker_id = %id, entry = %entry, "threads.create.duplicate");
			return Err(ThreadError::DuplicateId(id));
		}
		self.inner.ids.observe(id);
		self.insert_locked(&mut table, id, entry);
		Ok(id)
	}

	/// Creates a worker under a freshly allocated id.
	pub fn start(&self, entry: WorkerEntry) -> WorkerId {
		let mut table = self.inner.table.lock();
		// Allocating under the table lock keeps reservations ordered against compaction.
		let id = self.inner.ids.reserve_next();
		self.insert_locked(&mut table, id, entry);
		id
	}

	fn insert_locked(&self, table: &mut RegistryTable, id: WorkerId, entry: WorkerEntry) {
		tracing::debug!(worker_id = %id, entry = %entry, "threads.create");
		let context = WorkerContext::spawn(id, entry, Arc::clone(&self.inner.factory), self.inner.options);
		table.insert(id, context);
	}

	/// Records `id` as a worker that failed before it could start, e.g. a
	/// preload position whose path was rejected.
	pub(crate) fn create_failed(&self, id: WorkerId, entry: WorkerEntry, reason: String) -> Result<WorkerId> {
		let mut table = self.inner.table.lock();
		if table.live.contains_key(&id) {
			return Err(ThreadError::DuplicateId(id));
		}
		self.inner.ids.observe(id);
		tracing::debug!(worker_id = %id, entry = %entry, %reason, "threads.create.failed");
		let context = WorkerContext::failed(id, entry, self.inner.options, reason);
		table.insert(id, context);
		Ok(id)
	}

	/// Reserves ids `0..count` for a preload manifest.
	///
	/// Preload runs at most once per registry, and never after any id was
	/// issued, even if compaction has since rewound the allocator.
	pub(crate) fn reserve_preload(&self, count: usize) -> Result<Vec<WorkerId>> {
		let mut table = self.inner.table.lock();
		if table.preload_closed {
			return Err(ThreadError::PreloadRejected);
		}
		let ids = self.inner.ids.reserve_sequential(count as u64).ok_or(ThreadError::PreloadRejected)?;
		table.preload_closed = true;
		Ok(ids)
	}

	/// Returns a snapshot of the live context under `id`.
	pub fn get(&self, id: WorkerId) -> Result<WorkerSnapshot> {
		self.with_context(id, WorkerContext::snapshot)
	}

	/// Returns the state of the live context under `id`.
	pub fn state(&self, id: WorkerId) -> Result<WorkerState> {
		self.with_context(id, WorkerContext::state)
	}

	/// Terminates and removes the context under `id`.
	///
	/// Destroying an already destroyed id succeeds without effect; ids that
	/// never held a context are `UnknownId`.
	pub fn destroy(&self, id: WorkerId) -> Result<()> {
		let removed = {
			let mut table = self.inner.table.lock();
			match table.live.remove(&id) {
				Some(mut context) => {
					context.terminate();
					context
				}
				None if table.issued.contains(id) => return Ok(()),
				None => return Err(ThreadError::UnknownId(id)),
			}
		};
		tracing::debug!(worker_id = %id, entry = %removed.entry(), "threads.destroy");
		Ok(())
	}

	/// Returns the live ids, ascending, as of this call.
	pub fn list(&self) -> WorkerIds {
		let mut ids: Vec<_> = self.inner.table.lock().live.keys().copied().collect();
		ids.sort_unstable();
		WorkerIds { ids: ids.into() }
	}

	/// Returns snapshots of every live context, ascending by id.
	pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
		let mut snapshots: Vec<_> = self.inner.table.lock().live.values().map(WorkerContext::snapshot).collect();
		snapshots.sort_by_key(|s| s.id);
		snapshots
	}

	/// Number of live contexts.
	pub fn len(&self) -> usize {
		self.inner.table.lock().live.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Enqueues `message` for the worker under `id` without waiting.
	pub fn send(&self, id: WorkerId, message: Message) -> Result<()> {
		let table = self.inner.table.lock();
		let context = table.live.get(&id).ok_or(ThreadError::UnknownId(id))?;
		context.send(message)
	}

	/// Subscribes to events from the worker under `id`.
	pub fn subscribe(&self, id: WorkerId) -> Result<broadcast::Receiver<WorkerEvent>> {
		self.with_context(id, WorkerContext::subscribe)
	}

	/// Waits until the worker under `id` has left `Initializing`.
	///
	/// Returns `LoadFailure` if it failed; a worker destroyed while waiting
	/// reports `Terminated`.
	pub async fn wait_settled(&self, id: WorkerId) -> Result<WorkerState> {
		let watch: StatusWatch = self.with_context(id, WorkerContext::status_watch)?;
		let state = watch.settled().await;
		if state == WorkerState::Failed {
			// Destroyed between failing and this lookup.
			let Ok(snapshot) = self.get(id) else {
				return Ok(WorkerState::Terminated);
			};
			return Err(snapshot.failure_error().unwrap_or_else(|| ThreadError::LoadFailure {
				id,
				entry: snapshot.entry,
				reason: String::new(),
			}));
		}
		Ok(state)
	}

	/// Marks the worker under `id` failed with `reason`.
	///
	/// Returns false when it had already settled as `Failed` or been torn down.
	pub(crate) fn fail(&self, id: WorkerId, reason: impl Into<String>) -> bool {
		let table = self.inner.table.lock();
		table.live.get(&id).is_some_and(|context| context.fail(reason.into()))
	}

	/// Rewinds the id counter to one past the highest live id.
	///
	/// Destroyed ids above that point become available to [`Self::start`]
	/// again. Returns the next id that will be issued.
	pub fn compact_ids(&self) -> WorkerId {
		let mut table = self.inner.table.lock();
		let highest = table.live.keys().max().copied();
		let next = self.inner.ids.compact(highest);
		table.issued.truncate(next);
		tracing::debug!(next = %next, live = table.live.len(), "threads.compact");
		next
	}

	/// Terminates every live worker and waits up to `timeout` for their threads to exit.
	pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
		let exited: Vec<_> = {
			let mut table = self.inner.table.lock();
			let contexts: Vec<_> = table.live.drain().collect();
			contexts
				.into_iter()
				.map(|(_, mut context)| {
					context.terminate();
					context.exited()
				})
				.collect()
		};

		let terminated = exited.len();
		let timed_out = tokio::time::timeout(timeout, async {
			for token in &exited {
				token.cancelled().await;
			}
		})
		.await
		.is_err();
		let report = ShutdownReport {
			terminated,
			exited: exited.iter().filter(|token| token.is_cancelled()).count(),
			timed_out,
		};
		tracing::info!(terminated = report.terminated, exited = report.exited, timed_out = report.timed_out, "threads.shutdown");
		report
	}

	fn with_context<T>(&self, id: WorkerId, f: impl FnOnce(&WorkerContext) -> T) -> Result<T> {
		let table = self.inner.table.lock();
		table.live.get(&id).map(f).ok_or(ThreadError::UnknownId(id))
	}
}

impl std::fmt::Debug for ThreadRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ThreadRegistry")
			.field("live", &self.list().as_slice())
			.field("next_id", &self.inner.ids.peek_next())
			.finish()
	}
}

/// Ascending snapshot of live worker ids. Iterating it again restarts from the first id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIds {
	ids: Arc<[WorkerId]>,
}

impl WorkerIds {
	pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, WorkerId>> {
		self.ids.iter().copied()
	}

	pub fn as_slice(&self) -> &[WorkerId] {
		&self.ids
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	pub fn contains(&self, id: WorkerId) -> bool {
		self.ids.binary_search(&id).is_ok()
	}
}

impl<'a> IntoIterator for &'a WorkerIds {
	type Item = WorkerId;
	type IntoIter = std::iter::Copied<std::slice::Iter<'a, WorkerId>>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

/// Outcome of [`ThreadRegistry::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
	/// Workers terminated by this call.
	pub terminated: usize,
	/// Of those, how many threads exited before the deadline.
	pub exited: usize,
	/// Whether the deadline passed first.
	pub timed_out: bool,
}

#[cfg(test)]
mod tests;
