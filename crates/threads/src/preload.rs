//! Startup preload of the configured worker manifest.

use std::time::Duration;

use tokio::time::Instant;

use crate::{Manifest, ManifestSlot, Result, ThreadRegistry, WorkerEntry, WorkerSnapshot, WorkerState};

/// Settled state of every preloaded position, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadReport {
	workers: Vec<WorkerSnapshot>,
}

impl PreloadReport {
	/// One snapshot per manifest position; index `i` is worker id `i`.
	pub fn workers(&self) -> &[WorkerSnapshot] {
		&self.workers
	}

	pub fn len(&self) -> usize {
		self.workers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.workers.is_empty()
	}

	/// Positions that loaded successfully.
	pub fn running(&self) -> impl Iterator<Item = &WorkerSnapshot> {
		self.workers.iter().filter(|w| w.state == WorkerState::Running)
	}

	/// Positions that failed to load.
	pub fn failed(&self) -> impl Iterator<Item = &WorkerSnapshot> {
		self.workers.iter().filter(|w| w.state == WorkerState::Failed)
	}
}

/// Creates one worker per manifest entry, entry `i` under id `i`, and waits
/// for all of them to finish loading.
///
/// Preloading is best-effort per entry: an entry that fails to load keeps its
/// id in `Failed` and the remaining entries are still created. Entries still
/// loading after `load_timeout` are marked failed. Fails with
/// `PreloadRejected` if the registry has already issued ids.
pub async fn preload(registry: &ThreadRegistry, manifest: &Manifest, load_timeout: Duration) -> Result<PreloadReport> {
	let ids = registry.reserve_preload(manifest.len())?;
	tracing::info!(count = ids.len(), "threads.preload.start");

	for (&id, slot) in ids.iter().zip(manifest) {
		// Ids were reserved up front, so creation can only collide if the
		// host created under an explicit id in between.
		let created = match slot {
			ManifestSlot::Entry(entry) => registry.create(id, entry.clone()),
			ManifestSlot::Invalid { path, error } => {
				tracing::warn!(worker_id = %id, %path, error = %error, "threads.preload.invalid_entry");
				registry.create_failed(id, WorkerEntry::unchecked(path), error.to_string())
			}
		};
		if let Err(err) = created {
			tracing::warn!(worker_id = %id, error = %err, "threads.preload.create_failed");
		}
	}

	let deadline = Instant::now() + load_timeout;
	for &id in &ids {
		match tokio::time::timeout_at(deadline, registry.wait_settled(id)).await {
			Ok(_) => {}
			Err(_) => {
				if registry.fail(id, format!("load timed out after {}ms", load_timeout.as_millis())) {
					tracing::warn!(worker_id = %id, "threads.preload.timeout");
				}
			}
		}
	}

	let workers: Vec<_> = ids.iter().filter_map(|&id| registry.get(id).ok()).collect();
	let report = PreloadReport { workers };
	tracing::info!(
		count = report.len(),
		running = report.running().count(),
		failed = report.failed().count(),
		"threads.preload.done"
	);
	Ok(report)
}
