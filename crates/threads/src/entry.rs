use std::fmt;
use std::sync::Arc;

use crate::{Result, ThreadError};

/// Reference to the script module a worker loads.
///
/// Immutable and cheap to clone; the engine receives it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerEntry(Arc<str>);

impl WorkerEntry {
	/// Builds an entry from a module identifier.
	pub fn new(entry: impl AsRef<str>) -> Result<Self> {
		let entry = entry.as_ref().trim();
		if entry.is_empty() {
			return Err(ThreadError::InvalidEntry {
				entry: entry.to_string(),
				reason: "entry is empty".to_string(),
			});
		}
		Ok(Self(Arc::from(entry)))
	}

	/// Label for a configured path that failed validation, kept only for reporting.
	pub(crate) fn unchecked(raw: &str) -> Self {
		Self(Arc::from(raw.trim()))
	}

	/// Builds an entry from a script path, which must end in `.<extension>`.
	///
	/// The extension is stripped, leaving the module identifier.
	pub fn from_script_path(path: &str, extension: &str) -> Result<Self> {
		let invalid = |reason: String| ThreadError::InvalidEntry {
			entry: path.to_string(),
			reason,
		};
		let suffix = format!(".{}", extension.trim_start_matches('.'));
		let Some(module) = path.trim().strip_suffix(suffix.as_str()) else {
			return Err(invalid(format!("only {suffix} scripts are supported")));
		};
		if module.is_empty() || module.ends_with('/') {
			return Err(invalid("script path has no file name".to_string()));
		}
		Self::new(module)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for WorkerEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for WorkerEntry {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// One manifest position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSlot {
	Entry(WorkerEntry),
	/// A configured path that names no valid entry. Preload still gives it an id, as a failed worker.
	Invalid {
		path: String,
		error: ThreadError,
	},
}

impl ManifestSlot {
	pub fn entry(&self) -> Option<&WorkerEntry> {
		match self {
			Self::Entry(entry) => Some(entry),
			Self::Invalid { .. } => None,
		}
	}

	pub fn error(&self) -> Option<&ThreadError> {
		match self {
			Self::Entry(_) => None,
			Self::Invalid { error, .. } => Some(error),
		}
	}
}

/// Ordered preload manifest. Position `i` becomes worker id `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
	slots: Vec<ManifestSlot>,
}

impl Manifest {
	pub fn new(entries: Vec<WorkerEntry>) -> Self {
		entries.into_iter().collect()
	}

	/// Builds a manifest from script paths.
	///
	/// A malformed path does not reject the manifest; it occupies its position
	/// as [`ManifestSlot::Invalid`].
	pub fn from_script_paths<S: AsRef<str>>(paths: &[S], extension: &str) -> Self {
		let slots = paths
			.iter()
			.map(|path| match WorkerEntry::from_script_path(path.as_ref(), extension) {
				Ok(entry) => ManifestSlot::Entry(entry),
				Err(error) => ManifestSlot::Invalid {
					path: path.as_ref().to_string(),
					error,
				},
			})
			.collect();
		Self { slots }
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn slots(&self) -> &[ManifestSlot] {
		&self.slots
	}

	pub fn iter(&self) -> std::slice::Iter<'_, ManifestSlot> {
		self.slots.iter()
	}

	/// Valid entries, in manifest order.
	pub fn entries(&self) -> impl Iterator<Item = &WorkerEntry> {
		self.slots.iter().filter_map(ManifestSlot::entry)
	}

	/// Positions whose path was rejected, with the reason.
	pub fn invalid(&self) -> impl Iterator<Item = (usize, &ThreadError)> {
		self.slots.iter().enumerate().filter_map(|(position, slot)| slot.error().map(|err| (position, err)))
	}
}

impl FromIterator<WorkerEntry> for Manifest {
	fn from_iter<I: IntoIterator<Item = WorkerEntry>>(iter: I) -> Self {
		Self {
			slots: iter.into_iter().map(ManifestSlot::Entry).collect(),
		}
	}
}

impl<'a> IntoIterator for &'a Manifest {
	type Item = &'a ManifestSlot;
	type IntoIter = std::slice::Iter<'a, ManifestSlot>;

	fn into_iter(self) -> Self::IntoIter {
		self.slots.iter()
	}
}
