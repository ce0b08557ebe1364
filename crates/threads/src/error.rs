//! Error types for the worker registry and its configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::{WorkerEntry, WorkerId, WorkerState};

/// Errors returned by registry, dispatch and preload operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
	/// Creation targeted an id that already holds a live context.
	#[error("worker {0} already exists")]
	DuplicateId(WorkerId),

	/// The id does not name a live context.
	#[error("unknown worker {0}")]
	UnknownId(WorkerId),

	/// A message was sent to a context that is not running.
	#[error("worker {id} is not running (state: {state})")]
	ContextNotRunning {
		/// Target worker.
		id: WorkerId,
		/// State observed when the send was rejected.
		state: WorkerState,
	},

	/// The worker's bounded message queue is full.
	#[error("message queue of worker {0} is full")]
	QueueFull(WorkerId),

	/// The worker failed while loading or running its entry.
	#[error("worker {id} ({entry}) failed: {reason}")]
	LoadFailure {
		/// Failed worker.
		id: WorkerId,
		/// Entry the worker was running.
		entry: WorkerEntry,
		/// Failure reported by the engine or the registry.
		reason: String,
	},

	/// Preload was requested after worker ids had already been issued.
	#[error("preload must run before any worker id is issued")]
	PreloadRejected,

	/// A worker entry reference is malformed.
	#[error("invalid worker entry {entry:?}: {reason}")]
	InvalidEntry {
		/// The rejected entry text.
		entry: String,
		/// Why it was rejected.
		reason: String,
	},
}

/// Result type for registry operations.
pub type Result<T, E = ThreadError> = std::result::Result<T, E>;

/// Errors that can occur when loading worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A setting holds an unusable value.
	#[error("invalid value for {field}: {reason}")]
	Invalid {
		/// Offending key.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},
}
