//! `[threads]` configuration table.
//!
//! ```toml
//! [threads]
//! preloaded_entry_paths = ["workers/sync.js", "workers/index.js"]
//! script_extension = "js"
//! mailbox_capacity = 64
//! event_buffer = 64
//! load_timeout_ms = 5000
//! shutdown_timeout_ms = 1000
//! ```
//!
//! Other top-level tables are ignored so hosts can keep their own settings in
//! the same file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::{ContextOptions, Manifest};

/// Worker registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadsConfig {
	/// Scripts to preload at startup. Position `i` becomes worker id `i`.
	pub preloaded_entry_paths: Vec<String>,
	/// Extension every worker script path must carry.
	pub script_extension: String,
	/// Per-worker inbound queue length.
	pub mailbox_capacity: usize,
	/// Per-worker event buffer length.
	pub event_buffer: usize,
	/// How long preload waits for entries to finish loading.
	pub load_timeout_ms: u64,
	/// How long shutdown waits for worker threads to exit.
	pub shutdown_timeout_ms: u64,
}

impl Default for ThreadsConfig {
	fn default() -> Self {
		Self {
			preloaded_entry_paths: Vec::new(),
			script_extension: "js".to_string(),
			mailbox_capacity: 64,
			event_buffer: 64,
			load_timeout_ms: 5000,
			shutdown_timeout_ms: 1000,
		}
	}
}

#[derive(Deserialize)]
struct Document {
	#[serde(default)]
	threads: ThreadsConfig,
}

impl ThreadsConfig {
	/// Parses the `[threads]` table of a TOML document. A missing table yields defaults.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let document: Document = toml::from_str(input)?;
		document.threads.validate()?;
		Ok(document.threads)
	}

	/// Reads and parses a TOML config file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml_str(&input)?;
		tracing::debug!(path = %path.display(), preload = config.preloaded_entry_paths.len(), "threads.config.loaded");
		Ok(config)
	}

	/// Rejects settings the registry cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.mailbox_capacity == 0 {
			return Err(invalid("mailbox_capacity", "must be greater than zero"));
		}
		if self.event_buffer == 0 {
			return Err(invalid("event_buffer", "must be greater than zero"));
		}
		if self.script_extension.trim_start_matches('.').is_empty() {
			return Err(invalid("script_extension", "must not be empty"));
		}
		Ok(())
	}

	/// Builds the preload manifest from `preloaded_entry_paths`.
	///
	/// Malformed paths stay in the manifest as invalid slots so preload can
	/// still account for their positions.
	pub fn manifest(&self) -> Manifest {
		Manifest::from_script_paths(&self.preloaded_entry_paths, &self.script_extension)
	}

	pub fn context_options(&self) -> ContextOptions {
		ContextOptions {
			mailbox_capacity: self.mailbox_capacity,
			event_buffer: self.event_buffer,
		}
	}

	pub fn load_timeout(&self) -> Duration {
		Duration::from_millis(self.load_timeout_ms)
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout_ms)
	}
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
	ConfigError::Invalid {
		field,
		reason: reason.to_string(),
	}
}
