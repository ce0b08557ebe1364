//! Host binary configuration.
//!
//! ```toml
//! [threads]
//! preloaded_entry_paths = ["workers/sync.js"]
//!
//! [engine]
//! program = "node"
//! args = ["--no-warnings"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use skein_threads::{ConfigError, ThreadsConfig};

/// Whole config file: the registry table plus how to run worker scripts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
	#[serde(default)]
	pub threads: ThreadsConfig,
	pub engine: EngineConfig,
}

/// External interpreter each worker script runs under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
	/// Interpreter executable, resolved through `PATH`.
	pub program: String,
	/// Arguments placed before the script path.
	#[serde(default)]
	pub args: Vec<String>,
	/// Directory script paths are resolved against. Defaults to the config file's directory.
	#[serde(default)]
	pub root: Option<PathBuf>,
}

impl CliConfig {
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.threads.validate()?;
		if config.engine.program.trim().is_empty() {
			return Err(ConfigError::Invalid {
				field: "program",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(config)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// Directory worker scripts live under, given where the config file was read from.
	pub fn script_root(&self, config_path: &Path) -> PathBuf {
		match &self.engine.root {
			Some(root) if root.is_absolute() => root.clone(),
			Some(root) => config_dir(config_path).join(root),
			None => config_dir(config_path),
		}
	}
}

fn config_dir(config_path: &Path) -> PathBuf {
	config_path.parent().map(Path::to_path_buf).unwrap_or_default()
}
