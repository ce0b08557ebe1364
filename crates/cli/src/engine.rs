//! Script engine backed by an interpreter subprocess.
//!
//! Each worker runs `program [args..] <root>/<entry>.<ext>`. Messages are
//! written to the child's stdin as one JSON document per line; every stdout
//! line becomes a worker event (parsed as JSON, or kept as a string). A script
//! that exits while its worker is still live fails the worker.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use skein_threads::{EngineContext, EngineFactory, EventEmitter, Message, ScriptEngine, WorkerEntry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Builds one [`CommandEngine`] per worker.
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
	engine: EngineConfig,
	root: PathBuf,
	extension: String,
}

impl CommandEngineFactory {
	pub fn new(engine: EngineConfig, root: PathBuf, extension: impl Into<String>) -> Self {
		Self {
			engine,
			root,
			extension: extension.into(),
		}
	}

	/// Filesystem path of the script behind `entry`.
	pub fn script_path(&self, entry: &WorkerEntry) -> PathBuf {
		self.root.join(format!("{entry}.{}", self.extension.trim_start_matches('.')))
	}
}

impl EngineFactory for CommandEngineFactory {
	fn create(&self, entry: &WorkerEntry) -> Box<dyn ScriptEngine> {
		Box::new(CommandEngine {
			program: self.engine.program.clone(),
			args: self.engine.args.clone(),
			script: self.script_path(entry),
			stdin: None,
			monitor: None,
		})
	}
}

pub struct CommandEngine {
	program: String,
	args: Vec<String>,
	script: PathBuf,
	stdin: Option<ChildStdin>,
	/// Owns the child: relays its stdout, then reports how it exited.
	monitor: Option<JoinHandle<()>>,
}

#[async_trait(?Send)]
impl ScriptEngine for CommandEngine {
	async fn load(&mut self, ctx: &mut EngineContext) -> Result<(), String> {
		if !self.script.is_file() {
			return Err(format!("script not found: {}", self.script.display()));
		}
		let mut child = Command::new(&self.program)
			.args(&self.args)
			.arg(&self.script)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|err| format!("failed to start {}: {err}", self.program))?;
		let stdout = child.stdout.take().ok_or("child stdout unavailable")?;
		self.stdin = child.stdin.take();
		tracing::debug!(pid = ?child.id(), script = %self.script.display(), "cli.engine.started");

		self.monitor = Some(skein_worker::spawn("cli.engine.monitor", monitor(child, stdout, ctx.emitter())));
		Ok(())
	}

	async fn handle(&mut self, message: Message, _ctx: &mut EngineContext) -> Result<(), String> {
		let stdin = self.stdin.as_mut().ok_or("script stdin closed")?;
		let mut line = serde_json::to_string(&message).map_err(|err| err.to_string())?;
		line.push('\n');
		stdin.write_all(line.as_bytes()).await.map_err(|err| format!("write to script failed: {err}"))?;
		stdin.flush().await.map_err(|err| format!("write to script failed: {err}"))
	}

	async fn unload(&mut self, _ctx: &mut EngineContext) {
		// Closing stdin is the script's cue to exit.
		drop(self.stdin.take());
		let Some(monitor) = self.monitor.take() else {
			return;
		};
		let abort = monitor.abort_handle();
		if tokio::time::timeout(EXIT_GRACE, monitor).await.is_err() {
			// Dropping the child inside the aborted task kills it.
			tracing::debug!("cli.engine.kill");
			abort.abort();
		}
	}
}

async fn monitor(mut child: Child, stdout: ChildStdout, emitter: EventEmitter) {
	let mut lines = BufReader::new(stdout).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => emitter.emit(parse_line(&line)),
			Ok(None) => break,
			Err(err) => {
				tracing::warn!(worker_id = %emitter.id(), error = %err, "cli.engine.stdout_failed");
				break;
			}
		}
	}

	let status = child.wait().await;
	if emitter.is_terminating() {
		tracing::debug!(worker_id = %emitter.id(), ?status, "cli.engine.exited");
		return;
	}
	emitter.fail(match status {
		Ok(status) => format!("script exited with {status}"),
		Err(err) => format!("script wait failed: {err}"),
	});
}

/// JSON lines pass through as values; anything else is kept as a plain string.
fn parse_line(line: &str) -> Message {
	serde_json::from_str(line).unwrap_or_else(|_| Message::String(line.to_string()))
}
