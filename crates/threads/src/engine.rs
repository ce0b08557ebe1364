//! Seam between worker contexts and the script interpreter that runs them.
//!
//! The registry never interprets scripts. It asks an [`EngineFactory`] for one
//! [`ScriptEngine`] per worker, on that worker's own thread, so engines are
//! free to hold thread-bound interpreter state.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::Lifecycle;
use crate::{WorkerEntry, WorkerEventKind, WorkerId};

/// Payload exchanged between the host and a worker.
pub type Message = serde_json::Value;

/// One script interpreter instance, owned by exactly one worker thread.
#[async_trait(?Send)]
pub trait ScriptEngine: 'static {
	/// Loads the worker's entry module. An error fails the worker.
	async fn load(&mut self, ctx: &mut EngineContext) -> Result<(), String>;

	/// Processes one inbound message. An error fails the worker.
	///
	/// Errors surfacing between messages go through [`EngineContext::fail`].
	async fn handle(&mut self, message: Message, ctx: &mut EngineContext) -> Result<(), String>;

	/// Releases interpreter resources. Runs once, after a successful load.
	async fn unload(&mut self, _ctx: &mut EngineContext) {}
}

/// Creates engines for worker entries.
///
/// Called on the worker thread that will own the engine.
pub trait EngineFactory: Send + Sync + 'static {
	fn create(&self, entry: &WorkerEntry) -> Box<dyn ScriptEngine>;
}

impl<F> EngineFactory for F
where
	F: Fn(&WorkerEntry) -> Box<dyn ScriptEngine> + Send + Sync + 'static,
{
	fn create(&self, entry: &WorkerEntry) -> Box<dyn ScriptEngine> {
		self(entry)
	}
}

/// Cloneable outbound port for one worker, usable from tasks the engine spawns.
#[derive(Clone)]
pub struct EventEmitter {
	lifecycle: Lifecycle,
}

impl EventEmitter {
	pub(crate) fn new(lifecycle: Lifecycle) -> Self {
		Self { lifecycle }
	}

	pub fn id(&self) -> WorkerId {
		self.lifecycle.id()
	}

	/// Relays one message to host subscribers. Dropped when nobody listens.
	pub fn emit(&self, message: Message) {
		self.lifecycle.emit(WorkerEventKind::Message(message));
	}

	/// Reports an unrecoverable engine error raised outside `load` and `handle`,
	/// such as the interpreter dying between messages.
	///
	/// The worker moves to `Failed`, relays `Failed(reason)`, and stops once
	/// any in-flight message completes. Ignored after teardown has begun.
	pub fn fail(&self, reason: impl Into<String>) {
		if self.lifecycle.is_cancelled() {
			return;
		}
		self.lifecycle.fail(reason.into());
	}

	/// Returns whether the worker is tearing down.
	pub fn is_terminating(&self) -> bool {
		self.lifecycle.is_cancelled()
	}
}

impl fmt::Debug for EventEmitter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventEmitter").field("id", &self.lifecycle.id()).finish()
	}
}

/// Execution context handed to a [`ScriptEngine`].
pub struct EngineContext {
	id: WorkerId,
	entry: WorkerEntry,
	emitter: EventEmitter,
	cancel: CancellationToken,
}

impl EngineContext {
	pub(crate) fn new(id: WorkerId, entry: WorkerEntry, emitter: EventEmitter, cancel: CancellationToken) -> Self {
		Self { id, entry, emitter, cancel }
	}

	/// Id of the worker running this engine.
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Entry the worker was created with.
	pub fn entry(&self) -> &WorkerEntry {
		&self.entry
	}

	/// Emits one outbound message to the host.
	pub fn emit(&self, message: Message) {
		self.emitter.emit(message);
	}

	/// See [`EventEmitter::fail`].
	pub fn fail(&self, reason: impl Into<String>) {
		self.emitter.fail(reason);
	}

	/// Returns a port for emitting from tasks the engine spawns.
	pub fn emitter(&self) -> EventEmitter {
		self.emitter.clone()
	}

	/// Returns whether teardown has been requested.
	pub fn is_terminating(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Resolves once teardown has been requested.
	pub async fn terminating(&self) {
		self.cancel.cancelled().await;
	}
}
