//! One isolated worker execution environment.
//!
//! A [`WorkerContext`] pairs a dedicated OS thread (running the engine on a
//! current-thread runtime) with the host-side handles used to reach it: a
//! bounded mailbox, an event channel, and the shared lifecycle state. Only the
//! registry owns contexts; everything else addresses them by [`WorkerId`].

use std::fmt;
use std::sync::Arc;

use skein_worker::{MailboxSendError, MailboxSender};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::engine::EventEmitter;
use crate::{EngineFactory, Message, Result, ThreadError, WorkerEntry, WorkerEvent, WorkerEventKind, WorkerId};

mod run;

use run::WorkerRun;

/// Lifecycle state of a worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
	/// The entry module is still loading.
	Initializing,
	/// Loaded and processing messages.
	Running,
	/// Loading or execution failed. Kept in the registry until destroyed.
	Failed,
	/// Torn down. Never observable through the registry table.
	Terminated,
}

impl WorkerState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Initializing => "initializing",
			Self::Running => "running",
			Self::Failed => "failed",
			Self::Terminated => "terminated",
		}
	}

	/// Returns whether `self -> next` is a legal lifecycle transition.
	pub const fn can_transition_to(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Initializing, Self::Running)
				| (Self::Initializing, Self::Failed)
				| (Self::Running, Self::Failed)
				| (Self::Initializing | Self::Running | Self::Failed, Self::Terminated)
		)
	}

	/// Returns true once loading has resolved one way or the other.
	pub const fn is_settled(self) -> bool {
		!matches!(self, Self::Initializing)
	}
}

impl fmt::Display for WorkerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Sizing for the per-context channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
	/// Bounded inbound queue length; sends beyond it fail with `QueueFull`.
	pub mailbox_capacity: usize,
	/// Event broadcast buffer per worker.
	pub event_buffer: usize,
}

impl Default for ContextOptions {
	fn default() -> Self {
		Self {
			mailbox_capacity: 64,
			event_buffer: 64,
		}
	}
}

/// Point-in-time copy of one context's observable attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
	pub id: WorkerId,
	pub entry: WorkerEntry,
	pub state: WorkerState,
	/// Reason for the most recent failure, if the worker failed.
	pub failure: Option<String>,
}

impl WorkerSnapshot {
	/// Converts a failed snapshot into the matching error.
	pub fn failure_error(&self) -> Option<ThreadError> {
		(self.state == WorkerState::Failed).then(|| ThreadError::LoadFailure {
			id: self.id,
			entry: self.entry.clone(),
			reason: self.failure.clone().unwrap_or_default(),
		})
	}
}

#[derive(Debug, Clone)]
struct Status {
	state: WorkerState,
	failure: Option<String>,
}

/// State shared between the worker thread and the registry.
///
/// Both sides write through [`WorkerState::can_transition_to`], so a late
/// write from one side can never undo a transition made by the other.
#[derive(Clone)]
pub(crate) struct Lifecycle {
	id: WorkerId,
	entry: WorkerEntry,
	status: Arc<watch::Sender<Status>>,
	events: broadcast::Sender<WorkerEvent>,
	cancel: CancellationToken,
}

impl Lifecycle {
	fn new(id: WorkerId, entry: WorkerEntry, event_buffer: usize) -> Self {
		let (status, _) = watch::channel(Status {
			state: WorkerState::Initializing,
			failure: None,
		});
		let (events, _) = broadcast::channel(event_buffer.max(1));
		Self {
			id,
			entry,
			status: Arc::new(status),
			events,
			cancel: CancellationToken::new(),
		}
	}

	pub(crate) fn id(&self) -> WorkerId {
		self.id
	}

	fn state(&self) -> WorkerState {
		self.status.borrow().state
	}

	pub(crate) fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	fn transition(&self, next: WorkerState, failure: Option<String>) -> bool {
		self.status.send_if_modified(|status| {
			if !status.state.can_transition_to(next) {
				return false;
			}
			status.state = next;
			if failure.is_some() {
				status.failure = failure;
			}
			true
		})
	}

	pub(crate) fn emit(&self, kind: WorkerEventKind) {
		let _ = self.events.send(WorkerEvent::new(self.id, kind));
	}

	fn emitter(&self) -> EventEmitter {
		EventEmitter::new(self.clone())
	}

	/// Marks the worker running. Returns false if it was failed or torn down meanwhile.
	pub(crate) fn mark_running(&self) -> bool {
		if !self.transition(WorkerState::Running, None) {
			return false;
		}
		tracing::debug!(worker_id = %self.id, entry = %self.entry, "threads.worker.running");
		self.emit(WorkerEventKind::Running);
		true
	}

	/// Marks the worker failed and asks its thread to stop.
	pub(crate) fn fail(&self, reason: String) -> bool {
		let failed = self.transition(WorkerState::Failed, Some(reason.clone()));
		if failed {
			tracing::warn!(worker_id = %self.id, entry = %self.entry, %reason, "threads.worker.failed");
			self.emit(WorkerEventKind::Failed(reason));
		}
		self.cancel.cancel();
		failed
	}
}

/// Host-side handle to one worker thread. Owned by the registry table.
pub(crate) struct WorkerContext {
	lifecycle: Lifecycle,
	mailbox: MailboxSender<Message>,
	exited: CancellationToken,
	thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerContext {
	/// Starts a worker thread loading `entry`. Returns immediately in `Initializing`.
	///
	/// If the thread cannot be spawned the context comes back already `Failed`.
	pub(crate) fn spawn(id: WorkerId, entry: WorkerEntry, factory: Arc<dyn EngineFactory>, options: ContextOptions) -> Self {
		let lifecycle = Lifecycle::new(id, entry, options.event_buffer);
		let (mailbox, inbox) = skein_worker::Mailbox::new(options.mailbox_capacity.max(1)).split();
		let exited = CancellationToken::new();

		let run = WorkerRun::new(lifecycle.clone(), factory, inbox, exited.clone());
		let thread = match skein_worker::spawn_named_thread(format!("skein-worker-{id}"), move || run.run()) {
			Ok(handle) => Some(handle),
			Err(err) => {
				lifecycle.fail(format!("failed to spawn worker thread: {err}"));
				exited.cancel();
				None
			}
		};

		Self {
			lifecycle,
			mailbox,
			exited,
			thread,
		}
	}

	/// Builds a context that never got a thread: it starts out `Failed` with
	/// `reason` and is only kept so its id stays accounted for.
	pub(crate) fn failed(id: WorkerId, entry: WorkerEntry, options: ContextOptions, reason: String) -> Self {
		let lifecycle = Lifecycle::new(id, entry, options.event_buffer);
		lifecycle.fail(reason);
		let (mailbox, _) = skein_worker::Mailbox::new(1).split();
		let exited = CancellationToken::new();
		exited.cancel();
		Self {
			lifecycle,
			mailbox,
			exited,
			thread: None,
		}
	}

	pub(crate) fn id(&self) -> WorkerId {
		self.lifecycle.id
	}

	pub(crate) fn entry(&self) -> &WorkerEntry {
		&self.lifecycle.entry
	}

	pub(crate) fn state(&self) -> WorkerState {
		self.lifecycle.state()
	}

	pub(crate) fn snapshot(&self) -> WorkerSnapshot {
		let status = self.lifecycle.status.borrow();
		WorkerSnapshot {
			id: self.lifecycle.id,
			entry: self.lifecycle.entry.clone(),
			state: status.state,
			failure: status.failure.clone(),
		}
	}

	/// Enqueues one message for the worker without waiting.
	pub(crate) fn send(&self, message: Message) -> Result<()> {
		let id = self.lifecycle.id;
		let state = self.state();
		if state != WorkerState::Running {
			return Err(ThreadError::ContextNotRunning { id, state });
		}
		self.mailbox.try_send(message).map_err(|err| match err {
			MailboxSendError::Full(_) => ThreadError::QueueFull(id),
			MailboxSendError::Closed(_) => ThreadError::ContextNotRunning { id, state: self.state() },
		})
	}

	/// Requests cooperative shutdown. Idempotent.
	///
	/// The worker finishes the message it is handling, unloads its engine and
	/// exits; queued messages are discarded.
	pub(crate) fn terminate(&mut self) {
		if self.lifecycle.transition(WorkerState::Terminated, None) {
			tracing::debug!(worker_id = %self.lifecycle.id, entry = %self.lifecycle.entry, "threads.worker.terminate");
		}
		self.lifecycle.cancel.cancel();
		self.mailbox.close();
		// Detach; completion is observed through `exited`.
		drop(self.thread.take());
	}

	/// Marks the worker failed. Returns false if it had already settled otherwise.
	pub(crate) fn fail(&self, reason: String) -> bool {
		self.lifecycle.fail(reason)
	}

	pub(crate) fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
		self.lifecycle.events.subscribe()
	}

	pub(crate) fn status_watch(&self) -> StatusWatch {
		StatusWatch {
			rx: self.lifecycle.status.subscribe(),
		}
	}

	/// Token cancelled once the worker thread has exited.
	pub(crate) fn exited(&self) -> CancellationToken {
		self.exited.clone()
	}
}

impl Drop for WorkerContext {
	fn drop(&mut self) {
		self.lifecycle.cancel.cancel();
		self.mailbox.close();
	}
}

/// Awaitable view of one context's state, usable without the registry lock.
pub(crate) struct StatusWatch {
	rx: watch::Receiver<Status>,
}

impl StatusWatch {
	/// Resolves once the context has left `Initializing`.
	pub(crate) async fn settled(mut self) -> WorkerState {
		match self.rx.wait_for(|status| status.state.is_settled()).await {
			Ok(status) => status.state,
			Err(_) => WorkerState::Terminated,
		}
	}
}
