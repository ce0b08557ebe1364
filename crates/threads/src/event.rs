use crate::{Message, WorkerId};

/// What a worker reported.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
	/// The entry finished loading.
	Running,
	/// The worker emitted an outbound message.
	Message(Message),
	/// Loading or execution failed; the worker stops processing messages.
	Failed(String),
	/// The worker thread released its engine and exited.
	Exited,
}

/// Event relayed from a worker to the host, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
	pub id: WorkerId,
	pub kind: WorkerEventKind,
}

impl WorkerEvent {
	pub fn new(id: WorkerId, kind: WorkerEventKind) -> Self {
		Self { id, kind }
	}

	/// Returns true for the last event a worker ever emits.
	pub fn is_exit(&self) -> bool {
		matches!(self.kind, WorkerEventKind::Exited)
	}
}
