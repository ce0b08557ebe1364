//! Host ↔ worker routing.
//!
//! Sends resolve the target through the registry and surface every rejection
//! to the caller. Worker events are relayed by a forwarding task on the host
//! runtime, so event handlers never run on a worker thread.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Message, Result, ThreadRegistry, WorkerEvent, WorkerId};

/// Routes messages to workers and relays their events back to the host.
#[derive(Debug, Clone)]
pub struct DispatchBridge {
	registry: ThreadRegistry,
}

impl DispatchBridge {
	pub fn new(registry: ThreadRegistry) -> Self {
		Self { registry }
	}

	/// Forwards `message` to the worker under `id`.
	pub fn send_to(&self, id: WorkerId, message: Message) -> Result<()> {
		let result = self.registry.send(id, message);
		match &result {
			Ok(()) => tracing::trace!(worker_id = %id, "threads.dispatch.send"),
			Err(err) => tracing::debug!(worker_id = %id, error = %err, "threads.dispatch.rejected"),
		}
		result
	}

	/// Returns a raw receiver for events from the worker under `id`.
	pub fn events(&self, id: WorkerId) -> Result<broadcast::Receiver<WorkerEvent>> {
		self.registry.subscribe(id)
	}

	/// Calls `handler` on the host runtime for every event the worker under
	/// `id` emits from now on, ending after its `Exited` event.
	pub fn on_event<H>(&self, id: WorkerId, mut handler: H) -> Result<EventSubscription>
	where
		H: FnMut(WorkerEvent) + Send + 'static,
	{
		let mut rx = self.registry.subscribe(id)?;
		let cancel = CancellationToken::new();
		let task_cancel = cancel.clone();
		let task = skein_worker::spawn("threads.dispatch.relay", async move {
			loop {
				let received = tokio::select! {
					biased;
					_ = task_cancel.cancelled() => break,
					received = rx.recv() => received,
				};
				match received {
					Ok(event) => {
						let last = event.is_exit();
						handler(event);
						if last {
							break;
						}
					}
					Err(RecvError::Lagged(skipped)) => {
						tracing::warn!(worker_id = %id, skipped, "threads.dispatch.lagged");
					}
					Err(RecvError::Closed) => break,
				}
			}
		});
		tracing::debug!(worker_id = %id, "threads.dispatch.subscribe");

		Ok(EventSubscription {
			id,
			cancel,
			task: Some(task),
		})
	}
}

/// Live event relay registration. Dropping it stops the relay.
#[derive(Debug)]
pub struct EventSubscription {
	id: WorkerId,
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
}

impl EventSubscription {
	/// Worker this subscription listens to.
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Stops relaying events.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns whether the relay has ended.
	pub fn is_finished(&self) -> bool {
		self.task.as_ref().is_none_or(JoinHandle::is_finished)
	}

	/// Waits for the relay to end, which happens after the worker exits or
	/// the subscription is cancelled.
	pub async fn finished(&mut self) {
		if let Some(task) = self.task.take() {
			let _ = task.await;
		}
	}
}

impl Drop for EventSubscription {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
