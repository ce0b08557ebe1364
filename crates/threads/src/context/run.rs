use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use skein_worker::MailboxReceiver;
use tokio_util::sync::CancellationToken;

use super::Lifecycle;
use crate::engine::EngineContext;
use crate::{EngineFactory, Message, WorkerEventKind};

/// Everything a worker thread owns. Moved onto the thread at spawn.
pub(super) struct WorkerRun {
	lifecycle: Lifecycle,
	factory: Arc<dyn EngineFactory>,
	inbox: MailboxReceiver<Message>,
	exited: CancellationToken,
	span: tracing::Span,
}

impl WorkerRun {
	pub(super) fn new(lifecycle: Lifecycle, factory: Arc<dyn EngineFactory>, inbox: MailboxReceiver<Message>, exited: CancellationToken) -> Self {
		Self {
			lifecycle,
			factory,
			inbox,
			exited,
			// Carry the creating caller's span onto the worker thread.
			span: tracing::Span::current(),
		}
	}

	/// Thread body: drives the engine to completion, converting panics into failures.
	pub(super) fn run(self) {
		let lifecycle = self.lifecycle.clone();
		let _exited = self.exited.clone().drop_guard();
		let span = tracing::debug_span!(parent: &self.span, "threads.worker", worker_id = %lifecycle.id, entry = %lifecycle.entry);
		let _enter = span.enter();

		let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
			Ok(runtime) => runtime,
			Err(err) => {
				lifecycle.fail(format!("failed to build worker runtime: {err}"));
				lifecycle.emit(WorkerEventKind::Exited);
				return;
			}
		};

		let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(self.drive())));
		drop(runtime);
		if let Err(payload) = outcome {
			let reason = match skein_worker::panic_message(payload.as_ref()) {
				Some(msg) => format!("worker panicked: {msg}"),
				None => "worker panicked".to_string(),
			};
			lifecycle.fail(reason);
		}

		tracing::debug!(state = %lifecycle.state(), "threads.worker.exit");
		lifecycle.emit(WorkerEventKind::Exited);
	}

	async fn drive(self) {
		let Self {
			lifecycle,
			factory,
			inbox,
			..
		} = self;
		// Fires on terminate and on failures the engine reports through its context.
		let cancel = lifecycle.cancel.clone();
		let mut engine = factory.create(&lifecycle.entry);
		let mut ctx = EngineContext::new(lifecycle.id, lifecycle.entry.clone(), lifecycle.emitter(), cancel.clone());

		// Teardown may arrive while the entry is still loading.
		let loaded = tokio::select! {
			biased;
			_ = cancel.cancelled() => return,
			res = engine.load(&mut ctx) => res,
		};
		if let Err(reason) = loaded {
			lifecycle.fail(format!("load failed: {reason}"));
			return;
		}
		if lifecycle.mark_running() {
			loop {
				let message = tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					msg = inbox.recv() => match msg {
						Some(msg) => msg,
						None => break,
					},
				};
				// Not cancel-aware: an in-flight message always completes.
				if let Err(reason) = engine.handle(message, &mut ctx).await {
					lifecycle.fail(reason);
					break;
				}
			}
		}
		inbox.close();
		engine.unload(&mut ctx).await;
	}
}
