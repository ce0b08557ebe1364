//! Scripted engines for unit tests. Behaviour is picked from the entry name.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{ContextOptions, EngineContext, EngineFactory, Message, ScriptEngine, ThreadRegistry, WorkerEntry, WorkerEvent, WorkerEventKind};

enum Behavior {
	/// Emits every message back.
	Echo,
	/// Load fails.
	FailLoad,
	/// Load panics.
	PanicLoad,
	/// Load takes the given time.
	SlowLoad(Duration),
	/// Load never finishes.
	Stall,
	/// Handling takes the given time per message, then echoes.
	SlowHandle(Duration),
	/// Handling fails on this message value.
	FailOn(i64),
	/// Handling panics.
	PanicHandle,
	/// Loads, then reports a fatal error from a background task after the given time.
	CrashAfter(Duration),
}

impl Behavior {
	fn parse(entry: &str) -> Self {
		let (name, arg) = entry.split_once(':').unwrap_or((entry, ""));
		let millis = || Duration::from_millis(arg.parse().unwrap_or(50));
		match name {
			"fail-load" => Self::FailLoad,
			"panic-load" => Self::PanicLoad,
			"slow-load" => Self::SlowLoad(millis()),
			"stall" => Self::Stall,
			"slow-handle" => Self::SlowHandle(millis()),
			"fail-on" => Self::FailOn(arg.parse().unwrap_or(0)),
			"panic" => Self::PanicHandle,
			"crash-after" => Self::CrashAfter(millis()),
			_ => Self::Echo,
		}
	}
}

struct ScriptedEngine {
	behavior: Behavior,
	unloads: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl ScriptEngine for ScriptedEngine {
	async fn load(&mut self, ctx: &mut EngineContext) -> Result<(), String> {
		match self.behavior {
			Behavior::FailLoad => Err(format!("cannot resolve module {}", ctx.entry())),
			Behavior::PanicLoad => panic!("loader exploded"),
			Behavior::SlowLoad(delay) => {
				tokio::time::sleep(delay).await;
				Ok(())
			}
			Behavior::Stall => std::future::pending().await,
			Behavior::CrashAfter(delay) => {
				let emitter = ctx.emitter();
				skein_worker::spawn("test.crash", async move {
					tokio::time::sleep(delay).await;
					emitter.fail("interpreter crashed");
				});
				Ok(())
			}
			_ => Ok(()),
		}
	}

	async fn handle(&mut self, message: Message, ctx: &mut EngineContext) -> Result<(), String> {
		match self.behavior {
			Behavior::SlowHandle(delay) => tokio::time::sleep(delay).await,
			Behavior::FailOn(bad) if message.as_i64() == Some(bad) => return Err(format!("rejected {message}")),
			Behavior::PanicHandle => panic!("handler exploded"),
			_ => {}
		}
		ctx.emit(message);
		Ok(())
	}

	async fn unload(&mut self, _ctx: &mut EngineContext) {
		self.unloads.fetch_add(1, Ordering::SeqCst);
	}
}

/// Factory producing [`ScriptedEngine`]s and counting unloads.
#[derive(Clone, Default)]
pub(crate) struct TestFactory {
	pub unloads: Arc<AtomicUsize>,
}

impl EngineFactory for TestFactory {
	fn create(&self, entry: &WorkerEntry) -> Box<dyn ScriptEngine> {
		Box::new(ScriptedEngine {
			behavior: Behavior::parse(entry.as_str()),
			unloads: Arc::clone(&self.unloads),
		})
	}
}

pub(crate) fn entry(name: &str) -> WorkerEntry {
	WorkerEntry::new(name).expect("test entry should be valid")
}

pub(crate) fn registry() -> ThreadRegistry {
	ThreadRegistry::new(TestFactory::default(), ContextOptions::default())
}

/// Waits up to two seconds for the next event matching `pred`.
pub(crate) async fn next_event(rx: &mut broadcast::Receiver<WorkerEvent>, pred: impl Fn(&WorkerEventKind) -> bool) -> WorkerEvent {
	tokio::time::timeout(Duration::from_secs(2), async {
		loop {
			match rx.recv().await {
				Ok(event) if pred(&event.kind) => return event,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
			}
		}
	})
	.await
	.expect("timed out waiting for worker event")
}
