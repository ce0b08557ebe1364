use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Returns the ambient tokio handle, falling back to a shared background runtime
/// when called from outside any runtime.
pub fn current_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("skein-host-global")
			.build()
			.expect("failed to build skein host runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async host task. `task` labels the spawn in traces.
#[allow(clippy::disallowed_methods)]
pub fn spawn<F>(task: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task, "worker.spawn");
	current_handle().spawn(fut)
}

/// Spawns a dedicated named OS thread.
pub fn spawn_named_thread<F, R>(name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}
