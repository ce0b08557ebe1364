use crate::{
	DispatchBridge, EngineFactory, EventSubscription, Manifest, Message, PreloadReport, Result, ShutdownReport, ThreadError, ThreadRegistry, ThreadsConfig, WorkerEntry,
	WorkerEvent, WorkerId, WorkerIds, WorkerSnapshot, WorkerState,
};

/// Host-facing entry point: the only surface the rest of the application uses.
///
/// Owns the registry and its dispatch bridge. Dropping the manager (and every
/// clone of its registry) tears down all workers.
#[derive(Debug)]
pub struct ThreadManager {
	config: ThreadsConfig,
	registry: ThreadRegistry,
	dispatch: DispatchBridge,
}

impl ThreadManager {
	pub fn new(config: ThreadsConfig, factory: impl EngineFactory) -> Self {
		let registry = ThreadRegistry::new(factory, config.context_options());
		let dispatch = DispatchBridge::new(registry.clone());
		Self { config, registry, dispatch }
	}

	pub fn config(&self) -> &ThreadsConfig {
		&self.config
	}

	pub fn registry(&self) -> &ThreadRegistry {
		&self.registry
	}

	pub fn dispatch(&self) -> &DispatchBridge {
		&self.dispatch
	}

	/// Preloads `manifest`, entry `i` under id `i`, and waits until every
	/// entry is running or failed.
	pub async fn preload(&self, manifest: &Manifest) -> Result<PreloadReport> {
		crate::preload(&self.registry, manifest, self.config.load_timeout()).await
	}

	/// Preloads the configured `preloaded_entry_paths`.
	///
	/// A malformed path fails only its own position.
	pub async fn preload_configured(&self) -> Result<PreloadReport> {
		self.preload(&self.config.manifest()).await
	}

	/// Starts an on-demand worker under a fresh id.
	pub fn create(&self, entry: WorkerEntry) -> WorkerId {
		self.registry.start(entry)
	}

	/// Starts an on-demand worker from a script path carrying the configured extension.
	pub fn create_from_path(&self, path: &str) -> Result<WorkerId> {
		let entry = WorkerEntry::from_script_path(path, &self.config.script_extension)?;
		Ok(self.create(entry))
	}

	pub fn send(&self, id: WorkerId, message: Message) -> Result<()> {
		self.dispatch.send_to(id, message)
	}

	pub fn destroy(&self, id: WorkerId) -> Result<()> {
		self.registry.destroy(id)
	}

	pub fn list(&self) -> WorkerIds {
		self.registry.list()
	}

	pub fn get(&self, id: WorkerId) -> Result<WorkerSnapshot> {
		self.registry.get(id)
	}

	/// Registers `handler` for events from the worker under `id`.
	pub fn subscribe<H>(&self, id: WorkerId, handler: H) -> Result<EventSubscription>
	where
		H: FnMut(WorkerEvent) + Send + 'static,
	{
		self.dispatch.on_event(id, handler)
	}

	/// Waits until the worker under `id` is running, or reports why it failed.
	///
	/// A worker destroyed while waiting yields `ContextNotRunning` in `Terminated`.
	pub async fn wait_running(&self, id: WorkerId) -> Result<()> {
		match self.registry.wait_settled(id).await? {
			WorkerState::Running => Ok(()),
			state => Err(ThreadError::ContextNotRunning { id, state }),
		}
	}

	/// See [`ThreadRegistry::compact_ids`].
	pub fn compact_ids(&self) -> WorkerId {
		self.registry.compact_ids()
	}

	/// Terminates all workers, waiting up to the configured shutdown timeout.
	pub async fn shutdown(&self) -> ShutdownReport {
		self.registry.shutdown(self.config.shutdown_timeout()).await
	}
}
