//! Registry of isolated script worker threads.
//!
//! A host application owns one [`ThreadManager`]. At startup it preloads an
//! ordered manifest of worker entries (entry `i` becomes [`WorkerId`] `i`),
//! and afterwards creates, messages, observes and destroys workers by id.
//! Each worker runs its [`ScriptEngine`] on a dedicated OS thread; the host
//! never holds a reference into a worker, only its id.

mod config;
mod context;
mod dispatch;
mod engine;
mod entry;
mod error;
mod event;
mod id;
mod manager;
mod preload;
mod registry;
#[cfg(test)]
mod testing;

pub use config::ThreadsConfig;
pub use context::{ContextOptions, WorkerSnapshot, WorkerState};
pub use dispatch::{DispatchBridge, EventSubscription};
pub use engine::{EngineContext, EngineFactory, EventEmitter, Message, ScriptEngine};
pub use entry::{Manifest, ManifestSlot, WorkerEntry};
pub use error::{ConfigError, Result, ThreadError};
pub use event::{WorkerEvent, WorkerEventKind};
pub use id::{IdAllocator, WorkerId};
pub use manager::ThreadManager;
pub use preload::{PreloadReport, preload};
pub use registry::{ShutdownReport, ThreadRegistry, WorkerIds};
