//! Runtime primitives shared by skein worker threads and their host.
//!
//! * [`spawn`] / [`current_handle`]: host-side task spawning with a global
//!   runtime fallback for callers outside any tokio runtime.
//! * [`spawn_named_thread`]: dedicated OS threads for worker contexts.
//! * [`Mailbox`]: bounded, fail-fast FIFO queue between host and worker.

mod mailbox;
mod panic;
mod spawn;

pub use mailbox::{Mailbox, MailboxReceiver, MailboxSendError, MailboxSender};
pub use panic::panic_message;
pub use spawn::{current_handle, spawn, spawn_named_thread};
