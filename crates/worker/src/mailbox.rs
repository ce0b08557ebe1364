use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Mailbox send error. Carries the rejected message back to the caller.
#[derive(Clone, PartialEq, Eq)]
pub enum MailboxSendError<T> {
	/// Mailbox is closed.
	Closed(T),
	/// Queue is at capacity.
	Full(T),
}

impl<T> fmt::Debug for MailboxSendError<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Closed(_) => f.write_str("Closed(..)"),
			Self::Full(_) => f.write_str("Full(..)"),
		}
	}
}

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct MailboxInner<T> {
	capacity: usize,
	state: Mutex<MailboxState<T>>,
	notify_recv: Notify,
}

impl<T> MailboxInner<T> {
	fn close(&self) {
		self.state.lock().closed = true;
		self.notify_recv.notify_waiters();
		self.notify_recv.notify_one();
	}
}

/// Multi-producer mailbox sender.
pub struct MailboxSender<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Single-consumer mailbox receiver. Dropping it closes the mailbox.
pub struct MailboxReceiver<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Bounded FIFO mailbox feeding one worker thread.
///
/// Producers never wait: a full queue is reported as [`MailboxSendError::Full`]
/// so a stalled consumer cannot stall the producer. The consumer side is async
/// and may live on a different runtime than the producers.
pub struct Mailbox<T> {
	tx: MailboxSender<T>,
	rx: MailboxReceiver<T>,
}

impl<T> Clone for MailboxSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Mailbox<T> {
	/// Creates a bounded mailbox.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0, "mailbox capacity must be > 0");
		let inner = Arc::new(MailboxInner {
			capacity,
			state: Mutex::new(MailboxState {
				queue: VecDeque::with_capacity(capacity),
				closed: false,
			}),
			notify_recv: Notify::new(),
		});
		Self {
			tx: MailboxSender { inner: Arc::clone(&inner) },
			rx: MailboxReceiver { inner },
		}
	}

	/// Splits the mailbox into its sender and receiver halves.
	pub fn split(self) -> (MailboxSender<T>, MailboxReceiver<T>) {
		(self.tx, self.rx)
	}
}

impl<T> MailboxSender<T> {
	/// Closes the mailbox. Receivers drain existing items then return `None`.
	pub fn close(&self) {
		self.inner.close();
	}

	/// Non-blocking enqueue.
	pub fn try_send(&self, msg: T) -> Result<(), MailboxSendError<T>> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(MailboxSendError::Closed(msg));
		}
		if state.queue.len() >= self.inner.capacity {
			return Err(MailboxSendError::Full(msg));
		}
		state.queue.push_back(msg);
		drop(state);
		self.inner.notify_recv.notify_one();
		Ok(())
	}
}

impl<T> MailboxReceiver<T> {
	/// Receives one message. Returns `None` once mailbox is closed and drained.
	pub async fn recv(&self) -> Option<T> {
		loop {
			// Register before checking so a send between unlock and await is not lost.
			let notified = self.inner.notify_recv.notified();
			{
				let mut state = self.inner.state.lock();
				if let Some(msg) = state.queue.pop_front() {
					return Some(msg);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Closes the mailbox from the consumer side.
	pub fn close(&self) {
		self.inner.close();
	}
}

impl<T> Drop for MailboxReceiver<T> {
	fn drop(&mut self) {
		self.inner.close();
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn try_send_returns_full_when_at_capacity() {
		let (tx, rx) = Mailbox::new(2).split();

		assert!(tx.try_send(1u32).is_ok());
		assert!(tx.try_send(2).is_ok());
		assert_eq!(tx.try_send(3), Err(MailboxSendError::Full(3)));

		assert_eq!(rx.recv().await, Some(1));
		assert!(tx.try_send(3).is_ok(), "capacity is freed by recv");
		assert_eq!(rx.recv().await, Some(2));
		assert_eq!(rx.recv().await, Some(3));
	}

	#[tokio::test]
	async fn preserves_fifo_order() {
		let (tx, rx) = Mailbox::new(16).split();
		for i in 0..10u32 {
			tx.try_send(i).unwrap();
		}
		tx.close();
		let mut seen = Vec::new();
		while let Some(v) = rx.recv().await {
			seen.push(v);
		}
		assert_eq!(seen, (0..10).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn send_on_closed_mailbox_returns_closed() {
		let (tx, _rx) = Mailbox::new(4).split();
		tx.close();
		assert_eq!(tx.try_send(1u32), Err(MailboxSendError::Closed(1)));
	}

	#[tokio::test]
	async fn recv_drains_then_returns_none_on_close() {
		let (tx, rx) = Mailbox::new(4).split();
		tx.try_send(1u32).unwrap();
		tx.try_send(2).unwrap();
		tx.close();

		assert_eq!(rx.recv().await, Some(1));
		assert_eq!(rx.recv().await, Some(2));
		assert_eq!(rx.recv().await, None);
	}

	#[tokio::test]
	async fn empty_mailbox_recv_blocks_until_send() {
		let (tx, rx) = Mailbox::new(4).split();

		let recv_timeout = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
		assert!(recv_timeout.is_err(), "recv on empty should block");

		tx.try_send(42u32).unwrap();
		assert_eq!(rx.recv().await, Some(42));
	}

	#[tokio::test]
	async fn close_wakes_blocked_receiver() {
		let (tx, rx) = Mailbox::new(4).split();
		let waiter = tokio::spawn(async move { rx.recv().await });
		tokio::time::sleep(Duration::from_millis(10)).await;

		tx.close();
		let got = tokio::time::timeout(Duration::from_millis(200), waiter)
			.await
			.expect("blocked recv should wake on close")
			.unwrap();
		assert_eq!(got, None::<u32>);
	}

	#[tokio::test]
	async fn dropping_receiver_closes_mailbox() {
		let (tx, rx) = Mailbox::new(4).split();
		drop(rx);
		assert_eq!(tx.try_send(5u32), Err(MailboxSendError::Closed(5)));
	}

	#[test]
	fn delivers_across_threads_in_order() {
		const TOTAL: u32 = 500;
		let (tx, rx) = Mailbox::new(8).split();

		let consumer = std::thread::Builder::new()
			.name("mailbox-consumer".into())
			.spawn(move || {
				let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
				rt.block_on(async move {
					let mut received = Vec::new();
					while let Some(v) = rx.recv().await {
						received.push(v);
					}
					received
				})
			})
			.unwrap();

		let mut next = 0;
		while next < TOTAL {
			match tx.try_send(next) {
				Ok(()) => next += 1,
				Err(MailboxSendError::Full(_)) => std::thread::yield_now(),
				Err(MailboxSendError::Closed(_)) => panic!("consumer closed early"),
			}
		}
		tx.close();

		let received = consumer.join().unwrap();
		assert_eq!(received, (0..TOTAL).collect::<Vec<_>>());
	}
}
