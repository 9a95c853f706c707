//! Serial task queue
//!
//! Every state mutation and proof construction runs as a task on one
//! [`SerialQueue`]. Tasks run strictly one at a time in submission order; a
//! failing or panicking task only affects its own caller. With a [`DbMutex`]
//! the worker additionally holds a lease in the shared database while each
//! task runs, so processes sharing a storage volume never interleave.

mod mutex;

pub use mutex::DbMutex;

use crate::storage::StorageError;

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("Serial queue has been cancelled")]
	Cancelled,

	#[error("Task panicked")]
	Panicked,

	#[error("Failed to acquire lease: {0}")]
	Lease(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
	Accepting,
	/// Cancelled, the running task may still be finishing.
	Draining,
	Stopped,
}

/// A queued task. Called with `None` to run it, or with the error it must
/// resolve its caller with instead.
type Job = Box<dyn FnOnce(Option<QueueError>) -> BoxFuture<'static, ()> + Send>;

pub struct SerialQueue {
	sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
	state: watch::Sender<QueueState>,
}

impl SerialQueue {
	/// Starts the worker. Must be called within a tokio runtime.
	pub fn new(mutex: Option<DbMutex>) -> Self {
		let (sender, receiver) = mpsc::unbounded_channel();
		let (state, _) = watch::channel(QueueState::Accepting);
		tokio::spawn(run_worker(receiver, state.clone(), mutex));
		Self {
			sender: Mutex::new(Some(sender)),
			state,
		}
	}

	pub fn state(&self) -> QueueState {
		*self.state.borrow()
	}

	/// Enqueues `task` and resolves with its output once it has run.
	pub async fn push<F, Fut, T>(&self, task: F) -> Result<T, QueueError>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = T> + Send + 'static,
		T: Send + 'static,
	{
		let (tx, rx) = oneshot::channel();
		let job: Job = Box::new(move |failure| {
			async move {
				let result = match failure {
					Some(e) => Err(e),
					None => AssertUnwindSafe(task())
						.catch_unwind()
						.await
						.map_err(|_| QueueError::Panicked),
				};
				let _ = tx.send(result);
			}
			.boxed()
		});

		{
			let sender = self.sender.lock().map_err(|_| QueueError::Cancelled)?;
			let sender = sender.as_ref().ok_or(QueueError::Cancelled)?;
			sender.send(job).map_err(|_| QueueError::Cancelled)?;
		}

		// A dropped job means the queue was cancelled before it ran.
		rx.await.map_err(|_| QueueError::Cancelled)?
	}

	/// Stops accepting tasks. The running task completes, queued ones are
	/// rejected with [`QueueError::Cancelled`].
	pub fn cancel(&self) {
		if let Ok(mut sender) = self.sender.lock() {
			if sender.take().is_some() {
				debug!("Serial queue cancelled");
			}
		}
		self.state.send_if_modified(|state| {
			if *state == QueueState::Accepting {
				*state = QueueState::Draining;
				true
			} else {
				false
			}
		});
	}

	/// Resolves once the worker has exited after a cancel.
	pub async fn stopped(&self) {
		let mut state = self.state.subscribe();
		let _ = state.wait_for(|s| *s == QueueState::Stopped).await;
	}
}

async fn run_worker(
	mut receiver: mpsc::UnboundedReceiver<Job>,
	state: watch::Sender<QueueState>,
	mutex: Option<DbMutex>,
) {
	while let Some(job) = receiver.recv().await {
		if *state.borrow() != QueueState::Accepting {
			drop(job);
			continue;
		}
		match &mutex {
			None => job(None).await,
			Some(mutex) => {
				let mut job = Some(job);
				let task = async {
					if let Some(job) = job.take() {
						job(None).await;
					}
				};
				if let Err(e) = mutex.run_exclusive(task).await {
					warn!("Could not take lease {} for task: {}", mutex.name(), e);
					if let Some(job) = job.take() {
						job(Some(QueueError::Lease(e))).await;
					}
				}
			}
		}
	}
	state.send_replace(QueueState::Stopped);
	debug!("Serial queue worker stopped");
}
