//! Event system for the sync engine.
//!
//! Components publish events through an [`EventDispatcher`]. Handlers are
//! registered with [`EventDispatcher::subscribe`], which returns a
//! [`HandlerId`] the owner keeps and later passes to
//! [`EventDispatcher::unsubscribe`]; the dispatcher never holds a handler
//! longer than its registration. Events that other processes care about are
//! additionally posted on a [`BroadcastChannel`], a best-effort side channel
//! that no consumer relies on for correctness.

use crate::types::{PublicKey, RollupMarker};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::error;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Trait for handling events of type `E`.
pub trait EventHandler<E>: Send + Sync {
	/// Handle an event. Called synchronously from the dispatching task.
	fn handle(&self, event: &E) -> HandlerResult;

	/// Get the name of this handler for logging and diagnostics.
	fn name(&self) -> &str;
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnHandler<F> {
	name: String,
	f: F,
}

impl<F> FnHandler<F> {
	pub fn new<E>(name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&E) -> HandlerResult + Send + Sync,
	{
		Self { name: name.into(), f }
	}
}

impl<E, F> EventHandler<E> for FnHandler<F>
where
	F: Fn(&E) -> HandlerResult + Send + Sync,
{
	fn handle(&self, event: &E) -> HandlerResult {
		(self.f)(event)
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// Registration handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Dispatcher fanning events out to every registered handler.
pub struct EventDispatcher<E> {
	handlers: Mutex<Vec<(HandlerId, Arc<dyn EventHandler<E>>)>>,
	next_id: AtomicU64,
}

impl<E> Default for EventDispatcher<E> {
	fn default() -> Self {
		Self {
			handlers: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(0),
		}
	}
}

impl<E> EventDispatcher<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a handler. Handlers are called in registration order.
	pub fn subscribe(&self, handler: Arc<dyn EventHandler<E>>) -> HandlerId {
		let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.handlers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push((id, handler));
		id
	}

	/// Returns false if the handler was not registered.
	pub fn unsubscribe(&self, id: HandlerId) -> bool {
		let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
		let before = handlers.len();
		handlers.retain(|(handler_id, _)| *handler_id != id);
		handlers.len() != before
	}

	pub fn clear(&self) {
		self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clear();
	}

	pub fn handler_count(&self) -> usize {
		self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	/// Dispatch an event to all registered handlers.
	///
	/// Errors from handlers are logged, but do not stop other handlers from running.
	pub fn dispatch(&self, event: &E) {
		let handlers: Vec<_> = self
			.handlers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.map(|(_, handler)| handler.clone())
			.collect();
		for handler in handlers {
			if let Err(e) = handler.handle(event) {
				error!("Handler {} failed to process event: {}", handler.name(), e);
			}
		}
	}
}

/// Events emitted by the CoreSdk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SdkEvent {
	/// A tracked account applied new blocks or a local proof.
	#[serde(rename_all = "camelCase")]
	AccountStateUpdated { account_public_key: PublicKey },
	/// The core tree advanced.
	#[serde(rename_all = "camelCase")]
	WorldStateUpdated {
		synced_to_rollup: RollupMarker,
		latest_rollup_id: RollupMarker,
	},
	/// The SDK was destroyed. Always the last event.
	Destroyed,
	/// The rollup provider runs a different server version.
	#[serde(rename_all = "camelCase")]
	VersionMismatch { server_version: String },
}

impl SdkEvent {
	/// Whether the event is mirrored to other processes.
	pub fn is_broadcast(&self) -> bool {
		matches!(self, Self::AccountStateUpdated { .. } | Self::WorldStateUpdated { .. })
	}
}

/// An event posted by the SDK instance `origin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
	pub origin: String,
	pub event: SdkEvent,
}

/// Best-effort notification bus between SDK instances sharing storage.
pub trait BroadcastChannel: Send + Sync {
	fn post(&self, message: BroadcastMessage);
	fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage>;
}

/// [`BroadcastChannel`] connecting instances that live in one process.
#[derive(Clone)]
pub struct LocalBroadcastChannel {
	sender: broadcast::Sender<BroadcastMessage>,
}

impl LocalBroadcastChannel {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}
}

impl Default for LocalBroadcastChannel {
	fn default() -> Self {
		Self::new(64)
	}
}

impl BroadcastChannel for LocalBroadcastChannel {
	fn post(&self, message: BroadcastMessage) {
		// No subscribers is not an error.
		let _ = self.sender.send(message);
	}

	fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
		self.sender.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unsubscribed_handlers_stop_receiving() {
		let dispatcher = EventDispatcher::<u32>::new();
		let seen = Arc::new(Mutex::new(Vec::new()));

		let sink = seen.clone();
		let first = dispatcher.subscribe(Arc::new(FnHandler::new("first", move |e: &u32| {
			sink.lock().unwrap().push(("first", *e));
			Ok(())
		})));
		let sink = seen.clone();
		dispatcher.subscribe(Arc::new(FnHandler::new("second", move |e: &u32| {
			sink.lock().unwrap().push(("second", *e));
			Ok(())
		})));

		dispatcher.dispatch(&1);
		assert!(dispatcher.unsubscribe(first));
		assert!(!dispatcher.unsubscribe(first));
		dispatcher.dispatch(&2);

		assert_eq!(*seen.lock().unwrap(), vec![("first", 1), ("second", 1), ("second", 2)]);
	}

	#[test]
	fn failing_handlers_do_not_block_others() {
		let dispatcher = EventDispatcher::<u32>::new();
		let seen = Arc::new(AtomicU64::new(0));
		dispatcher.subscribe(Arc::new(FnHandler::new("failing", |_: &u32| Err("nope".into()))));
		let counter = seen.clone();
		dispatcher.subscribe(Arc::new(FnHandler::new("counting", move |_: &u32| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})));

		dispatcher.dispatch(&0);
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn sdk_events_serialize_with_a_type_tag() {
		let event = SdkEvent::WorldStateUpdated {
			synced_to_rollup: 3,
			latest_rollup_id: 5,
		};
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(
			json,
			serde_json::json!({"type": "worldStateUpdated", "syncedToRollup": 3, "latestRollupId": 5})
		);
		assert!(event.is_broadcast());
		assert!(!SdkEvent::Destroyed.is_broadcast());
	}

	#[tokio::test]
	async fn local_broadcast_reaches_every_subscriber() {
		let channel = LocalBroadcastChannel::default();
		let mut a = channel.subscribe();
		let mut b = channel.subscribe();
		let message = BroadcastMessage {
			origin: "x".to_string(),
			event: SdkEvent::Destroyed,
		};
		channel.post(message.clone());
		assert_eq!(a.recv().await.unwrap(), message);
		assert_eq!(b.recv().await.unwrap(), message);
	}
}
