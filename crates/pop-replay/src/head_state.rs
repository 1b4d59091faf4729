// SPDX-License-Identifier: GPL-3.0

//! Head change notifications.
//!
//! [`EventBus`] is a synchronous publish/subscribe topic: callbacks run on the
//! publishing task, in subscription order. [`HeadState`] tracks the current head of a
//! chain and publishes two topics on every head change:
//!
//! - new heads, to every head subscriber;
//! - storage changes, to storage subscribers whose watched keys were touched by the new
//!   head's own changes.
//!
//! Storage written into an existing head (overrides) is published to storage subscribers
//! only, through [`HeadState::notify_storage`].
//!
//! Unsubscribing takes effect immediately, including from inside a callback of the
//! topic being published.

use crate::{
	block::{Block, changed_in},
	storage::StorageLayer,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::{
	collections::BTreeSet,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};

/// Token returned by a subscription, used to unsubscribe.
pub type SubscriptionId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A typed topic with ordered, synchronous fan-out.
pub struct EventBus<E> {
	next_id: AtomicU64,
	subscribers: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
	// Serializes publishing. Reentrant so a callback may publish on the same bus.
	publishing: ReentrantMutex<()>,
}

impl<E> Default for EventBus<E> {
	fn default() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			subscribers: Mutex::new(Vec::new()),
			publishing: ReentrantMutex::new(()),
		}
	}
}

impl<E> EventBus<E> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.subscribers.lock().push((id, Arc::new(callback)));
		id
	}

	/// Remove a subscription. Returns false if it was not subscribed.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut subscribers = self.subscribers.lock();
		let before = subscribers.len();
		subscribers.retain(|(sub, _)| *sub != id);
		subscribers.len() != before
	}

	pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
		self.subscribers.lock().iter().any(|(sub, _)| *sub == id)
	}

	pub fn len(&self) -> usize {
		self.subscribers.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Call every subscriber with `event`, in subscription order.
	pub fn publish(&self, event: &E) {
		let _guard = self.publishing.lock();
		let snapshot: Vec<_> = self.subscribers.lock().clone();
		for (id, callback) in snapshot {
			// Skip subscribers removed by an earlier callback.
			if self.is_subscribed(id) {
				callback(event);
			}
		}
	}
}

/// Storage changes of a new head, restricted to one subscriber's watched keys.
#[derive(Debug, Clone)]
pub struct StorageChange {
	pub block: Arc<Block>,
	/// Watched keys touched by the block, with their values at the block.
	pub changes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

struct StorageSubscriber {
	id: SubscriptionId,
	keys: BTreeSet<Vec<u8>>,
	callback: Callback<StorageChange>,
}

/// The head of a chain and its subscribers.
pub struct HeadState {
	head: RwLock<Arc<Block>>,
	heads: EventBus<Arc<Block>>,
	next_storage_id: AtomicU64,
	storage: Mutex<Vec<StorageSubscriber>>,
	publishing: ReentrantMutex<()>,
}

impl HeadState {
	pub fn new(head: Arc<Block>) -> Self {
		Self {
			head: RwLock::new(head),
			heads: EventBus::new(),
			next_storage_id: AtomicU64::new(1),
			storage: Mutex::new(Vec::new()),
			publishing: ReentrantMutex::new(()),
		}
	}

	pub fn head(&self) -> Arc<Block> {
		self.head.read().clone()
	}

	/// Call `callback` with every new head.
	pub fn subscribe_head(
		&self,
		callback: impl Fn(&Arc<Block>) + Send + Sync + 'static,
	) -> SubscriptionId {
		self.heads.subscribe(callback)
	}

	pub fn unsubscribe_head(&self, id: SubscriptionId) -> bool {
		self.heads.unsubscribe(id)
	}

	/// Call `callback` for every new head that changes at least one of `keys`.
	pub fn subscribe_storage(
		&self,
		keys: impl IntoIterator<Item = Vec<u8>>,
		callback: impl Fn(&StorageChange) + Send + Sync + 'static,
	) -> SubscriptionId {
		let id = self.next_storage_id.fetch_add(1, Ordering::Relaxed);
		self.storage.lock().push(StorageSubscriber {
			id,
			keys: keys.into_iter().collect(),
			callback: Arc::new(callback),
		});
		id
	}

	pub fn unsubscribe_storage(&self, id: SubscriptionId) -> bool {
		let mut storage = self.storage.lock();
		let before = storage.len();
		storage.retain(|sub| sub.id != id);
		storage.len() != before
	}

	/// Make `block` the head and notify subscribers: head subscribers first, then
	/// storage subscribers.
	pub fn set_head(&self, block: Arc<Block>) {
		let _guard = self.publishing.lock();
		*self.head.write() = block.clone();
		log::debug!("New head #{} ({:?})", block.number, block.hash);

		self.heads.publish(&block);
		self.publish_storage(&block, |key| block.changed_value(key));
	}

	/// Tell storage subscribers about `layers` just written into `block`, without
	/// announcing a new head. Only keys changed by `layers` are reported.
	pub fn notify_storage(&self, block: &Arc<Block>, layers: &[Arc<StorageLayer>]) {
		let _guard = self.publishing.lock();
		self.publish_storage(block, |key| changed_in(layers, key));
	}

	fn publish_storage(
		&self,
		block: &Arc<Block>,
		changed: impl Fn(&[u8]) -> Option<Option<Vec<u8>>>,
	) {
		let snapshot: Vec<_> = self
			.storage
			.lock()
			.iter()
			.map(|sub| (sub.id, sub.keys.clone(), sub.callback.clone()))
			.collect();
		for (id, keys, callback) in snapshot {
			let changes: Vec<_> = keys
				.iter()
				.filter_map(|key| changed(key).map(|value| (key.clone(), value)))
				.collect();
			if changes.is_empty() {
				continue;
			}
			if self.storage.lock().iter().any(|sub| sub.id == id) {
				callback(&StorageChange { block: block.clone(), changes });
			}
		}
	}
}
