// SPDX-License-Identifier: GPL-3.0

//! Copy-on-write storage layer.
//!
//! ```text
//! get(key) ──► entry in this layer? ── yes ──► value, or None if deleted
//!                   │
//!                   no
//!                   ▼
//!             under a deleted prefix? ── yes ──► None
//!                   │
//!                   no
//!                   ▼
//!             ask the parent
//! ```
//!
//! Values served by a parent are never copied into the layer.

use crate::{error::StorageError, storage::StorageProvider};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};

/// A change recorded by a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageValue {
	/// The key holds this value.
	Value(Vec<u8>),
	/// The key was deleted.
	Deleted,
	/// Every key starting with the entry's key was deleted.
	DeletedPrefix,
}

impl StorageValue {
	fn into_option(self) -> Option<Vec<u8>> {
		match self {
			StorageValue::Value(v) => Some(v),
			StorageValue::Deleted | StorageValue::DeletedPrefix => None,
		}
	}
}

/// Storage layer recording modifications on top of a parent provider.
///
/// The parent is never modified. Once a layer has been committed as a block's state
/// nothing writes to it again; further changes go into a layer pushed on top.
pub struct StorageLayer {
	parent: Arc<dyn StorageProvider>,
	entries: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
	deleted_prefixes: RwLock<Vec<Vec<u8>>>,
}

impl StorageLayer {
	/// Create an empty layer on top of `parent`.
	pub fn new(parent: Arc<dyn StorageProvider>) -> Self {
		Self {
			parent,
			entries: RwLock::new(BTreeMap::new()),
			deleted_prefixes: RwLock::new(Vec::new()),
		}
	}

	/// A new, empty layer on top of this one.
	pub fn push(self: &Arc<Self>) -> Arc<StorageLayer> {
		Arc::new(StorageLayer::new(self.clone()))
	}

	/// The provider this layer falls back to.
	pub fn parent(&self) -> &Arc<dyn StorageProvider> {
		&self.parent
	}

	/// Set a storage value, `None` deleting the key.
	pub fn set(&self, key: &[u8], value: Option<&[u8]>) {
		self.entries.write().insert(key.to_vec(), value.map(|v| v.to_vec()));
	}

	/// Set many storage values at once.
	pub fn set_all(&self, entries: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>) {
		let mut map = self.entries.write();
		for (key, value) in entries {
			map.insert(key, value);
		}
	}

	/// Delete every key starting with `prefix`, including ones set earlier in this layer.
	pub fn delete_prefix(&self, prefix: &[u8]) {
		self.entries.write().retain(|key, _| !key.starts_with(prefix));
		let mut prefixes = self.deleted_prefixes.write();
		if !prefixes.iter().any(|p| prefix.starts_with(p)) {
			prefixes.retain(|p| !p.starts_with(prefix));
			prefixes.push(prefix.to_vec());
		}
	}

	/// What this layer alone says about `key`: `Some(value)` if it has an entry or a
	/// deleted prefix covers the key, `None` if the answer lies in a parent.
	pub fn lookup(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
		if let Some(value) = self.entries.read().get(key) {
			return Some(value.clone());
		}
		if self.deleted_prefixes.read().iter().any(|p| key.starts_with(p)) {
			return Some(None);
		}
		None
	}

	/// Every change recorded by this layer, prefix deletions first.
	pub fn diff(&self) -> Vec<(Vec<u8>, StorageValue)> {
		let mut diff: Vec<_> = self
			.deleted_prefixes
			.read()
			.iter()
			.map(|p| (p.clone(), StorageValue::DeletedPrefix))
			.collect();
		diff.extend(self.entries.read().iter().map(|(k, v)| {
			(k.clone(), v.clone().map_or(StorageValue::Deleted, StorageValue::Value))
		}));
		diff
	}

	/// Key/value changes of this layer, excluding prefix deletions.
	pub fn changes(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
		self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}

	/// Whether the layer records no change at all.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty() && self.deleted_prefixes.read().is_empty()
	}

	fn hides(&self, key: &[u8]) -> bool {
		match self.entries.read().get(key) {
			Some(value) => value.is_none(),
			None => self.deleted_prefixes.read().iter().any(|p| key.starts_with(p)),
		}
	}

	/// Keys with a value set in this layer, under `prefix`, in `(after, until]`.
	fn local_keys(&self, prefix: &[u8], after: Option<&[u8]>, until: Option<&[u8]>) -> Vec<Vec<u8>> {
		self.entries
			.read()
			.range(prefix.to_vec()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.filter(|(k, v)| {
				v.is_some() &&
					after.is_none_or(|a| k.as_slice() > a) &&
					until.is_none_or(|u| k.as_slice() <= u)
			})
			.map(|(k, _)| k.clone())
			.collect()
	}
}

#[async_trait]
impl StorageProvider for StorageLayer {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		match self.lookup(key) {
			Some(value) => Ok(value),
			None => self.parent.get(key).await,
		}
	}

	/// Merges the parent's ordering with keys inserted and deleted in this layer.
	///
	/// The parent is paged window by window; local keys are only merged up to the last
	/// key of the current parent page so the result never skips a parent key.
	async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, StorageError> {
		if page_size == 0 {
			return Err(StorageError::InvalidPageSize);
		}
		let wanted = page_size as usize;
		let mut keys = Vec::with_capacity(wanted);
		let mut cursor = start_key.map(|k| k.to_vec());
		while keys.len() < wanted {
			let parent_keys = self.parent.keys_paged(prefix, page_size, cursor.as_deref()).await?;
			let exhausted = parent_keys.len() < wanted;
			let upper = if exhausted { None } else { parent_keys.last().cloned() };

			let mut window: BTreeSet<Vec<u8>> =
				parent_keys.into_iter().filter(|k| !self.hides(k)).collect();
			window.extend(self.local_keys(prefix, cursor.as_deref(), upper.as_deref()));
			keys.extend(window.into_iter().take(wanted - keys.len()));

			match upper {
				Some(upper) => cursor = Some(upper),
				None => break,
			}
		}
		Ok(keys)
	}
}
