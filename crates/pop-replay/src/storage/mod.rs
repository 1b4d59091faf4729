// SPDX-License-Identifier: GPL-3.0

//! Layered storage.
//!
//! A fork's state is a chain of [`StorageLayer`]s ending at the remote storage layer.
//! Every block owns its top layer; reads walk the chain top-down and stop at the first
//! layer holding an entry for the key, including deletion markers.

mod local;

pub use local::{StorageLayer, StorageValue};

use crate::error::StorageError;
use async_trait::async_trait;

/// Anything a storage read can be served from: a local layer or the remote base.
#[async_trait]
pub trait StorageProvider: Send + Sync {
	/// Get storage value.
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

	/// Up to `page_size` keys starting with `prefix`, in ascending order and strictly
	/// after `start_key` when given.
	async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, StorageError>;

	/// The first key starting with `prefix` strictly after `key`.
	async fn next_key(&self, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.keys_paged(prefix, 1, Some(key)).await?.into_iter().next())
	}
}

/// Key of a plain storage value: `twox_128(pallet) ++ twox_128(item)`.
pub fn storage_value_key(pallet: &[u8], item: &[u8]) -> Vec<u8> {
	[sp_core::twox_128(pallet), sp_core::twox_128(item)].concat()
}

/// Key of a `Twox64Concat` map entry: `twox_128(pallet) ++ twox_128(item) ++ twox_64(key) ++ key`.
pub fn twox64_concat_key(pallet: &[u8], item: &[u8], encoded_key: &[u8]) -> Vec<u8> {
	let mut key = storage_value_key(pallet, item);
	key.extend(sp_core::twox_64(encoded_key));
	key.extend_from_slice(encoded_key);
	key
}
