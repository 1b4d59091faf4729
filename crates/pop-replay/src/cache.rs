// SPDX-License-Identifier: GPL-3.0

//! Persistence interface for remote storage values.
//!
//! Values fetched from the live chain never change for a given block, so they can be
//! kept across runs. [`StorageCache`] is the seam a durable backend plugs into; the
//! crate ships [`InMemoryStorageCache`], which keeps values for the lifetime of the
//! process. Backends report lock contention as [`CacheError::Busy`], and callers go
//! through [`with_retry`], which retries only that error.

use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, future::Future, time::Duration};
use subxt::config::substrate::H256;

/// Attempts made for one cache operation before contention is reported.
const MAX_ATTEMPTS: u32 = 5;
/// Delay before the first retry; doubled on each further retry.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Storage values keyed by block hash and storage key.
///
/// Reads distinguish three states:
/// * `Ok(Some(Some(value)))` - cached with a value
/// * `Ok(Some(None))` - cached as empty (the key holds no value at that block)
/// * `Ok(None)` - not cached
#[async_trait]
pub trait StorageCache: Send + Sync {
	/// Get a cached storage value.
	async fn get(&self, block_hash: H256, key: &[u8])
	-> Result<Option<Option<Vec<u8>>>, CacheError>;

	/// Cache a storage value, `None` recording that the key is empty.
	async fn set(&self, block_hash: H256, key: &[u8], value: Option<&[u8]>)
	-> Result<(), CacheError>;

	/// Get multiple cached values, in the order of `keys`.
	async fn get_batch(
		&self,
		block_hash: H256,
		keys: &[Vec<u8>],
	) -> Result<Vec<Option<Option<Vec<u8>>>>, CacheError> {
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			values.push(self.get(block_hash, key).await?);
		}
		Ok(values)
	}

	/// Cache multiple values.
	async fn set_batch(
		&self,
		block_hash: H256,
		entries: &[(Vec<u8>, Option<Vec<u8>>)],
	) -> Result<(), CacheError> {
		for (key, value) in entries {
			self.set(block_hash, key, value.as_deref()).await?;
		}
		Ok(())
	}
}

/// Process-local [`StorageCache`].
#[derive(Debug, Default)]
pub struct InMemoryStorageCache {
	entries: RwLock<HashMap<(H256, Vec<u8>), Option<Vec<u8>>>>,
}

impl InMemoryStorageCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of cached entries across all blocks.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[async_trait]
impl StorageCache for InMemoryStorageCache {
	async fn get(
		&self,
		block_hash: H256,
		key: &[u8],
	) -> Result<Option<Option<Vec<u8>>>, CacheError> {
		Ok(self.entries.read().get(&(block_hash, key.to_vec())).cloned())
	}

	async fn set(
		&self,
		block_hash: H256,
		key: &[u8],
		value: Option<&[u8]>,
	) -> Result<(), CacheError> {
		self.entries.write().insert((block_hash, key.to_vec()), value.map(|v| v.to_vec()));
		Ok(())
	}

	async fn set_batch(
		&self,
		block_hash: H256,
		entries: &[(Vec<u8>, Option<Vec<u8>>)],
	) -> Result<(), CacheError> {
		let mut map = self.entries.write();
		for (key, value) in entries {
			map.insert((block_hash, key.clone()), value.clone());
		}
		Ok(())
	}
}

/// Run a cache operation, retrying with exponential backoff while the backend is busy.
pub async fn with_retry<T, F, Fut>(mut operation: F) -> Result<T, CacheError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, CacheError>>,
{
	let mut backoff = INITIAL_BACKOFF;
	let mut attempt = 1;
	loop {
		match operation().await {
			Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
				log::debug!(target: "pop_replay::cache", "cache busy, retrying in {backoff:?}");
				tokio::time::sleep(backoff).await;
				backoff *= 2;
				attempt += 1;
			},
			result => return result,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	};

	#[tokio::test]
	async fn in_memory_cache_works() {
		let cache = InMemoryStorageCache::new();
		let block_hash = H256::from([1u8; 32]);

		assert!(cache.get(block_hash, b"key").await.unwrap().is_none());
		cache.set(block_hash, b"key", Some(b"value")).await.unwrap();
		assert_eq!(cache.get(block_hash, b"key").await.unwrap(), Some(Some(b"value".to_vec())));
	}

	#[tokio::test]
	async fn cache_empty_value() {
		let cache = InMemoryStorageCache::new();
		let block_hash = H256::from([2u8; 32]);

		cache.set(block_hash, b"empty", None).await.unwrap();
		assert_eq!(cache.get(block_hash, b"empty").await.unwrap(), Some(None));
	}

	#[tokio::test]
	async fn batch_operations() {
		let cache = InMemoryStorageCache::new();
		let block_hash = H256::from([3u8; 32]);
		let entries = vec![
			(b"key1".to_vec(), Some(b"value1".to_vec())),
			(b"key2".to_vec(), None),
		];
		cache.set_batch(block_hash, &entries).await.unwrap();

		let keys = vec![b"key1".to_vec(), b"key2".to_vec(), b"key3".to_vec()];
		let results = cache.get_batch(block_hash, &keys).await.unwrap();
		assert_eq!(results, vec![Some(Some(b"value1".to_vec())), Some(None), None]);
	}

	#[tokio::test]
	async fn different_blocks_have_separate_storage() {
		let cache = InMemoryStorageCache::new();
		cache.set(H256::from([1u8; 32]), b"key", Some(b"a")).await.unwrap();
		assert!(cache.get(H256::from([2u8; 32]), b"key").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn retries_only_while_busy() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();
		let result = with_retry(|| {
			let counter = counter.clone();
			async move {
				if counter.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(CacheError::Busy)
				} else {
					Ok(7)
				}
			}
		})
		.await;
		assert_eq!(result.unwrap(), 7);
		assert_eq!(attempts.load(Ordering::SeqCst), 3);

		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();
		let result: Result<(), _> = with_retry(|| {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(CacheError::Backend("disk full".into()))
			}
		})
		.await;
		assert!(matches!(result, Err(CacheError::Backend(_))));
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn gives_up_after_bounded_attempts() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();
		let result: Result<(), _> = with_retry(|| {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(CacheError::Busy)
			}
		})
		.await;
		assert!(matches!(result, Err(CacheError::Busy)));
		assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
	}
}
