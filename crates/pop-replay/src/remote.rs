// SPDX-License-Identifier: GPL-3.0

//! Remote storage layer for lazy-loading state from live chains.
//!
//! [`RemoteStorageLayer`] is the base of every storage stack: any key no local layer
//! holds ends up here and is fetched from the upstream chain at the layer's block.
//!
//! ```text
//! get(key) ──► in flight? ── yes ──► await the running fetch
//!                 │
//!                 no
//!                 ▼
//!           persistence cache hit? ── yes ──► cached value
//!                 │
//!                 no
//!                 ▼
//!           fetch from remote ──► record in cache ──► value
//! ```
//!
//! Key iteration goes through a [`KeyRangeCache`], so walking the same map twice only
//! pages it from the remote once.

use crate::{
	cache::{StorageCache, with_retry},
	error::{RemoteStorageError, StorageError},
	range_cache::KeyRangeCache,
	rpc::RemoteSource,
	storage::StorageProvider,
	strings::rpc::paging::{PREFETCH_BATCH_SIZE, REMOTE_KEYS_PAGE_SIZE},
};
use async_trait::async_trait;
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
use subxt::config::substrate::H256;

type ValueFetch = Shared<BoxFuture<'static, Result<Option<Vec<u8>>, RemoteStorageError>>>;

/// Remote storage layer that lazily fetches state from a live chain at one block.
pub struct RemoteStorageLayer {
	source: Arc<dyn RemoteSource>,
	cache: Option<Arc<dyn StorageCache>>,
	block_hash: H256,
	range_cache: Mutex<KeyRangeCache>,
	/// Running fetches by key, tagged so a finished reader only clears its own fetch.
	inflight: Mutex<HashMap<Vec<u8>, (u64, ValueFetch)>>,
	next_fetch: AtomicU64,
}

impl RemoteStorageLayer {
	/// Create a new remote storage layer.
	///
	/// # Arguments
	/// * `source` - The upstream chain
	/// * `cache` - Optional persistence for fetched values
	/// * `block_hash` - Block hash to query state at
	pub fn new(
		source: Arc<dyn RemoteSource>,
		cache: Option<Arc<dyn StorageCache>>,
		block_hash: H256,
	) -> Self {
		Self {
			source,
			cache,
			block_hash,
			range_cache: Mutex::new(KeyRangeCache::default()),
			inflight: Mutex::new(HashMap::new()),
			next_fetch: AtomicU64::new(0),
		}
	}

	/// A layer over the same source and cache at another block.
	pub fn at(&self, block_hash: H256) -> Self {
		Self::new(self.source.clone(), self.cache.clone(), block_hash)
	}

	/// Get the block hash this layer is querying.
	pub fn block_hash(&self) -> H256 {
		self.block_hash
	}

	/// The upstream chain.
	pub fn source(&self) -> &Arc<dyn RemoteSource> {
		&self.source
	}

	/// Get a storage value, fetching from the remote if not cached.
	///
	/// Concurrent reads of one key share a single fetch.
	pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RemoteStorageError> {
		let (id, fetch) = {
			let mut inflight = self.inflight.lock();
			match inflight.get(key) {
				Some(entry) => entry.clone(),
				None => {
					let fetch = fetch_value(
						self.source.clone(),
						self.cache.clone(),
						self.block_hash,
						key.to_vec(),
					)
					.boxed()
					.shared();
					let id = self.next_fetch.fetch_add(1, Ordering::Relaxed);
					inflight.insert(key.to_vec(), (id, fetch.clone()));
					(id, fetch)
				},
			}
		};
		let result = fetch.await;
		let mut inflight = self.inflight.lock();
		if inflight.get(key).is_some_and(|(current, _)| *current == id) {
			inflight.remove(key);
		}
		result
	}

	/// Get multiple storage values, fetching uncached keys in one remote request.
	///
	/// Results are returned in the order of `keys`.
	pub async fn get_batch(
		&self,
		keys: &[Vec<u8>],
	) -> Result<Vec<Option<Vec<u8>>>, RemoteStorageError> {
		if keys.is_empty() {
			return Ok(vec![]);
		}

		let cached = match &self.cache {
			Some(cache) => with_retry(|| cache.get_batch(self.block_hash, keys)).await?,
			None => vec![None; keys.len()],
		};

		let missing: Vec<usize> = (0..keys.len()).filter(|i| cached[*i].is_none()).collect();
		let mut results: Vec<Option<Vec<u8>>> = cached.into_iter().map(Option::flatten).collect();
		if missing.is_empty() {
			return Ok(results);
		}

		let missing_keys: Vec<Vec<u8>> = missing.iter().map(|i| keys[*i].clone()).collect();
		let fetched = self.source.storage_batch(&missing_keys, self.block_hash).await?;
		if let Some(cache) = &self.cache {
			let entries: Vec<_> = missing_keys.into_iter().zip(fetched.iter().cloned()).collect();
			if let Err(e) = with_retry(|| cache.set_batch(self.block_hash, &entries)).await {
				log::warn!(target: "pop_replay::remote", "failed to cache fetched values: {e}");
			}
		}
		for (index, value) in missing.into_iter().zip(fetched) {
			results[index] = value;
		}
		Ok(results)
	}

	/// Up to `page_size` keys starting with `prefix`, strictly after `start_key` when given.
	///
	/// Prefixes long enough to identify a storage item are walked through the key range
	/// cache and only unknown spans are requested from the remote.
	pub async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, RemoteStorageError> {
		let mut cursor = match start_key {
			Some(key) if key.starts_with(prefix) => Some(key.to_vec()),
			Some(key) if key > prefix => return Ok(vec![]),
			_ => None,
		};
		if page_size == 0 {
			return Ok(vec![]);
		}

		let prefix_length = self.range_cache.lock().prefix_length();
		if prefix.len() < prefix_length {
			return Ok(self
				.source
				.storage_keys_paged(prefix, page_size, cursor.as_deref(), self.block_hash)
				.await?);
		}

		let page_size = page_size as usize;
		let mut keys = Vec::with_capacity(page_size.min(REMOTE_KEYS_PAGE_SIZE as usize));
		while keys.len() < page_size {
			if let Some(current) = &cursor {
				let next = self.range_cache.lock().next(current);
				if let Some(next) = next {
					if !next.starts_with(prefix) {
						break;
					}
					keys.push(next.clone());
					cursor = Some(next);
					continue;
				}
			}

			let batch = self
				.source
				.storage_keys_paged(prefix, REMOTE_KEYS_PAGE_SIZE, cursor.as_deref(), self.block_hash)
				.await?;
			log::trace!(
				target: "pop_replay::remote",
				"fetched {} keys under 0x{}",
				batch.len(),
				hex::encode(prefix)
			);
			{
				let mut range_cache = self.range_cache.lock();
				match &cursor {
					Some(current) => {
						let mut run = Vec::with_capacity(batch.len() + 1);
						run.push(current.clone());
						run.extend(batch.iter().cloned());
						range_cache.feed(&run);
					},
					None => range_cache.feed(&batch),
				}
			}
			let exhausted = batch.len() < REMOTE_KEYS_PAGE_SIZE as usize;
			for key in batch {
				if keys.len() == page_size {
					break;
				}
				cursor = Some(key.clone());
				keys.push(key);
			}
			if exhausted {
				break;
			}
		}
		Ok(keys)
	}

	/// Page every key under `prefix` into the key range cache and, when a persistence
	/// cache is configured, their values into it.
	///
	/// Returns the number of keys found.
	pub async fn prefetch_prefix(&self, prefix: &[u8]) -> Result<usize, RemoteStorageError> {
		let mut total = 0;
		let mut start_key: Option<Vec<u8>> = None;
		loop {
			let keys = self.keys_paged(prefix, REMOTE_KEYS_PAGE_SIZE, start_key.as_deref()).await?;
			if keys.is_empty() {
				break;
			}
			total += keys.len();
			if self.cache.is_some() {
				for chunk in keys.chunks(PREFETCH_BATCH_SIZE) {
					self.get_batch(chunk).await?;
				}
			}
			let last_page = keys.len() < REMOTE_KEYS_PAGE_SIZE as usize;
			start_key = keys.into_iter().last();
			if last_page {
				break;
			}
		}
		log::debug!(
			target: "pop_replay::remote",
			"prefetched {total} keys under 0x{}",
			hex::encode(prefix)
		);
		Ok(total)
	}
}

async fn fetch_value(
	source: Arc<dyn RemoteSource>,
	cache: Option<Arc<dyn StorageCache>>,
	block_hash: H256,
	key: Vec<u8>,
) -> Result<Option<Vec<u8>>, RemoteStorageError> {
	if let Some(cache) = &cache &&
		let Some(cached) = with_retry(|| cache.get(block_hash, &key)).await?
	{
		return Ok(cached);
	}

	let value = source.storage(&key, block_hash).await?;

	if let Some(cache) = &cache &&
		let Err(e) = with_retry(|| cache.set(block_hash, &key, value.as_deref())).await
	{
		log::warn!(target: "pop_replay::remote", "failed to cache 0x{}: {e}", hex::encode(&key));
	}
	Ok(value)
}

#[async_trait]
impl StorageProvider for RemoteStorageLayer {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(RemoteStorageLayer::get(self, key).await?)
	}

	async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, StorageError> {
		Ok(RemoteStorageLayer::keys_paged(self, prefix, page_size, start_key).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{cache::InMemoryStorageCache, testing::MockRemote};
	use std::time::Duration;
	use tokio_test::{assert_pending, assert_ready, task};

	fn key(prefix: u8, suffix: u16) -> Vec<u8> {
		let mut k = vec![prefix; 32];
		k.extend(suffix.to_be_bytes());
		k
	}

	fn remote_with_keys(count: u16) -> Arc<MockRemote> {
		let remote = MockRemote::new();
		for i in 0..count {
			remote.insert_storage(key(7, i), vec![i as u8]);
		}
		remote.insert_storage(key(8, 0), vec![0]);
		Arc::new(remote)
	}

	#[tokio::test]
	async fn get_uses_persistence_cache() {
		let remote = remote_with_keys(3);
		let cache = Arc::new(InMemoryStorageCache::new());
		let layer = RemoteStorageLayer::new(remote.clone(), Some(cache.clone()), remote.head_hash());

		assert_eq!(layer.get(&key(7, 1)).await.unwrap(), Some(vec![1]));
		assert_eq!(layer.get(&key(7, 1)).await.unwrap(), Some(vec![1]));
		assert_eq!(layer.get(b"missing").await.unwrap(), None);
		assert_eq!(layer.get(b"missing").await.unwrap(), None);
		assert_eq!(remote.storage_requests(), 2);
		assert_eq!(cache.len(), 2);
	}

	#[tokio::test]
	async fn concurrent_reads_share_one_fetch() {
		let remote = remote_with_keys(1);
		let layer = Arc::new(RemoteStorageLayer::new(remote.clone(), None, remote.head_hash()));
		remote.hold_storage();

		let reads: Vec<_> = (0..8)
			.map(|_| {
				let layer = layer.clone();
				tokio::spawn(async move { layer.get(&key(7, 0)).await })
			})
			.collect();
		for _ in 0..200 {
			if remote.storage_requests() > 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		// Let every reader reach the running fetch before it completes.
		tokio::time::sleep(Duration::from_millis(50)).await;
		remote.release_storage();

		for read in reads {
			assert_eq!(read.await.unwrap().unwrap(), Some(vec![0]));
		}
		assert_eq!(remote.storage_requests(), 1);
	}

	#[tokio::test]
	async fn late_reader_keeps_a_newer_fetch_in_flight() {
		let remote = remote_with_keys(1);
		let layer = RemoteStorageLayer::new(remote.clone(), None, remote.head_hash());
		let k = key(7, 0);

		remote.hold_storage();
		let mut late = task::spawn(layer.get(&k));
		assert_pending!(late.poll());
		remote.release_storage();
		// Another reader completes the shared fetch and clears it.
		assert_eq!(layer.get(&k).await.unwrap(), Some(vec![0]));
		assert_eq!(remote.storage_requests(), 1);

		remote.hold_storage();
		let mut second = task::spawn(layer.get(&k));
		assert_pending!(second.poll());
		assert_eq!(remote.storage_requests(), 2);

		// The reader of the first fetch finishes only now.
		assert_eq!(assert_ready!(late.poll()).unwrap(), Some(vec![0]));

		let mut third = task::spawn(layer.get(&k));
		assert_pending!(third.poll());
		assert_eq!(remote.storage_requests(), 2);

		remote.release_storage();
		assert_eq!(assert_ready!(second.poll()).unwrap(), Some(vec![0]));
		assert_eq!(assert_ready!(third.poll()).unwrap(), Some(vec![0]));
	}

	#[tokio::test]
	async fn get_batch_only_fetches_uncached_keys() {
		let remote = remote_with_keys(4);
		let cache = Arc::new(InMemoryStorageCache::new());
		let layer = RemoteStorageLayer::new(remote.clone(), Some(cache), remote.head_hash());
		layer.get(&key(7, 0)).await.unwrap();

		let values = layer.get_batch(&[key(7, 0), key(7, 1), b"none".to_vec()]).await.unwrap();
		assert_eq!(values, vec![Some(vec![0]), Some(vec![1]), None]);
		assert_eq!(remote.batch_requests(), 1);
		assert_eq!(remote.last_batch_len(), 2);
	}

	#[tokio::test]
	async fn keys_paged_walks_range_cache_after_first_pass() {
		let remote = remote_with_keys(2500);
		let layer = RemoteStorageLayer::new(remote.clone(), None, remote.head_hash());
		let prefix = vec![7u8; 32];

		let first = layer.keys_paged(&prefix, 2500, None).await.unwrap();
		assert_eq!(first.len(), 2500);
		assert_eq!(first[0], key(7, 0));
		assert_eq!(first[2499], key(7, 2499));
		let requests = remote.keys_requests();

		// A second pass starting inside the range is answered locally.
		let second = layer.keys_paged(&prefix, 10, Some(&key(7, 5))).await.unwrap();
		assert_eq!(second, (6..16).map(|i| key(7, i)).collect::<Vec<_>>());
		assert_eq!(remote.keys_requests(), requests);
	}

	#[tokio::test]
	async fn keys_paged_stops_at_prefix_boundary() {
		let remote = remote_with_keys(3);
		let layer = RemoteStorageLayer::new(remote.clone(), None, remote.head_hash());
		let prefix = vec![7u8; 32];

		let keys = layer.keys_paged(&prefix, 100, None).await.unwrap();
		assert_eq!(keys.len(), 3);
		let after = layer.keys_paged(&prefix, 100, Some(&key(7, 2))).await.unwrap();
		assert!(after.is_empty());
		let beyond = layer.keys_paged(&prefix, 100, Some(&key(9, 0))).await.unwrap();
		assert!(beyond.is_empty());
	}

	#[tokio::test]
	async fn short_prefixes_bypass_range_cache() {
		let remote = remote_with_keys(3);
		let layer = RemoteStorageLayer::new(remote.clone(), None, remote.head_hash());

		let keys = layer.keys_paged(&[7u8; 4], 2, None).await.unwrap();
		assert_eq!(keys, vec![key(7, 0), key(7, 1)]);
		let keys = layer.keys_paged(&[7u8; 4], 2, Some(&key(7, 1))).await.unwrap();
		assert_eq!(keys, vec![key(7, 2)]);
	}

	#[tokio::test]
	async fn prefetch_prefix_fills_caches() {
		let remote = remote_with_keys(1200);
		let cache = Arc::new(InMemoryStorageCache::new());
		let layer = RemoteStorageLayer::new(remote.clone(), Some(cache.clone()), remote.head_hash());

		assert_eq!(layer.prefetch_prefix(&[7u8; 32]).await.unwrap(), 1200);
		assert_eq!(cache.len(), 1200);

		let requests = remote.storage_requests();
		assert_eq!(layer.get(&key(7, 1100)).await.unwrap(), Some(vec![(1100u16) as u8]));
		assert_eq!(remote.storage_requests(), requests);
	}

	#[test]
	fn error_display_rpc() {
		use crate::error::RpcClientError;
		let err = RemoteStorageError::Rpc(RpcClientError::InvalidResponse("test".to_string()));
		assert!(err.to_string().contains("RPC error"));
	}
}
