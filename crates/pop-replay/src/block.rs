// SPDX-License-Identifier: GPL-3.0

//! Block structure for forked blockchain state.
//!
//! A [`Block`] is either a block of the upstream chain at or below the fork point, whose
//! state is served by a [`RemoteStorageLayer`], or a block built locally on top of a parent,
//! whose state is a [`StorageLayer`] holding the changes of that block.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Block #n+1 (local)   layers: [changes of #n+1, dev overrides] │
//! │        │ parent by hash                                      │
//! │        ▼                                                     │
//! │ Block #n (fork point) layers: [empty] ─► RemoteStorageLayer  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything derived from the runtime (code, metadata, version) is computed on first
//! use and kept until `:code` changes in one of the block's layers.

use crate::{
	error::BlockError,
	executor::{CallOutcome, RuntimeCall, RuntimeExecutor},
	remote::RemoteStorageLayer,
	rpc::Header,
	storage::{StorageLayer, StorageProvider},
	strings::{builder::runtime_api, rpc::storage_keys},
};
use parking_lot::{Mutex, RwLock};
use scale::{Decode, Encode};
use serde::{Serialize, Serializer, ser::SerializeSeq};
use std::{collections::BTreeMap, sync::Arc};
use subxt::{Metadata, config::substrate::H256};
use tokio::sync::OnceCell;

/// How a block came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
	/// Replayed from the upstream chain.
	Remote,
	/// Built locally.
	Local,
	/// Built locally at a height chosen with `unsafeBlockHeight`.
	Unsafe,
}

/// Version information reported by `Core_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
	pub spec_name: String,
	pub impl_name: String,
	pub authoring_version: u32,
	pub spec_version: u32,
	pub impl_version: u32,
	#[serde(serialize_with = "serialize_apis")]
	pub apis: Vec<([u8; 8], u32)>,
	pub transaction_version: u32,
	pub state_version: u8,
}

impl RuntimeVersion {
	/// Decode the output of `Core_version`. Fields added by later runtimes are optional.
	pub fn decode(mut bytes: &[u8]) -> Result<Self, scale::Error> {
		let input = &mut bytes;
		Ok(Self {
			spec_name: String::decode(input)?,
			impl_name: String::decode(input)?,
			authoring_version: u32::decode(input)?,
			spec_version: u32::decode(input)?,
			impl_version: u32::decode(input)?,
			apis: Vec::decode(input)?,
			transaction_version: if input.is_empty() { 1 } else { u32::decode(input)? },
			state_version: if input.is_empty() { 0 } else { u8::decode(input)? },
		})
	}

	/// Version of the runtime API `name` (e.g. `AuraApi`), if the runtime exposes it.
	pub fn api_version(&self, name: &str) -> Option<u32> {
		let id = sp_core::blake2_64(name.as_bytes());
		self.apis.iter().find(|(api, _)| *api == id).map(|(_, version)| *version)
	}
}

fn serialize_apis<S: Serializer>(apis: &[([u8; 8], u32)], s: S) -> Result<S::Ok, S::Error> {
	let mut seq = s.serialize_seq(Some(apis.len()))?;
	for (id, version) in apis {
		seq.serialize_element(&(format!("0x{}", hex::encode(id)), version))?;
	}
	seq.end()
}

#[derive(Default)]
struct RuntimeMemo {
	code: Option<Arc<[u8]>>,
	metadata: Option<Arc<Metadata>>,
	version: Option<RuntimeVersion>,
}

/// A block of the forked chain.
///
/// The parent is referenced by hash only and resolved through the blockchain.
pub struct Block {
	/// The block number (height).
	pub number: u32,
	/// The block hash.
	pub hash: H256,
	/// The parent block hash.
	pub parent_hash: H256,
	header: Header,
	origin: BlockOrigin,
	extrinsics: OnceCell<Vec<Vec<u8>>>,
	/// Own layers, bottom to top. The bottom layer sits on the parent's state.
	layers: RwLock<Vec<Arc<StorageLayer>>>,
	remote: Option<Arc<RemoteStorageLayer>>,
	executor: RuntimeExecutor,
	runtime: Mutex<RuntimeMemo>,
}

impl Block {
	/// A block of the upstream chain, with state read from `remote` (which must be at
	/// `hash`).
	pub fn remote(
		hash: H256,
		header: Header,
		remote: Arc<RemoteStorageLayer>,
		executor: RuntimeExecutor,
	) -> Self {
		let base: Arc<dyn StorageProvider> = remote.clone();
		Self {
			number: header.number,
			hash,
			parent_hash: header.parent_hash,
			header,
			origin: BlockOrigin::Remote,
			extrinsics: OnceCell::new(),
			layers: RwLock::new(vec![Arc::new(StorageLayer::new(base))]),
			remote: Some(remote),
			executor,
			runtime: Mutex::new(RuntimeMemo::default()),
		}
	}

	/// A locally built block on top of `parent`, holding `changes` as its own state.
	pub fn child(
		parent: &Block,
		header: Header,
		extrinsics: Vec<Vec<u8>>,
		changes: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
		origin: BlockOrigin,
	) -> Self {
		let layer = parent.storage().push();
		layer.set_all(changes);
		Self {
			number: header.number,
			hash: hash_header(&header),
			parent_hash: header.parent_hash,
			header,
			origin,
			extrinsics: OnceCell::new_with(Some(extrinsics)),
			layers: RwLock::new(vec![layer]),
			remote: None,
			executor: parent.executor.clone(),
			runtime: Mutex::new(RuntimeMemo::default()),
		}
	}

	pub fn header(&self) -> &Header {
		&self.header
	}

	pub fn origin(&self) -> BlockOrigin {
		self.origin
	}

	pub fn is_unsafe(&self) -> bool {
		self.origin == BlockOrigin::Unsafe
	}

	pub fn executor(&self) -> &RuntimeExecutor {
		&self.executor
	}

	/// The block's extrinsics, fetched from the upstream chain on first use for remote
	/// blocks.
	pub async fn extrinsics(&self) -> Result<Vec<Vec<u8>>, BlockError> {
		self.extrinsics
			.get_or_try_init(|| async {
				let Some(remote) = &self.remote else {
					return Ok(Vec::new());
				};
				remote
					.source()
					.block_body(self.hash)
					.await?
					.ok_or_else(|| BlockError::HeaderNotFound(format!("{:?}", self.hash)))
			})
			.await
			.cloned()
	}

	/// The layer reads and writes for this block go through.
	pub fn storage(&self) -> Arc<StorageLayer> {
		let layers = self.layers.read();
		// A block always owns at least one layer.
		layers[layers.len() - 1].clone()
	}

	/// Push an empty layer on top of the block's stack and return it. Lower layers are
	/// left untouched.
	pub fn push_storage_layer(&self) -> Arc<StorageLayer> {
		let layer = self.storage().push();
		self.layers.write().push(layer.clone());
		layer
	}

	/// Write `entries` into a fresh layer on top of the block's stack and return it.
	pub fn set_storage(
		&self,
		entries: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
	) -> Arc<StorageLayer> {
		let entries: Vec<_> = entries.into_iter().collect();
		let upgrades = entries.iter().any(|(k, _)| k.as_slice() == storage_keys::CODE);
		let layer = self.push_storage_layer();
		layer.set_all(entries);
		if upgrades {
			self.reset_runtime();
		}
		layer
	}

	/// Delete every key starting with one of `prefixes` in a fresh layer and return it.
	pub fn delete_prefixes(&self, prefixes: &[Vec<u8>]) -> Arc<StorageLayer> {
		let layer = self.push_storage_layer();
		for prefix in prefixes {
			layer.delete_prefix(prefix);
		}
		if prefixes.iter().any(|p| storage_keys::CODE.starts_with(p)) {
			self.reset_runtime();
		}
		layer
	}

	/// Read a storage value at this block.
	pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockError> {
		Ok(self.storage().get(key).await?)
	}

	/// Keys starting with `prefix` at this block, strictly after `start_key`.
	pub async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, BlockError> {
		Ok(self.storage().keys_paged(prefix, page_size, start_key).await?)
	}

	/// Changes made by this block's own layers, merged bottom to top. Empty for remote
	/// blocks unless storage was set on them.
	pub fn storage_diff(&self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
		self.layers.read().iter().flat_map(|layer| layer.changes()).collect()
	}

	/// The value this block's own layers give `key`, prefix deletions included. `None`
	/// if the block did not change the key.
	pub fn changed_value(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
		changed_in(&self.layers.read(), key)
	}

	/// The runtime WASM at this block.
	pub async fn runtime_code(&self) -> Result<Arc<[u8]>, BlockError> {
		if let Some(code) = self.runtime.lock().code.clone() {
			return Ok(code);
		}
		let code: Arc<[u8]> =
			self.get(storage_keys::CODE).await?.ok_or(BlockError::RuntimeCodeNotFound)?.into();
		self.runtime.lock().code = Some(code.clone());
		Ok(code)
	}

	/// Decoded runtime metadata, preferring the latest supported version.
	pub async fn metadata(&self) -> Result<Arc<Metadata>, BlockError> {
		if let Some(metadata) = self.runtime.lock().metadata.clone() {
			return Ok(metadata);
		}
		let bytes = match self
			.call(runtime_api::METADATA_AT_VERSION, &runtime_api::METADATA_VERSION.encode())
			.await
			.map(|outcome| Option::<Vec<u8>>::decode(&mut outcome.result.as_slice()))
		{
			Ok(Ok(Some(bytes))) => bytes,
			_ => {
				log::debug!("Metadata at version {} unavailable, using default", runtime_api::METADATA_VERSION);
				let outcome = self.call(runtime_api::METADATA, &[]).await?;
				Vec::<u8>::decode(&mut outcome.result.as_slice())
					.map_err(|e| BlockError::Codec(e.to_string()))?
			},
		};
		let metadata = Arc::new(
			Metadata::decode(&mut bytes.as_slice()).map_err(|e| BlockError::Metadata(e.to_string()))?,
		);
		self.runtime.lock().metadata = Some(metadata.clone());
		Ok(metadata)
	}

	/// The runtime version, as reported by `Core_version`.
	pub async fn runtime_version(&self) -> Result<RuntimeVersion, BlockError> {
		if let Some(version) = self.runtime.lock().version.clone() {
			return Ok(version);
		}
		let outcome = self.call(runtime_api::CORE_VERSION, &[]).await?;
		let version = RuntimeVersion::decode(&outcome.result)
			.map_err(|e| BlockError::Codec(e.to_string()))?;
		self.runtime.lock().version = Some(version.clone());
		Ok(version)
	}

	/// Forget everything derived from the runtime code.
	pub fn reset_runtime(&self) {
		log::debug!("Runtime code changed at block #{}, resetting runtime data", self.number);
		*self.runtime.lock() = RuntimeMemo::default();
	}

	/// Execute a runtime entry point against this block's state. Changes are returned,
	/// not applied.
	pub async fn call(&self, method: &str, args: &[u8]) -> Result<CallOutcome, BlockError> {
		let code = self.runtime_code().await?;
		Ok(self.executor.call(&code, method, args, self.storage()).await?)
	}

	/// Execute several entry points in order against this block's state.
	pub async fn call_many(&self, calls: Vec<RuntimeCall>) -> Result<CallOutcome, BlockError> {
		let code = self.runtime_code().await?;
		Ok(self.executor.call_many(&code, calls, self.storage()).await?)
	}
}

impl std::fmt::Debug for Block {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Block")
			.field("number", &self.number)
			.field("hash", &self.hash)
			.field("parent_hash", &self.parent_hash)
			.field("origin", &self.origin)
			.finish()
	}
}

/// Hash of an encoded header.
pub fn hash_header(header: &Header) -> H256 {
	H256(sp_core::blake2_256(&header.encode()))
}

/// What the topmost of `layers` that knows about `key` says about it.
pub fn changed_in(layers: &[Arc<StorageLayer>], key: &[u8]) -> Option<Option<Vec<u8>>> {
	layers.iter().rev().find_map(|layer| layer.lookup(key))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{TestChain, test_header};

	#[test]
	fn runtime_version_decodes_optional_fields() {
		let mut bytes = ("node".to_string(), "node-impl".to_string(), 1u32, 100u32, 2u32).encode();
		bytes.extend(vec![(sp_core::blake2_64(b"AuraApi"), 1u32)].encode());

		let version = RuntimeVersion::decode(&bytes).unwrap();
		assert_eq!(version.spec_version, 100);
		assert_eq!(version.transaction_version, 1);
		assert_eq!(version.state_version, 0);
		assert_eq!(version.api_version("AuraApi"), Some(1));
		assert_eq!(version.api_version("BabeApi"), None);

		bytes.extend(7u32.encode());
		bytes.push(1);
		let version = RuntimeVersion::decode(&bytes).unwrap();
		assert_eq!(version.transaction_version, 7);
		assert_eq!(version.state_version, 1);
	}

	#[test]
	fn runtime_version_serializes_apis_as_hex_pairs() {
		let version = RuntimeVersion {
			spec_name: "node".into(),
			impl_name: "node".into(),
			authoring_version: 1,
			spec_version: 1,
			impl_version: 1,
			apis: vec![([1, 2, 3, 4, 5, 6, 7, 8], 2)],
			transaction_version: 1,
			state_version: 1,
		};
		let json = serde_json::to_value(&version).unwrap();
		assert_eq!(json["specName"], "node");
		assert_eq!(json["apis"][0][0], "0x0102030405060708");
		assert_eq!(json["apis"][0][1], 2);
	}

	#[tokio::test]
	async fn child_block_reads_through_parent() {
		let chain = TestChain::new().await;
		let parent = chain.fork_block().await;
		let header = test_header(parent.hash, parent.number + 1);
		let child = Block::child(
			&parent,
			header.clone(),
			vec![vec![1]],
			vec![(b"key".to_vec(), Some(b"child".to_vec()))],
			BlockOrigin::Local,
		);

		assert_eq!(child.hash, hash_header(&header));
		assert_eq!(child.parent_hash, parent.hash);
		assert_eq!(child.get(b"key").await.unwrap(), Some(b"child".to_vec()));
		assert_eq!(parent.get(b"key").await.unwrap(), None);
		assert_eq!(child.extrinsics().await.unwrap(), vec![vec![1]]);
		assert_eq!(child.get(storage_keys::CODE).await.unwrap(), parent.get(storage_keys::CODE).await.unwrap());
	}

	#[tokio::test]
	async fn set_storage_pushes_layers_and_tracks_diff() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		let before = block.storage();

		block.set_storage(vec![(b"a".to_vec(), Some(vec![1]))]);
		block.set_storage(vec![(b"a".to_vec(), Some(vec![2])), (b"b".to_vec(), None)]);

		assert!(before.is_empty());
		assert!(!Arc::ptr_eq(&before, &block.storage()));
		assert_eq!(block.get(b"a").await.unwrap(), Some(vec![2]));
		let diff = block.storage_diff();
		assert_eq!(diff.get(b"a".as_slice()), Some(&Some(vec![2])));
		assert_eq!(diff.get(b"b".as_slice()), Some(&None));
	}

	#[tokio::test]
	async fn runtime_data_is_reset_when_code_changes() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		let code = block.runtime_code().await.unwrap();

		block.set_storage(vec![(storage_keys::CODE.to_vec(), Some(b"new code".to_vec()))]);

		let upgraded = block.runtime_code().await.unwrap();
		assert_ne!(code, upgraded);
		assert_eq!(&upgraded[..], b"new code");
	}

	#[tokio::test]
	async fn remote_block_fetches_body_lazily() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		assert_eq!(block.origin(), BlockOrigin::Remote);
		assert_eq!(block.extrinsics().await.unwrap(), chain.remote.head_body());
	}

	#[tokio::test]
	async fn missing_code_is_reported() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		block.set_storage(vec![(storage_keys::CODE.to_vec(), None)]);
		assert!(matches!(block.runtime_code().await, Err(BlockError::RuntimeCodeNotFound)));
	}
}
