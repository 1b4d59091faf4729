// SPDX-License-Identifier: GPL-3.0

//! Blockchain manager for forked chains.
//!
//! [`Blockchain`] owns the materialized blocks of a fork, indexed by hash and by height,
//! and the mutable head. Blocks at or below the fork point are materialized on demand
//! from the upstream chain; blocks above it exist only once built locally.
//!
//! ```text
//!       remote history               fork point          local blocks
//!  ... ─ #n-2 ─ #n-1 ─────────────────── #n ─── #n+1 ─── #n+2 (head)
//!        (materialized on demand)              (built by the TxPool)
//! ```
//!
//! Block production is delegated to the chain's [`TxPool`]; head changes are published
//! through its [`HeadState`]. At most `max_memory_block_count` blocks are kept; beyond
//! that the least recently materialized block is evicted. The fork point and the local
//! blocks leading to the head are never evicted.
//!
//! Use [`ForkBuilder`] to create a chain.

use crate::{
	block::{Block, BlockOrigin},
	cache::{InMemoryStorageCache, StorageCache},
	config::{BlockRef, ReplayConfig},
	error::{BlockError, BlockchainError, RemoteStorageError, TxPoolError},
	executor::{ExecutorConfig, ExecutorService, RuntimeEngine, RuntimeExecutor, SmoldotEngine},
	head_state::HeadState,
	inherent::{InherentProvider, default_providers, slot, slot_duration, timestamp_now_key},
	overrides::{self, StorageOverrides},
	remote::RemoteStorageLayer,
	rpc::{ForkRpcClient, RemoteSource, SystemProperties},
	storage::storage_value_key,
	strings::{
		inherent::{parachain, timestamp},
		txpool::{runtime_api, transaction_source},
	},
	txpool::{NewBlockParams, TxPool},
	validity::{TransactionValidity, decode_transaction_validity},
};
use parking_lot::RwLock;
use scale::{Decode, Encode};
use std::{
	collections::{BTreeMap, BTreeSet, HashMap, HashSet},
	sync::Arc,
};
use subxt::config::substrate::H256;
use url::Url;

#[derive(Default)]
struct BlockIndex {
	/// Blocks with the order they were materialized in.
	blocks: HashMap<H256, (u64, Arc<Block>)>,
	/// Hashes by height. Forks make a height hold several.
	heights: BTreeMap<u32, BTreeSet<H256>>,
	next_seq: u64,
}

impl BlockIndex {
	fn insert(&mut self, block: Arc<Block>) {
		if self.blocks.contains_key(&block.hash) {
			return;
		}
		self.heights.entry(block.number).or_default().insert(block.hash);
		self.blocks.insert(block.hash, (self.next_seq, block));
		self.next_seq += 1;
	}

	fn remove(&mut self, hash: &H256) {
		if let Some((_, block)) = self.blocks.remove(hash) &&
			let Some(hashes) = self.heights.get_mut(&block.number)
		{
			hashes.remove(hash);
			if hashes.is_empty() {
				self.heights.remove(&block.number);
			}
		}
	}

	/// Add `hash` and its indexed ancestors to `into`, down to the first upstream block.
	fn local_ancestry(&self, mut hash: H256, into: &mut HashSet<H256>) {
		while into.insert(hash) {
			match self.blocks.get(&hash) {
				Some((_, block)) if block.origin() != BlockOrigin::Remote => hash = block.parent_hash,
				_ => break,
			}
		}
	}

	/// Evict the oldest blocks not in `keep` until at most `max` remain.
	fn evict(&mut self, max: usize, keep: &HashSet<H256>) -> usize {
		let mut evicted = 0;
		while self.blocks.len() > max {
			let Some(oldest) = self
				.blocks
				.iter()
				.filter(|(hash, _)| !keep.contains(hash))
				.min_by_key(|(_, (seq, _))| *seq)
				.map(|(hash, _)| *hash)
			else {
				break;
			};
			self.remove(&oldest);
			evicted += 1;
		}
		evicted
	}
}

/// A forked chain.
pub struct Blockchain {
	name: String,
	properties: SystemProperties,
	remote: Arc<RemoteStorageLayer>,
	fork_point: Arc<Block>,
	para_id: Option<u32>,
	index: RwLock<BlockIndex>,
	head_state: HeadState,
	max_memory_block_count: usize,
	providers: Vec<Box<dyn InherentProvider>>,
	txpool: TxPool,
}

impl Blockchain {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Properties reported by the upstream chain (token symbol, decimals, ...).
	pub fn properties(&self) -> &SystemProperties {
		&self.properties
	}

	/// Parachain id, if the fork is a parachain.
	pub fn para_id(&self) -> Option<u32> {
		self.para_id
	}

	pub fn is_parachain(&self) -> bool {
		self.para_id.is_some()
	}

	/// The block the fork was taken at.
	pub fn fork_point(&self) -> &Arc<Block> {
		&self.fork_point
	}

	pub fn executor(&self) -> &RuntimeExecutor {
		self.fork_point.executor()
	}

	pub fn txpool(&self) -> &TxPool {
		&self.txpool
	}

	pub fn head_state(&self) -> &HeadState {
		&self.head_state
	}

	/// Inherent providers run for every new block, in order.
	pub fn inherent_providers(&self) -> &[Box<dyn InherentProvider>] {
		&self.providers
	}

	pub fn head(&self) -> Arc<Block> {
		self.head_state.head()
	}

	/// Blocks are never finalized separately from becoming the head.
	pub fn finalized_head(&self) -> Arc<Block> {
		self.head()
	}

	/// Number of blocks held in memory.
	pub fn block_count(&self) -> usize {
		self.index.read().blocks.len()
	}

	/// The block with `hash`, materializing it from the upstream chain if it is at or
	/// below the fork point.
	pub async fn get_block(&self, hash: H256) -> Result<Option<Arc<Block>>, BlockchainError> {
		if let Some((_, block)) = self.index.read().blocks.get(&hash) {
			return Ok(Some(block.clone()));
		}
		let Some(header) =
			self.remote.source().header(hash).await.map_err(RemoteStorageError::from)?
		else {
			return Ok(None);
		};
		if header.number > self.fork_point.number {
			log::debug!("Block {hash:?} is past the fork point, ignoring");
			return Ok(None);
		}
		let block = Arc::new(Block::remote(
			hash,
			header,
			Arc::new(self.remote.at(hash)),
			self.executor().clone(),
		));
		self.register_block(block.clone());
		Ok(Some(block))
	}

	/// The block at `number` on the chain of the current head.
	pub async fn get_block_at(&self, number: u32) -> Result<Option<Arc<Block>>, BlockchainError> {
		let mut current = self.head();
		if number > current.number {
			return Ok(None);
		}
		// Local blocks always sit on an upstream block; below that the upstream chain is
		// canonical.
		while current.number > number && current.origin() != BlockOrigin::Remote {
			match self.get_block(current.parent_hash).await? {
				Some(parent) => current = parent,
				None => return Ok(None),
			}
		}
		if current.number == number {
			return Ok(Some(current));
		}
		self.remote_block_at(number).await
	}

	async fn remote_block_at(&self, number: u32) -> Result<Option<Arc<Block>>, BlockchainError> {
		match self.remote.source().block_hash(number).await.map_err(RemoteStorageError::from)? {
			Some(hash) => self.get_block(hash).await,
			None => Ok(None),
		}
	}

	/// Hash of the block at `number` on the chain of the current head.
	pub async fn block_hash_at(&self, number: u32) -> Result<Option<H256>, BlockchainError> {
		Ok(self.get_block_at(number).await?.map(|block| block.hash))
	}

	/// Resolve a hash or height to a block.
	pub async fn resolve(&self, target: BlockRef) -> Result<Option<Arc<Block>>, BlockchainError> {
		match target {
			BlockRef::Hash(hash) => self.get_block(hash).await,
			BlockRef::Number(number) => self.get_block_at(number).await,
		}
	}

	/// Add a block to the index.
	///
	/// Locally built blocks between the fork point and either the head or `block` are
	/// never evicted, so heights on the head's chain always resolve. The limit may be
	/// exceeded when that chain alone is longer than it.
	pub fn register_block(&self, block: Arc<Block>) {
		let head = self.head();
		let mut index = self.index.write();
		let mut keep = HashSet::from([self.fork_point.hash]);
		index.insert(block.clone());
		index.local_ancestry(head.hash, &mut keep);
		index.local_ancestry(block.hash, &mut keep);
		let evicted = index.evict(self.max_memory_block_count, &keep);
		if evicted > 0 {
			log::trace!("Evicted {evicted} block(s)");
		}
	}

	/// Make `block` the head. It must be materialized.
	pub fn set_head(&self, block: Arc<Block>) -> Result<(), BlockchainError> {
		if !self.index.read().blocks.contains_key(&block.hash) {
			return Err(BlockchainError::BlockNotFound(format!("{:?}", block.hash)));
		}
		self.head_state.set_head(block);
		Ok(())
	}

	/// Make the block with `target` hash or height the head.
	pub async fn set_head_to(&self, target: BlockRef) -> Result<Arc<Block>, BlockchainError> {
		let block = self
			.resolve(target)
			.await?
			.ok_or_else(|| BlockchainError::BlockNotFound(format!("{target:?}")))?;
		self.set_head(block.clone())?;
		log::info!("Head set to #{} ({:?})", block.number, block.hash);
		Ok(block)
	}

	/// Build one or more blocks on the head.
	pub async fn new_block(&self, params: NewBlockParams) -> Result<Arc<Block>, TxPoolError> {
		self.txpool.build_blocks(params).await
	}

	/// Storage changes made by the block with `hash` itself.
	pub async fn storage_diff(
		&self,
		hash: H256,
	) -> Result<BTreeMap<Vec<u8>, Option<Vec<u8>>>, BlockchainError> {
		let block = self
			.get_block(hash)
			.await?
			.ok_or_else(|| BlockchainError::BlockNotFound(format!("{hash:?}")))?;
		Ok(block.storage_diff())
	}

	/// Validate `extrinsic` against the head with `TaggedTransactionQueue_validate_transaction`.
	pub async fn validate_extrinsic(
		&self,
		extrinsic: &[u8],
	) -> Result<TransactionValidity, BlockchainError> {
		let head = self.head();
		// (source, extrinsic, block_hash). The extrinsic already carries its length prefix.
		let mut args = Vec::with_capacity(1 + extrinsic.len() + 32);
		args.push(transaction_source::EXTERNAL);
		args.extend_from_slice(extrinsic);
		args.extend(head.hash.encode());

		let outcome = head.call(runtime_api::TAGGED_TRANSACTION_QUEUE_VALIDATE, &args).await?;
		decode_transaction_validity(&outcome.result)
			.map_err(|e| BlockchainError::Codec(format!("transaction validity: {e}")))
	}

	/// Apply storage `overrides` to the block `at`, or to the head. Returns the hash of
	/// the modified block.
	pub async fn set_storage(
		&self,
		overrides: &serde_json::Value,
		at: Option<H256>,
	) -> Result<H256, BlockchainError> {
		let block = match at {
			Some(hash) => self
				.get_block(hash)
				.await?
				.ok_or_else(|| BlockchainError::BlockNotFound(format!("{hash:?}")))?,
			None => self.head(),
		};
		let resolved = overrides::resolve_at(overrides, &block).await?;
		self.apply_overrides(&block, resolved);
		Ok(block.hash)
	}

	fn apply_overrides(&self, block: &Arc<Block>, overrides: StorageOverrides) {
		if overrides.is_empty() {
			return;
		}
		let upgrades = overrides.touches_code();
		log::debug!(
			"Applying {} override(s) and {} prefix removal(s) at #{}",
			overrides.entries.len(),
			overrides.removed_prefixes.len(),
			block.number
		);
		let mut layers = Vec::with_capacity(2);
		if !overrides.removed_prefixes.is_empty() {
			layers.push(block.delete_prefixes(&overrides.removed_prefixes));
		}
		layers.push(block.set_storage(overrides.entries));
		if upgrades {
			self.invalidate_runtime_caches();
		}
		if block.hash == self.head().hash {
			self.head_state.notify_storage(block, &layers);
		}
	}

	/// Move the head's clock to `timestamp_ms`, along with the consensus slot.
	pub async fn time_travel(&self, timestamp_ms: u64) -> Result<(), BlockchainError> {
		let head = self.head();
		let mut entries = vec![(timestamp_now_key(), Some(timestamp_ms.encode()))];
		if let Some((consensus, _)) = slot::current_slot(&head).await? {
			let fallback = if self.is_parachain() {
				timestamp::slot_duration::PARACHAIN_FALLBACK_MS
			} else {
				timestamp::slot_duration::RELAY_CHAIN_FALLBACK_MS
			};
			let duration = slot_duration(&head, fallback).await;
			let slot = slot::slot_at(timestamp_ms, duration);
			log::debug!("Time travel to {timestamp_ms}: {consensus:?} slot {slot}");
			entries.push((consensus.current_slot_key(), Some(slot.encode())));
		}
		self.apply_overrides(&head, StorageOverrides { entries, removed_prefixes: Vec::new() });
		Ok(())
	}

	/// Change the maximum level of runtime logs forwarded to the logger.
	pub fn set_runtime_log_level(&self, level: u32) {
		self.executor().set_log_level(level);
	}

	/// Drop values derived from the runtime after a code change.
	pub fn invalidate_runtime_caches(&self) {
		log::info!("Runtime upgraded on {}", self.name);
		for provider in &self.providers {
			provider.invalidate_cache();
		}
	}
}

/// Creates a [`Blockchain`] forked from an upstream chain.
///
/// # Example
///
/// ```ignore
/// use pop_replay::{ForkBuilder, ReplayConfig};
///
/// let chain = ForkBuilder::connect(&"wss://rpc.polkadot.io".parse()?)
///     .await?
///     .config(ReplayConfig { block: Some(BlockRef::Number(22_000_000)), ..Default::default() })
///     .build()
///     .await?;
/// ```
pub struct ForkBuilder {
	source: Arc<dyn RemoteSource>,
	config: ReplayConfig,
	cache: Option<Arc<dyn StorageCache>>,
	engine: Option<Arc<dyn RuntimeEngine>>,
	providers: Option<Vec<Box<dyn InherentProvider>>>,
}

impl ForkBuilder {
	pub fn new(source: Arc<dyn RemoteSource>) -> Self {
		Self {
			source,
			config: ReplayConfig::default(),
			cache: Some(Arc::new(InMemoryStorageCache::new())),
			engine: None,
			providers: None,
		}
	}

	/// Fork a live chain served at `endpoint`.
	pub async fn connect(endpoint: &Url) -> Result<Self, BlockchainError> {
		let client = ForkRpcClient::connect(endpoint).await.map_err(RemoteStorageError::from)?;
		Ok(Self::new(Arc::new(client)))
	}

	pub fn config(mut self, config: ReplayConfig) -> Self {
		self.config = config;
		self
	}

	/// Persistence for fetched values. `None` disables it.
	pub fn cache(mut self, cache: Option<Arc<dyn StorageCache>>) -> Self {
		self.cache = cache;
		self
	}

	/// Runtime engine. Defaults to [`SmoldotEngine`].
	pub fn engine(mut self, engine: Arc<dyn RuntimeEngine>) -> Self {
		self.engine = Some(engine);
		self
	}

	/// Inherent providers. Defaults to [`default_providers`] for the detected chain kind.
	pub fn inherent_providers(mut self, providers: Vec<Box<dyn InherentProvider>>) -> Self {
		self.providers = Some(providers);
		self
	}

	pub async fn build(self) -> Result<Arc<Blockchain>, BlockchainError> {
		let Self { source, config, cache, engine, providers } = self;

		let hash = match config.block {
			Some(BlockRef::Hash(hash)) => hash,
			Some(BlockRef::Number(number)) => source
				.block_hash(number)
				.await
				.map_err(RemoteStorageError::from)?
				.ok_or_else(|| BlockchainError::BlockNotFound(format!("#{number}")))?,
			None => source.finalized_head().await.map_err(RemoteStorageError::from)?,
		};
		let header = source
			.header(hash)
			.await
			.map_err(RemoteStorageError::from)?
			.ok_or_else(|| BlockError::HeaderNotFound(format!("{hash:?}")))?;
		let name = source.system_chain().await.map_err(RemoteStorageError::from)?;
		let properties = source.system_properties().await.map_err(RemoteStorageError::from)?;

		let engine = engine.unwrap_or_else(|| Arc::new(SmoldotEngine::new()));
		let service = Arc::new(ExecutorService::spawn(engine, config.execution_workers)?);
		let executor = RuntimeExecutor::new(
			service,
			ExecutorConfig {
				mock_signature_host: config.mock_signature_host,
				allow_unresolved_imports: config.allow_unresolved_imports,
				log_level: config.runtime_log_level,
			},
		);

		let remote = Arc::new(RemoteStorageLayer::new(source, cache, hash));
		let fork_point = Arc::new(Block::remote(hash, header, remote.clone(), executor));

		if let Some(import) = &config.import_storage {
			let overrides = overrides::resolve_at(import, &fork_point).await?;
			log::info!("Importing {} storage override(s)", overrides.entries.len());
			if !overrides.removed_prefixes.is_empty() {
				fork_point.delete_prefixes(&overrides.removed_prefixes);
			}
			fork_point.set_storage(overrides.entries);
		}

		let para_id = match config.registered_para_id {
			Some(id) => Some(id),
			None => detect_para_id(&fork_point).await?,
		};
		let providers = providers.unwrap_or_else(|| default_providers(para_id.is_some()));

		let mut index = BlockIndex::default();
		index.insert(fork_point.clone());
		let timing = config.batch_timing();
		let chain = Arc::new_cyclic(|weak| Blockchain {
			name,
			properties,
			remote,
			fork_point: fork_point.clone(),
			para_id,
			index: RwLock::new(index),
			head_state: HeadState::new(fork_point.clone()),
			max_memory_block_count: config.max_memory_block_count.max(1),
			providers,
			txpool: TxPool::new(weak.clone(), config.build_block_mode, timing),
		});

		match para_id {
			Some(id) => log::info!(
				"Forked {} (para {id}) at #{} ({:?})",
				chain.name,
				fork_point.number,
				fork_point.hash
			),
			None => log::info!(
				"Forked {} at #{} ({:?})",
				chain.name,
				fork_point.number,
				fork_point.hash
			),
		}
		Ok(chain)
	}
}

/// `ParachainInfo::ParachainId` at `block`, if set.
async fn detect_para_id(block: &Block) -> Result<Option<u32>, BlockchainError> {
	let key = storage_value_key(
		parachain::storage_keys::PARACHAIN_INFO_PALLET,
		parachain::storage_keys::PARACHAIN_ID,
	);
	block
		.get(&key)
		.await?
		.map(|value| {
			u32::decode(&mut value.as_slice())
				.map_err(|e| BlockchainError::Codec(format!("parachain id: {e}")))
		})
		.transpose()
}
