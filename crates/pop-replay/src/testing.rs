// SPDX-License-Identifier: GPL-3.0

//! Shared testing utilities for pop-replay tests.
//!
//! Everything here runs in memory: [`MockRemote`] stands in for the upstream chain and
//! [`MockEngine`] for the runtime. The engine implements the block building entry
//! points over plain storage, driven by [`MockCall`] extrinsics, so chains built with
//! [`TestChain`] produce deterministic blocks without a WASM runtime.

use crate::{
	block::{Block, hash_header},
	blockchain::{Blockchain, ForkBuilder},
	config::ReplayConfig,
	error::{ExecutorError, RpcClientError, StorageError},
	executor::{CallOutcome, ExecutionRequest, RuntimeEngine, StorageDiffEntry},
	inherent::encode_bare_extrinsic,
	rpc::{Header, RemoteSource, SystemProperties},
	rpc_server::{ForkRpcServer, RpcServerConfig},
	storage::StorageProvider,
	strings::{
		builder::runtime_api,
		rpc::storage_keys,
		txpool::runtime_api as txpool_api,
	},
	txpool::BuildBlockMode,
	validity::{InvalidTransaction, TransactionValidityError, ValidTransaction},
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use scale::{Decode, Encode};
use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
use subxt::config::substrate::{Digest, H256};
use tokio::sync::watch;

/// Height of the upstream head served by [`MockRemote`].
pub const REMOTE_HEAD_NUMBER: u32 = 10;

/// Runtime code stored under `:code` by [`MockRemote`].
pub const MOCK_RUNTIME: &[u8] = b"mock runtime";

const HEADER_KEY: &[u8] = b":mock:header";
const EXTRINSICS_KEY: &[u8] = b":mock:extrinsics";

/// A header with empty roots and digest.
pub fn test_header(parent_hash: H256, number: u32) -> Header {
	Header {
		parent_hash,
		number,
		state_root: H256::zero(),
		extrinsics_root: H256::zero(),
		digest: Digest::default(),
	}
}

/// In-memory upstream chain: blocks `0..=REMOTE_HEAD_NUMBER` sharing one state.
pub struct MockRemote {
	headers: Vec<(H256, Header)>,
	storage: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
	storage_requests: AtomicUsize,
	batch_requests: AtomicUsize,
	last_batch_len: AtomicUsize,
	keys_requests: AtomicUsize,
	/// Single-key reads wait while this is `false`.
	storage_gate: watch::Sender<bool>,
}

impl Default for MockRemote {
	fn default() -> Self {
		Self::new()
	}
}

impl MockRemote {
	pub fn new() -> Self {
		let mut headers: Vec<(H256, Header)> = Vec::new();
		for number in 0..=REMOTE_HEAD_NUMBER {
			let parent_hash = headers.last().map(|(hash, _)| *hash).unwrap_or_default();
			let mut header = test_header(parent_hash, number);
			header.state_root = H256::repeat_byte(number as u8);
			headers.push((hash_header(&header), header));
		}
		let storage = BTreeMap::from([(storage_keys::CODE.to_vec(), MOCK_RUNTIME.to_vec())]);
		Self {
			headers,
			storage: RwLock::new(storage),
			storage_requests: AtomicUsize::new(0),
			batch_requests: AtomicUsize::new(0),
			last_batch_len: AtomicUsize::new(0),
			keys_requests: AtomicUsize::new(0),
			storage_gate: watch::channel(true).0,
		}
	}

	pub fn insert_storage(&self, key: Vec<u8>, value: Vec<u8>) {
		self.storage.write().insert(key, value);
	}

	pub fn head_hash(&self) -> H256 {
		self.hash_at(REMOTE_HEAD_NUMBER)
	}

	pub fn hash_at(&self, number: u32) -> H256 {
		self.headers[number as usize].0
	}

	/// Extrinsics of the head block.
	pub fn head_body(&self) -> Vec<Vec<u8>> {
		Self::body(REMOTE_HEAD_NUMBER)
	}

	fn body(number: u32) -> Vec<Vec<u8>> {
		vec![encode_bare_extrinsic(&number.encode())]
	}

	fn find(&self, hash: H256) -> Option<&Header> {
		self.headers.iter().find(|(h, _)| *h == hash).map(|(_, header)| header)
	}

	pub fn storage_requests(&self) -> usize {
		self.storage_requests.load(Ordering::SeqCst)
	}

	pub fn batch_requests(&self) -> usize {
		self.batch_requests.load(Ordering::SeqCst)
	}

	pub fn last_batch_len(&self) -> usize {
		self.last_batch_len.load(Ordering::SeqCst)
	}

	pub fn keys_requests(&self) -> usize {
		self.keys_requests.load(Ordering::SeqCst)
	}

	/// Hold single-key reads until [`MockRemote::release_storage`]. Held reads are
	/// already counted.
	pub fn hold_storage(&self) {
		self.storage_gate.send_replace(false);
	}

	pub fn release_storage(&self) {
		self.storage_gate.send_replace(true);
	}
}

#[async_trait]
impl RemoteSource for MockRemote {
	async fn finalized_head(&self) -> Result<H256, RpcClientError> {
		Ok(self.head_hash())
	}

	async fn block_hash(&self, number: u32) -> Result<Option<H256>, RpcClientError> {
		Ok(self.headers.get(number as usize).map(|(hash, _)| *hash))
	}

	async fn header(&self, hash: H256) -> Result<Option<Header>, RpcClientError> {
		Ok(self.find(hash).cloned())
	}

	async fn block_body(&self, hash: H256) -> Result<Option<Vec<Vec<u8>>>, RpcClientError> {
		Ok(self.find(hash).map(|header| Self::body(header.number)))
	}

	async fn storage(&self, key: &[u8], _at: H256) -> Result<Option<Vec<u8>>, RpcClientError> {
		self.storage_requests.fetch_add(1, Ordering::SeqCst);
		let mut gate = self.storage_gate.subscribe();
		let _ = gate.wait_for(|open| *open).await;
		Ok(self.storage.read().get(key).cloned())
	}

	async fn storage_batch(
		&self,
		keys: &[Vec<u8>],
		_at: H256,
	) -> Result<Vec<Option<Vec<u8>>>, RpcClientError> {
		self.batch_requests.fetch_add(1, Ordering::SeqCst);
		self.last_batch_len.store(keys.len(), Ordering::SeqCst);
		let storage = self.storage.read();
		Ok(keys.iter().map(|key| storage.get(key).cloned()).collect())
	}

	async fn storage_keys_paged(
		&self,
		prefix: &[u8],
		count: u32,
		start_key: Option<&[u8]>,
		_at: H256,
	) -> Result<Vec<Vec<u8>>, RpcClientError> {
		self.keys_requests.fetch_add(1, Ordering::SeqCst);
		Ok(self
			.storage
			.read()
			.keys()
			.filter(|key| key.starts_with(prefix))
			.filter(|key| start_key.is_none_or(|start| key.as_slice() > start))
			.take(count as usize)
			.cloned()
			.collect())
	}

	async fn metadata(&self, _at: H256) -> Result<Vec<u8>, RpcClientError> {
		Err(RpcClientError::InvalidResponse("mock chain has no metadata".into()))
	}

	async fn system_chain(&self) -> Result<String, RpcClientError> {
		Ok("Mock Chain".into())
	}

	async fn system_properties(&self) -> Result<SystemProperties, RpcClientError> {
		let mut properties = SystemProperties::new();
		properties.insert("tokenSymbol".into(), "UNIT".into());
		properties.insert("tokenDecimals".into(), 12.into());
		Ok(properties)
	}
}

/// Flat in-memory storage.
#[derive(Default)]
pub struct MemoryProvider(RwLock<BTreeMap<Vec<u8>, Vec<u8>>>);

impl FromIterator<(Vec<u8>, Vec<u8>)> for MemoryProvider {
	fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
		Self(RwLock::new(iter.into_iter().collect()))
	}
}

#[async_trait]
impl StorageProvider for MemoryProvider {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.0.read().get(key).cloned())
	}

	async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, StorageError> {
		if page_size == 0 {
			return Err(StorageError::InvalidPageSize);
		}
		Ok(self
			.0
			.read()
			.keys()
			.filter(|key| key.starts_with(prefix))
			.filter(|key| start_key.is_none_or(|start| key.as_slice() > start))
			.take(page_size as usize)
			.cloned()
			.collect())
	}
}

/// Calls understood by [`MockEngine`] inside a bare extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum MockCall {
	/// Write `value` under `key`.
	Set { key: Vec<u8>, value: Vec<u8> },
	/// Included, but the dispatch fails.
	Fail,
	/// Rejected with `InvalidTransaction::BadProof`.
	Invalid,
}

/// `call` wrapped as a bare extrinsic.
pub fn mock_extrinsic(call: MockCall) -> Vec<u8> {
	encode_bare_extrinsic(&call.encode())
}

fn decode_mock_extrinsic(mut encoded: &[u8]) -> Option<MockCall> {
	let body = Vec::<u8>::decode(&mut encoded).ok()?;
	let (_version, call) = body.split_first()?;
	MockCall::decode(&mut &call[..]).ok()
}

/// Runtime stand-in implementing block building over plain storage.
///
/// `Core_initialize_block` records the header, `BlockBuilder_apply_extrinsic` executes
/// [`MockCall`]s and `BlockBuilder_finalize_block` returns the header with the
/// extrinsics root filled in. Any method can be given a canned answer with
/// [`MockEngine::respond`].
#[derive(Default)]
pub struct MockEngine {
	responses: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockEngine {
	pub fn new() -> Self {
		Self::default()
	}

	/// Answer `method` with `result` from now on.
	pub fn respond(&self, method: &str, result: Vec<u8>) {
		self.responses.lock().insert(method.to_string(), result);
	}

	fn version() -> Vec<u8> {
		let mut encoded = ("mock".to_string(), "mock".to_string(), 1u32, 1u32, 1u32).encode();
		encoded.extend(Vec::<([u8; 8], u32)>::new().encode());
		encoded.extend(1u32.encode());
		encoded.push(1);
		encoded
	}
}

struct Overlay<'a> {
	changes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
	storage: &'a dyn StorageProvider,
}

impl Overlay<'_> {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ExecutorError> {
		match self.changes.get(key) {
			Some(value) => Ok(value.clone()),
			None => Ok(self.storage.get(key).await?),
		}
	}

	fn set(&mut self, key: &[u8], value: Option<Vec<u8>>) {
		self.changes.insert(key.to_vec(), value);
	}
}

fn codec_error(method: &str, e: scale::Error) -> ExecutorError {
	ExecutorError::RuntimeError { method: method.into(), message: e.to_string() }
}

#[async_trait(?Send)]
impl RuntimeEngine for MockEngine {
	async fn execute(
		&self,
		request: &ExecutionRequest,
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError> {
		let mut overlay = Overlay { changes: BTreeMap::new(), storage: storage.as_ref() };
		let mut result = Vec::new();

		for call in &request.calls {
			let method = call.method();
			if let Some(canned) = self.responses.lock().get(method).cloned() {
				result = canned;
				continue;
			}
			result = match method {
				runtime_api::CORE_INITIALIZE_BLOCK => {
					overlay.set(HEADER_KEY, Some(call.args().to_vec()));
					overlay.set(EXTRINSICS_KEY, None);
					Vec::new()
				},
				runtime_api::BLOCK_BUILDER_APPLY_EXTRINSIC => match decode_mock_extrinsic(call.args()) {
					Some(MockCall::Invalid) => Err::<(), _>(TransactionValidityError::Invalid(
						InvalidTransaction::BadProof,
					))
					.encode(),
					None => Err::<(), _>(TransactionValidityError::Invalid(InvalidTransaction::Call))
						.encode(),
					Some(mock) => {
						let mut applied: Vec<Vec<u8>> = match overlay.get(EXTRINSICS_KEY).await? {
							Some(bytes) => Decode::decode(&mut bytes.as_slice())
								.map_err(|e| codec_error(method, e))?,
							None => Vec::new(),
						};
						applied.push(call.args().to_vec());
						overlay.set(EXTRINSICS_KEY, Some(applied.encode()));
						match mock {
							MockCall::Set { key, value } => {
								overlay.set(&key, Some(value));
								vec![0, 0]
							},
							// Ok(Err(DispatchError::Other))
							_ => vec![0, 1, 0],
						}
					},
				},
				runtime_api::BLOCK_BUILDER_FINALIZE_BLOCK => {
					let bytes = overlay.get(HEADER_KEY).await?.ok_or_else(|| {
						ExecutorError::RuntimeError {
							method: method.into(),
							message: "block not initialized".into(),
						}
					})?;
					let mut header =
						Header::decode(&mut bytes.as_slice()).map_err(|e| codec_error(method, e))?;
					let applied = overlay.get(EXTRINSICS_KEY).await?.unwrap_or_else(|| vec![0]);
					header.extrinsics_root = H256(sp_core::blake2_256(&applied));
					overlay.set(HEADER_KEY, None);
					overlay.set(EXTRINSICS_KEY, None);
					header.encode()
				},
				txpool_api::TAGGED_TRANSACTION_QUEUE_VALIDATE => {
					let extrinsic = call.args().get(1..).unwrap_or_default();
					match decode_mock_extrinsic(extrinsic) {
						Some(MockCall::Invalid) => Err::<ValidTransaction, _>(
							TransactionValidityError::Invalid(InvalidTransaction::BadProof),
						)
						.encode(),
						Some(_) => Ok::<_, TransactionValidityError>(ValidTransaction {
							priority: 0,
							requires: Vec::new(),
							provides: vec![sp_core::blake2_256(extrinsic).to_vec()],
							longevity: u64::MAX,
							propagate: true,
						})
						.encode(),
						None => Err::<ValidTransaction, _>(TransactionValidityError::Invalid(
							InvalidTransaction::Call,
						))
						.encode(),
					}
				},
				runtime_api::CORE_VERSION => Self::version(),
				other =>
					return Err(ExecutorError::RuntimeError {
						method: other.into(),
						message: "not implemented by the mock runtime".into(),
					}),
			};
		}

		Ok(CallOutcome {
			result,
			storage_diff: overlay
				.changes
				.into_iter()
				.map(|(key, value)| StorageDiffEntry(key, value))
				.collect(),
		})
	}
}

/// A chain forked from a [`MockRemote`] and executed by a [`MockEngine`], with no
/// inherent providers.
pub struct TestChain {
	pub remote: Arc<MockRemote>,
	pub engine: Arc<MockEngine>,
	pub chain: Arc<Blockchain>,
}

impl TestChain {
	pub async fn new() -> Self {
		Self::with_config(ReplayConfig::default()).await
	}

	pub async fn with_config(config: ReplayConfig) -> Self {
		Self::from_remote(MockRemote::new(), config).await
	}

	pub async fn from_remote(remote: MockRemote, config: ReplayConfig) -> Self {
		let remote = Arc::new(remote);
		let engine = Arc::new(MockEngine::new());
		let chain = ForkBuilder::new(remote.clone())
			.config(config)
			.engine(engine.clone())
			.inherent_providers(Vec::new())
			.build()
			.await
			.expect("failed to fork mock chain");
		Self { remote, engine, chain }
	}

	/// The block the chain was forked at.
	pub async fn fork_block(&self) -> Arc<Block> {
		self.chain.fork_point().clone()
	}
}

/// A [`TestChain`] served over JSON-RPC on an ephemeral local port.
///
/// Blocks are only built on request, so tests decide when the chain moves.
pub struct RpcTestContext {
	pub test: TestChain,
	pub server: ForkRpcServer,
}

impl RpcTestContext {
	pub async fn new() -> Self {
		Self::with_config(ReplayConfig {
			build_block_mode: BuildBlockMode::Manual,
			..Default::default()
		})
		.await
	}

	pub async fn with_config(config: ReplayConfig) -> Self {
		let test = TestChain::with_config(config).await;
		let server = ForkRpcServer::start(
			test.chain.clone(),
			RpcServerConfig { addr: ([127, 0, 0, 1], 0).into(), ..Default::default() },
		)
		.await
		.expect("failed to start RPC server");
		Self { test, server }
	}

	pub fn ws_url(&self) -> String {
		self.server.ws_url()
	}

	pub fn chain(&self) -> &Arc<Blockchain> {
		&self.test.chain
	}
}
