// SPDX-License-Identifier: GPL-3.0

//! [`RuntimeEngine`] backed by smoldot.
//!
//! smoldot implements the Substrate host functions; this engine only answers the
//! requests a running call yields back: storage reads, key iteration, signature checks,
//! offchain access and log lines. Storage reads are served from the changes of earlier
//! calls in the same request first and from the supplied [`StorageProvider`] otherwise.

use super::{CallOutcome, ExecutionRequest, RuntimeCall, RuntimeEngine, StorageDiffEntry};
use crate::{
	error::ExecutorError,
	storage::StorageProvider,
	strings::{
		executor::{RUNTIME_LOG_TARGET, magic_signature, storage_prefixes},
		rpc::storage_keys,
	},
};
use async_trait::async_trait;
use smoldot::{
	executor::{
		self,
		host::{Config as HostConfig, HostVmPrototype, LogEmitInfo},
		runtime_call::{self, OffchainContext, RuntimeCall as VmCall},
		storage_diff::TrieDiff,
		vm::{ExecHint, HeapPages},
	},
	trie::{TrieEntryVersion, bytes_to_nibbles, nibbles_to_bytes_suffix_extend},
};
use std::{
	collections::BTreeMap,
	iter,
	ops::Bound,
	sync::Arc,
	time::{SystemTime, UNIX_EPOCH},
};

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Executes runtime calls with smoldot's WASM host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmoldotEngine;

impl SmoldotEngine {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait(?Send)]
impl RuntimeEngine for SmoldotEngine {
	async fn execute(
		&self,
		request: &ExecutionRequest,
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError> {
		let heap_pages = heap_pages(storage.get(storage_keys::HEAP_PAGES).await?)?;
		let mut overlay = Overlay::new();
		let mut result = Vec::new();
		for call in &request.calls {
			let prototype = HostVmPrototype::new(HostConfig {
				module: &request.runtime_bytecode,
				heap_pages,
				exec_hint: ExecHint::ValidateAndExecuteOnce,
				allow_unresolved_imports: request.allow_unresolved_imports,
			})?;
			result = run_call(prototype, call, request, &mut overlay, storage.as_ref()).await?;
		}
		Ok(CallOutcome {
			result,
			storage_diff: overlay.into_iter().map(|(k, v)| StorageDiffEntry(k, v)).collect(),
		})
	}
}

fn heap_pages(value: Option<Vec<u8>>) -> Result<HeapPages, ExecutorError> {
	let Some(value) = value else {
		return Ok(executor::DEFAULT_HEAP_PAGES);
	};
	let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| ExecutorError::InvalidHeapPages {
		message: format!("expected 8 bytes, got {}", value.len()),
	})?;
	let pages = u32::try_from(u64::from_le_bytes(bytes))
		.map_err(|e| ExecutorError::InvalidHeapPages { message: e.to_string() })?;
	Ok(HeapPages::from(pages))
}

/// Run one call to completion, merging its changes into `overlay`. Returns the output.
async fn run_call(
	prototype: HostVmPrototype,
	call: &RuntimeCall,
	request: &ExecutionRequest,
	overlay: &mut Overlay,
	storage: &dyn StorageProvider,
) -> Result<Vec<u8>, ExecutorError> {
	let method = call.method();
	let mut vm = runtime_call::run(runtime_call::Config {
		virtual_machine: prototype,
		function_to_call: method,
		parameter: iter::once(call.args()),
		storage_main_trie_changes: TrieDiff::default(),
		max_log_level: request.log_level,
		calculate_trie_changes: false,
		storage_proof_size_behavior: runtime_call::StorageProofSizeBehavior::ConstantReturnValue(0),
	})
	.map_err(|(err, _)| ExecutorError::StartError {
		method: method.to_string(),
		message: err.to_string(),
	})?;

	loop {
		vm = match vm {
			VmCall::Finished(Ok(success)) => {
				let output = success.virtual_machine.value().as_ref().to_vec();
				success.storage_changes.storage_changes_iter_unordered().for_each(
					|(child, key, value)| {
						let key = match child {
							Some(child) => prefixed_child_key(child, key),
							None => key.to_vec(),
						};
						overlay.insert(key, value.map(|v| v.to_vec()));
					},
				);
				return Ok(output);
			},
			VmCall::Finished(Err(err)) =>
				return Err(ExecutorError::RuntimeError {
					method: method.to_string(),
					message: err.to_string(),
				}),

			VmCall::StorageGet(req) => {
				let key = match req.child_trie() {
					Some(child) => prefixed_child_key(child.as_ref(), req.key().as_ref()),
					None => req.key().as_ref().to_vec(),
				};
				let value = read(overlay, storage, &key).await?;
				req.inject_value(value.as_ref().map(|v| (iter::once(v), TrieEntryVersion::V1)))
			},

			// Merkle values are unknown; smoldot computes them from the keys.
			VmCall::ClosestDescendantMerkleValue(req) => req.resume_unknown(),

			VmCall::NextKey(req) =>
				if req.branch_nodes() {
					// The full trie is never materialized; roots cover the known keys only.
					req.inject_key(None::<Vec<_>>.map(|x| x.into_iter()))
				} else {
					let child = req.child_trie().map(|c| c.as_ref().to_vec());
					let to_key = |nibbles: Vec<u8>| match &child {
						Some(child) => prefixed_child_key(child, &nibbles),
						None => nibbles,
					};
					let prefix = to_key(nibbles_to_bytes_suffix_extend(req.prefix()).collect());
					let key = to_key(nibbles_to_bytes_suffix_extend(req.key()).collect());
					let next = next_key(overlay, storage, &prefix, &key, req.or_equal()).await?;
					// Keys handed back to smoldot are relative to the child trie.
					let next = next.map(|k| match &child {
						Some(child) => k[storage_prefixes::DEFAULT_CHILD_STORAGE.len() +
							child.len()..]
							.to_vec(),
						None => k,
					});
					req.inject_key(next.map(|k| bytes_to_nibbles(k.into_iter())))
				},

			VmCall::SignatureVerification(req) =>
				if request.mock_signature_host && is_magic_signature(req.signature().as_ref()) {
					req.resume_success()
				} else {
					req.verify_and_resume()
				},

			// Offchain storage does not survive the call.
			VmCall::OffchainStorageSet(req) => req.resume(),

			VmCall::Offchain(ctx) => match ctx {
				OffchainContext::StorageGet(req) => req.inject_value(None::<Vec<u8>>),
				OffchainContext::StorageSet(req) => req.resume(true),
				OffchainContext::Timestamp(req) => {
					let now = SystemTime::now()
						.duration_since(UNIX_EPOCH)
						.map(|d| d.as_millis() as u64)
						.unwrap_or_default();
					req.inject_timestamp(now)
				},
				OffchainContext::RandomSeed(req) => {
					let nanos = SystemTime::now()
						.duration_since(UNIX_EPOCH)
						.map(|d| d.as_nanos())
						.unwrap_or_default();
					req.inject_random_seed(sp_core::blake2_256(&nanos.to_le_bytes()))
				},
				OffchainContext::SubmitTransaction(req) => req.resume(false),
			},

			VmCall::LogEmit(req) => {
				match req.info() {
					LogEmitInfo::Num(v) => log::debug!(target: RUNTIME_LOG_TARGET, "{v}"),
					LogEmitInfo::Utf8(v) => log::debug!(target: RUNTIME_LOG_TARGET, "{v}"),
					LogEmitInfo::Hex(v) => log::debug!(target: RUNTIME_LOG_TARGET, "{v}"),
					LogEmitInfo::Log { log_level, target, message } => {
						let target = format!("{RUNTIME_LOG_TARGET}::{target}");
						log::log!(target: &target, runtime_log_level(log_level), "{message}");
					},
				}
				req.resume()
			},
		}
	}
}

async fn read(
	overlay: &Overlay,
	storage: &dyn StorageProvider,
	key: &[u8],
) -> Result<Option<Vec<u8>>, ExecutorError> {
	match overlay.get(key) {
		Some(value) => Ok(value.clone()),
		None => Ok(storage.get(key).await?),
	}
}

/// First key under `prefix` after `key` (or equal to it when `or_equal`), combining the
/// backing storage with the changes of earlier calls.
async fn next_key(
	overlay: &Overlay,
	storage: &dyn StorageProvider,
	prefix: &[u8],
	key: &[u8],
	or_equal: bool,
) -> Result<Option<Vec<u8>>, ExecutorError> {
	if or_equal && key.starts_with(prefix) && read(overlay, storage, key).await?.is_some() {
		return Ok(Some(key.to_vec()));
	}

	let mut cursor = key.to_vec();
	let from_storage = loop {
		match storage.next_key(prefix, &cursor).await? {
			Some(next) if matches!(overlay.get(&next), Some(None)) => cursor = next,
			other => break other,
		}
	};

	let start = if key < prefix { Bound::Included(prefix) } else { Bound::Excluded(key) };
	let from_overlay = overlay
		.range::<[u8], _>((start, Bound::Unbounded))
		.take_while(|(k, _)| k.starts_with(prefix))
		.find(|(_, v)| v.is_some())
		.map(|(k, _)| k.clone());

	Ok(match (from_storage, from_overlay) {
		(Some(a), Some(b)) => Some(a.min(b)),
		(a, b) => a.or(b),
	})
}

fn runtime_log_level(level: u32) -> log::Level {
	match level {
		0 | 1 => log::Level::Error,
		2 => log::Level::Warn,
		3 => log::Level::Info,
		4 => log::Level::Debug,
		_ => log::Level::Trace,
	}
}

/// Key under which a child trie entry is exposed in the flat key space.
fn prefixed_child_key(child: &[u8], key: &[u8]) -> Vec<u8> {
	[storage_prefixes::DEFAULT_CHILD_STORAGE, child, key].concat()
}

/// Check if a signature is a mock signature: `0xdeadbeef` padded with `0xcd`.
fn is_magic_signature(signature: &[u8]) -> bool {
	signature.starts_with(magic_signature::PREFIX) &&
		signature[magic_signature::PREFIX.len()..]
			.iter()
			.all(|&b| b == magic_signature::PADDING)
}
