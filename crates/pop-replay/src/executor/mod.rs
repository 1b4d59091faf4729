// SPDX-License-Identifier: GPL-3.0

//! Runtime execution service.
//!
//! Blocks never run WASM themselves. They hand an [`ExecutionRequest`] (runtime code plus
//! an ordered list of entry points and SCALE encoded arguments) to the execution service
//! together with the storage view to run against, and get back an [`ExecutionResponse`]:
//! the output of the last call and the storage diff accumulated over all calls, or an
//! error.
//!
//! ```text
//! ┌──────────────┐  Task   ┌──────────────────────────────────────┐
//! │RuntimeExecutor│───────►│ ExecutorService                      │
//! │   (handle)    │ channel│  worker 1 ─┐                         │
//! │               │◄───────│  worker 2 ─┼─► RuntimeEngine::execute│
//! └──────────────┘ oneshot │  worker N ─┘                         │
//!                          └──────────────────────────────────────┘
//! ```
//!
//! [`SmoldotEngine`] is the production [`RuntimeEngine`]. Trie helpers used to compute
//! state roots and to rewrite relay chain proofs live in [`trie`].

mod engine;
mod service;
pub mod trie;

pub use engine::SmoldotEngine;
pub use service::{ExecutorConfig, ExecutorService, RuntimeExecutor};

use crate::{error::ExecutorError, storage::StorageProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One runtime entry point invocation: `[entryPoint, hexArgs]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCall(pub String, #[serde(with = "hex_bytes")] pub Vec<u8>);

impl RuntimeCall {
	pub fn new(method: impl Into<String>, args: impl Into<Vec<u8>>) -> Self {
		Self(method.into(), args.into())
	}

	/// The runtime entry point, e.g. `Core_version`.
	pub fn method(&self) -> &str {
		&self.0
	}

	/// SCALE encoded arguments.
	pub fn args(&self) -> &[u8] {
		&self.1
	}
}

/// A change produced by execution: `[key, value | null]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDiffEntry(
	#[serde(with = "hex_bytes")] pub Vec<u8>,
	#[serde(with = "hex_bytes::option")] pub Option<Vec<u8>>,
);

/// Work submitted to the execution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
	/// Runtime WASM, possibly zstd compressed.
	#[serde(with = "hex_bytes::shared")]
	pub runtime_bytecode: Arc<[u8]>,
	/// Calls executed in order; each sees the changes of the previous ones.
	pub calls: Vec<RuntimeCall>,
	/// Accept `0xdeadbeef`-prefixed signatures without verifying them.
	pub mock_signature_host: bool,
	/// Allow the runtime to import host functions that are not provided.
	pub allow_unresolved_imports: bool,
	/// Highest runtime log level forwarded (0 = off, 5 = trace).
	pub log_level: u32,
}

/// Successful execution: output of the last call and the accumulated storage diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
	#[serde(with = "hex_bytes")]
	pub result: Vec<u8>,
	pub storage_diff: Vec<StorageDiffEntry>,
}

impl CallOutcome {
	/// The storage diff as `(key, value)` pairs.
	pub fn changes(&self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> + '_ {
		self.storage_diff.iter().map(|StorageDiffEntry(k, v)| (k.clone(), v.clone()))
	}
}

/// Response of the execution service: `{ "Call": {...} }` or `{ "Error": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionResponse {
	Call(CallOutcome),
	Error(String),
}

impl From<Result<CallOutcome, ExecutorError>> for ExecutionResponse {
	fn from(result: Result<CallOutcome, ExecutorError>) -> Self {
		match result {
			Ok(outcome) => ExecutionResponse::Call(outcome),
			Err(e) => ExecutionResponse::Error(e.to_string()),
		}
	}
}

/// Executes runtime calls against a storage view.
///
/// Engines run on the service's worker threads, each driving its own single-threaded
/// async runtime, so the returned future does not need to be `Send`.
#[async_trait(?Send)]
pub trait RuntimeEngine: Send + Sync {
	async fn execute(
		&self,
		request: &ExecutionRequest,
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError>;
}

/// Serde helpers encoding bytes as `0x`-prefixed hex strings.
pub(crate) mod hex_bytes {
	use serde::{Deserialize, Deserializer, Serializer, de::Error};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom)
	}

	pub mod option {
		use super::*;

		pub fn serialize<S: Serializer>(
			bytes: &Option<Vec<u8>>,
			serializer: S,
		) -> Result<S::Ok, S::Error> {
			match bytes {
				Some(bytes) => super::serialize(bytes, serializer),
				None => serializer.serialize_none(),
			}
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Option<Vec<u8>>, D::Error> {
			Option::<String>::deserialize(deserializer)?
				.map(|s| hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom))
				.transpose()
		}
	}

	pub mod shared {
		use super::*;
		use std::sync::Arc;

		pub fn serialize<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
			super::serialize(bytes, serializer)
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Arc<[u8]>, D::Error> {
			super::deserialize(deserializer).map(Into::into)
		}
	}
}
