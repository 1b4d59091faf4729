// SPDX-License-Identifier: GPL-3.0

//! Fork configuration.
//!
//! [`ReplayConfig`] carries everything needed to set up a fork. It deserializes from
//! camelCase JSON with every field defaulted, so callers can supply only what they
//! want to change. Locating and reading configuration files is left to the caller.

use crate::{
	strings::txpool::batch,
	txpool::{BatchTiming, BuildBlockMode},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use subxt::config::substrate::H256;

/// Default number of blocks kept in memory before the oldest are evicted.
pub const DEFAULT_MAX_MEMORY_BLOCK_COUNT: usize = 500;

/// Block to fork from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockRef {
	/// A block height on the remote chain.
	Number(u32),
	/// A block hash on the remote chain.
	Hash(H256),
}

/// Configuration of a forked chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayConfig {
	/// Fork point. Defaults to the remote's latest finalized block.
	pub block: Option<BlockRef>,
	/// How the transaction pool turns submissions into blocks.
	pub build_block_mode: BuildBlockMode,
	/// Blocks retained in memory before eviction.
	pub max_memory_block_count: usize,
	/// Accept mock signatures instead of verifying them.
	pub mock_signature_host: bool,
	/// Allow runtimes importing host functions that are not provided.
	pub allow_unresolved_imports: bool,
	/// Maximum runtime log level forwarded to the logger (0 = off, 5 = trace).
	pub runtime_log_level: u32,
	/// Worker threads of the execution service.
	pub execution_workers: usize,
	/// Quiet period, in milliseconds, before a batch is built.
	pub batch_delay_ms: u64,
	/// Longest time, in milliseconds, the first submission of a batch may wait.
	pub batch_max_wait_ms: u64,
	/// Storage overrides applied to the fork point.
	pub import_storage: Option<serde_json::Value>,
	/// Parachain id, when the fork should be treated as a parachain regardless of its state.
	pub registered_para_id: Option<u32>,
}

impl Default for ReplayConfig {
	fn default() -> Self {
		Self {
			block: None,
			build_block_mode: BuildBlockMode::default(),
			max_memory_block_count: DEFAULT_MAX_MEMORY_BLOCK_COUNT,
			mock_signature_host: false,
			allow_unresolved_imports: false,
			runtime_log_level: 0,
			execution_workers: 1,
			batch_delay_ms: batch::DEFAULT_DELAY_MS,
			batch_max_wait_ms: batch::DEFAULT_MAX_WAIT_MS,
			import_storage: None,
			registered_para_id: None,
		}
	}
}

impl ReplayConfig {
	/// Batch scheduling derived from the configured delays.
	pub fn batch_timing(&self) -> BatchTiming {
		BatchTiming {
			delay: Duration::from_millis(self.batch_delay_ms),
			max_wait: Duration::from_millis(self.batch_max_wait_ms.max(self.batch_delay_ms)),
		}
	}
}
