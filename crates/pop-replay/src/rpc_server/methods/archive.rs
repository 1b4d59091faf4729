// SPDX-License-Identifier: GPL-3.0

//! archive_unstable_* RPC methods.

use super::hex_hash;
use crate::{
	Blockchain,
	rpc_server::{RpcServerError, parse_block_hash},
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use scale::Encode;
use std::sync::Arc;

/// Archive RPC methods (unstable spec).
#[rpc(server, namespace = "archive")]
pub trait ArchiveApi {
	/// Get the current finalized block height.
	#[method(name = "unstable_finalizedHeight")]
	async fn finalized_height(&self) -> RpcResult<u32>;

	/// Get block hashes by height.
	///
	/// A fork has a single chain, so the list holds at most one hash.
	#[method(name = "unstable_hashByHeight")]
	async fn hash_by_height(&self, height: u32) -> RpcResult<Vec<String>>;

	/// Get the hex-encoded SCALE header of a block.
	#[method(name = "unstable_header")]
	async fn header(&self, hash: String) -> RpcResult<Option<String>>;

	/// Get the hex-encoded extrinsics of a block.
	#[method(name = "unstable_body")]
	async fn body(&self, hash: String) -> RpcResult<Option<Vec<String>>>;

	/// Get the genesis hash.
	#[method(name = "unstable_genesisHash")]
	async fn genesis_hash(&self) -> RpcResult<String>;
}

/// Implementation of archive RPC methods.
pub struct ArchiveApi {
	blockchain: Arc<Blockchain>,
}

impl ArchiveApi {
	/// Create a new ArchiveApi instance.
	pub fn new(blockchain: Arc<Blockchain>) -> Self {
		Self { blockchain }
	}
}

#[async_trait::async_trait]
impl ArchiveApiServer for ArchiveApi {
	async fn finalized_height(&self) -> RpcResult<u32> {
		Ok(self.blockchain.finalized_head().number)
	}

	async fn hash_by_height(&self, height: u32) -> RpcResult<Vec<String>> {
		let hash = self.blockchain.block_hash_at(height).await.map_err(RpcServerError::from)?;
		Ok(hash.into_iter().map(hex_hash).collect())
	}

	async fn header(&self, hash: String) -> RpcResult<Option<String>> {
		let block =
			self.blockchain.get_block(parse_block_hash(&hash)?).await.map_err(RpcServerError::from)?;
		Ok(block.map(|b| format!("0x{}", hex::encode(b.header().encode()))))
	}

	async fn body(&self, hash: String) -> RpcResult<Option<Vec<String>>> {
		let Some(block) =
			self.blockchain.get_block(parse_block_hash(&hash)?).await.map_err(RpcServerError::from)?
		else {
			return Ok(None);
		};
		let extrinsics = block.extrinsics().await.map_err(|e| RpcServerError::Storage(e.to_string()))?;
		Ok(Some(extrinsics.iter().map(|ext| format!("0x{}", hex::encode(ext))).collect()))
	}

	async fn genesis_hash(&self) -> RpcResult<String> {
		let hash = self
			.blockchain
			.block_hash_at(0)
			.await
			.map_err(RpcServerError::from)?
			.ok_or_else(|| RpcServerError::BlockNotFound("genesis".into()))?;
		Ok(hex_hash(hash))
	}
}
