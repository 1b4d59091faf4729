// SPDX-License-Identifier: GPL-3.0

//! Legacy chain_* RPC methods.
//!
//! These methods provide block-related operations for polkadot.js compatibility.

use super::{forward_heads, hex_hash};
use crate::{
	Blockchain,
	block::Block,
	rpc_server::{
		RpcServerError, parse_block_hash,
		types::{BlockData, Header, SignedBlock},
	},
};
use jsonrpsee::{
	PendingSubscriptionSink, SubscriptionMessage,
	core::{RpcResult, SubscriptionResult},
	proc_macros::rpc,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single block number or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListOrValue {
	Value(u32),
	List(Vec<u32>),
}

/// Legacy chain RPC methods.
#[rpc(server, namespace = "chain")]
pub trait ChainApi {
	/// Get block hash by number.
	///
	/// Returns the hash at the given height, a list of hashes for a list of heights, or the
	/// best block hash if no height is provided.
	#[method(name = "getBlockHash")]
	async fn get_block_hash(&self, block_number: Option<ListOrValue>)
	-> RpcResult<serde_json::Value>;

	/// Get block header by hash.
	///
	/// Returns the header of the block with the given hash, or the best block header if no hash is
	/// provided.
	#[method(name = "getHeader")]
	async fn get_header(&self, hash: Option<String>) -> RpcResult<Option<Header>>;

	/// Get full block by hash.
	///
	/// Returns the full signed block with the given hash, or the best block if no hash is provided.
	#[method(name = "getBlock")]
	async fn get_block(&self, hash: Option<String>) -> RpcResult<Option<SignedBlock>>;

	/// Get the hash of the last finalized block.
	#[method(name = "getFinalizedHead")]
	async fn get_finalized_head(&self) -> RpcResult<String>;

	/// Subscribe to new best block headers.
	#[subscription(name = "subscribeNewHead" => "newHead", unsubscribe = "unsubscribeNewHead", item = Header)]
	async fn subscribe_new_head(&self) -> SubscriptionResult;

	/// Subscribe to finalized block headers.
	#[subscription(name = "subscribeFinalizedHeads" => "finalizedHead", unsubscribe = "unsubscribeFinalizedHeads", item = Header)]
	async fn subscribe_finalized_heads(&self) -> SubscriptionResult;
}

/// Implementation of legacy chain RPC methods.
pub struct ChainApi {
	blockchain: Arc<Blockchain>,
	shutdown_token: CancellationToken,
}

impl ChainApi {
	/// Create a new ChainApi instance.
	pub fn new(blockchain: Arc<Blockchain>, shutdown_token: CancellationToken) -> Self {
		Self { blockchain, shutdown_token }
	}

	async fn find_block(&self, hash: Option<String>) -> Result<Option<Arc<Block>>, RpcServerError> {
		match hash {
			Some(hash) => Ok(self.blockchain.get_block(parse_block_hash(&hash)?).await?),
			None => Ok(Some(self.blockchain.head())),
		}
	}

	async fn hash_at(&self, number: u32) -> Result<serde_json::Value, RpcServerError> {
		Ok(match self.blockchain.block_hash_at(number).await? {
			Some(hash) => serde_json::Value::String(hex_hash(hash)),
			None => serde_json::Value::Null,
		})
	}

	async fn subscribe_heads(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
		let sink = pending.accept().await?;
		let head = self.blockchain.head();
		sink.send(SubscriptionMessage::from_json(head.header())?).await?;
		forward_heads(
			self.blockchain.clone(),
			sink,
			self.shutdown_token.clone(),
			|block: &Block| block.header().clone(),
		);
		Ok(())
	}
}

#[async_trait::async_trait]
impl ChainApiServer for ChainApi {
	async fn get_block_hash(
		&self,
		block_number: Option<ListOrValue>,
	) -> RpcResult<serde_json::Value> {
		match block_number {
			None => Ok(serde_json::Value::String(hex_hash(self.blockchain.head().hash))),
			Some(ListOrValue::Value(number)) => Ok(self.hash_at(number).await?),
			Some(ListOrValue::List(numbers)) => {
				let mut hashes = Vec::with_capacity(numbers.len());
				for number in numbers {
					hashes.push(self.hash_at(number).await?);
				}
				Ok(serde_json::Value::Array(hashes))
			},
		}
	}

	async fn get_header(&self, hash: Option<String>) -> RpcResult<Option<Header>> {
		Ok(self.find_block(hash).await?.map(|block| block.header().clone()))
	}

	async fn get_block(&self, hash: Option<String>) -> RpcResult<Option<SignedBlock>> {
		let Some(block) = self.find_block(hash).await? else {
			return Ok(None);
		};
		let extrinsics = block
			.extrinsics()
			.await
			.map_err(|e| RpcServerError::Storage(format!("Failed to fetch block body: {e}")))?
			.iter()
			.map(|ext| format!("0x{}", hex::encode(ext)))
			.collect();

		Ok(Some(SignedBlock {
			block: BlockData { header: block.header().clone(), extrinsics },
			justifications: None,
		}))
	}

	async fn get_finalized_head(&self) -> RpcResult<String> {
		Ok(hex_hash(self.blockchain.finalized_head().hash))
	}

	async fn subscribe_new_head(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
		self.subscribe_heads(pending).await
	}

	async fn subscribe_finalized_heads(
		&self,
		pending: PendingSubscriptionSink,
	) -> SubscriptionResult {
		// Every new head is final on a fork.
		self.subscribe_heads(pending).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		testing::{REMOTE_HEAD_NUMBER, RpcTestContext},
		txpool::NewBlockParams,
	};
	use jsonrpsee::{
		core::client::{ClientT, Subscription, SubscriptionClientT},
		rpc_params,
		ws_client::WsClientBuilder,
	};

	#[tokio::test(flavor = "multi_thread")]
	async fn get_block_hash_resolves_numbers_lists_and_null() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let built = ctx.chain().new_block(NewBlockParams::default()).await.unwrap();

		let head: String = client.request("chain_getBlockHash", rpc_params![]).await.unwrap();
		assert_eq!(head, hex_hash(built.hash));

		let fork: String = client
			.request("chain_getBlockHash", rpc_params![REMOTE_HEAD_NUMBER])
			.await
			.unwrap();
		assert_eq!(fork, hex_hash(ctx.test.remote.head_hash()));

		let list: Vec<Option<String>> = client
			.request("chain_getBlockHash", rpc_params![vec![3u32, REMOTE_HEAD_NUMBER + 1, 99]])
			.await
			.unwrap();
		assert_eq!(list[0], Some(hex_hash(ctx.test.remote.hash_at(3))));
		assert_eq!(list[1], Some(hex_hash(built.hash)));
		assert_eq!(list[2], None);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn get_block_returns_header_and_body() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let fork_hash = hex_hash(ctx.test.remote.head_hash());

		let block: SignedBlock =
			client.request("chain_getBlock", rpc_params![fork_hash]).await.unwrap();
		assert_eq!(block.block.header.number, REMOTE_HEAD_NUMBER);
		let expected: Vec<String> = ctx
			.test
			.remote
			.head_body()
			.iter()
			.map(|ext| format!("0x{}", hex::encode(ext)))
			.collect();
		assert_eq!(block.block.extrinsics, expected);

		let missing = hex_hash(subxt::config::substrate::H256::repeat_byte(0xee));
		let header: Option<Header> =
			client.request("chain_getHeader", rpc_params![missing]).await.unwrap();
		assert!(header.is_none());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn new_head_subscription_sees_built_blocks() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let mut sub: Subscription<Header> = client
			.subscribe("chain_subscribeNewHead", rpc_params![], "chain_unsubscribeNewHead")
			.await
			.unwrap();

		let current = sub.next().await.unwrap().unwrap();
		assert_eq!(current.number, REMOTE_HEAD_NUMBER);

		ctx.chain().new_block(NewBlockParams::default()).await.unwrap();
		let next = sub.next().await.unwrap().unwrap();
		assert_eq!(next.number, REMOTE_HEAD_NUMBER + 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn finalized_head_follows_the_head() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let built = ctx.chain().new_block(NewBlockParams::default()).await.unwrap();
		let finalized: String =
			client.request("chain_getFinalizedHead", rpc_params![]).await.unwrap();
		assert_eq!(finalized, hex_hash(built.hash));
	}
}
