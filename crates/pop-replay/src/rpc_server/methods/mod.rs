// SPDX-License-Identifier: GPL-3.0

//! RPC method implementations.
//!
//! This module contains all RPC method implementations organized by namespace:
//! - `chain` - Legacy chain_* methods
//! - `state` - Legacy state_* methods
//! - `system` - Legacy system_* methods
//! - `author` - Legacy author_* methods
//! - `archive` - archive_unstable_* methods
//! - `chain_head` - chainHead_v1_* methods
//! - `transaction` - transaction_v1_* methods
//! - `dev` - Development methods for manual chain control

mod archive;
mod author;
mod chain;
mod chain_head;
mod dev;
mod state;
mod system;
mod transaction;

use crate::{
	Blockchain,
	block::Block,
	rpc_server::{RpcServerError, parse_block_hash, types::DescendantValues},
};
use jsonrpsee::{RpcModule, SubscriptionMessage, SubscriptionSink};
use serde::Serialize;
use std::sync::Arc;
use subxt::config::substrate::H256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use archive::{ArchiveApi, ArchiveApiServer};
pub use author::{AuthorApi, AuthorApiServer};
pub use chain::{ChainApi, ChainApiServer};
pub use chain_head::{ChainHeadApi, ChainHeadApiServer};
pub use dev::{DevApi, DevApiServer, NewBlockRequest};
pub use state::{StateApi, StateApiServer};
pub use system::{SystemApi, SystemApiServer};
pub use transaction::{TransactionApi, TransactionApiServer};

/// Create the merged RPC module with all methods.
pub fn create_rpc_module(
	blockchain: Arc<Blockchain>,
	shutdown_token: CancellationToken,
) -> Result<RpcModule<()>, RpcServerError> {
	let mut module = RpcModule::new(());

	// Create implementations
	let chain_impl = ChainApi::new(blockchain.clone(), shutdown_token.clone());
	let state_impl = StateApi::new(blockchain.clone(), shutdown_token.clone());
	let system_impl = SystemApi::new(blockchain.clone());
	let author_impl = AuthorApi::new(blockchain.clone(), shutdown_token.clone());
	let archive_impl = ArchiveApi::new(blockchain.clone());
	let chain_head_impl = ChainHeadApi::new(blockchain.clone(), shutdown_token);
	let transaction_impl = TransactionApi::new(blockchain.clone());
	let dev_impl = DevApi::new(blockchain);

	// Merge all methods into the module
	module
		.merge(ChainApiServer::into_rpc(chain_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(StateApiServer::into_rpc(state_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(SystemApiServer::into_rpc(system_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(AuthorApiServer::into_rpc(author_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(ArchiveApiServer::into_rpc(archive_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(ChainHeadApiServer::into_rpc(chain_head_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(TransactionApiServer::into_rpc(transaction_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	module
		.merge(DevApiServer::into_rpc(dev_impl))
		.map_err(|e| RpcServerError::Internal(e.to_string()))?;

	Ok(module)
}

/// Hex encoding of a block hash.
pub(crate) fn hex_hash(hash: H256) -> String {
	format!("0x{}", hex::encode(hash.as_bytes()))
}

/// The block with the given hex hash, or the head when no hash is given.
pub(crate) async fn block_at(
	blockchain: &Blockchain,
	at: Option<&str>,
) -> Result<Arc<Block>, RpcServerError> {
	let Some(at) = at else {
		return Ok(blockchain.head());
	};
	let hash = parse_block_hash(at)?;
	blockchain.get_block(hash).await?.ok_or_else(|| RpcServerError::BlockNotFound(at.to_string()))
}

/// Send `notify(head)` to `sink` for every new head, until the client unsubscribes or the
/// server shuts down.
pub(crate) fn forward_heads<T, F>(
	blockchain: Arc<Blockchain>,
	sink: SubscriptionSink,
	token: CancellationToken,
	notify: F,
) where
	T: Serialize,
	F: Fn(&Block) -> T + Send + 'static,
{
	let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Block>>();
	let id = blockchain.head_state().subscribe_head(move |block| {
		let _ = tx.send(block.clone());
	});
	tokio::spawn(async move {
		loop {
			tokio::select! {
				biased;

				_ = token.cancelled() => break,

				_ = sink.closed() => break,

				block = rx.recv() => {
					let Some(block) = block else { break };
					let msg = match SubscriptionMessage::from_json(&notify(&block)) {
						Ok(m) => m,
						Err(_) => continue,
					};
					if sink.send(msg).await.is_err() {
						break;
					}
				}
			}
		}
		blockchain.head_state().unsubscribe_head(id);
	});
}

/// One page of the key-value pairs under `prefix` at `block`, strictly after `start_key`.
pub(crate) async fn descendant_values(
	block: &Block,
	prefix: &[u8],
	start_key: Option<&[u8]>,
	page_size: u32,
) -> Result<DescendantValues, RpcServerError> {
	let keys = block
		.keys_paged(prefix, page_size, start_key)
		.await
		.map_err(|e| RpcServerError::Storage(e.to_string()))?;
	let values = futures::future::try_join_all(keys.iter().map(|key| block.get(key)))
		.await
		.map_err(|e| RpcServerError::Storage(e.to_string()))?;

	let next = if keys.len() as u32 == page_size {
		keys.last().map(|key| format!("0x{}", hex::encode(key)))
	} else {
		None
	};
	let items = keys
		.iter()
		.zip(values)
		// Keys deleted between the two reads are skipped.
		.filter_map(|(key, value)| {
			value.map(|v| (format!("0x{}", hex::encode(key)), format!("0x{}", hex::encode(v))))
		})
		.collect();
	Ok(DescendantValues { items, next })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestChain;

	#[tokio::test]
	async fn descendant_values_pages_with_cursor() {
		let test = TestChain::new().await;
		let head = test.chain.head();
		head.set_storage((0u8..5).map(|i| (vec![0xaa, i], Some(vec![i]))));

		let first = descendant_values(&head, &[0xaa], None, 3).await.unwrap();
		assert_eq!(first.items.len(), 3);
		assert_eq!(first.items[0], ("0xaa00".to_string(), "0x00".to_string()));
		assert_eq!(first.next.as_deref(), Some("0xaa02"));

		let second = descendant_values(&head, &[0xaa], Some(&[0xaa, 0x02]), 3).await.unwrap();
		assert_eq!(second.items.len(), 2);
		assert_eq!(second.items[1].0, "0xaa04");
		assert_eq!(second.next, None);
	}

	#[tokio::test]
	async fn block_at_unknown_hash_is_not_found() {
		let test = TestChain::new().await;
		let missing = hex_hash(H256::repeat_byte(0xee));
		let err = block_at(&test.chain, Some(&missing)).await.unwrap_err();
		assert!(matches!(err, RpcServerError::BlockNotFound(_)));
		let head = block_at(&test.chain, None).await.unwrap();
		assert_eq!(head.hash, test.chain.head().hash);
	}
}
