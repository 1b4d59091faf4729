// SPDX-License-Identifier: GPL-3.0

//! Legacy state_* RPC methods.
//!
//! These methods provide state-related operations for polkadot.js compatibility.

use super::{block_at, descendant_values, hex_hash};
use crate::{
	Blockchain,
	head_state::StorageChange,
	rpc_server::{
		RpcServerError, parse_hex_bytes,
		types::{DescendantValues, HexString, RuntimeVersion, StorageChangeSet},
	},
	strings::{builder::runtime_api, rpc_server::state::MAX_PAGE_SIZE},
};
use jsonrpsee::{
	PendingSubscriptionSink, SubscriptionMessage,
	core::{RpcResult, SubscriptionResult},
	proc_macros::rpc,
};
use scale::Decode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Legacy state RPC methods.
#[rpc(server, namespace = "state")]
pub trait StateApi {
	/// Get storage value at a key.
	///
	/// Returns the hex-encoded storage value at the given key, or null if no value exists.
	#[method(name = "getStorage")]
	async fn get_storage(&self, key: String, at: Option<String>) -> RpcResult<Option<String>>;

	/// Get the runtime metadata.
	///
	/// Returns the hex-encoded runtime metadata.
	#[method(name = "getMetadata")]
	async fn get_metadata(&self, at: Option<String>) -> RpcResult<String>;

	/// Get the runtime version.
	#[method(name = "getRuntimeVersion")]
	async fn get_runtime_version(&self, at: Option<String>) -> RpcResult<RuntimeVersion>;

	/// Get storage keys with pagination.
	#[method(name = "getKeysPaged")]
	async fn get_keys_paged(
		&self,
		prefix: Option<String>,
		count: u32,
		start_key: Option<String>,
		at: Option<String>,
	) -> RpcResult<Vec<String>>;

	/// Get one page of the key-value pairs under a prefix.
	///
	/// Pass the returned `next` as `startKey` to fetch the following page.
	#[method(name = "getDescendantValues")]
	async fn get_descendant_values(
		&self,
		prefix: String,
		start_key: Option<String>,
		page_size: Option<u32>,
		at: Option<String>,
	) -> RpcResult<DescendantValues>;

	/// Call a runtime API method.
	///
	/// Returns the hex-encoded result of the runtime call.
	#[method(name = "call")]
	async fn call(&self, method: String, data: String, at: Option<String>) -> RpcResult<String>;

	/// Subscribe to storage changes.
	#[subscription(name = "subscribeStorage" => "storage", unsubscribe = "unsubscribeStorage", item = StorageChangeSet)]
	async fn subscribe_storage(&self, keys: Option<Vec<String>>) -> SubscriptionResult;
}

/// Implementation of legacy state RPC methods.
pub struct StateApi {
	blockchain: Arc<Blockchain>,
	shutdown_token: CancellationToken,
}

impl StateApi {
	/// Create a new StateApi instance.
	pub fn new(blockchain: Arc<Blockchain>, shutdown_token: CancellationToken) -> Self {
		Self { blockchain, shutdown_token }
	}
}

fn change_set(change: &StorageChange) -> StorageChangeSet {
	StorageChangeSet {
		block: hex_hash(change.block.hash),
		changes: change
			.changes
			.iter()
			.map(|(key, value)| {
				(HexString::from_bytes(key).into(), value.as_deref().map(|v| HexString::from_bytes(v).into()))
			})
			.collect(),
	}
}

#[async_trait::async_trait]
impl StateApiServer for StateApi {
	async fn get_storage(&self, key: String, at: Option<String>) -> RpcResult<Option<String>> {
		let key_bytes = parse_hex_bytes(&key, "key")?;
		let block = block_at(&self.blockchain, at.as_deref()).await?;
		let value =
			block.get(&key_bytes).await.map_err(|e| RpcServerError::Storage(e.to_string()))?;
		Ok(value.map(|v| HexString::from_bytes(&v).into()))
	}

	async fn get_metadata(&self, at: Option<String>) -> RpcResult<String> {
		let block = block_at(&self.blockchain, at.as_deref()).await?;
		// The runtime returns the metadata as a SCALE `Vec<u8>`.
		let outcome = block
			.call(runtime_api::METADATA, &[])
			.await
			.map_err(|e| RpcServerError::RuntimeCall(e.to_string()))?;
		let metadata = Vec::<u8>::decode(&mut outcome.result.as_slice())
			.map_err(|e| RpcServerError::Internal(format!("Failed to decode metadata: {e}")))?;
		Ok(HexString::from_bytes(&metadata).into())
	}

	async fn get_runtime_version(&self, at: Option<String>) -> RpcResult<RuntimeVersion> {
		let block = block_at(&self.blockchain, at.as_deref()).await?;
		Ok(block
			.runtime_version()
			.await
			.map_err(|e| RpcServerError::RuntimeCall(format!("Failed to get runtime version: {e}")))?)
	}

	async fn get_keys_paged(
		&self,
		prefix: Option<String>,
		count: u32,
		start_key: Option<String>,
		at: Option<String>,
	) -> RpcResult<Vec<String>> {
		let prefix_bytes = match prefix {
			Some(ref p) => parse_hex_bytes(p, "prefix")?,
			None => vec![],
		};
		let start_key_bytes = match start_key {
			Some(ref k) => Some(parse_hex_bytes(k, "start_key")?),
			None => None,
		};
		let block = block_at(&self.blockchain, at.as_deref()).await?;

		let keys = block
			.keys_paged(&prefix_bytes, count.min(MAX_PAGE_SIZE), start_key_bytes.as_deref())
			.await
			.map_err(|e| RpcServerError::Storage(e.to_string()))?;
		log::trace!("state_getKeysPaged: {} key(s) at #{}", keys.len(), block.number);

		Ok(keys.into_iter().map(|k| HexString::from_bytes(&k).into()).collect())
	}

	async fn get_descendant_values(
		&self,
		prefix: String,
		start_key: Option<String>,
		page_size: Option<u32>,
		at: Option<String>,
	) -> RpcResult<DescendantValues> {
		let prefix_bytes = parse_hex_bytes(&prefix, "prefix")?;
		let start_key_bytes = match start_key {
			Some(ref k) => Some(parse_hex_bytes(k, "start_key")?),
			None => None,
		};
		let page_size = page_size.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
		let block = block_at(&self.blockchain, at.as_deref()).await?;
		Ok(descendant_values(&block, &prefix_bytes, start_key_bytes.as_deref(), page_size).await?)
	}

	async fn call(&self, method: String, data: String, at: Option<String>) -> RpcResult<String> {
		let params = parse_hex_bytes(&data, "data")?;
		let block = block_at(&self.blockchain, at.as_deref()).await?;
		let outcome = block
			.call(&method, &params)
			.await
			.map_err(|e| RpcServerError::RuntimeCall(format!("{method}: {e}")))?;
		Ok(HexString::from_bytes(&outcome.result).into())
	}

	async fn subscribe_storage(
		&self,
		pending: PendingSubscriptionSink,
		keys: Option<Vec<String>>,
	) -> SubscriptionResult {
		let mut subscribed_keys = Vec::new();
		for key in keys.unwrap_or_default() {
			match parse_hex_bytes(&key, "key") {
				Ok(bytes) => subscribed_keys.push(bytes),
				Err(e) => {
					pending.reject(e).await;
					return Ok(());
				},
			}
		}
		let sink = pending.accept().await?;

		// Send initial values
		let head = self.blockchain.head();
		let mut changes = Vec::with_capacity(subscribed_keys.len());
		for key in &subscribed_keys {
			let value = head.get(key).await.ok().flatten();
			changes.push((key.clone(), value));
		}
		sink.send(SubscriptionMessage::from_json(&change_set(&StorageChange {
			block: head,
			changes,
		}))?)
		.await?;

		let (tx, mut rx) = mpsc::unbounded_channel::<StorageChange>();
		let by_key = !subscribed_keys.is_empty();
		let id = if by_key {
			self.blockchain.head_state().subscribe_storage(subscribed_keys, move |change| {
				let _ = tx.send(change.clone());
			})
		} else {
			// Without keys, every change of every new head is reported.
			self.blockchain.head_state().subscribe_head(move |block| {
				let changes: Vec<_> = block.storage_diff().into_iter().collect();
				if !changes.is_empty() {
					let _ = tx.send(StorageChange { block: block.clone(), changes });
				}
			})
		};

		let blockchain = self.blockchain.clone();
		let token = self.shutdown_token.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;

					_ = token.cancelled() => break,

					_ = sink.closed() => break,

					change = rx.recv() => {
						let Some(change) = change else { break };
						let msg = match SubscriptionMessage::from_json(&change_set(&change)) {
							Ok(m) => m,
							Err(_) => continue,
						};
						if sink.send(msg).await.is_err() {
							break;
						}
					}
				}
			}
			if by_key {
				blockchain.head_state().unsubscribe_storage(id);
			} else {
				blockchain.head_state().unsubscribe_head(id);
			}
		});

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		rpc_server::error_codes,
		testing::{MockCall, RpcTestContext, mock_extrinsic},
		txpool::NewBlockParams,
	};
	use jsonrpsee::{
		core::client::{ClientT, Error as ClientError, Subscription, SubscriptionClientT},
		rpc_params,
		ws_client::WsClientBuilder,
	};
	use scale::Encode;

	#[tokio::test(flavor = "multi_thread")]
	async fn get_storage_reads_remote_and_local_values() {
		let ctx = RpcTestContext::new().await;
		ctx.test.remote.insert_storage(b"remote".to_vec(), b"upstream".to_vec());
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let value: Option<String> = client
			.request("state_getStorage", rpc_params![format!("0x{}", hex::encode(b"remote"))])
			.await
			.unwrap();
		assert_eq!(value, Some(format!("0x{}", hex::encode(b"upstream"))));

		let ext = mock_extrinsic(MockCall::Set { key: b"local".to_vec(), value: b"v".to_vec() });
		let block = ctx
			.chain()
			.new_block(NewBlockParams { transactions: vec![ext], ..Default::default() })
			.await
			.unwrap();
		let key = format!("0x{}", hex::encode(b"local"));
		let at_head: Option<String> =
			client.request("state_getStorage", rpc_params![&key]).await.unwrap();
		assert_eq!(at_head, Some("0x76".to_string()));
		let at_parent: Option<String> = client
			.request("state_getStorage", rpc_params![&key, hex_hash(block.parent_hash)])
			.await
			.unwrap();
		assert_eq!(at_parent, None);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn unknown_block_is_an_invalid_block_error() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let missing = hex_hash(subxt::config::substrate::H256::repeat_byte(0xee));
		let err = client
			.request::<Option<String>, _>("state_getStorage", rpc_params!["0x00", missing])
			.await
			.unwrap_err();
		match err {
			ClientError::Call(e) => assert_eq!(e.code(), error_codes::INVALID_BLOCK),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn runtime_queries_go_through_the_engine() {
		let ctx = RpcTestContext::new().await;
		ctx.test.engine.respond(runtime_api::METADATA, vec![1u8, 2, 3].encode());
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let metadata: String = client.request("state_getMetadata", rpc_params![]).await.unwrap();
		assert_eq!(metadata, "0x010203");

		let version: serde_json::Value =
			client.request("state_getRuntimeVersion", rpc_params![]).await.unwrap();
		assert_eq!(version["specName"], "mock");
		assert_eq!(version["specVersion"], 1);

		ctx.test.engine.respond("Custom_api", vec![0xaa]);
		let result: String =
			client.request("state_call", rpc_params!["Custom_api", "0x"]).await.unwrap();
		assert_eq!(result, "0xaa");
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn keys_and_descendant_values_are_paged() {
		let ctx = RpcTestContext::new().await;
		ctx.chain().head().set_storage((0u8..4).map(|i| (vec![0xbb, i], Some(vec![i]))));
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let keys: Vec<String> = client
			.request("state_getKeysPaged", rpc_params!["0xbb", 2, "0xbb00"])
			.await
			.unwrap();
		assert_eq!(keys, vec!["0xbb01".to_string(), "0xbb02".to_string()]);

		let page: DescendantValues = client
			.request("state_getDescendantValues", rpc_params!["0xbb", None::<String>, 3])
			.await
			.unwrap();
		assert_eq!(page.items.len(), 3);
		let rest: DescendantValues = client
			.request("state_getDescendantValues", rpc_params!["0xbb", page.next, 3])
			.await
			.unwrap();
		assert_eq!(rest.items, vec![("0xbb03".to_string(), "0x03".to_string())]);
		assert_eq!(rest.next, None);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn storage_subscription_reports_initial_and_changed_values() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let key = format!("0x{}", hex::encode(b"watched"));
		let mut sub: Subscription<StorageChangeSet> = client
			.subscribe("state_subscribeStorage", rpc_params![vec![&key]], "state_unsubscribeStorage")
			.await
			.unwrap();

		let initial = sub.next().await.unwrap().unwrap();
		assert_eq!(initial.changes, vec![(key.clone(), None)]);

		let ext = mock_extrinsic(MockCall::Set { key: b"watched".to_vec(), value: vec![7] });
		let block = ctx
			.chain()
			.new_block(NewBlockParams { transactions: vec![ext], ..Default::default() })
			.await
			.unwrap();
		let update = sub.next().await.unwrap().unwrap();
		assert_eq!(update.block, hex_hash(block.hash));
		assert_eq!(update.changes, vec![(key, Some("0x07".to_string()))]);
	}
}
