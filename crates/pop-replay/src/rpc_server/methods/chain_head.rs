// SPDX-License-Identifier: GPL-3.0

//! chainHead_v1_* RPC methods.
//!
//! A follow subscription starts with an `initialized` event for the current head and
//! then reports every new head as `newBlock`, `bestBlockChanged` and `finalized`, since
//! a fork finalizes each head immediately. Operations started with `chainHead_v1_body`
//! and `chainHead_v1_storage` deliver their results on the follow subscription they
//! name. Blocks stay available as long as the chain keeps them in memory, so pinning is
//! not tracked.

use super::{descendant_values, hex_hash};
use crate::{
	Blockchain,
	block::Block,
	rpc_server::{
		RpcServerError, parse_block_hash, parse_hex_bytes,
		types::{
			ChainHeadEvent, HashOrHashes, OperationResult, RuntimeEvent, StorageQueryItem,
			StorageQueryType, StorageResultItem,
		},
	},
	strings::{
		executor::storage_prefixes::DEFAULT_CHILD_STORAGE,
		rpc::storage_keys,
		rpc_server::{
			chain_head::{MAX_SUBSCRIPTIONS, OPERATION_ID_PREFIX},
			state::MAX_PAGE_SIZE,
		},
	},
};
use jsonrpsee::{
	PendingSubscriptionSink, SubscriptionMessage,
	core::{RpcResult, SubscriptionResult},
	proc_macros::rpc,
	types::SubscriptionId,
};
use parking_lot::Mutex;
use scale::Encode;
use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Work for a follow subscription's forwarding task.
enum Notice {
	Head(Arc<Block>),
	Event(ChainHeadEvent),
}

type Followers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Notice>>>>;

/// chainHead RPC methods.
#[rpc(server, namespace = "chainHead")]
pub trait ChainHeadApi {
	/// Follow the chain head.
	#[subscription(name = "v1_follow" => "v1_followEvent", unsubscribe = "v1_unfollow", item = ChainHeadEvent)]
	async fn follow(&self, with_runtime: bool) -> SubscriptionResult;

	/// SCALE-encoded header of a block, or null if unknown.
	#[method(name = "v1_header")]
	async fn header(&self, follow_subscription: String, hash: String)
	-> RpcResult<Option<String>>;

	/// Start fetching the body of a block.
	#[method(name = "v1_body")]
	async fn body(&self, follow_subscription: String, hash: String) -> RpcResult<OperationResult>;

	/// Start a storage query at a block.
	#[method(name = "v1_storage")]
	async fn storage(
		&self,
		follow_subscription: String,
		hash: String,
		items: Vec<StorageQueryItem>,
		child_trie: Option<String>,
	) -> RpcResult<OperationResult>;

	/// Release blocks. Accepted for compatibility.
	#[method(name = "v1_unpin")]
	async fn unpin(&self, follow_subscription: String, hash_or_hashes: HashOrHashes)
	-> RpcResult<()>;
}

/// Implementation of chainHead RPC methods.
pub struct ChainHeadApi {
	blockchain: Arc<Blockchain>,
	followers: Followers,
	next_operation: AtomicU64,
	shutdown_token: CancellationToken,
}

impl ChainHeadApi {
	/// Create a new ChainHeadApi instance.
	pub fn new(blockchain: Arc<Blockchain>, shutdown_token: CancellationToken) -> Self {
		Self {
			blockchain,
			followers: Arc::default(),
			next_operation: AtomicU64::new(1),
			shutdown_token,
		}
	}

	fn follower(&self, id: &str) -> Result<mpsc::UnboundedSender<Notice>, RpcServerError> {
		self.followers
			.lock()
			.get(id)
			.cloned()
			.ok_or_else(|| RpcServerError::InvalidSubscription { id: id.to_string() })
	}

	async fn pinned_block(&self, hash: &str) -> Result<Arc<Block>, RpcServerError> {
		self.blockchain
			.get_block(parse_block_hash(hash)?)
			.await?
			.ok_or_else(|| RpcServerError::BlockNotPinned { hash: hash.to_string() })
	}

	fn operation_id(&self) -> String {
		format!("{OPERATION_ID_PREFIX}-{}", self.next_operation.fetch_add(1, Ordering::Relaxed))
	}
}

fn subscription_key(id: &SubscriptionId) -> String {
	match id {
		SubscriptionId::Num(n) => n.to_string(),
		SubscriptionId::Str(s) => s.to_string(),
	}
}

async fn runtime_event(block: &Block) -> RuntimeEvent {
	match block.runtime_version().await {
		Ok(spec) => RuntimeEvent::Valid { spec },
		Err(e) => RuntimeEvent::Invalid { error: e.to_string() },
	}
}

/// Events announcing `block` as the new best and finalized block.
async fn head_events(block: &Block, with_runtime: bool) -> Vec<ChainHeadEvent> {
	let upgraded = block.storage_diff().contains_key(storage_keys::CODE);
	let new_runtime =
		if with_runtime && upgraded { Some(runtime_event(block).await) } else { None };
	let hash = hex_hash(block.hash);
	vec![
		ChainHeadEvent::NewBlock {
			block_hash: hash.clone(),
			parent_block_hash: hex_hash(block.parent_hash),
			new_runtime,
		},
		ChainHeadEvent::BestBlockChanged { best_block_hash: hash.clone() },
		ChainHeadEvent::Finalized { finalized_block_hashes: vec![hash], pruned_block_hashes: vec![] },
	]
}

/// Answer one storage query item at `block`.
async fn query_item(
	block: &Block,
	item: &StorageQueryItem,
	child_prefix: &[u8],
) -> Result<Vec<StorageResultItem>, RpcServerError> {
	let key = parse_hex_bytes(&item.key, "key")?;
	let full_key = [child_prefix, key.as_slice()].concat();
	let hashed = matches!(item.query_type, StorageQueryType::Hash | StorageQueryType::DescendantsHashes);
	let result = |key: &[u8], value: &[u8]| StorageResultItem {
		key: format!("0x{}", hex::encode(key)),
		value: (!hashed).then(|| format!("0x{}", hex::encode(value))),
		hash: hashed.then(|| format!("0x{}", hex::encode(sp_core::blake2_256(value)))),
	};

	match item.query_type {
		StorageQueryType::Value | StorageQueryType::Hash => {
			let value =
				block.get(&full_key).await.map_err(|e| RpcServerError::Storage(e.to_string()))?;
			Ok(value.map(|v| result(&key, &v)).into_iter().collect())
		},
		StorageQueryType::DescendantsValues | StorageQueryType::DescendantsHashes => {
			let mut items = Vec::new();
			let mut cursor: Option<Vec<u8>> = None;
			loop {
				let page =
					descendant_values(block, &full_key, cursor.as_deref(), MAX_PAGE_SIZE).await?;
				for (k, v) in &page.items {
					let k = parse_hex_bytes(k, "key")?;
					let v = parse_hex_bytes(v, "value")?;
					items.push(result(&k[child_prefix.len()..], &v));
				}
				match page.next {
					Some(next) => cursor = Some(parse_hex_bytes(&next, "key")?),
					None => break,
				}
			}
			Ok(items)
		},
	}
}

#[async_trait::async_trait]
impl ChainHeadApiServer for ChainHeadApi {
	async fn follow(&self, pending: PendingSubscriptionSink, with_runtime: bool) -> SubscriptionResult {
		if self.followers.lock().len() >= MAX_SUBSCRIPTIONS {
			pending.reject(RpcServerError::TooManySubscriptions { limit: MAX_SUBSCRIPTIONS }).await;
			return Ok(());
		}
		let sink = pending.accept().await?;
		let key = subscription_key(&sink.subscription_id());

		// Operations may name this subscription as soon as the client has its id.
		let (tx, mut rx) = mpsc::unbounded_channel();
		let head_tx = tx.clone();
		let head = self.blockchain.head();
		let head_id = self.blockchain.head_state().subscribe_head(move |block| {
			let _ = head_tx.send(Notice::Head(block.clone()));
		});
		self.followers.lock().insert(key.clone(), tx);

		let finalized_block_runtime =
			if with_runtime { Some(runtime_event(&head).await) } else { None };
		let initialized = ChainHeadEvent::Initialized {
			finalized_block_hashes: vec![hex_hash(head.hash)],
			finalized_block_runtime,
		};
		let sent = match SubscriptionMessage::from_json(&initialized) {
			Ok(msg) => sink.send(msg).await.is_ok(),
			Err(_) => false,
		};
		if !sent {
			self.blockchain.head_state().unsubscribe_head(head_id);
			self.followers.lock().remove(&key);
			return Ok(());
		}

		let blockchain = self.blockchain.clone();
		let followers = self.followers.clone();
		let token = self.shutdown_token.clone();
		tokio::spawn(async move {
			'follow: loop {
				tokio::select! {
					biased;

					_ = token.cancelled() => break,

					_ = sink.closed() => break,

					notice = rx.recv() => {
						let events = match notice {
							Some(Notice::Head(block)) => head_events(&block, with_runtime).await,
							Some(Notice::Event(event)) => vec![event],
							None => break,
						};
						for event in events {
							let msg = match SubscriptionMessage::from_json(&event) {
								Ok(m) => m,
								Err(_) => continue,
							};
							if sink.send(msg).await.is_err() {
								break 'follow;
							}
						}
					}
				}
			}
			blockchain.head_state().unsubscribe_head(head_id);
			followers.lock().remove(&key);
			log::debug!("chainHead follow subscription {key} ended");
		});

		Ok(())
	}

	async fn header(
		&self,
		follow_subscription: String,
		hash: String,
	) -> RpcResult<Option<String>> {
		self.follower(&follow_subscription)?;
		let hash = parse_block_hash(&hash)?;
		let block = self.blockchain.get_block(hash).await.map_err(RpcServerError::from)?;
		Ok(block.map(|b| format!("0x{}", hex::encode(b.header().encode()))))
	}

	async fn body(&self, follow_subscription: String, hash: String) -> RpcResult<OperationResult> {
		let tx = self.follower(&follow_subscription)?;
		let block = self.pinned_block(&hash).await?;
		let operation_id = self.operation_id();

		let id = operation_id.clone();
		tokio::spawn(async move {
			let event = match block.extrinsics().await {
				Ok(extrinsics) => ChainHeadEvent::OperationBodyDone {
					operation_id: id,
					value: extrinsics.iter().map(|ext| format!("0x{}", hex::encode(ext))).collect(),
				},
				Err(e) => ChainHeadEvent::OperationError { operation_id: id, error: e.to_string() },
			};
			let _ = tx.send(Notice::Event(event));
		});

		Ok(OperationResult::Started { operation_id })
	}

	async fn storage(
		&self,
		follow_subscription: String,
		hash: String,
		items: Vec<StorageQueryItem>,
		child_trie: Option<String>,
	) -> RpcResult<OperationResult> {
		let tx = self.follower(&follow_subscription)?;
		let block = self.pinned_block(&hash).await?;
		let child_prefix = match child_trie {
			Some(child) => {
				let child = parse_hex_bytes(&child, "childTrie")?;
				[DEFAULT_CHILD_STORAGE, child.as_slice()].concat()
			},
			None => Vec::new(),
		};
		let operation_id = self.operation_id();

		let id = operation_id.clone();
		tokio::spawn(async move {
			let mut results = Vec::new();
			for item in &items {
				match query_item(&block, item, &child_prefix).await {
					Ok(found) => results.extend(found),
					Err(e) => {
						let _ = tx.send(Notice::Event(ChainHeadEvent::OperationError {
							operation_id: id,
							error: e.to_string(),
						}));
						return;
					},
				}
			}
			if !results.is_empty() {
				let _ = tx.send(Notice::Event(ChainHeadEvent::OperationStorageItems {
					operation_id: id.clone(),
					items: results,
				}));
			}
			let _ = tx.send(Notice::Event(ChainHeadEvent::OperationStorageDone { operation_id: id }));
		});

		Ok(OperationResult::Started { operation_id })
	}

	async fn unpin(
		&self,
		follow_subscription: String,
		hash_or_hashes: HashOrHashes,
	) -> RpcResult<()> {
		self.follower(&follow_subscription)?;
		for hash in hash_or_hashes.into_vec() {
			parse_block_hash(&hash)?;
		}
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
		ws_client::{WsClient, WsClientBuilder},
	};

	async fn follow(
		client: &WsClient,
		with_runtime: bool,
	) -> (Subscription<serde_json::Value>, String) {
		let sub: Subscription<serde_json::Value> = client
			.subscribe("chainHead_v1_follow", rpc_params![with_runtime], "chainHead_v1_unfollow")
			.await
			.unwrap();
		let id = match sub.kind() {
			jsonrpsee::core::client::SubscriptionKind::Subscription(id) => subscription_key(id),
			other => panic!("unexpected subscription kind: {other:?}"),
		};
		(sub, id)
	}

	async fn next_event(sub: &mut Subscription<serde_json::Value>) -> serde_json::Value {
		sub.next().await.unwrap().unwrap()
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn follow_reports_initialized_then_new_heads() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let (mut sub, _) = follow(&client, true).await;

		let initialized = next_event(&mut sub).await;
		assert_eq!(initialized["event"], "initialized");
		assert_eq!(initialized["finalizedBlockHashes"][0], hex_hash(ctx.chain().head().hash));
		assert_eq!(initialized["finalizedBlockRuntime"]["type"], "valid");
		assert_eq!(initialized["finalizedBlockRuntime"]["spec"]["specName"], "mock");

		let block = ctx.chain().new_block(NewBlockParams::default()).await.unwrap();
		let new_block = next_event(&mut sub).await;
		assert_eq!(new_block["event"], "newBlock");
		assert_eq!(new_block["blockHash"], hex_hash(block.hash));
		assert_eq!(new_block["parentBlockHash"], hex_hash(block.parent_hash));
		assert!(new_block.get("newRuntime").is_none());
		assert_eq!(next_event(&mut sub).await["event"], "bestBlockChanged");
		let finalized = next_event(&mut sub).await;
		assert_eq!(finalized["event"], "finalized");
		assert_eq!(finalized["finalizedBlockHashes"][0], hex_hash(block.hash));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn body_and_storage_operations_report_on_the_subscription() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let (mut sub, id) = follow(&client, false).await;
		next_event(&mut sub).await;

		let ext = mock_extrinsic(MockCall::Set { key: vec![0xcc, 1], value: vec![9] });
		let block = ctx
			.chain()
			.new_block(NewBlockParams { transactions: vec![ext.clone()], ..Default::default() })
			.await
			.unwrap();
		for _ in 0..3 {
			next_event(&mut sub).await;
		}
		let hash = hex_hash(block.hash);

		let started: serde_json::Value =
			client.request("chainHead_v1_body", rpc_params![&id, &hash]).await.unwrap();
		assert_eq!(started["result"], "started");
		let body = next_event(&mut sub).await;
		assert_eq!(body["event"], "operationBodyDone");
		assert_eq!(body["operationId"], started["operationId"]);
		assert_eq!(body["value"][0], format!("0x{}", hex::encode(&ext)));

		let items = serde_json::json!([
			{ "key": "0xcc", "type": "descendantsValues" },
			{ "key": "0xcc01", "type": "hash" },
		]);
		let started: serde_json::Value = client
			.request("chainHead_v1_storage", rpc_params![&id, &hash, items, None::<String>])
			.await
			.unwrap();
		let found = next_event(&mut sub).await;
		assert_eq!(found["event"], "operationStorageItems");
		assert_eq!(found["operationId"], started["operationId"]);
		assert_eq!(found["items"][0], serde_json::json!({ "key": "0xcc01", "value": "0x09" }));
		assert_eq!(
			found["items"][1]["hash"],
			format!("0x{}", hex::encode(sp_core::blake2_256(&[9])))
		);
		assert_eq!(next_event(&mut sub).await["event"], "operationStorageDone");
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn header_is_scale_encoded_and_unknown_subscriptions_fail() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let (mut sub, id) = follow(&client, false).await;
		next_event(&mut sub).await;
		let head = ctx.chain().head();

		let header: Option<String> = client
			.request("chainHead_v1_header", rpc_params![&id, hex_hash(head.hash)])
			.await
			.unwrap();
		assert_eq!(header, Some(format!("0x{}", hex::encode(head.header().encode()))));

		let err = client
			.request::<Option<String>, _>(
				"chainHead_v1_header",
				rpc_params!["nope", hex_hash(head.hash)],
			)
			.await
			.unwrap_err();
		match err {
			ClientError::Call(e) => assert_eq!(e.code(), error_codes::INVALID_PARAMS),
			other => panic!("unexpected error: {other:?}"),
		}

		let missing = hex_hash(subxt::config::substrate::H256::repeat_byte(0xee));
		let err = client
			.request::<serde_json::Value, _>("chainHead_v1_body", rpc_params![&id, missing])
			.await
			.unwrap_err();
		match err {
			ClientError::Call(e) => assert_eq!(e.code(), error_codes::INVALID_BLOCK),
			other => panic!("unexpected error: {other:?}"),
		}
	}
}
