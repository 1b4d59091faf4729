// SPDX-License-Identifier: GPL-3.0

//! Legacy author_* RPC methods.
//!
//! Submissions go through the chain's transaction pool, whose build mode decides when
//! they are included. Watchers receive the pool's lifecycle events for their extrinsic.

use super::hex_hash;
use crate::{
	Blockchain,
	rpc_server::{RpcServerError, parse_hex_bytes, types::HexString},
	txpool::{ExtrinsicEvent, ExtrinsicStatus, extrinsic_hash},
};
use jsonrpsee::{
	PendingSubscriptionSink, SubscriptionMessage,
	core::{RpcResult, SubscriptionResult},
	proc_macros::rpc,
	types::ErrorObjectOwned,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Legacy author RPC methods.
#[rpc(server, namespace = "author")]
pub trait AuthorApi {
	/// Submit a fully formatted extrinsic for block inclusion.
	///
	/// Returns the hash of the submitted extrinsic.
	#[method(name = "submitExtrinsic")]
	async fn submit_extrinsic(&self, extrinsic: String) -> RpcResult<String>;

	/// Submit an extrinsic and watch its status.
	///
	/// Returns a subscription that sends transaction lifecycle events:
	/// ready → broadcast → inBlock → finalized, or invalid if the runtime drops it.
	#[subscription(name = "submitAndWatchExtrinsic" => "extrinsicUpdate", unsubscribe = "unwatchExtrinsic", item = serde_json::Value)]
	async fn submit_and_watch_extrinsic(&self, extrinsic: String) -> SubscriptionResult;

	/// Get all pending extrinsics.
	#[method(name = "pendingExtrinsics")]
	async fn pending_extrinsics(&self) -> RpcResult<Vec<String>>;
}

/// Implementation of legacy author RPC methods.
pub struct AuthorApi {
	blockchain: Arc<Blockchain>,
	shutdown_token: CancellationToken,
}

impl AuthorApi {
	/// Create a new AuthorApi instance.
	pub fn new(blockchain: Arc<Blockchain>, shutdown_token: CancellationToken) -> Self {
		Self { blockchain, shutdown_token }
	}
}

/// The `extrinsicUpdate` payload for `status`.
fn status_json(status: &ExtrinsicStatus) -> serde_json::Value {
	match status {
		ExtrinsicStatus::Ready => serde_json::json!("ready"),
		ExtrinsicStatus::Broadcast => serde_json::json!({ "broadcast": [] }),
		ExtrinsicStatus::InBlock(hash) => serde_json::json!({ "inBlock": hex_hash(*hash) }),
		ExtrinsicStatus::Finalized(hash) => serde_json::json!({ "finalized": hex_hash(*hash) }),
		ExtrinsicStatus::Invalid(_) => serde_json::json!("invalid"),
	}
}

fn is_final(status: &ExtrinsicStatus) -> bool {
	matches!(status, ExtrinsicStatus::Finalized(_) | ExtrinsicStatus::Invalid(_))
}

#[async_trait::async_trait]
impl AuthorApiServer for AuthorApi {
	async fn submit_extrinsic(&self, extrinsic: String) -> RpcResult<String> {
		let ext_bytes = parse_hex_bytes(&extrinsic, "extrinsic")?;
		let hash = self
			.blockchain
			.txpool()
			.submit_extrinsic(ext_bytes)
			.await
			.map_err(RpcServerError::from)?;
		Ok(HexString::from_bytes(hash.as_bytes()).into())
	}

	async fn submit_and_watch_extrinsic(
		&self,
		pending: PendingSubscriptionSink,
		extrinsic: String,
	) -> SubscriptionResult {
		let ext_bytes = match parse_hex_bytes(&extrinsic, "extrinsic") {
			Ok(bytes) => bytes,
			Err(e) => {
				pending.reject(ErrorObjectOwned::from(e)).await;
				return Ok(());
			},
		};
		let hash = extrinsic_hash(&ext_bytes);

		// Listen before submitting so the ready and broadcast events are not missed.
		let (tx, mut rx) = mpsc::unbounded_channel();
		let events = self.blockchain.txpool().events();
		let id = events.subscribe(move |event: &ExtrinsicEvent| {
			if event.hash == hash {
				let _ = tx.send(event.status.clone());
			}
		});

		if let Err(e) = self.blockchain.txpool().submit_extrinsic(ext_bytes).await {
			self.blockchain.txpool().events().unsubscribe(id);
			pending.reject(ErrorObjectOwned::from(RpcServerError::from(e))).await;
			return Ok(());
		}

		let sink = match pending.accept().await {
			Ok(sink) => sink,
			Err(e) => {
				self.blockchain.txpool().events().unsubscribe(id);
				return Err(e.into());
			},
		};

		let blockchain = self.blockchain.clone();
		let token = self.shutdown_token.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;

					_ = token.cancelled() => break,

					_ = sink.closed() => break,

					status = rx.recv() => {
						let Some(status) = status else { break };
						let msg = match SubscriptionMessage::from_json(&status_json(&status)) {
							Ok(m) => m,
							Err(_) => continue,
						};
						if sink.send(msg).await.is_err() || is_final(&status) {
							break;
						}
					}
				}
			}
			blockchain.txpool().events().unsubscribe(id);
			log::debug!("Stopped watching extrinsic {hash:?}");
		});

		Ok(())
	}

	async fn pending_extrinsics(&self) -> RpcResult<Vec<String>> {
		Ok(self
			.blockchain
			.txpool()
			.pending_extrinsics()
			.iter()
			.map(|ext| HexString::from_bytes(ext).into())
			.collect())
	}
}
