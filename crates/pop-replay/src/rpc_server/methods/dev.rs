// SPDX-License-Identifier: GPL-3.0

//! Development RPC methods for manual chain control.
//!
//! `dev_newBlock` builds blocks on demand, `dev_setStorage` applies storage overrides,
//! `dev_setHead` rewinds or advances the head, `dev_setBlockBuildMode` switches how the
//! pool builds blocks, `dev_timeTravel` moves the chain's clock and
//! `dev_setRuntimeLogLevel` changes how much runtime logging is forwarded.

use super::hex_hash;
use crate::{
	Blockchain,
	config::BlockRef,
	relay::{DownwardMessage, HorizontalMessage},
	rpc_server::{RpcServerError, parse_block_hash, types::HexString},
	txpool::{BuildBlockMode, NewBlockParams},
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use serde::Deserialize;
use std::{collections::BTreeMap, sync::Arc};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Parameters of `dev_newBlock`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewBlockRequest {
	/// Number of blocks to build.
	pub count: Option<u32>,
	/// Build until the head reaches this height.
	pub to: Option<u32>,
	/// Downward messages for the first block.
	pub dmp: Vec<DownwardMessage>,
	/// Upward messages for the first block, by sending para id.
	pub ump: BTreeMap<u32, Vec<HexString>>,
	/// Horizontal messages for the first block, by sending para id.
	pub hrmp: BTreeMap<u32, Vec<HorizontalMessage>>,
	/// Extrinsics to include after the pending ones.
	pub transactions: Vec<HexString>,
	/// Height of the first block, which must be above the head.
	pub unsafe_block_height: Option<u32>,
}

impl NewBlockRequest {
	fn into_params(self) -> Result<NewBlockParams, RpcServerError> {
		let decode = |value: HexString| {
			value
				.to_bytes()
				.map_err(|e| RpcServerError::InvalidParam(format!("Invalid hex {value}: {e}")))
		};
		let ump = self
			.ump
			.into_iter()
			.map(|(para_id, messages)| {
				messages.into_iter().map(decode).collect::<Result<Vec<_>, _>>().map(|m| (para_id, m))
			})
			.collect::<Result<_, _>>()?;
		let transactions = self.transactions.into_iter().map(decode).collect::<Result<_, _>>()?;
		Ok(NewBlockParams {
			count: self.count,
			to: self.to,
			dmp: self.dmp,
			ump,
			hrmp: self.hrmp,
			transactions,
			unsafe_block_height: self.unsafe_block_height,
		})
	}
}

/// A point in time: milliseconds since the Unix epoch or an RFC 3339 date.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeTravelTarget {
	Timestamp(u64),
	Date(String),
}

impl TimeTravelTarget {
	fn to_millis(&self) -> Result<u64, RpcServerError> {
		match self {
			TimeTravelTarget::Timestamp(ms) => Ok(*ms),
			TimeTravelTarget::Date(date) => {
				let parsed = OffsetDateTime::parse(date, &Rfc3339)
					.map_err(|e| RpcServerError::InvalidParam(format!("Invalid date {date}: {e}")))?;
				u64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).map_err(|_| {
					RpcServerError::InvalidParam(format!("Date {date} is before the Unix epoch"))
				})
			},
		}
	}
}

/// Development RPC methods.
#[rpc(server, namespace = "dev")]
pub trait DevApi {
	/// Build one or more blocks. Returns the hash of the new head.
	#[method(name = "newBlock")]
	async fn new_block(&self, params: Option<NewBlockRequest>) -> RpcResult<String>;

	/// Apply storage overrides at a block, or at the head. Returns the block's hash.
	#[method(name = "setStorage")]
	async fn set_storage(
		&self,
		values: serde_json::Value,
		block_hash: Option<String>,
	) -> RpcResult<String>;

	/// Make the block with the given hash or number the head. Returns its hash.
	#[method(name = "setHead")]
	async fn set_head(&self, hash_or_number: BlockRef) -> RpcResult<String>;

	/// Change how the transaction pool builds blocks.
	#[method(name = "setBlockBuildMode")]
	async fn set_block_build_mode(&self, mode: BuildBlockMode) -> RpcResult<()>;

	/// Move the chain's clock. Returns the new timestamp in milliseconds.
	#[method(name = "timeTravel")]
	async fn time_travel(&self, date: TimeTravelTarget) -> RpcResult<u64>;

	/// Change the maximum runtime log level (0 = off, 5 = trace).
	#[method(name = "setRuntimeLogLevel")]
	async fn set_runtime_log_level(&self, level: u32) -> RpcResult<()>;
}

/// Implementation of development RPC methods.
pub struct DevApi {
	blockchain: Arc<Blockchain>,
}

impl DevApi {
	/// Create a new DevApi instance.
	pub fn new(blockchain: Arc<Blockchain>) -> Self {
		Self { blockchain }
	}
}

#[async_trait::async_trait]
impl DevApiServer for DevApi {
	async fn new_block(&self, params: Option<NewBlockRequest>) -> RpcResult<String> {
		let params = params.unwrap_or_default().into_params()?;
		let block = self.blockchain.new_block(params).await.map_err(RpcServerError::from)?;
		Ok(hex_hash(block.hash))
	}

	async fn set_storage(
		&self,
		values: serde_json::Value,
		block_hash: Option<String>,
	) -> RpcResult<String> {
		let at = block_hash.as_deref().map(parse_block_hash).transpose()?;
		let hash = self.blockchain.set_storage(&values, at).await.map_err(RpcServerError::from)?;
		Ok(hex_hash(hash))
	}

	async fn set_head(&self, hash_or_number: BlockRef) -> RpcResult<String> {
		let block =
			self.blockchain.set_head_to(hash_or_number).await.map_err(RpcServerError::from)?;
		Ok(hex_hash(block.hash))
	}

	async fn set_block_build_mode(&self, mode: BuildBlockMode) -> RpcResult<()> {
		log::info!("Block build mode set to {mode:?}");
		self.blockchain.txpool().set_mode(mode);
		Ok(())
	}

	async fn time_travel(&self, date: TimeTravelTarget) -> RpcResult<u64> {
		let timestamp = date.to_millis()?;
		self.blockchain.time_travel(timestamp).await.map_err(RpcServerError::from)?;
		Ok(timestamp)
	}

	async fn set_runtime_log_level(&self, level: u32) -> RpcResult<()> {
		self.blockchain.set_runtime_log_level(level);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		inherent::timestamp_now_key,
		rpc_server::error_codes,
		testing::{MockCall, REMOTE_HEAD_NUMBER, RpcTestContext, mock_extrinsic},
	};
	use jsonrpsee::{
		core::client::{ClientT, Error as ClientError},
		rpc_params,
		ws_client::WsClientBuilder,
	};
	use scale::Decode;

	#[test]
	fn dates_and_timestamps_convert_to_millis() {
		let date = TimeTravelTarget::Date("2024-01-01T00:00:00Z".into());
		assert_eq!(date.to_millis().unwrap(), 1_704_067_200_000);
		assert_eq!(TimeTravelTarget::Timestamp(42).to_millis().unwrap(), 42);
		assert!(TimeTravelTarget::Date("yesterday".into()).to_millis().is_err());
		assert!(TimeTravelTarget::Date("1960-01-01T00:00:00Z".into()).to_millis().is_err());
	}

	#[test]
	fn new_block_request_decodes_messages_and_transactions() {
		let request: NewBlockRequest = serde_json::from_value(serde_json::json!({
			"count": 2,
			"ump": { "2000": ["0x0102"] },
			"hrmp": { "2001": [{ "sentAt": 5, "data": "0x03" }] },
			"dmp": [{ "sentAt": 4, "msg": "0x04" }],
			"transactions": ["0xaabb"],
		}))
		.unwrap();
		let params = request.into_params().unwrap();
		assert_eq!(params.count, Some(2));
		assert_eq!(params.ump[&2000], vec![vec![1, 2]]);
		assert_eq!(params.hrmp[&2001][0].data, vec![3]);
		assert_eq!(params.dmp[0].msg, vec![4]);
		assert_eq!(params.transactions, vec![vec![0xaa, 0xbb]]);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn new_block_count_then_rewind_and_rebuild() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let fork_hash = hex_hash(ctx.test.remote.head_hash());

		let _: String = client
			.request("dev_newBlock", rpc_params![serde_json::json!({ "count": 3 })])
			.await
			.unwrap();
		assert_eq!(ctx.chain().head().number, REMOTE_HEAD_NUMBER + 3);
		let first_child = ctx.chain().get_block_at(REMOTE_HEAD_NUMBER + 1).await.unwrap().unwrap();

		let head: String = client.request("dev_setHead", rpc_params![&fork_hash]).await.unwrap();
		assert_eq!(head, fork_hash);

		let ext = mock_extrinsic(MockCall::Set { key: b"k".to_vec(), value: b"v".to_vec() });
		let _: String = client
			.request("author_submitExtrinsic", rpc_params![format!("0x{}", hex::encode(ext))])
			.await
			.unwrap();
		let rebuilt: String = client.request("dev_newBlock", rpc_params![]).await.unwrap();
		let rebuilt_block = ctx.chain().head();
		assert_eq!(rebuilt_block.number, REMOTE_HEAD_NUMBER + 1);
		assert_eq!(rebuilt, hex_hash(rebuilt_block.hash));
		assert_ne!(rebuilt_block.hash, first_child.hash);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn set_head_by_number_and_unknown_block() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let head: String = client.request("dev_setHead", rpc_params![5]).await.unwrap();
		assert_eq!(head, hex_hash(ctx.test.remote.hash_at(5)));
		assert_eq!(ctx.chain().head().number, 5);

		let err = client.request::<String, _>("dev_setHead", rpc_params![500]).await.unwrap_err();
		match err {
			ClientError::Call(e) => assert_eq!(e.code(), error_codes::INVALID_BLOCK),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn unsafe_height_below_head_changes_nothing() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let before = ctx.chain().head().hash;

		let err = client
			.request::<String, _>(
				"dev_newBlock",
				rpc_params![serde_json::json!({ "unsafeBlockHeight": REMOTE_HEAD_NUMBER })],
			)
			.await
			.unwrap_err();
		match err {
			ClientError::Call(e) => assert_eq!(e.code(), error_codes::INVALID_PARAMS),
			other => panic!("unexpected error: {other:?}"),
		}
		assert_eq!(ctx.chain().head().hash, before);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn set_storage_accepts_raw_pairs() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let key = format!("0x{}", hex::encode(b"raw"));

		let hash: String = client
			.request("dev_setStorage", rpc_params![serde_json::json!([[&key, "0x2a"]])])
			.await
			.unwrap();
		assert_eq!(hash, hex_hash(ctx.chain().head().hash));
		let value: Option<String> =
			client.request("state_getStorage", rpc_params![&key]).await.unwrap();
		assert_eq!(value, Some("0x2a".to_string()));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn time_travel_accepts_dates() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let timestamp: u64 = client
			.request("dev_timeTravel", rpc_params!["2024-01-01T00:00:00Z"])
			.await
			.unwrap();
		assert_eq!(timestamp, 1_704_067_200_000);
		let stored = ctx.chain().head().get(&timestamp_now_key()).await.unwrap().unwrap();
		assert_eq!(u64::decode(&mut stored.as_slice()).unwrap(), timestamp);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn build_mode_switch_is_visible_on_the_pool() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();
		let _: () = client.request("dev_setBlockBuildMode", rpc_params!["instant"]).await.unwrap();
		assert_eq!(ctx.chain().txpool().mode(), BuildBlockMode::Instant);
		let _: () = client.request("dev_setRuntimeLogLevel", rpc_params![3]).await.unwrap();
	}
}
