// SPDX-License-Identifier: GPL-3.0

//! End-to-end replay scenarios driven over JSON-RPC.

#![cfg(feature = "integration-tests")]

use jsonrpsee::{
	core::client::{ClientT, Subscription, SubscriptionClientT},
	rpc_params,
	ws_client::{WsClient, WsClientBuilder},
};
use pop_replay::{
	BuildBlockMode, ReplayConfig,
	rpc_server::types::Header,
	testing::{MockCall, REMOTE_HEAD_NUMBER, RpcTestContext, mock_extrinsic},
};
use std::time::Duration;

fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

async fn connect(ctx: &RpcTestContext) -> WsClient {
	tokio_test::assert_ok!(WsClientBuilder::default().build(&ctx.ws_url()).await)
}

fn set_call(key: &[u8], value: &[u8]) -> String {
	let ext = mock_extrinsic(MockCall::Set { key: key.to_vec(), value: value.to_vec() });
	format!("0x{}", hex::encode(ext))
}

async fn hash_at(client: &WsClient, number: u32) -> Option<String> {
	tokio_test::assert_ok!(client.request("chain_getBlockHash", rpc_params![number]).await)
}

#[tokio::test(flavor = "multi_thread")]
async fn rewinding_and_rebuilding_forks_a_new_branch() {
	init_logging();
	let ctx = RpcTestContext::new().await;
	let client = connect(&ctx).await;
	let fork_hash = hash_at(&client, REMOTE_HEAD_NUMBER).await.unwrap();

	let head: String = client
		.request("dev_newBlock", rpc_params![serde_json::json!({ "count": 3 })])
		.await
		.unwrap();
	let mut built = Vec::new();
	for number in REMOTE_HEAD_NUMBER + 1..=REMOTE_HEAD_NUMBER + 3 {
		built.push(hash_at(&client, number).await.unwrap());
	}
	assert_eq!(built.last(), Some(&head));
	built.sort();
	built.dedup();
	assert_eq!(built.len(), 3);
	let first_child = hash_at(&client, REMOTE_HEAD_NUMBER + 1).await.unwrap();

	let rewound: String =
		client.request("dev_setHead", rpc_params![&fork_hash]).await.unwrap();
	assert_eq!(rewound, fork_hash);
	let _: String = client
		.request("author_submitExtrinsic", rpc_params![set_call(b"branch", b"b")])
		.await
		.unwrap();
	let rebuilt: String = client.request("dev_newBlock", rpc_params![]).await.unwrap();

	let header: Header = client.request("chain_getHeader", rpc_params![&rebuilt]).await.unwrap();
	assert_eq!(header.number, REMOTE_HEAD_NUMBER + 1);
	assert_ne!(rebuilt, first_child);

	let key = format!("0x{}", hex::encode(b"branch"));
	let value: Option<String> =
		client.request("state_getStorage", rpc_params![&key, &rebuilt]).await.unwrap();
	assert_eq!(value, Some(format!("0x{}", hex::encode(b"b"))));
	let before: Option<String> =
		client.request("state_getStorage", rpc_params![&key, &first_child]).await.unwrap();
	assert_eq!(before, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn instant_mode_builds_a_block_per_submission() {
	init_logging();
	let ctx = RpcTestContext::with_config(ReplayConfig {
		build_block_mode: BuildBlockMode::Instant,
		..Default::default()
	})
	.await;
	let client = connect(&ctx).await;
	let mut heads: Subscription<Header> = client
		.subscribe("chain_subscribeNewHead", rpc_params![], "chain_unsubscribeNewHead")
		.await
		.unwrap();
	assert_eq!(heads.next().await.unwrap().unwrap().number, REMOTE_HEAD_NUMBER);

	for i in 0..3u8 {
		let _: String = client
			.request("author_submitExtrinsic", rpc_params![set_call(&[b'i', i], &[i])])
			.await
			.unwrap();
		let header = heads.next().await.unwrap().unwrap();
		assert_eq!(header.number, REMOTE_HEAD_NUMBER + 1 + u32::from(i));
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_mode_collects_a_burst_into_one_block() {
	init_logging();
	let ctx = RpcTestContext::with_config(ReplayConfig {
		build_block_mode: BuildBlockMode::Batch,
		batch_delay_ms: 50,
		batch_max_wait_ms: 500,
		..Default::default()
	})
	.await;
	let client = connect(&ctx).await;
	let mut heads: Subscription<Header> = client
		.subscribe("chain_subscribeNewHead", rpc_params![], "chain_unsubscribeNewHead")
		.await
		.unwrap();
	heads.next().await.unwrap().unwrap();

	for i in 0..3u8 {
		let _: String = client
			.request("author_submitExtrinsic", rpc_params![set_call(&[b'b', i], &[i])])
			.await
			.unwrap();
	}
	let header = heads.next().await.unwrap().unwrap();
	assert_eq!(header.number, REMOTE_HEAD_NUMBER + 1);

	let body: serde_json::Value = client.request("chain_getBlock", rpc_params![]).await.unwrap();
	assert_eq!(body["block"]["extrinsics"].as_array().map(Vec::len), Some(3));

	let pending: Vec<String> =
		client.request("author_pendingExtrinsics", rpc_params![]).await.unwrap();
	assert!(pending.is_empty());
	let quiet = tokio::time::timeout(Duration::from_millis(200), heads.next()).await;
	assert!(quiet.is_err(), "no further block is built without submissions");
}

#[tokio::test(flavor = "multi_thread")]
async fn overrides_are_visible_to_following_blocks() {
	init_logging();
	let ctx = RpcTestContext::new().await;
	let client = connect(&ctx).await;
	let key = format!("0x{}", hex::encode(b"override"));

	let _: String = client
		.request("dev_setStorage", rpc_params![serde_json::json!([[&key, "0x2a"]])])
		.await
		.unwrap();
	let head: String = client.request("dev_newBlock", rpc_params![]).await.unwrap();

	let value: Option<String> =
		client.request("state_getStorage", rpc_params![&key, &head]).await.unwrap();
	assert_eq!(value.as_deref(), Some("0x2a"));
}
