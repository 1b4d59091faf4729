// SPDX-License-Identifier: GPL-3.0

//! Access to the live chain a fork is taken from.
//!
//! [`RemoteSource`] is the read-only view of the upstream chain the rest of the crate
//! depends on: headers, bodies, storage and metadata at a given block. The production
//! implementation is [`ForkRpcClient`], which wraps subxt's [`LegacyRpcMethods`];
//! tests use the in-memory source from [`crate::testing`].
//!
//! Legacy `chain_*`/`state_*` methods are used because every Polkadot SDK node serves
//! them and they need no follow-subscription bookkeeping to query a historical block.

use crate::{
	error::rpc::RpcClientError,
	strings::rpc::{methods, storage_keys},
};
use async_trait::async_trait;
use std::collections::HashMap;
use subxt::{
	SubstrateConfig,
	backend::{
		legacy::{LegacyRpcMethods, rpc_methods::NumberOrHex},
		rpc::RpcClient,
	},
	config::substrate::H256,
};
use url::Url;

/// Header type of the chains a fork can be taken from.
pub type Header = <SubstrateConfig as subxt::Config>::Header;

/// Arbitrary JSON properties reported by `system_properties`.
pub type SystemProperties = serde_json::Map<String, serde_json::Value>;

/// Read-only access to the upstream chain.
#[async_trait]
pub trait RemoteSource: Send + Sync {
	/// Hash of the latest finalized block.
	async fn finalized_head(&self) -> Result<H256, RpcClientError>;

	/// Hash of the canonical block at `number`, if the chain has one.
	async fn block_hash(&self, number: u32) -> Result<Option<H256>, RpcClientError>;

	/// Header of the block with `hash`.
	async fn header(&self, hash: H256) -> Result<Option<Header>, RpcClientError>;

	/// Encoded extrinsics of the block with `hash`.
	async fn block_body(&self, hash: H256) -> Result<Option<Vec<Vec<u8>>>, RpcClientError>;

	/// Value of `key` at block `at`. `None` if the key is empty.
	async fn storage(&self, key: &[u8], at: H256) -> Result<Option<Vec<u8>>, RpcClientError>;

	/// Values of `keys` at block `at`, in the order of `keys`.
	async fn storage_batch(
		&self,
		keys: &[Vec<u8>],
		at: H256,
	) -> Result<Vec<Option<Vec<u8>>>, RpcClientError>;

	/// Up to `count` keys starting with `prefix`, strictly after `start_key` when given.
	async fn storage_keys_paged(
		&self,
		prefix: &[u8],
		count: u32,
		start_key: Option<&[u8]>,
		at: H256,
	) -> Result<Vec<Vec<u8>>, RpcClientError>;

	/// Raw SCALE encoded metadata at block `at`.
	async fn metadata(&self, at: H256) -> Result<Vec<u8>, RpcClientError>;

	/// Human readable chain name.
	async fn system_chain(&self) -> Result<String, RpcClientError>;

	/// Token symbol, decimals and other chain properties.
	async fn system_properties(&self) -> Result<SystemProperties, RpcClientError>;

	/// The runtime WASM code at block `at`.
	async fn runtime_code(&self, at: H256) -> Result<Vec<u8>, RpcClientError> {
		self.storage(storage_keys::CODE, at).await?.ok_or_else(|| {
			RpcClientError::StorageNotFound(String::from_utf8_lossy(storage_keys::CODE).into())
		})
	}
}

/// RPC client wrapper for fork operations.
///
/// # Example
///
/// ```ignore
/// use pop_replay::{ForkRpcClient, RemoteSource};
///
/// let client = ForkRpcClient::connect(&"wss://rpc.polkadot.io".parse()?).await?;
/// let block_hash = client.finalized_head().await?;
/// let metadata = client.metadata(block_hash).await?;
/// ```
#[derive(Clone, Debug)]
pub struct ForkRpcClient {
	legacy: LegacyRpcMethods<SubstrateConfig>,
	endpoint: Url,
}

impl ForkRpcClient {
	/// Connect to a live Polkadot-SDK chain.
	///
	/// # Arguments
	/// * `endpoint` - WebSocket URL of the chain's RPC endpoint (e.g., `wss://rpc.polkadot.io`)
	pub async fn connect(endpoint: &Url) -> Result<Self, RpcClientError> {
		let client = RpcClient::from_url(endpoint.as_str()).await.map_err(|e| {
			RpcClientError::ConnectionFailed {
				endpoint: endpoint.to_string(),
				message: e.to_string(),
			}
		})?;

		let legacy = LegacyRpcMethods::new(client);

		Ok(Self { legacy, endpoint: endpoint.clone() })
	}

	/// Get the endpoint URL this client is connected to.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}
}

fn request_failed(method: &'static str) -> impl FnOnce(subxt::ext::subxt_rpcs::Error) -> RpcClientError {
	move |e| RpcClientError::RequestFailed { method, message: e.to_string() }
}

#[async_trait]
impl RemoteSource for ForkRpcClient {
	async fn finalized_head(&self) -> Result<H256, RpcClientError> {
		self.legacy
			.chain_get_finalized_head()
			.await
			.map_err(request_failed(methods::CHAIN_GET_FINALIZED_HEAD))
	}

	async fn block_hash(&self, number: u32) -> Result<Option<H256>, RpcClientError> {
		self.legacy
			.chain_get_block_hash(Some(NumberOrHex::Number(number.into())))
			.await
			.map_err(request_failed(methods::CHAIN_GET_BLOCK_HASH))
	}

	async fn header(&self, hash: H256) -> Result<Option<Header>, RpcClientError> {
		self.legacy
			.chain_get_header(Some(hash))
			.await
			.map_err(request_failed(methods::CHAIN_GET_HEADER))
	}

	async fn block_body(&self, hash: H256) -> Result<Option<Vec<Vec<u8>>>, RpcClientError> {
		let details = self
			.legacy
			.chain_get_block(Some(hash))
			.await
			.map_err(request_failed(methods::CHAIN_GET_BLOCK))?;
		Ok(details.map(|d| d.block.extrinsics.into_iter().map(|e| e.0).collect()))
	}

	async fn storage(&self, key: &[u8], at: H256) -> Result<Option<Vec<u8>>, RpcClientError> {
		self.legacy
			.state_get_storage(key, Some(at))
			.await
			.map_err(request_failed(methods::STATE_GET_STORAGE))
	}

	async fn storage_batch(
		&self,
		keys: &[Vec<u8>],
		at: H256,
	) -> Result<Vec<Option<Vec<u8>>>, RpcClientError> {
		if keys.is_empty() {
			return Ok(vec![]);
		}

		let result = self
			.legacy
			.state_query_storage_at(keys.iter().map(|k| k.as_slice()), Some(at))
			.await
			.map_err(request_failed(methods::STATE_QUERY_STORAGE_AT))?;

		let mut changes: HashMap<Vec<u8>, Option<Vec<u8>>> = result
			.into_iter()
			.flat_map(|change_set| {
				change_set.changes.into_iter().map(|(k, v)| (k.0, v.map(|v| v.0)))
			})
			.collect();

		// Duplicate keys only receive the value on their first occurrence.
		Ok(keys.iter().map(|key| changes.remove(key).flatten()).collect())
	}

	async fn storage_keys_paged(
		&self,
		prefix: &[u8],
		count: u32,
		start_key: Option<&[u8]>,
		at: H256,
	) -> Result<Vec<Vec<u8>>, RpcClientError> {
		self.legacy
			.state_get_keys_paged(prefix, count, start_key, Some(at))
			.await
			.map_err(request_failed(methods::STATE_GET_KEYS_PAGED))
	}

	async fn metadata(&self, at: H256) -> Result<Vec<u8>, RpcClientError> {
		let metadata = self
			.legacy
			.state_get_metadata(Some(at))
			.await
			.map_err(request_failed(methods::STATE_GET_METADATA))?;
		Ok(metadata.into_raw())
	}

	async fn system_chain(&self) -> Result<String, RpcClientError> {
		self.legacy.system_chain().await.map_err(request_failed(methods::SYSTEM_CHAIN))
	}

	async fn system_properties(&self) -> Result<SystemProperties, RpcClientError> {
		self.legacy
			.system_properties()
			.await
			.map_err(request_failed(methods::SYSTEM_PROPERTIES))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_connection_failed() {
		let err = RpcClientError::ConnectionFailed {
			endpoint: "wss://example.com".to_string(),
			message: "connection refused".to_string(),
		};
		assert_eq!(err.to_string(), "Failed to connect to wss://example.com: connection refused");
	}

	#[test]
	fn error_display_request_failed() {
		let err = RpcClientError::RequestFailed {
			method: methods::STATE_GET_STORAGE,
			message: "connection reset".to_string(),
		};
		assert_eq!(
			err.to_string(),
			format!("RPC request `{}` failed: connection reset", methods::STATE_GET_STORAGE)
		);
	}

	#[tokio::test]
	async fn connect_to_invalid_endpoint_fails() {
		let endpoint: Url = "ws://127.0.0.1:19999".parse().unwrap();
		let result = ForkRpcClient::connect(&endpoint).await;
		assert!(matches!(result, Err(RpcClientError::ConnectionFailed { .. })));
	}

	#[tokio::test]
	async fn runtime_code_reports_missing_code() {
		let remote = crate::testing::MockRemote::new();
		let err = remote.runtime_code(remote.head_hash()).await.unwrap_err();
		assert!(matches!(err, RpcClientError::StorageNotFound(_)));
	}
}
