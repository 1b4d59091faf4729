// SPDX-License-Identifier: GPL-3.0

//! Legacy system_* RPC methods.
//!
//! These methods provide system information for polkadot.js compatibility.

use crate::{
	Blockchain, rpc::SystemProperties, rpc_server::types::SystemHealth,
	strings::rpc_server::system,
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use std::sync::Arc;

/// Legacy system RPC methods.
#[rpc(server, namespace = "system")]
pub trait SystemApi {
	/// Get the chain name.
	#[method(name = "chain")]
	async fn chain(&self) -> RpcResult<String>;

	/// Get the node name.
	#[method(name = "name")]
	async fn name(&self) -> RpcResult<String>;

	/// Get the node version.
	#[method(name = "version")]
	async fn version(&self) -> RpcResult<String>;

	/// Get the node health status.
	#[method(name = "health")]
	async fn health(&self) -> RpcResult<SystemHealth>;

	/// Get the chain properties.
	#[method(name = "properties")]
	async fn properties(&self) -> RpcResult<SystemProperties>;
}

/// Implementation of legacy system RPC methods.
pub struct SystemApi {
	blockchain: Arc<Blockchain>,
}

impl SystemApi {
	/// Create a new SystemApi instance.
	pub fn new(blockchain: Arc<Blockchain>) -> Self {
		Self { blockchain }
	}
}

#[async_trait::async_trait]
impl SystemApiServer for SystemApi {
	async fn chain(&self) -> RpcResult<String> {
		Ok(self.blockchain.name().to_string())
	}

	async fn name(&self) -> RpcResult<String> {
		Ok(system::NODE_NAME.to_string())
	}

	async fn version(&self) -> RpcResult<String> {
		Ok(system::NODE_VERSION.to_string())
	}

	async fn health(&self) -> RpcResult<SystemHealth> {
		// No peers and nothing to sync.
		Ok(SystemHealth::default())
	}

	async fn properties(&self) -> RpcResult<SystemProperties> {
		Ok(self.blockchain.properties().clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::RpcTestContext;
	use jsonrpsee::{core::client::ClientT, rpc_params, ws_client::WsClientBuilder};

	#[tokio::test(flavor = "multi_thread")]
	async fn reports_upstream_chain_and_properties() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let chain: String = client.request("system_chain", rpc_params![]).await.unwrap();
		assert_eq!(chain, "Mock Chain");

		let properties: serde_json::Value =
			client.request("system_properties", rpc_params![]).await.unwrap();
		assert_eq!(properties["tokenSymbol"], "UNIT");
		assert_eq!(properties["tokenDecimals"], 12);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn node_identity_and_health() {
		let ctx = RpcTestContext::new().await;
		let client = WsClientBuilder::default().build(&ctx.ws_url()).await.unwrap();

		let name: String = client.request("system_name", rpc_params![]).await.unwrap();
		assert_eq!(name, system::NODE_NAME);
		let version: String = client.request("system_version", rpc_params![]).await.unwrap();
		assert_eq!(version, system::NODE_VERSION);

		let health: SystemHealth = client.request("system_health", rpc_params![]).await.unwrap();
		assert_eq!(health, SystemHealth::default());
		assert!(!health.should_have_peers);
	}
}
