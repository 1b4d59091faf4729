// SPDX-License-Identifier: GPL-3.0

//! JSON-RPC server for a forked blockchain.
//!
//! This module provides a Substrate-compatible JSON-RPC server that exposes
//! the forked blockchain state to external tools like polkadot.js.
//!
//! # Supported RPC Methods
//!
//! ## Legacy Methods (for polkadot.js compatibility)
//! - `chain_*` - Block queries and head subscriptions
//! - `state_*` - Storage, metadata, runtime version and runtime calls
//! - `system_*` - System info (chain, name, version, health, properties)
//! - `author_*` - Transaction submission and lifecycle tracking
//!
//! ## New Substrate RPC Specs
//! - `chainHead_v1_*` - Chain head tracking with subscriptions
//! - `archive_unstable_*` - Archive queries
//! - `transaction_v1_*` - Transaction broadcasting
//!
//! ## Development
//! - `dev_*` - Manual block production, storage overrides, head rewinds and time travel

mod error;
pub mod methods;
pub mod types;

pub use error::{RpcServerError, error_codes};

use crate::Blockchain;
use jsonrpsee::server::{RandomStringIdProvider, ServerBuilder, ServerHandle};
use std::{net::SocketAddr, sync::Arc};
use subxt::config::substrate::H256;
use tokio_util::sync::CancellationToken;

/// Length of the random subscription ids handed out by the server.
const SUBSCRIPTION_ID_LEN: usize = 16;

/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
	/// Address to bind the server to.
	pub addr: SocketAddr,
	/// Maximum number of connections.
	pub max_connections: u32,
}

impl Default for RpcServerConfig {
	fn default() -> Self {
		Self { addr: ([127, 0, 0, 1], 8000).into(), max_connections: 100 }
	}
}

/// The RPC server for a forked blockchain.
pub struct ForkRpcServer {
	/// Server handle for managing lifecycle.
	handle: ServerHandle,
	/// Address the server is bound to.
	addr: SocketAddr,
	/// Cancels subscription tasks on shutdown.
	shutdown_token: CancellationToken,
}

impl ForkRpcServer {
	/// Start a new RPC server with the given blockchain and configuration.
	pub async fn start(
		blockchain: Arc<Blockchain>,
		config: RpcServerConfig,
	) -> Result<Self, RpcServerError> {
		let server = ServerBuilder::default()
			.max_connections(config.max_connections)
			.set_id_provider(RandomStringIdProvider::new(SUBSCRIPTION_ID_LEN))
			.build(config.addr)
			.await
			.map_err(|e| RpcServerError::ServerStart(e.to_string()))?;

		let addr = server.local_addr().map_err(|e| RpcServerError::ServerStart(e.to_string()))?;

		let shutdown_token = CancellationToken::new();
		let rpc_module = methods::create_rpc_module(blockchain, shutdown_token.clone())?;

		let handle = server.start(rpc_module);
		log::info!("RPC server listening on {addr}");

		Ok(Self { handle, addr, shutdown_token })
	}

	/// Get the address the server is bound to.
	pub fn addr(&self) -> SocketAddr {
		self.addr
	}

	/// Get the WebSocket URL for connecting to this server.
	pub fn ws_url(&self) -> String {
		format!("ws://{}", self.addr)
	}

	/// Get the HTTP URL for connecting to this server.
	pub fn http_url(&self) -> String {
		format!("http://{}", self.addr)
	}

	/// Stop the server gracefully.
	pub async fn stop(self) {
		self.shutdown_token.cancel();
		if self.handle.stop().is_err() {
			log::debug!("RPC server at {} already stopped", self.addr);
		}
		self.handle.stopped().await;
	}

	/// Get a handle to check if the server is still running.
	pub fn handle(&self) -> &ServerHandle {
		&self.handle
	}
}

/// Decode a `0x`-prefixed (or bare) hex parameter.
pub(crate) fn parse_hex_bytes(value: &str, name: &str) -> Result<Vec<u8>, RpcServerError> {
	hex::decode(value.trim_start_matches("0x"))
		.map_err(|e| RpcServerError::InvalidParam(format!("Invalid hex for {name}: {e}")))
}

/// Decode a 32 byte block hash parameter.
pub(crate) fn parse_block_hash(value: &str) -> Result<H256, RpcServerError> {
	let bytes = parse_hex_bytes(value, "block hash")?;
	if bytes.len() != 32 {
		return Err(RpcServerError::InvalidParam(format!(
			"Invalid block hash length: expected 32 bytes, got {}",
			bytes.len()
		)));
	}
	Ok(H256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_block_hash_accepts_prefixed_hex() {
		let hash = H256::repeat_byte(0xab);
		let parsed = parse_block_hash(&format!("0x{}", hex::encode(hash))).unwrap();
		assert_eq!(parsed, hash);
	}

	#[test]
	fn parse_block_hash_rejects_wrong_length() {
		assert!(matches!(parse_block_hash("0x1234"), Err(RpcServerError::InvalidParam(_))));
		assert!(matches!(parse_hex_bytes("0xzz", "key"), Err(RpcServerError::InvalidParam(_))));
	}
}
