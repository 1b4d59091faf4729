// SPDX-License-Identifier: GPL-3.0

//! New transaction_v1_* RPC methods.
//!
//! A fork has no peers, so broadcasting hands the transaction to the local pool. The
//! returned operation id only identifies the broadcast; stopping it has nothing to undo.

use crate::{
	Blockchain,
	rpc_server::{RpcServerError, parse_hex_bytes},
	strings::rpc_server::transaction::OPERATION_ID_PREFIX,
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use parking_lot::Mutex;
use std::{
	collections::HashSet,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};

/// New transaction RPC methods (v1 spec).
#[rpc(server, namespace = "transaction")]
pub trait TransactionApi {
	/// Broadcast a transaction.
	///
	/// Returns an operation ID. Validation happens in the background; rejected
	/// transactions are logged and dropped.
	#[method(name = "v1_broadcast")]
	async fn broadcast(&self, transaction: String) -> RpcResult<Option<String>>;

	/// Stop broadcasting a transaction.
	#[method(name = "v1_stop")]
	async fn stop(&self, operation_id: String) -> RpcResult<()>;
}

/// Implementation of transaction RPC methods.
pub struct TransactionApi {
	blockchain: Arc<Blockchain>,
	next_operation: AtomicU64,
	operations: Mutex<HashSet<String>>,
}

impl TransactionApi {
	/// Create a new TransactionApi instance.
	pub fn new(blockchain: Arc<Blockchain>) -> Self {
		Self { blockchain, next_operation: AtomicU64::new(1), operations: Mutex::default() }
	}
}

#[async_trait::async_trait]
impl TransactionApiServer for TransactionApi {
	async fn broadcast(&self, transaction: String) -> RpcResult<Option<String>> {
		let ext_bytes = parse_hex_bytes(&transaction, "transaction")?;
		let operation_id = format!(
			"{OPERATION_ID_PREFIX}-{}",
			self.next_operation.fetch_add(1, Ordering::Relaxed)
		);
		self.operations.lock().insert(operation_id.clone());

		let blockchain = self.blockchain.clone();
		let id = operation_id.clone();
		tokio::spawn(async move {
			if let Err(e) = blockchain.txpool().submit_extrinsic(ext_bytes).await {
				log::warn!("Broadcast {id} rejected: {e}");
			}
		});

		Ok(Some(operation_id))
	}

	async fn stop(&self, operation_id: String) -> RpcResult<()> {
		if self.operations.lock().remove(&operation_id) {
			Ok(())
		} else {
			Err(RpcServerError::OperationNotFound { id: operation_id }.into())
		}
	}
}
