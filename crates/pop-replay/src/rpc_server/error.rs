// SPDX-License-Identifier: GPL-3.0

//! RPC server error types.
//!
//! Every handler failure is reported to the client as a `{code, message}` object. Codes
//! follow the JSON-RPC standard, the chainHead specification and the Substrate author API.

use crate::{
	error::{BlockchainError, TxPoolError},
	validity::TransactionValidityError,
};
use jsonrpsee::types::ErrorObjectOwned;

/// Standard JSON-RPC error codes for Substrate RPC.
pub mod error_codes {
	/// Parse error - Invalid JSON was received.
	pub const PARSE_ERROR: i32 = -32700;

	/// Invalid request - The JSON sent is not a valid Request object.
	pub const INVALID_REQUEST: i32 = -32600;

	/// Method not found.
	pub const METHOD_NOT_FOUND: i32 = -32601;

	/// Invalid params.
	pub const INVALID_PARAMS: i32 = -32602;

	/// Internal error.
	pub const INTERNAL_ERROR: i32 = -32603;

	/// Too many follow subscriptions.
	pub const TOO_MANY_SUBSCRIPTIONS: i32 = -32800;

	/// Block hash not found or unpinned.
	pub const INVALID_BLOCK: i32 = -32801;

	/// Operation limit reached.
	pub const OPERATION_LIMIT: i32 = -32802;

	/// Operation not found.
	pub const OPERATION_NOT_FOUND: i32 = -32803;

	/// The runtime rejected the transaction as invalid.
	pub const INVALID_TRANSACTION: i32 = 1010;

	/// The runtime could not determine the transaction's validity.
	pub const UNKNOWN_TRANSACTION: i32 = 1011;
}

/// Errors that can occur in the RPC server.
#[derive(Debug, thiserror::Error)]
pub enum RpcServerError {
	/// Failed to start the server.
	#[error("Failed to start RPC server: {0}")]
	ServerStart(String),

	/// Too many active subscriptions.
	#[error("Too many active subscriptions (limit: {limit})")]
	TooManySubscriptions {
		/// Maximum allowed subscriptions.
		limit: usize,
	},

	/// Block is not pinned or unknown.
	#[error("Block {hash} is not pinned or unknown")]
	BlockNotPinned {
		/// The block hash that was not found.
		hash: String,
	},

	/// Invalid subscription ID.
	#[error("Invalid subscription ID: {id}")]
	InvalidSubscription {
		/// The invalid subscription ID.
		id: String,
	},

	/// Operation not found.
	#[error("Operation {id} not found")]
	OperationNotFound {
		/// The operation ID that was not found.
		id: String,
	},

	/// Storage error.
	#[error("Storage error: {0}")]
	Storage(String),

	/// Runtime call failed.
	#[error("Runtime call failed: {0}")]
	RuntimeCall(String),

	/// Invalid parameter.
	#[error("Invalid parameter: {0}")]
	InvalidParam(String),

	/// Internal error.
	#[error("Internal error: {0}")]
	Internal(String),

	/// Block not found.
	#[error("Block not found: {0}")]
	BlockNotFound(String),

	/// The transaction is invalid.
	#[error("Invalid transaction: {0:?}")]
	InvalidTransaction(TransactionValidityError),

	/// The transaction's validity is unknown.
	#[error("Unknown transaction: {0:?}")]
	UnknownTransaction(TransactionValidityError),
}

impl From<BlockchainError> for RpcServerError {
	fn from(err: BlockchainError) -> Self {
		match err {
			BlockchainError::BlockNotFound(hash) => RpcServerError::BlockNotFound(hash),
			BlockchainError::InvalidTarget { .. } | BlockchainError::Override(_) => {
				RpcServerError::InvalidParam(err.to_string())
			},
			BlockchainError::Storage(_) | BlockchainError::Remote(_) => {
				RpcServerError::Storage(err.to_string())
			},
			BlockchainError::Executor(_) | BlockchainError::Builder(_) => {
				RpcServerError::RuntimeCall(err.to_string())
			},
			_ => RpcServerError::Internal(err.to_string()),
		}
	}
}

impl From<TxPoolError> for RpcServerError {
	fn from(err: TxPoolError) -> Self {
		match err {
			TxPoolError::Invalid(e) => RpcServerError::InvalidTransaction(e),
			TxPoolError::Unknown(e) => RpcServerError::UnknownTransaction(e),
			TxPoolError::Malformed(msg) => RpcServerError::InvalidParam(msg),
			TxPoolError::Blockchain(e) => e.into(),
			TxPoolError::BuildInProgress | TxPoolError::ChainDropped => {
				RpcServerError::Internal(err.to_string())
			},
		}
	}
}

impl From<RpcServerError> for ErrorObjectOwned {
	fn from(err: RpcServerError) -> Self {
		match err {
			RpcServerError::ServerStart(msg) => {
				ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, msg, None::<()>)
			},
			RpcServerError::TooManySubscriptions { limit } => ErrorObjectOwned::owned(
				error_codes::TOO_MANY_SUBSCRIPTIONS,
				format!("Too many subscriptions (limit: {limit})"),
				None::<()>,
			),
			RpcServerError::BlockNotPinned { hash } => ErrorObjectOwned::owned(
				error_codes::INVALID_BLOCK,
				format!("Block {hash} is not pinned or unknown"),
				None::<()>,
			),
			RpcServerError::InvalidSubscription { id } => ErrorObjectOwned::owned(
				error_codes::INVALID_PARAMS,
				format!("Invalid subscription ID: {id}"),
				None::<()>,
			),
			RpcServerError::OperationNotFound { id } => ErrorObjectOwned::owned(
				error_codes::OPERATION_NOT_FOUND,
				format!("Operation {id} not found"),
				None::<()>,
			),
			RpcServerError::Storage(msg) => {
				ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, msg, None::<()>)
			},
			RpcServerError::RuntimeCall(msg) => {
				ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, msg, None::<()>)
			},
			RpcServerError::InvalidParam(msg) => {
				ErrorObjectOwned::owned(error_codes::INVALID_PARAMS, msg, None::<()>)
			},
			RpcServerError::Internal(msg) => {
				ErrorObjectOwned::owned(error_codes::INTERNAL_ERROR, msg, None::<()>)
			},
			RpcServerError::BlockNotFound(msg) => {
				ErrorObjectOwned::owned(error_codes::INVALID_BLOCK, msg, None::<()>)
			},
			RpcServerError::InvalidTransaction(e) => ErrorObjectOwned::owned(
				error_codes::INVALID_TRANSACTION,
				"Invalid Transaction",
				Some(validity_data(&e)),
			),
			RpcServerError::UnknownTransaction(e) => ErrorObjectOwned::owned(
				error_codes::UNKNOWN_TRANSACTION,
				"Unknown Transaction Validity",
				Some(validity_data(&e)),
			),
		}
	}
}

fn validity_data(err: &TransactionValidityError) -> serde_json::Value {
	serde_json::to_value(err).unwrap_or(serde_json::Value::Null)
}
