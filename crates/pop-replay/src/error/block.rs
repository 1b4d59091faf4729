// SPDX-License-Identifier: GPL-3.0

//! Block error types.

use crate::error::{ExecutorError, RemoteStorageError, RpcClientError, StorageError};
use thiserror::Error;

/// Errors that can occur while resolving a block's lazily loaded fields.
#[derive(Debug, Clone, Error)]
pub enum BlockError {
	/// Reading block storage failed.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	/// Fetching block data from the remote source failed.
	#[error("Remote error: {0}")]
	Remote(#[from] RemoteStorageError),
	/// An upstream RPC request failed.
	#[error("RPC error: {0}")]
	Rpc(#[from] RpcClientError),
	/// A runtime call against the block failed.
	#[error("Executor error: {0}")]
	Executor(#[from] ExecutorError),
	/// The block's state holds no runtime code.
	#[error("Runtime code not found in block state")]
	RuntimeCodeNotFound,
	/// The header is neither held locally nor known to the remote source.
	#[error("Header not found for block {0}")]
	HeaderNotFound(String),
	/// Decoding a runtime response failed.
	#[error("Codec error: {0}")]
	Codec(String),
	/// Metadata could not be decoded.
	#[error("Metadata error: {0}")]
	Metadata(String),
}
