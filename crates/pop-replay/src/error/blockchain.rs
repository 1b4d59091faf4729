// SPDX-License-Identifier: GPL-3.0

//! Blockchain error types.

use super::{
	BlockBuilderError, BlockError, ExecutorError, OverrideError, RemoteStorageError, StorageError,
};
use thiserror::Error;

/// Errors that can occur when managing the forked chain.
#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
	/// Error resolving block fields.
	#[error("Block error: {0}")]
	Block(#[from] BlockError),
	/// Error while building a block.
	#[error("Block builder error: {0}")]
	Builder(#[from] BlockBuilderError),
	/// Error from layered storage.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	/// Error from the remote source.
	#[error("Remote error: {0}")]
	Remote(#[from] RemoteStorageError),
	/// Error from the execution service.
	#[error("Executor error: {0}")]
	Executor(#[from] ExecutorError),
	/// Error applying storage overrides.
	#[error("Override error: {0}")]
	Override(#[from] OverrideError),
	/// No materialized block matches the requested hash or height.
	#[error("Block not found: {0}")]
	BlockNotFound(String),
	/// A requested target height is not above the current head.
	#[error("Target height {target} must be greater than the current head {head}")]
	InvalidTarget {
		/// The requested height.
		target: u32,
		/// The current head height.
		head: u32,
	},
	/// The runtime returned a malformed response.
	#[error("Codec error: {0}")]
	Codec(String),
}
