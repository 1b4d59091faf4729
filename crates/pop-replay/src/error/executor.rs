// SPDX-License-Identifier: GPL-3.0

//! Error types for runtime executor operations.

use crate::error::StorageError;
use smoldot::executor::{host, runtime_call};
use thiserror::Error;

/// Errors that can occur during runtime execution.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
	/// Error creating the VM prototype from WASM code.
	#[error("Failed to create VM prototype: {message}")]
	PrototypeCreation {
		/// The error message describing the failure.
		message: String,
	},

	/// Error starting the runtime call.
	#[error("Failed to start runtime call `{method}`: {message}")]
	StartError {
		/// The runtime method that failed to start.
		method: String,
		/// The error message describing the failure.
		message: String,
	},

	/// Error during runtime execution.
	#[error("Runtime execution error in `{method}`: {message}")]
	RuntimeError {
		/// The runtime method that failed.
		method: String,
		/// The error message describing the failure.
		message: String,
	},

	/// Storage read issued by the runtime failed.
	#[error("Storage operation failed: {0}")]
	Storage(#[from] StorageError),

	/// Invalid heap pages value in storage.
	#[error("Invalid heap pages value: {message}")]
	InvalidHeapPages {
		/// The error message describing the invalid value.
		message: String,
	},

	/// The request or response could not be encoded or decoded.
	#[error("Codec error: {0}")]
	Codec(String),

	/// A trie operation failed.
	#[error("Trie error: {0}")]
	Trie(String),

	/// A worker thread could not be started.
	#[error("Failed to start execution worker: {0}")]
	WorkerSpawn(String),

	/// The execution service has shut down.
	#[error("Execution service is not running")]
	ServiceStopped,
}

impl From<host::NewErr> for ExecutorError {
	fn from(err: host::NewErr) -> Self {
		ExecutorError::PrototypeCreation { message: err.to_string() }
	}
}

impl From<runtime_call::Error> for ExecutorError {
	fn from(err: runtime_call::Error) -> Self {
		ExecutorError::RuntimeError { method: String::new(), message: err.to_string() }
	}
}
