// SPDX-License-Identifier: GPL-3.0

//! Storage override error types.

use super::BlockError;
use thiserror::Error;

/// Errors that can occur when translating storage overrides into raw writes.
#[derive(Debug, Clone, Error)]
pub enum OverrideError {
	/// The runtime has no pallet with this name.
	#[error("Unknown pallet `{0}`")]
	UnknownPallet(String),
	/// The pallet has no storage item with this name.
	#[error("Unknown storage item `{pallet}::{item}`")]
	UnknownStorage {
		/// The pallet that was searched.
		pallet: String,
		/// The item that was not found.
		item: String,
	},
	/// A value or key could not be encoded against the storage type.
	#[error("Invalid value for `{item}`: {message}")]
	InvalidValue {
		/// The storage item being written.
		item: String,
		/// Why encoding failed.
		message: String,
	},
	/// The override document has an unexpected shape.
	#[error("Malformed override: {0}")]
	Malformed(String),
	/// Hex decoding failed.
	#[error("Invalid hex `{0}`")]
	Hex(String),
	/// Metadata could not be resolved for the target block.
	#[error("Block error: {0}")]
	Block(#[from] BlockError),
}
