// SPDX-License-Identifier: GPL-3.0

//! Layered storage error types.

use crate::error::RemoteStorageError;
use thiserror::Error;

/// Errors that can occur when reading or writing layered storage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
	/// The remote fallback failed.
	#[error("Remote storage error: {0}")]
	Remote(#[from] RemoteStorageError),
	/// A paged query was issued with a zero page size.
	#[error("Page size must be greater than zero")]
	InvalidPageSize,
}
