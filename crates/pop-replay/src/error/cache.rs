// SPDX-License-Identifier: GPL-3.0

//! Cache-related error types.

use thiserror::Error;

/// Errors that can occur when interacting with the storage cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
	/// The backend is temporarily locked by another writer. Safe to retry.
	#[error("Cache is busy")]
	Busy,
	/// Any other backend failure.
	#[error("Cache backend error: {0}")]
	Backend(String),
	/// Data corruption detected in the cache.
	#[error("Data corruption: {0}")]
	DataCorruption(String),
}

impl CacheError {
	/// Whether the operation may succeed if attempted again.
	pub fn is_retryable(&self) -> bool {
		matches!(self, CacheError::Busy)
	}
}
