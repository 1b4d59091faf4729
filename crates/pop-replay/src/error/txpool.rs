// SPDX-License-Identifier: GPL-3.0

//! Transaction pool error types.

use super::BlockchainError;
use crate::validity::TransactionValidityError;
use thiserror::Error;

/// Errors that can occur when submitting transactions or building blocks.
#[derive(Debug, Clone, Error)]
pub enum TxPoolError {
	/// The runtime reported the transaction as invalid.
	#[error("Invalid transaction: {0:?}")]
	Invalid(TransactionValidityError),
	/// The runtime could not determine the transaction's validity.
	#[error("Unknown transaction validity: {0:?}")]
	Unknown(TransactionValidityError),
	/// An explicit build was requested while another build is in progress.
	#[error("A block build is already in progress")]
	BuildInProgress,
	/// The owning chain has been dropped.
	#[error("The chain backing this pool is no longer available")]
	ChainDropped,
	/// The extrinsic bytes could not be decoded.
	#[error("Malformed extrinsic: {0}")]
	Malformed(String),
	/// Error from chain management or block building.
	#[error(transparent)]
	Blockchain(#[from] BlockchainError),
}

impl From<TransactionValidityError> for TxPoolError {
	fn from(err: TransactionValidityError) -> Self {
		match err {
			TransactionValidityError::Invalid(_) => TxPoolError::Invalid(err),
			TransactionValidityError::Unknown(_) => TxPoolError::Unknown(err),
		}
	}
}
