// SPDX-License-Identifier: GPL-3.0

//! Cross-chain relay error types.

use super::{BlockchainError, TxPoolError};
use thiserror::Error;

/// Errors raised while relaying messages between chains.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
	/// The sending chain's outbound queue could not be decoded.
	#[error("Failed to decode messages from para {para_id}: {message}")]
	Decode {
		/// The sending parachain.
		para_id: u32,
		/// The decoding failure.
		message: String,
	},
	/// A chain attached as a parachain has no parachain id.
	#[error("Chain `{0}` is not a parachain")]
	NotParachain(String),
	/// A chain involved in the relay failed.
	#[error(transparent)]
	Blockchain(#[from] BlockchainError),
	/// Submitting to the receiving pool failed.
	#[error(transparent)]
	TxPool(#[from] TxPoolError),
}
