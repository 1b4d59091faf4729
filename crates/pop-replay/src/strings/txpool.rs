// SPDX-License-Identifier: GPL-3.0

//! String constants for transaction pool and validation.

/// Runtime API method names for transaction validation.
pub mod runtime_api {
	/// Runtime method to validate a transaction before inclusion.
	///
	/// Takes encoded args: `(source, extrinsic, block_hash)`
	/// Returns: `TransactionValidity` (Result<ValidTransaction, TransactionValidityError>)
	pub const TAGGED_TRANSACTION_QUEUE_VALIDATE: &str =
		"TaggedTransactionQueue_validate_transaction";
}

/// Transaction source identifiers per Substrate spec.
pub mod transaction_source {
	/// Transaction originated outside the node (user submitted via RPC).
	pub const EXTERNAL: u8 = 0x02;
}

/// Batch scheduling defaults.
pub mod batch {
	/// Quiet period after the last submission before a batch is built.
	pub const DEFAULT_DELAY_MS: u64 = 100;

	/// Upper bound on how long the first submission of a batch may wait.
	pub const DEFAULT_MAX_WAIT_MS: u64 = 1_000;
}
