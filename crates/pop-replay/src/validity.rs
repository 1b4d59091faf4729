// SPDX-License-Identifier: GPL-3.0

//! Decoded outcomes of transaction validation and application.
//!
//! The runtime answers `TaggedTransactionQueue_validate_transaction` with a
//! `TransactionValidity` and `BlockBuilder_apply_extrinsic` with an
//! `ApplyExtrinsicResult`. Both embed a [`TransactionValidityError`], which the
//! pool and the RPC layer surface with distinct error codes for invalid and
//! unknown transactions.

use scale::{Decode, Encode};
use serde::Serialize;

/// Why a transaction is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidTransaction {
	Call,
	Payment,
	Future,
	Stale,
	BadProof,
	AncientBirthBlock,
	ExhaustsResources,
	Custom(u8),
	BadMandatory,
	MandatoryValidation,
	BadSigner,
	IndeterminateImplicit,
	UnknownOrigin,
}

/// Why a transaction's validity could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownTransaction {
	CannotLookup,
	NoUnsignedValidator,
	Custom(u8),
}

/// A transaction rejected by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionValidityError {
	/// The transaction is invalid.
	Invalid(InvalidTransaction),
	/// The validity of the transaction is unknown.
	Unknown(UnknownTransaction),
}

/// A transaction accepted by `TaggedTransactionQueue_validate_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ValidTransaction {
	pub priority: u64,
	pub requires: Vec<Vec<u8>>,
	pub provides: Vec<Vec<u8>>,
	pub longevity: u64,
	pub propagate: bool,
}

/// Result of validating a transaction.
pub type TransactionValidity = Result<ValidTransaction, TransactionValidityError>;

/// Decode a `TransactionValidity` returned by the runtime.
pub fn decode_transaction_validity(bytes: &[u8]) -> Result<TransactionValidity, scale::Error> {
	TransactionValidity::decode(&mut &bytes[..])
}

/// Outcome of `BlockBuilder_apply_extrinsic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// Included and dispatched successfully.
	Success,
	/// Included, but the dispatch returned an error. Holds the encoded `DispatchError`.
	DispatchFailed(Vec<u8>),
	/// Rejected; the extrinsic is not part of the block.
	Rejected(TransactionValidityError),
}

impl ApplyOutcome {
	/// Decode an `ApplyExtrinsicResult`.
	///
	/// The dispatch error is kept opaque; its layout depends on the runtime's
	/// module error encoding.
	pub fn decode(bytes: &[u8]) -> Result<Self, scale::Error> {
		match bytes.split_first() {
			Some((0, rest)) => match rest.split_first() {
				Some((0, _)) => Ok(ApplyOutcome::Success),
				Some((1, dispatch_error)) => Ok(ApplyOutcome::DispatchFailed(dispatch_error.to_vec())),
				_ => Err("invalid DispatchOutcome".into()),
			},
			Some((1, mut rest)) => Ok(ApplyOutcome::Rejected(TransactionValidityError::decode(
				&mut rest,
			)?)),
			_ => Err("invalid ApplyExtrinsicResult".into()),
		}
	}

	/// Whether the extrinsic became part of the block.
	pub fn is_included(&self) -> bool {
		!matches!(self, ApplyOutcome::Rejected(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_apply_results() {
		assert_eq!(ApplyOutcome::decode(&[0, 0]).unwrap(), ApplyOutcome::Success);
		assert_eq!(
			ApplyOutcome::decode(&[0, 1, 3, 2]).unwrap(),
			ApplyOutcome::DispatchFailed(vec![3, 2])
		);
		assert_eq!(
			ApplyOutcome::decode(&[1, 0, 4]).unwrap(),
			ApplyOutcome::Rejected(TransactionValidityError::Invalid(InvalidTransaction::BadProof))
		);
		assert_eq!(
			ApplyOutcome::decode(&[1, 1, 2, 9]).unwrap(),
			ApplyOutcome::Rejected(TransactionValidityError::Unknown(UnknownTransaction::Custom(9)))
		);
		assert!(ApplyOutcome::decode(&[]).is_err());
	}

	#[test]
	fn decodes_validity() {
		let valid = ValidTransaction {
			priority: 7,
			requires: vec![],
			provides: vec![vec![1]],
			longevity: 64,
			propagate: true,
		};
		let encoded = TransactionValidity::Ok(valid.clone()).encode();
		assert_eq!(decode_transaction_validity(&encoded).unwrap(), Ok(valid));

		let encoded =
			TransactionValidity::Err(TransactionValidityError::Invalid(InvalidTransaction::Stale))
				.encode();
		assert_eq!(
			decode_transaction_validity(&encoded).unwrap(),
			Err(TransactionValidityError::Invalid(InvalidTransaction::Stale))
		);
	}
}
