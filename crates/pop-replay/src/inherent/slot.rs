// SPDX-License-Identifier: GPL-3.0

//! Consensus slot handling for block building.
//!
//! New headers carry a pre-runtime digest announcing the slot they were authored in.
//! The consensus engine is detected from storage: a chain with `Aura::CurrentSlot` uses
//! Aura, one with `Babe::CurrentSlot` uses Babe. The next block claims `current + 1`.

use crate::{
	block::Block,
	error::BlockError,
	storage::storage_value_key,
	strings::{builder::consensus_engine, inherent::slot},
};
use scale::{Decode, Encode};
use subxt::config::substrate::DigestItem;

/// Slot based consensus engine of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusType {
	/// Uses `PreRuntime(*b"aura", slot)` digest items.
	Aura,
	/// Uses `PreRuntime(*b"BABE", PreDigest)` digest items.
	Babe,
}

impl ConsensusType {
	/// Storage key of the engine's `CurrentSlot` value.
	pub fn current_slot_key(self) -> Vec<u8> {
		match self {
			ConsensusType::Aura => aura_current_slot_key(),
			ConsensusType::Babe => babe_current_slot_key(),
		}
	}
}

/// `twox_128("Aura") ++ twox_128("CurrentSlot")`
pub fn aura_current_slot_key() -> Vec<u8> {
	storage_value_key(slot::AURA_PALLET, slot::CURRENT_SLOT)
}

/// `twox_128("Babe") ++ twox_128("CurrentSlot")`
pub fn babe_current_slot_key() -> Vec<u8> {
	storage_value_key(slot::BABE_PALLET, slot::CURRENT_SLOT)
}

/// The chain's consensus engine and its current slot, if it uses Aura or Babe.
pub async fn current_slot(block: &Block) -> Result<Option<(ConsensusType, u64)>, BlockError> {
	for consensus in [ConsensusType::Aura, ConsensusType::Babe] {
		if let Some(value) = block.get(&consensus.current_slot_key()).await? {
			let slot = u64::decode(&mut value.as_slice())
				.map_err(|e| BlockError::Codec(format!("{consensus:?} current slot: {e}")))?;
			return Ok(Some((consensus, slot)));
		}
	}
	Ok(None)
}

/// Pre-runtime digest for the child of `parent`, claiming the slot after the parent's.
pub async fn next_slot_digest(parent: &Block) -> Result<Option<DigestItem>, BlockError> {
	Ok(current_slot(parent).await?.map(|(consensus, current)| {
		let next = current.saturating_add(1);
		match consensus {
			ConsensusType::Aura => DigestItem::PreRuntime(consensus_engine::AURA, next.encode()),
			ConsensusType::Babe =>
				DigestItem::PreRuntime(consensus_engine::BABE, encode_babe_predigest(next, 0)),
		}
	}))
}

/// Slot containing `timestamp_ms`.
pub fn slot_at(timestamp_ms: u64, slot_duration_ms: u64) -> u64 {
	timestamp_ms.checked_div(slot_duration_ms).unwrap_or_default()
}

/// Encode a Babe `PreDigest::SecondaryPlain`, which needs no VRF output.
///
/// ```text
/// enum PreDigest {
///     Primary(PrimaryPreDigest),                // 1
///     SecondaryPlain(SecondaryPlainPreDigest),  // 2
///     SecondaryVRF(SecondaryVRFPreDigest),      // 3
/// }
/// struct SecondaryPlainPreDigest { authority_index: u32, slot: u64 }
/// ```
pub fn encode_babe_predigest(slot: u64, authority_index: u32) -> Vec<u8> {
	const SECONDARY_PLAIN_INDEX: u8 = 2;

	let mut encoded = vec![SECONDARY_PLAIN_INDEX];
	encoded.extend(authority_index.encode());
	encoded.extend(slot.encode());
	encoded
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestChain;

	#[test]
	fn current_slot_keys_are_correct() {
		let expected: Vec<u8> =
			[sp_core::twox_128(b"Babe"), sp_core::twox_128(b"CurrentSlot")].concat();
		assert_eq!(babe_current_slot_key(), expected);
		assert_eq!(aura_current_slot_key().len(), 32);
		assert_ne!(aura_current_slot_key(), babe_current_slot_key());
	}

	#[test]
	fn slot_at_divides_timestamp() {
		assert_eq!(slot_at(18_000, 6_000), 3);
		assert_eq!(slot_at(5_999, 6_000), 0);
		assert_eq!(slot_at(12_000, 0), 0);
	}

	#[test]
	fn encode_babe_predigest_produces_correct_format() {
		let slot: u64 = 295033271;
		let encoded = encode_babe_predigest(slot, 5);

		assert_eq!(encoded.len(), 13);
		assert_eq!(encoded[0], 2);
		assert_eq!(&encoded[1..5], &5u32.to_le_bytes());
		assert_eq!(&encoded[5..13], &slot.to_le_bytes());
	}

	#[tokio::test]
	async fn digest_follows_aura_slot() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		assert!(next_slot_digest(&block).await.unwrap().is_none());

		block.set_storage(vec![(aura_current_slot_key(), Some(41u64.encode()))]);
		match next_slot_digest(&block).await.unwrap() {
			Some(DigestItem::PreRuntime(engine, data)) => {
				assert_eq!(engine, *b"aura");
				assert_eq!(data, 42u64.encode());
			},
			other => panic!("unexpected digest {other:?}"),
		}
	}

	#[tokio::test]
	async fn digest_follows_babe_slot() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		block.set_storage(vec![(babe_current_slot_key(), Some(7u64.encode()))]);

		assert_eq!(current_slot(&block).await.unwrap(), Some((ConsensusType::Babe, 7)));
		match next_slot_digest(&block).await.unwrap() {
			Some(DigestItem::PreRuntime(engine, data)) => {
				assert_eq!(engine, *b"BABE");
				assert_eq!(data, encode_babe_predigest(8, 0));
			},
			other => panic!("unexpected digest {other:?}"),
		}
	}
}
