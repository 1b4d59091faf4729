// SPDX-License-Identifier: GPL-3.0

//! Timestamp inherent provider.
//!
//! Produces `timestamp.set(now)` with `now = Timestamp::Now + slot duration`. The slot
//! duration is detected from the runtime, in order:
//!
//! 1. the `AuraApi_slot_duration` runtime API (Aura based chains)
//! 2. the `Babe::ExpectedBlockTime` constant (Babe based chains)
//! 3. the configured fallback (6 s for relay chains, 12 s for parachains)
//!
//! Pallet and call indices are looked up in the parent's metadata.

use super::{InherentProvider, call_index, encode_bare_extrinsic, provider_error};
use crate::{
	block::Block,
	builder::BuildParams,
	error::BlockBuilderError,
	storage::storage_value_key,
	strings::inherent::timestamp as strings,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use scale::{Compact, Decode, Encode};
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp inherent provider.
#[derive(Debug)]
pub struct TimestampInherent {
	fallback_slot_duration_ms: u64,
	detected: Mutex<Option<u64>>,
}

impl TimestampInherent {
	pub fn new(fallback_slot_duration_ms: u64) -> Self {
		Self { fallback_slot_duration_ms, detected: Mutex::new(None) }
	}

	/// 6 second fallback.
	pub fn default_relay() -> Self {
		Self::new(strings::slot_duration::RELAY_CHAIN_FALLBACK_MS)
	}

	/// 12 second fallback.
	pub fn default_para() -> Self {
		Self::new(strings::slot_duration::PARACHAIN_FALLBACK_MS)
	}

	async fn slot_duration(&self, parent: &Block) -> u64 {
		if let Some(duration) = *self.detected.lock() {
			return duration;
		}
		let duration = slot_duration(parent, self.fallback_slot_duration_ms).await;
		*self.detected.lock() = Some(duration);
		duration
	}
}

impl Default for TimestampInherent {
	fn default() -> Self {
		Self::default_relay()
	}
}

/// Storage key of `Timestamp::Now`.
pub fn timestamp_now_key() -> Vec<u8> {
	storage_value_key(strings::storage_keys::PALLET_NAME, strings::storage_keys::NOW)
}

/// Slot duration of the runtime at `block`, or `fallback` if it cannot be detected.
pub async fn slot_duration(block: &Block, fallback: u64) -> u64 {
	if let Some(duration) = block
		.call(strings::slot_duration::AURA_API_METHOD, &[])
		.await
		.ok()
		.and_then(|outcome| u64::decode(&mut outcome.result.as_slice()).ok())
	{
		return duration;
	}

	if let Some(duration) = block.metadata().await.ok().and_then(|metadata| {
		metadata
			.pallet_by_name(strings::slot_duration::BABE_PALLET)?
			.constant_by_name(strings::slot_duration::BABE_EXPECTED_BLOCK_TIME)
			.and_then(|c| u64::decode(&mut c.value()).ok())
	}) {
		return duration;
	}

	log::debug!("Slot duration not detected, using {fallback} ms");
	fallback
}

/// `timestamp.set(Compact(timestamp))`.
fn encode_set_call(pallet_index: u8, call_index: u8, timestamp: u64) -> Vec<u8> {
	let mut call = vec![pallet_index, call_index];
	call.extend(Compact(timestamp).encode());
	call
}

#[async_trait]
impl InherentProvider for TimestampInherent {
	fn identifier(&self) -> &'static str {
		strings::IDENTIFIER
	}

	async fn provide(
		&self,
		parent: &Block,
		_params: &BuildParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = parent.metadata().await?;
		let (pallet_index, call_index) = call_index(
			&metadata,
			strings::metadata::PALLET_NAME,
			strings::metadata::SET_CALL_NAME,
		)
		.ok_or_else(|| {
			provider_error(
				self.identifier(),
				format!(
					"call {}::{} not found",
					strings::metadata::PALLET_NAME,
					strings::metadata::SET_CALL_NAME
				),
			)
		})?;

		let current = match parent.get(&timestamp_now_key()).await? {
			Some(value) => u64::decode(&mut value.as_slice())
				.map_err(|e| provider_error(self.identifier(), e.to_string()))?,
			// Genesis: start from the wall clock.
			None => SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map(|d| d.as_millis() as u64)
				.unwrap_or_default(),
		};
		let slot_duration = self.slot_duration(parent).await;
		let timestamp = current.saturating_add(slot_duration);
		log::debug!("Timestamp inherent: {current} + {slot_duration} = {timestamp}");

		Ok(vec![encode_bare_extrinsic(&encode_set_call(pallet_index, call_index, timestamp))])
	}

	fn invalidate_cache(&self) {
		*self.detected.lock() = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestChain;

	#[test]
	fn timestamp_now_key_is_pallet_and_item_hash() {
		let key = timestamp_now_key();
		assert_eq!(key.len(), 32);
		assert_eq!(&key[..16], &sp_core::twox_128(b"Timestamp"));
		assert_eq!(&key[16..], &sp_core::twox_128(b"Now"));
	}

	#[test]
	fn set_call_encodes_compact_timestamp() {
		let call = encode_set_call(3, 0, 1_000_000);
		assert_eq!(&call[..2], &[3, 0]);
		assert_eq!(Compact::<u64>::decode(&mut &call[2..]).unwrap().0, 1_000_000);
	}

	#[test]
	fn defaults_use_chain_specific_fallbacks() {
		assert_eq!(TimestampInherent::default_relay().fallback_slot_duration_ms, 6_000);
		assert_eq!(TimestampInherent::default_para().fallback_slot_duration_ms, 12_000);
		assert_eq!(TimestampInherent::default().identifier(), "Timestamp");
	}

	#[tokio::test]
	async fn slot_duration_comes_from_aura_api() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		chain.engine.respond(strings::slot_duration::AURA_API_METHOD, 2_000u64.encode());

		assert_eq!(slot_duration(&block, 6_000).await, 2_000);
	}

	#[tokio::test]
	async fn slot_duration_falls_back_when_undetectable() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		assert_eq!(slot_duration(&block, 12_000).await, 12_000);
	}

	#[tokio::test]
	async fn detected_duration_is_cached_until_invalidated() {
		let chain = TestChain::new().await;
		let block = chain.fork_block().await;
		let provider = TimestampInherent::default_relay();

		chain.engine.respond(strings::slot_duration::AURA_API_METHOD, 2_000u64.encode());
		assert_eq!(provider.slot_duration(&block).await, 2_000);

		chain.engine.respond(strings::slot_duration::AURA_API_METHOD, 3_000u64.encode());
		assert_eq!(provider.slot_duration(&block).await, 2_000);

		provider.invalidate_cache();
		assert_eq!(provider.slot_duration(&block).await, 3_000);
	}
}
