// SPDX-License-Identifier: GPL-3.0

//! Inherent extrinsic providers for block building.
//!
//! Inherents are unsigned extrinsics the block author puts at the start of every block:
//! the timestamp, the parachain validation data, and on some runtimes randomness or
//! author information. Each provider inspects the parent block and returns the encoded
//! extrinsics it contributes, or nothing when it does not apply to the chain.
//!
//! ```text
//!                 InherentProvider
//!                        │
//!    ┌──────────────┬────┴─────────┬──────────────┐
//!    ▼              ▼              ▼              ▼
//! Parachain     Timestamp     Randomness       Author
//! (parachains)                (optional)     (optional)
//! ```
//!
//! Providers run in list order; for parachains the validation data comes first since
//! the timestamp pallet checks time against the relay chain state it sets up.

mod optional;
mod parachain;
pub mod relay;
pub mod slot;
mod timestamp;

pub use optional::OptionalInherent;
pub use parachain::ParachainInherent;
pub use timestamp::{TimestampInherent, slot_duration, timestamp_now_key};

use crate::{block::Block, builder::BuildParams, error::BlockBuilderError};
use async_trait::async_trait;
use scale::{Compact, Encode};
use subxt::Metadata;

/// Version byte of a bare (unsigned) extrinsic, in both v4 and v5 formats.
pub(crate) const BARE_EXTRINSIC_VERSION: u8 = 0x04;

/// Creates inherent extrinsics during block building.
#[async_trait]
pub trait InherentProvider: Send + Sync {
	/// Identifier for this provider, used in logs and errors.
	fn identifier(&self) -> &'static str;

	/// Encoded inherent extrinsics for the child of `parent`. Empty if the provider
	/// does not apply to the chain.
	async fn provide(
		&self,
		parent: &Block,
		params: &BuildParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError>;

	/// Forget values derived from the runtime. Called after a runtime upgrade.
	fn invalidate_cache(&self) {}
}

/// Default providers for a relay chain or a parachain.
pub fn default_providers(is_parachain: bool) -> Vec<Box<dyn InherentProvider>> {
	let mut providers: Vec<Box<dyn InherentProvider>> = Vec::new();
	if is_parachain {
		providers.push(Box::new(ParachainInherent::new()));
		providers.push(Box::new(TimestampInherent::default_para()));
	} else {
		providers.push(Box::new(TimestampInherent::default_relay()));
	}
	providers.push(Box::new(OptionalInherent::randomness()));
	providers.push(Box::new(OptionalInherent::author()));
	providers
}

/// Pallet and call index of `pallet::call`, if the runtime has it.
pub(crate) fn call_index(metadata: &Metadata, pallet: &str, call: &str) -> Option<(u8, u8)> {
	let pallet = metadata.pallet_by_name(pallet)?;
	let variant = pallet.call_variant_by_name(call)?;
	Some((pallet.index(), variant.index))
}

/// Wrap an encoded call as a bare extrinsic: `Compact(len) ++ 0x04 ++ call`.
pub fn encode_bare_extrinsic(call: &[u8]) -> Vec<u8> {
	let mut extrinsic = vec![BARE_EXTRINSIC_VERSION];
	extrinsic.extend_from_slice(call);
	let mut encoded = Compact(extrinsic.len() as u32).encode();
	encoded.extend(extrinsic);
	encoded
}

fn provider_error(provider: &str, message: impl Into<String>) -> BlockBuilderError {
	BlockBuilderError::InherentProvider { provider: provider.to_string(), message: message.into() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_extrinsic_has_length_and_version() {
		let call = vec![3, 0, 1, 2, 3];
		let extrinsic = encode_bare_extrinsic(&call);

		// Compact(6) = 6 << 2
		assert_eq!(extrinsic[0], 0x18);
		assert_eq!(extrinsic[1], BARE_EXTRINSIC_VERSION);
		assert_eq!(&extrinsic[2..], &call[..]);
	}

	#[test]
	fn default_providers_put_validation_data_first_on_parachains() {
		let para: Vec<_> = default_providers(true).iter().map(|p| p.identifier()).collect();
		assert_eq!(para, vec!["ParachainSystem", "Timestamp", "Randomness", "AuthorInherent"]);

		let relay: Vec<_> = default_providers(false).iter().map(|p| p.identifier()).collect();
		assert_eq!(relay, vec!["Timestamp", "Randomness", "AuthorInherent"]);
	}
}
