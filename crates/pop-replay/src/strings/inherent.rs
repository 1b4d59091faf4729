// SPDX-License-Identifier: GPL-3.0

//! String constants for the inherent module.

/// String constants for the timestamp inherent provider.
pub mod timestamp {
	/// Provider identifier for logging/debugging.
	pub const IDENTIFIER: &str = "Timestamp";

	/// Storage key components for reading the current timestamp.
	pub mod storage_keys {
		pub const PALLET_NAME: &[u8] = b"Timestamp";
		pub const NOW: &[u8] = b"Now";
	}

	/// Metadata lookup constants for dynamic pallet/call discovery.
	pub mod metadata {
		pub const PALLET_NAME: &str = "Timestamp";
		pub const SET_CALL_NAME: &str = "set";
	}

	/// Constants for slot duration detection from runtime.
	pub mod slot_duration {
		/// Runtime API method for Aura slot duration.
		pub const AURA_API_METHOD: &str = "AuraApi_slot_duration";

		/// Babe pallet name for metadata constant lookup.
		pub const BABE_PALLET: &str = "Babe";

		/// Babe constant name for expected block time.
		pub const BABE_EXPECTED_BLOCK_TIME: &str = "ExpectedBlockTime";

		/// Fallback slot duration for relay chains (6 seconds).
		pub const RELAY_CHAIN_FALLBACK_MS: u64 = 6_000;

		/// Fallback slot duration for parachains (12 seconds).
		pub const PARACHAIN_FALLBACK_MS: u64 = 12_000;
	}
}

/// String constants for the parachain inherent provider.
pub mod parachain {
	/// Provider identifier for logging/debugging.
	pub const IDENTIFIER: &str = "ParachainSystem";

	pub mod metadata {
		pub const PALLET_NAME: &str = "ParachainSystem";
		pub const SET_VALIDATION_DATA_CALL_NAME: &str = "set_validation_data";
	}

	/// Storage key components for parachain info.
	pub mod storage_keys {
		pub const PARACHAIN_INFO_PALLET: &[u8] = b"ParachainInfo";
		pub const PARACHAIN_ID: &[u8] = b"ParachainId";
		pub const PARACHAIN_SYSTEM_PALLET: &[u8] = b"ParachainSystem";
		pub const LAST_DMQ_MQC_HEAD: &[u8] = b"LastDmqMqcHead";
		pub const LAST_HRMP_MQC_HEADS: &[u8] = b"LastHrmpMqcHeads";
	}

	/// Relay chain items rewritten in the validation data proof.
	pub mod relay_keys {
		pub const PARAS_PALLET: &[u8] = b"Paras";
		pub const HEADS: &[u8] = b"Heads";
		pub const BABE_PALLET: &[u8] = b"Babe";
		pub const CURRENT_SLOT: &[u8] = b"CurrentSlot";
		pub const HRMP_PALLET: &[u8] = b"Hrmp";
		pub const HRMP_CHANNELS: &[u8] = b"HrmpChannels";
		pub const HRMP_INGRESS_CHANNELS_INDEX: &[u8] = b"HrmpIngressChannelsIndex";
	}

	/// Relay chain slot duration.
	pub const RELAY_SLOT_DURATION_MS: u64 = 6_000;
}

/// String constants for relay chain inherent mocking.
pub mod relay {
	/// Pallet name for ParaInherent (relay chain parachains inherent).
	pub const PARA_INHERENT_PALLET: &str = "ParaInherent";

	pub mod storage_keys {
		pub const PARA_INHERENT_PALLET: &[u8] = b"ParaInherent";
		pub const INCLUDED: &[u8] = b"Included";
	}
}

/// Consensus slot storage.
pub mod slot {
	pub const AURA_PALLET: &[u8] = b"Aura";
	pub const BABE_PALLET: &[u8] = b"Babe";
	pub const CURRENT_SLOT: &[u8] = b"CurrentSlot";
}

/// Inherents that take no arguments and are only present on some runtimes.
pub mod optional {
	/// Babe randomness collection used by Moonbeam-style parachains.
	pub mod randomness {
		pub const IDENTIFIER: &str = "Randomness";
		pub const PALLET_NAME: &str = "Randomness";
		pub const CALL_NAME: &str = "set_babe_randomness_results";
	}

	/// Nimbus author validation.
	pub mod author {
		pub const IDENTIFIER: &str = "AuthorInherent";
		pub const PALLET_NAME: &str = "AuthorInherent";
		pub const CALL_NAME: &str = "kick_off_authorship_validation";
	}
}
