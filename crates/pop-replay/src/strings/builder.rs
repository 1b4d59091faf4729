// SPDX-License-Identifier: GPL-3.0

//! String constants for the block and builder modules.

/// Runtime API method names used during block building.
pub mod runtime_api {
	/// Runtime method to initialize a new block.
	///
	/// Called with the encoded header to set up block execution context.
	pub const CORE_INITIALIZE_BLOCK: &str = "Core_initialize_block";

	/// Runtime method to apply an extrinsic to the block.
	///
	/// Called for both inherent and user extrinsics.
	pub const BLOCK_BUILDER_APPLY_EXTRINSIC: &str = "BlockBuilder_apply_extrinsic";

	/// Runtime method to finalize the block.
	///
	/// Returns the final block header with computed roots.
	pub const BLOCK_BUILDER_FINALIZE_BLOCK: &str = "BlockBuilder_finalize_block";

	/// Runtime method returning the SCALE encoded runtime version.
	pub const CORE_VERSION: &str = "Core_version";

	/// Runtime method returning metadata at a requested version.
	pub const METADATA_AT_VERSION: &str = "Metadata_metadata_at_version";

	/// Runtime method returning the default metadata version.
	pub const METADATA: &str = "Metadata_metadata";

	/// Preferred metadata version.
	pub const METADATA_VERSION: u32 = 15;
}

/// Consensus engine identifiers used in header digests.
pub mod consensus_engine {
	pub const AURA: [u8; 4] = *b"aura";
	pub const BABE: [u8; 4] = *b"BABE";
}
