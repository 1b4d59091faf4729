// SPDX-License-Identifier: GPL-3.0

//! Argument-less inherents that only some runtimes declare.

use super::{InherentProvider, call_index, encode_bare_extrinsic};
use crate::{
	block::Block, builder::BuildParams, error::BlockBuilderError,
	strings::inherent::optional,
};
use async_trait::async_trait;

/// Provides `pallet::call()` when the parent's runtime has that call, nothing otherwise.
#[derive(Debug, Clone)]
pub struct OptionalInherent {
	identifier: &'static str,
	pallet: &'static str,
	call: &'static str,
}

impl OptionalInherent {
	pub fn new(identifier: &'static str, pallet: &'static str, call: &'static str) -> Self {
		Self { identifier, pallet, call }
	}

	/// `Randomness::set_babe_randomness_results`.
	pub fn randomness() -> Self {
		Self::new(
			optional::randomness::IDENTIFIER,
			optional::randomness::PALLET_NAME,
			optional::randomness::CALL_NAME,
		)
	}

	/// `AuthorInherent::kick_off_authorship_validation`.
	pub fn author() -> Self {
		Self::new(
			optional::author::IDENTIFIER,
			optional::author::PALLET_NAME,
			optional::author::CALL_NAME,
		)
	}
}

#[async_trait]
impl InherentProvider for OptionalInherent {
	fn identifier(&self) -> &'static str {
		self.identifier
	}

	async fn provide(
		&self,
		parent: &Block,
		_params: &BuildParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = match parent.metadata().await {
			Ok(metadata) => metadata,
			Err(e) => {
				log::debug!("{}: metadata unavailable, skipping: {e}", self.identifier);
				return Ok(Vec::new());
			},
		};
		Ok(call_index(&metadata, self.pallet, self.call)
			.map(|(pallet, call)| vec![encode_bare_extrinsic(&[pallet, call])])
			.unwrap_or_default())
	}
}
