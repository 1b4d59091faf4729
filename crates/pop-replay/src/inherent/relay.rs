// SPDX-License-Identifier: GPL-3.0

//! Relay chain `ParaInherent::Included`.
//!
//! The `ParaInherent` pallet of a relay chain panics in `on_finalize` unless
//! `Included` was set during the block:
//!
//! ```ignore
//! fn on_finalize(_: BlockNumberFor<T>) {
//!     if Included::<T>::take().is_none() {
//!         panic!("Bitfields and heads must be included every block");
//!     }
//! }
//! ```
//!
//! Building a `paras_inherent.enter` extrinsic with bitfields and candidates is out of
//! reach for a fork, so the block builder writes `Included` directly before finalizing.
//! Only existence is checked.

use crate::{block::Block, storage::storage_value_key, strings};
use scale::Encode;

pub use strings::inherent::relay::PARA_INHERENT_PALLET;

/// `twox_128("ParaInherent") ++ twox_128("Included")`.
pub fn para_inherent_included_key() -> Vec<u8> {
	storage_value_key(
		strings::inherent::relay::storage_keys::PARA_INHERENT_PALLET,
		strings::inherent::relay::storage_keys::INCLUDED,
	)
}

/// The `Included` entry to write for a child of `parent`, if its runtime has the
/// `ParaInherent` pallet.
pub async fn included_entry(parent: &Block) -> Option<(Vec<u8>, Vec<u8>)> {
	match parent.metadata().await {
		Ok(metadata) => metadata
			.pallet_by_name(PARA_INHERENT_PALLET)
			.map(|_| (para_inherent_included_key(), ().encode())),
		Err(e) => {
			log::debug!("No metadata at block #{}, skipping ParaInherent: {e}", parent.number);
			None
		},
	}
}
