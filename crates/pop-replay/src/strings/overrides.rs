// SPDX-License-Identifier: GPL-3.0

//! String constants for storage overrides.

/// Item key that deletes every key under the listed storage items.
pub const REMOVE_PREFIX: &str = "$removePrefix";
