// SPDX-License-Identifier: GPL-3.0

//! String constants for the executor module.

/// Well-known storage key prefixes.
pub mod storage_prefixes {
	/// Prefix under which child trie entries are exposed in the flat key space.
	pub const DEFAULT_CHILD_STORAGE: &[u8] = b":child_storage:default:";
}

/// Signature mocking.
pub mod magic_signature {
	/// Leading bytes of a signature that is accepted without verification.
	pub const PREFIX: &[u8] = &[0xde, 0xad, 0xbe, 0xef];

	/// Byte filling the rest of a mock signature.
	pub const PADDING: u8 = 0xcd;

	/// Length of an sr25519 signature.
	pub const SR25519_SIZE: usize = 64;
}

/// Target prefix for runtime log lines forwarded to the `log` facade.
pub const RUNTIME_LOG_TARGET: &str = "runtime";
