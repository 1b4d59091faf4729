// SPDX-License-Identifier: GPL-3.0

//! String constants for the RPC server module.

/// System RPC method constants.
pub mod system {
	/// Node name returned by `system_name`.
	pub const NODE_NAME: &str = "pop-replay";

	/// Node version returned by `system_version`.
	pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Transaction-related constants.
pub mod transaction {
	/// Prefix for transaction operation IDs.
	pub const OPERATION_ID_PREFIX: &str = "tx-op";
}

/// Storage query limits.
pub mod state {
	/// Largest page accepted by paged storage queries.
	pub const MAX_PAGE_SIZE: u32 = 1000;
}

/// ChainHead subscription constants.
pub mod chain_head {
	/// Maximum number of concurrent chainHead follow subscriptions.
	pub const MAX_SUBSCRIPTIONS: usize = 1024;

	/// Prefix for chainHead operation IDs.
	pub const OPERATION_ID_PREFIX: &str = "op";
}
