// SPDX-License-Identifier: GPL-3.0

//! Error types for replay operations.
//!
//! This module contains all error types used throughout the `pop-replay` crate,
//! organized by context:
//!
//! - [`rpc::RpcClientError`] - Errors from RPC client operations.
//! - [`cache::CacheError`] - Errors from the persistence cache.
//! - [`remote::RemoteStorageError`] - Errors from remote storage layer operations.
//! - [`storage::StorageError`] - Errors from layered storage reads and writes.
//! - [`executor::ExecutorError`] - Errors from the runtime execution service.
//! - [`block::BlockError`] - Errors resolving lazily loaded block fields.
//! - [`builder::BlockBuilderError`] - Errors during block construction.
//! - [`blockchain::BlockchainError`] - Errors from chain management.
//! - [`txpool::TxPoolError`] - Errors from the transaction pool.
//! - [`overrides::OverrideError`] - Errors applying storage overrides.
//! - [`relay::RelayError`] - Errors relaying cross-chain messages.

pub mod block;
pub mod blockchain;
pub mod builder;
pub mod cache;
pub mod executor;
pub mod overrides;
pub mod relay;
pub mod remote;
pub mod rpc;
pub mod storage;
pub mod txpool;

pub use block::BlockError;
pub use blockchain::BlockchainError;
pub use builder::BlockBuilderError;
pub use cache::CacheError;
pub use executor::ExecutorError;
pub use overrides::OverrideError;
pub use relay::RelayError;
pub use remote::RemoteStorageError;
pub use rpc::RpcClientError;
pub use storage::StorageError;
pub use txpool::TxPoolError;
