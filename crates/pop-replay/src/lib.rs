// SPDX-License-Identifier: GPL-3.0

//! Local forks of live Polkadot SDK chains that build and replay blocks offline.
//!
//! A fork starts from a block of a live chain. State is fetched lazily from the chain's
//! RPC endpoint and every block built locally adds an in-memory layer on top of its
//! parent, so a fork is usable instantly and only ever downloads what it reads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          RPC Server                             │
//! │        (chain, state, author, chainHead, archive, dev)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Blockchain ──▶ TxPool ──▶ BlockBuilder ──▶ RuntimeExecutor    │
//! │       │                        │                                │
//! │   HeadState              InherentProviders                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Layered Storage                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │ Block layers │─▶│ StorageCache │─▶│ Remote (live RPC,    │   │
//! │  │   (local)    │  │ (persisted)  │  │ lazy, range cached)  │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod block;
pub mod blockchain;
pub mod builder;
mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod head_state;
pub mod inherent;
pub mod overrides;
mod range_cache;
pub mod relay;
mod remote;
pub mod rpc;
pub mod rpc_server;
pub mod storage;
mod strings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod txpool;
pub mod validity;

pub use block::{Block, BlockOrigin, RuntimeVersion};
pub use blockchain::{Blockchain, ForkBuilder};
pub use builder::{BlockBuilder, BuildOutcome};
pub use cache::{InMemoryStorageCache, StorageCache};
pub use config::{BlockRef, ReplayConfig};
pub use error::{
	BlockBuilderError, BlockError, BlockchainError, CacheError, ExecutorError, OverrideError,
	RelayError, RemoteStorageError, RpcClientError, StorageError, TxPoolError,
};
pub use executor::{RuntimeEngine, RuntimeExecutor, SmoldotEngine};
pub use head_state::{EventBus, HeadState};
pub use inherent::InherentProvider;
pub use range_cache::KeyRangeCache;
pub use relay::MessageRelay;
pub use remote::RemoteStorageLayer;
pub use rpc::{ForkRpcClient, RemoteSource};
pub use rpc_server::{ForkRpcServer, RpcServerConfig, RpcServerError};
pub use txpool::{BuildBlockMode, NewBlockParams, TxPool};
