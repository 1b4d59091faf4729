// SPDX-License-Identifier: GPL-3.0

//! Common types used across RPC methods.

use super::StorageResultItem;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::{block::RuntimeVersion, rpc::Header};

/// A hex-encoded string with "0x" prefix.
///
/// This type handles the common pattern of encoding/decoding hex strings
/// for RPC communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HexString(String);

impl HexString {
	/// Create a new HexString from raw bytes.
	pub fn from_bytes(bytes: &[u8]) -> Self {
		Self(format!("0x{}", hex::encode(bytes)))
	}

	/// Decode the hex string back to raw bytes.
	pub fn to_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
		hex::decode(self.0.trim_start_matches("0x"))
	}

	/// Get the inner string representation.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Convert into the inner String.
	pub fn into_inner(self) -> String {
		self.0
	}
}

impl fmt::Display for HexString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<HexString> for String {
	fn from(hex: HexString) -> Self {
		hex.0
	}
}

impl From<&[u8]> for HexString {
	fn from(bytes: &[u8]) -> Self {
		Self::from_bytes(bytes)
	}
}

impl<const N: usize> From<&[u8; N]> for HexString {
	fn from(bytes: &[u8; N]) -> Self {
		Self::from_bytes(bytes)
	}
}

/// System health status. A fork has no network, so it never has peers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
	/// Number of connected peers.
	pub peers: u32,
	/// Is the node syncing?
	pub is_syncing: bool,
	/// Should this node have any peers?
	pub should_have_peers: bool,
}

/// Signed block (header + extrinsics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock {
	/// Block data.
	pub block: BlockData,
	/// Justifications (if any).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub justifications: Option<Vec<Vec<u8>>>,
}

/// Block data (header + extrinsics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
	/// Block header.
	pub header: Header,
	/// Extrinsics.
	pub extrinsics: Vec<String>,
}

/// Events of a `chainHead_v1_follow` subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChainHeadEvent {
	/// Subscription initialized.
	Initialized {
		finalized_block_hashes: Vec<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		finalized_block_runtime: Option<RuntimeEvent>,
	},
	/// New block announced.
	NewBlock {
		block_hash: String,
		parent_block_hash: String,
		/// Present when the subscription asked for runtimes. `None` means unchanged.
		#[serde(skip_serializing_if = "Option::is_none")]
		new_runtime: Option<RuntimeEvent>,
	},
	/// Best block changed.
	BestBlockChanged { best_block_hash: String },
	/// Block finalized.
	Finalized { finalized_block_hashes: Vec<String>, pruned_block_hashes: Vec<String> },
	/// Body of a `chainHead_v1_body` operation.
	OperationBodyDone { operation_id: String, value: Vec<String> },
	/// Items of a `chainHead_v1_storage` operation.
	OperationStorageItems { operation_id: String, items: Vec<StorageResultItem> },
	/// A `chainHead_v1_storage` operation delivered all its items.
	OperationStorageDone { operation_id: String },
	/// An operation failed.
	OperationError { operation_id: String, error: String },
	/// Subscription stopped.
	Stop,
}

/// Runtime of a block, as reported in chainHead events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuntimeEvent {
	/// Valid runtime.
	Valid { spec: RuntimeVersion },
	/// Invalid runtime.
	Invalid { error: String },
}

/// Response of chainHead methods that start an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OperationResult {
	/// Operation started. Its results arrive on the follow subscription.
	Started { operation_id: String },
	/// Limit reached.
	LimitReached,
}

/// Storage change set for subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageChangeSet {
	/// Block hash where changes occurred.
	pub block: String,
	/// List of storage changes (key, value).
	pub changes: Vec<(String, Option<String>)>,
}
