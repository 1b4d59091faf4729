// SPDX-License-Identifier: GPL-3.0

//! Storage-related RPC types.

use serde::{Deserialize, Serialize};

/// Storage query item for chainHead_v1_storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQueryItem {
	/// Storage key (hex-encoded).
	pub key: String,
	/// Query type.
	#[serde(rename = "type")]
	pub query_type: StorageQueryType,
}

/// Storage query type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageQueryType {
	/// Get value.
	Value,
	/// Get hash of value.
	Hash,
	/// Get the values of every key under the given prefix.
	DescendantsValues,
	/// Get the value hashes of every key under the given prefix.
	DescendantsHashes,
}

/// A single storage result item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResultItem {
	/// Storage key (hex-encoded).
	pub key: String,
	/// Storage value (hex-encoded), if requested.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	/// Blake2-256 hash of the value, if requested.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub hash: Option<String>,
}

/// One page of the key-value pairs under a prefix.
///
/// `next` is the key to resume from, present while more pairs may follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescendantValues {
	/// Hex-encoded `(key, value)` pairs, in key order.
	pub items: Vec<(String, String)>,
	/// Hex-encoded cursor for the following page.
	pub next: Option<String>,
}

/// Hash or array of hashes for chainHead_v1_unpin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashOrHashes {
	/// Single hash.
	Single(String),
	/// Multiple hashes.
	Multiple(Vec<String>),
}

impl HashOrHashes {
	/// The hashes, as a list.
	pub fn into_vec(self) -> Vec<String> {
		match self {
			HashOrHashes::Single(hash) => vec![hash],
			HashOrHashes::Multiple(hashes) => hashes,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_types_use_chain_head_names() {
		let item: StorageQueryItem =
			serde_json::from_str(r#"{"key":"0x00","type":"descendantsValues"}"#).unwrap();
		assert_eq!(item.query_type, StorageQueryType::DescendantsValues);
	}

	#[test]
	fn last_page_has_null_cursor() {
		let page = DescendantValues { items: vec![("0x01".into(), "0x02".into())], next: None };
		assert_eq!(
			serde_json::to_value(&page).unwrap(),
			serde_json::json!({"items": [["0x01", "0x02"]], "next": null})
		);
	}
}
