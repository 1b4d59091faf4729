// SPDX-License-Identifier: GPL-3.0

//! Merkle trie operations: state roots and storage proofs.
//!
//! Proofs are handled as plain lists of encoded trie nodes, the form they take inside
//! a parachain's `setValidationData` inherent.

use crate::error::ExecutorError;
use scale::Encode;
use smoldot::trie::{
	nibbles_to_bytes_suffix_extend,
	proof_decode::{self, StorageValue},
};
use sp_core::{Blake2Hasher, H256};
use sp_trie::{
	HashDBT, LayoutV0, LayoutV1, MemoryDB, StorageProof, TrieConfiguration, TrieDBBuilder,
	TrieDBMutBuilder, TrieHash, TrieMut,
};
use std::collections::{BTreeMap, BTreeSet};
use trie_db::Trie;

type Layout = LayoutV1<Blake2Hasher>;

/// Trie layout version, as reported by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateVersion {
	V0,
	#[default]
	V1,
}

impl From<u8> for StateVersion {
	fn from(version: u8) -> Self {
		match version {
			0 => StateVersion::V0,
			_ => StateVersion::V1,
		}
	}
}

/// Root of the trie holding exactly `entries`.
pub fn calculate_state_root<I>(entries: I, version: StateVersion) -> H256
where
	I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
	match version {
		StateVersion::V0 => LayoutV0::<Blake2Hasher>::trie_root(entries),
		StateVersion::V1 => LayoutV1::<Blake2Hasher>::trie_root(entries),
	}
}

/// Every key/value pair whose value is present in the proof of `root`.
pub fn decode_proof(
	root: &H256,
	nodes: &[Vec<u8>],
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, ExecutorError> {
	let decoded = proof_decode::decode_and_verify_proof(proof_decode::Config::<Vec<u8>> {
		proof: nodes.to_vec().encode(),
	})
	.map_err(|e| ExecutorError::Trie(e.to_string()))?;

	let mut entries = BTreeMap::new();
	for (key, entry) in decoded.iter_ordered() {
		if key.trie_root_hash != root.as_fixed_bytes() {
			continue;
		}
		if let StorageValue::Known { value, .. } = entry.trie_node_info.storage_value {
			entries.insert(nibbles_to_bytes_suffix_extend(key.key).collect(), value.to_vec());
		}
	}
	Ok(entries)
}

/// Apply `updates` to the trie proven by `nodes` and return the new root with a proof
/// covering the same keys. `None` removes a key.
///
/// Every updated key must be reachable through `nodes`.
pub fn create_proof<I>(
	root: &H256,
	nodes: &[Vec<u8>],
	updates: I,
) -> Result<(H256, Vec<Vec<u8>>), ExecutorError>
where
	I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
{
	let mut db: MemoryDB<Blake2Hasher> =
		StorageProof::new(nodes.iter().cloned()).into_memory_db();
	let mut root = TrieHash::<Layout>::from_slice(root.as_bytes());

	{
		let mut trie = TrieDBMutBuilder::<Layout>::from_existing(&mut db, &mut root).build();
		for (key, value) in updates {
			match value {
				Some(value) => trie.insert(&key, &value).map(drop),
				None => trie.remove(&key).map(drop),
			}
			.map_err(|e| ExecutorError::Trie(format!("{e:?}")))?;
		}
		trie.commit();
	}

	// Nodes replaced by the update drop to a zero reference count.
	let nodes: BTreeSet<Vec<u8>> = db
		.drain()
		.into_values()
		.filter_map(|(node, rc)| (rc > 0).then_some(node))
		.collect();
	Ok((H256::from_slice(root.as_ref()), nodes.into_iter().collect()))
}

/// Read a single value from a proof.
pub fn read_from_proof(
	root: &H256,
	nodes: &[Vec<u8>],
	key: &[u8],
) -> Result<Option<Vec<u8>>, ExecutorError> {
	let db: MemoryDB<Blake2Hasher> = StorageProof::new(nodes.iter().cloned()).into_memory_db();
	let root = TrieHash::<Layout>::from_slice(root.as_bytes());
	if !db.contains(&root, sp_trie::EMPTY_PREFIX) {
		return Err(ExecutorError::Trie(format!("root {root:?} is not part of the proof")));
	}
	let trie = TrieDBBuilder::<Layout>::new(&db, &root).build();
	trie.get(key).map_err(|e| ExecutorError::Trie(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entries() -> Vec<(Vec<u8>, Vec<u8>)> {
		vec![
			(b"alpha".to_vec(), vec![1; 40]),
			(b"beta".to_vec(), vec![2; 40]),
			(b"gamma".to_vec(), vec![3]),
		]
	}

	/// Build a full trie and return its root and all of its nodes.
	fn full_proof() -> (H256, Vec<Vec<u8>>) {
		let mut db = MemoryDB::<Blake2Hasher>::default();
		let mut root = TrieHash::<Layout>::default();
		{
			let mut trie = TrieDBMutBuilder::<Layout>::new(&mut db, &mut root).build();
			for (k, v) in entries() {
				trie.insert(&k, &v).unwrap();
			}
		}
		let nodes = db.drain().into_values().filter(|(_, rc)| *rc > 0).map(|(n, _)| n).collect();
		(H256::from_slice(root.as_ref()), nodes)
	}

	#[test]
	fn state_root_matches_trie_builder() {
		let (root, _) = full_proof();
		assert_eq!(calculate_state_root(entries(), StateVersion::V1), root);
	}

	#[test]
	fn state_root_depends_on_version_for_large_values() {
		let v0 = calculate_state_root(entries(), StateVersion::V0);
		let v1 = calculate_state_root(entries(), StateVersion::V1);
		assert_ne!(v0, v1);
		assert_eq!(StateVersion::from(0), StateVersion::V0);
	}

	#[test]
	fn empty_state_root_is_stable() {
		let a = calculate_state_root(Vec::new(), StateVersion::V1);
		let b = calculate_state_root(Vec::new(), StateVersion::V1);
		assert_eq!(a, b);
	}

	#[test]
	fn decode_proof_returns_all_entries() {
		let (root, nodes) = full_proof();
		let decoded = decode_proof(&root, &nodes).unwrap();
		assert_eq!(decoded, entries().into_iter().collect::<BTreeMap<_, _>>());
	}

	#[test]
	fn read_from_proof_finds_values() {
		let (root, nodes) = full_proof();
		assert_eq!(read_from_proof(&root, &nodes, b"gamma").unwrap(), Some(vec![3]));
		assert_eq!(read_from_proof(&root, &nodes, b"delta").unwrap(), None);
		assert!(read_from_proof(&H256::repeat_byte(9), &nodes, b"gamma").is_err());
	}

	#[test]
	fn create_proof_updates_root_and_values() {
		let (root, nodes) = full_proof();
		let (new_root, new_nodes) = create_proof(
			&root,
			&nodes,
			vec![(b"gamma".to_vec(), Some(vec![4])), (b"beta".to_vec(), None)],
		)
		.unwrap();

		let mut expected = entries();
		expected.retain(|(k, _)| k != b"beta");
		expected[1].1 = vec![4];
		assert_eq!(new_root, calculate_state_root(expected, StateVersion::V1));
		assert_eq!(read_from_proof(&new_root, &new_nodes, b"gamma").unwrap(), Some(vec![4]));
		assert_eq!(read_from_proof(&new_root, &new_nodes, b"beta").unwrap(), None);
		assert_eq!(read_from_proof(&new_root, &new_nodes, b"alpha").unwrap(), Some(vec![1; 40]));
	}
}
