// SPDX-License-Identifier: GPL-3.0

//! Cache of contiguous storage key ranges.
//!
//! Paging through a map with `state_getKeysPaged` is the most expensive remote
//! operation a fork performs. Every page the remote returns is a contiguous,
//! ordered run of keys: nothing exists between two consecutive keys of a page.
//! [`KeyRangeCache`] remembers those runs per storage prefix (pallet hash plus
//! item hash) so later iterations over the same span are answered locally.
//!
//! Runs of one prefix never overlap. Feeding a run that intersects cached runs
//! replaces the intersected span with the new run and keeps what lies outside it,
//! so a run bridging two cached runs merges them into one. Runs that merely touch
//! without sharing a key stay separate.

use std::collections::HashMap;

/// Length of the prefix ranges are grouped by: `twox128(pallet) ++ twox128(item)`.
pub const DEFAULT_PREFIX_LENGTH: usize = 32;

/// Known contiguous key runs, grouped by prefix.
#[derive(Debug)]
pub struct KeyRangeCache {
	prefix_length: usize,
	/// Sorted, pairwise disjoint runs per prefix. Each run holds at least one key.
	runs: HashMap<Vec<u8>, Vec<Vec<Vec<u8>>>>,
}

impl Default for KeyRangeCache {
	fn default() -> Self {
		Self::new(DEFAULT_PREFIX_LENGTH)
	}
}

impl KeyRangeCache {
	/// Create an empty cache grouping keys by `prefix_length` leading bytes.
	pub fn new(prefix_length: usize) -> Self {
		Self { prefix_length, runs: HashMap::new() }
	}

	/// Length of the grouping prefix.
	pub fn prefix_length(&self) -> usize {
		self.prefix_length
	}

	/// Ingest an ordered page of keys as returned by the remote.
	///
	/// Keys shorter than the prefix length are ignored. A page spanning several
	/// prefixes is split into one run per prefix.
	pub fn feed(&mut self, keys: &[Vec<u8>]) {
		let mut groups: Vec<(Vec<u8>, Vec<Vec<u8>>)> = Vec::new();
		for key in keys.iter().filter(|k| k.len() >= self.prefix_length) {
			let prefix = &key[..self.prefix_length];
			match groups.last_mut() {
				Some((p, run)) if p.as_slice() == prefix => run.push(key.clone()),
				_ => groups.push((prefix.to_vec(), vec![key.clone()])),
			}
		}
		for (prefix, mut run) in groups {
			run.sort();
			run.dedup();
			self.merge(prefix, run);
		}
	}

	fn merge(&mut self, prefix: Vec<u8>, run: Vec<Vec<u8>>) {
		let (Some(low), Some(high)) = (run.first().cloned(), run.last().cloned()) else {
			return;
		};
		let existing = self.runs.entry(prefix).or_default();
		let mut below = Vec::new();
		let mut above = Vec::new();
		let mut kept = Vec::with_capacity(existing.len() + 1);
		for current in existing.drain(..) {
			let (Some(first), Some(last)) = (current.first(), current.last()) else {
				continue;
			};
			if *last < low || *first > high {
				kept.push(current);
				continue;
			}
			below.extend(current.iter().filter(|k| **k < low).cloned());
			above.extend(current.iter().filter(|k| **k > high).cloned());
		}
		below.extend(run);
		below.extend(above);
		kept.push(below);
		kept.sort_by(|a, b| a.first().cmp(&b.first()));
		*existing = kept;
	}

	/// The key immediately after `key`, if cached runs determine it.
	///
	/// Returns `None` when the answer is unknown: `key` lies outside every cached
	/// run of its prefix or is the last key of a run.
	pub fn next(&self, key: &[u8]) -> Option<Vec<u8>> {
		if key.len() < self.prefix_length {
			return None;
		}
		let runs = self.runs.get(&key[..self.prefix_length])?;
		let index = runs.partition_point(|run| run.first().is_some_and(|first| first.as_slice() <= key));
		let run = runs.get(index.checked_sub(1)?)?;
		let position = match run.binary_search_by(|k| k.as_slice().cmp(key)) {
			Ok(i) => i + 1,
			Err(i) if i < run.len() => i,
			Err(_) => return None,
		};
		run.get(position).cloned()
	}

	/// Forget every cached run.
	pub fn clear(&mut self) {
		self.runs.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(prefix: u8, suffix: u8) -> Vec<u8> {
		let mut k = vec![prefix; DEFAULT_PREFIX_LENGTH];
		k.push(suffix);
		k
	}

	fn keys(prefix: u8, suffixes: &[u8]) -> Vec<Vec<u8>> {
		suffixes.iter().map(|s| key(prefix, *s)).collect()
	}

	#[test]
	fn next_within_a_run() {
		let mut cache = KeyRangeCache::default();
		cache.feed(&keys(1, &[1, 3, 5]));

		assert_eq!(cache.next(&key(1, 1)), Some(key(1, 3)));
		assert_eq!(cache.next(&key(1, 3)), Some(key(1, 5)));
		// Between two cached keys of one run the successor is still known.
		assert_eq!(cache.next(&key(1, 2)), Some(key(1, 3)));
		// End of a run and outside any run are unknown.
		assert_eq!(cache.next(&key(1, 5)), None);
		assert_eq!(cache.next(&key(1, 0)), None);
		assert_eq!(cache.next(&key(1, 9)), None);
		assert_eq!(cache.next(&key(2, 1)), None);
	}

	#[test]
	fn feeding_the_same_page_twice_is_idempotent() {
		let mut cache = KeyRangeCache::default();
		cache.feed(&keys(1, &[1, 3, 5]));
		let before = cache.runs.clone();
		cache.feed(&keys(1, &[1, 3, 5]));
		assert_eq!(cache.runs, before);
	}

	#[test]
	fn overlapping_feed_supersedes_overlapped_span() {
		let mut cache = KeyRangeCache::default();
		cache.feed(&keys(1, &[1, 3, 5, 7]));
		// Key 5 no longer exists between 4 and 6.
		cache.feed(&keys(1, &[4, 6]));

		let runs = &cache.runs[&vec![1u8; DEFAULT_PREFIX_LENGTH]];
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0], keys(1, &[1, 3, 4, 6, 7]));
		assert_eq!(cache.next(&key(1, 4)), Some(key(1, 6)));
	}

	#[test]
	fn bridging_feed_merges_ranges() {
		let mut cache = KeyRangeCache::default();
		cache.feed(&keys(1, &[1, 2]));
		cache.feed(&keys(1, &[8, 9]));
		assert_eq!(cache.runs[&vec![1u8; DEFAULT_PREFIX_LENGTH]].len(), 2);
		assert_eq!(cache.next(&key(1, 2)), None);

		cache.feed(&keys(1, &[2, 5, 8]));
		let runs = &cache.runs[&vec![1u8; DEFAULT_PREFIX_LENGTH]];
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0], keys(1, &[1, 2, 5, 8, 9]));
		assert_eq!(cache.next(&key(1, 2)), Some(key(1, 5)));
		assert_eq!(cache.next(&key(1, 8)), Some(key(1, 9)));
	}

	#[test]
	fn touching_ranges_stay_separate() {
		let mut cache = KeyRangeCache::default();
		cache.feed(&keys(1, &[1, 2]));
		cache.feed(&keys(1, &[3, 4]));
		assert_eq!(cache.runs[&vec![1u8; DEFAULT_PREFIX_LENGTH]].len(), 2);
		assert_eq!(cache.next(&key(1, 2)), None);
	}

	#[test]
	fn pages_spanning_prefixes_are_split() {
		let mut cache = KeyRangeCache::default();
		let mut page = keys(1, &[7, 8]);
		page.extend(keys(2, &[0, 1]));
		page.push(vec![0u8; 4]);
		cache.feed(&page);

		assert_eq!(cache.next(&key(1, 7)), Some(key(1, 8)));
		// The page boundary between prefixes is not a known successor.
		assert_eq!(cache.next(&key(1, 8)), None);
		assert_eq!(cache.next(&key(2, 0)), Some(key(2, 1)));
		assert_eq!(cache.next(&[0u8; 4]), None);
	}
}
