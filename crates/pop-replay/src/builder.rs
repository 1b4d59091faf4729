// SPDX-License-Identifier: GPL-3.0

//! Block builder for constructing new blocks on a forked chain.
//!
//! # Architecture
//!
//! The block building process follows these phases:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Block Building Flow                        │
//! │                                                                 │
//! │   1. new()          Create builder on a layer above the parent  │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   2. initialize()   Call Core_initialize_block                  │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   3. apply_inherents()  Apply inherent extrinsics               │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   4. apply_extrinsic()  Apply user extrinsics (repeatable)      │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   5. finalize()     Call BlockBuilder_finalize_block            │
//! │                     Returns new Block                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All calls run against one evolving layer pushed on top of the parent's state. The
//! parent never sees the changes: they become the new block's layer only once
//! `BlockBuilder_finalize_block` succeeds.
//!
//! [`build_block`] runs the whole flow for a set of [`BuildParams`].

use crate::{
	block::{Block, BlockOrigin},
	error::BlockBuilderError,
	executor::CallOutcome,
	inherent::{InherentProvider, relay as relay_inherent, slot},
	relay::{self, DownwardMessage, HorizontalMessage},
	rpc::Header,
	storage::{StorageLayer, StorageProvider},
	strings::builder::runtime_api,
	validity::{ApplyOutcome, TransactionValidityError},
};
use scale::{Decode, Encode};
use std::{collections::BTreeMap, sync::Arc};
use subxt::config::substrate::{Digest, DigestItem, H256};

/// Phase of the block building process.
///
/// `Created` → `Initialized` → `InherentsApplied` → (extrinsics) → finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderPhase {
	/// Builder created, `initialize()` not yet called.
	#[default]
	Created,
	/// Block initialized via `Core_initialize_block`, ready for inherents.
	Initialized,
	/// Inherents applied, ready for user extrinsics and finalization.
	InherentsApplied,
}

/// Inputs of a single block build.
#[derive(Debug, Clone, Default)]
pub struct BuildParams {
	/// Signed transactions, in submission order.
	pub transactions: Vec<Vec<u8>>,
	/// Messages from the relay chain to this parachain.
	pub downward_messages: Vec<DownwardMessage>,
	/// Messages from parachains to this relay chain, by sending para id.
	pub upward_messages: BTreeMap<u32, Vec<Vec<u8>>>,
	/// Messages from other parachains to this parachain, by sending para id.
	pub horizontal_messages: BTreeMap<u32, Vec<HorizontalMessage>>,
	/// Build at this height instead of the parent's height plus one.
	pub unsafe_block_height: Option<u32>,
}

impl BuildParams {
	/// Whether there is nothing to put in a block besides inherents.
	pub fn is_empty(&self) -> bool {
		self.transactions.is_empty() &&
			self.downward_messages.is_empty() &&
			self.upward_messages.values().all(Vec::is_empty) &&
			self.horizontal_messages.values().all(Vec::is_empty)
	}
}

/// Builder for a child block of `parent`.
pub struct BlockBuilder {
	parent: Arc<Block>,
	layer: Arc<StorageLayer>,
	code: Arc<[u8]>,
	header: Header,
	extrinsics: Vec<Vec<u8>>,
	phase: BuilderPhase,
}

impl BlockBuilder {
	/// Create a builder for a block with `header` on top of `parent`.
	pub async fn new(parent: Arc<Block>, header: Header) -> Result<Self, BlockBuilderError> {
		let code = parent.runtime_code().await?;
		let layer = parent.storage().push();
		Ok(Self {
			parent,
			layer,
			code,
			header,
			extrinsics: Vec::new(),
			phase: BuilderPhase::Created,
		})
	}

	/// Extrinsics applied so far, inherents first.
	pub fn extrinsics(&self) -> &[Vec<u8>] {
		&self.extrinsics
	}

	pub fn phase(&self) -> BuilderPhase {
		self.phase
	}

	pub fn parent(&self) -> &Arc<Block> {
		&self.parent
	}

	/// Write `entries` into the block's state before or between runtime calls.
	pub fn set_storage(&self, entries: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>) {
		self.layer.set_all(entries);
	}

	/// Read a value as the block under construction sees it.
	pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockBuilderError> {
		Ok(self.layer.get(key).await?)
	}

	/// Initialize the block by calling `Core_initialize_block`.
	pub async fn initialize(&mut self) -> Result<CallOutcome, BlockBuilderError> {
		if self.phase != BuilderPhase::Created {
			return Err(BlockBuilderError::AlreadyInitialized);
		}
		let outcome = self.call(runtime_api::CORE_INITIALIZE_BLOCK, &self.header.encode()).await?;
		self.layer.set_all(outcome.changes());
		self.phase = BuilderPhase::Initialized;
		Ok(outcome)
	}

	/// Collect inherents from `providers`, in order, and apply them. Returns how many
	/// were applied.
	///
	/// A failing provider or an inherent rejected by the runtime aborts the build.
	pub async fn apply_inherents(
		&mut self,
		providers: &[Box<dyn InherentProvider>],
		params: &BuildParams,
	) -> Result<usize, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::InherentsApplied =>
				return Err(BlockBuilderError::InherentsAlreadyApplied),
			BuilderPhase::Initialized => {},
		}

		let mut applied = 0;
		for provider in providers {
			let inherents = provider.provide(&self.parent, params).await?;
			log::trace!("{} provided {} inherent(s)", provider.identifier(), inherents.len());
			for inherent in inherents {
				let (outcome, changes) = self.call_apply_extrinsic(&inherent).await?;
				match outcome {
					ApplyOutcome::Rejected(e) =>
						return Err(BlockBuilderError::InherentRejected(format!(
							"{}: {e:?}",
							provider.identifier()
						))),
					ApplyOutcome::DispatchFailed(error) => log::warn!(
						"Inherent from {} failed to dispatch: 0x{}",
						provider.identifier(),
						hex::encode(error)
					),
					ApplyOutcome::Success => {},
				}
				self.layer.set_all(changes);
				self.extrinsics.push(inherent);
				applied += 1;
			}
		}

		self.phase = BuilderPhase::InherentsApplied;
		Ok(applied)
	}

	/// Apply a user extrinsic.
	///
	/// Included extrinsics, successful or not, keep their changes. A rejected extrinsic
	/// leaves the block untouched.
	pub async fn apply_extrinsic(
		&mut self,
		extrinsic: Vec<u8>,
	) -> Result<ApplyOutcome, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::Initialized => return Err(BlockBuilderError::InherentsNotApplied),
			BuilderPhase::InherentsApplied => {},
		}

		let (outcome, changes) = self.call_apply_extrinsic(&extrinsic).await?;
		if outcome.is_included() {
			self.layer.set_all(changes);
			self.extrinsics.push(extrinsic);
		}
		Ok(outcome)
	}

	/// Finalize the block by calling `BlockBuilder_finalize_block`.
	pub async fn finalize(self, origin: BlockOrigin) -> Result<Block, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::Initialized => return Err(BlockBuilderError::InherentsNotApplied),
			BuilderPhase::InherentsApplied => {},
		}

		if let Some((key, value)) = relay_inherent::included_entry(&self.parent).await {
			self.layer.set(&key, Some(&value));
		}

		let outcome = self.call(runtime_api::BLOCK_BUILDER_FINALIZE_BLOCK, &[]).await?;
		self.layer.set_all(outcome.changes());
		let header = Header::decode(&mut outcome.result.as_slice())
			.map_err(|e| BlockBuilderError::Codec(format!("finalized header: {e}")))?;

		let block =
			Block::child(&self.parent, header, self.extrinsics, self.layer.changes(), origin);
		log::debug!("Built block #{} ({:?}) on {:?}", block.number, block.hash, self.parent.hash);
		Ok(block)
	}

	async fn call_apply_extrinsic(
		&self,
		extrinsic: &[u8],
	) -> Result<(ApplyOutcome, Vec<(Vec<u8>, Option<Vec<u8>>)>), BlockBuilderError> {
		let outcome = self.call(runtime_api::BLOCK_BUILDER_APPLY_EXTRINSIC, extrinsic).await?;
		let result = ApplyOutcome::decode(&outcome.result)
			.map_err(|e| BlockBuilderError::Codec(format!("apply extrinsic result: {e}")))?;
		Ok((result, outcome.changes().collect()))
	}

	async fn call(&self, method: &str, args: &[u8]) -> Result<CallOutcome, BlockBuilderError> {
		let storage: Arc<dyn StorageProvider> = self.layer.clone();
		Ok(self.parent.executor().call(&self.code, method, args, storage).await?)
	}
}

/// Header for a child of `parent` at `number`, before the runtime fills in the roots.
pub fn create_next_header(parent: &Block, number: u32, digest: Vec<DigestItem>) -> Header {
	Header {
		parent_hash: parent.hash,
		number,
		state_root: H256::zero(),
		extrinsics_root: H256::zero(),
		digest: Digest { logs: digest },
	}
}

/// A transaction the runtime refused during a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedExtrinsic {
	pub extrinsic: Vec<u8>,
	pub error: TransactionValidityError,
}

/// Result of [`build_block`].
#[derive(Debug)]
pub struct BuildOutcome {
	pub block: Block,
	/// Transactions included in the block, in order.
	pub included: Vec<Vec<u8>>,
	/// Transactions dropped from the block.
	pub rejected: Vec<RejectedExtrinsic>,
}

/// Build a child of `parent` from `params`.
///
/// Pending upward messages are written into the relay chain's message queue before
/// the block is initialized. Rejected transactions are dropped and reported. Every
/// other failure aborts the build without touching `parent`.
pub async fn build_block(
	parent: Arc<Block>,
	providers: &[Box<dyn InherentProvider>],
	params: &BuildParams,
) -> Result<BuildOutcome, BlockBuilderError> {
	let number = params.unsafe_block_height.unwrap_or(parent.number.saturating_add(1));
	let origin =
		if params.unsafe_block_height.is_some() { BlockOrigin::Unsafe } else { BlockOrigin::Local };
	let digest = slot::next_slot_digest(&parent).await?.into_iter().collect();
	let header = create_next_header(&parent, number, digest);

	let mut builder = BlockBuilder::new(parent, header).await?;
	if params.upward_messages.values().any(|m| !m.is_empty()) {
		let entries = relay::upward_message_entries(&builder, &params.upward_messages).await?;
		builder.set_storage(entries);
	}
	builder.initialize().await?;
	builder.apply_inherents(providers, params).await?;

	let mut included = Vec::new();
	let mut rejected = Vec::new();
	for extrinsic in &params.transactions {
		match builder.apply_extrinsic(extrinsic.clone()).await? {
			ApplyOutcome::Rejected(error) => {
				log::warn!("Dropping extrinsic 0x{}: {error:?}", hex::encode(extrinsic));
				rejected.push(RejectedExtrinsic { extrinsic: extrinsic.clone(), error });
			},
			ApplyOutcome::DispatchFailed(error) => {
				log::debug!("Extrinsic dispatch failed: 0x{}", hex::encode(error));
				included.push(extrinsic.clone());
			},
			ApplyOutcome::Success => included.push(extrinsic.clone()),
		}
	}

	let block = builder.finalize(origin).await?;
	Ok(BuildOutcome { block, included, rejected })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		inherent::encode_bare_extrinsic,
		testing::{MockCall, TestChain, mock_extrinsic},
		validity::InvalidTransaction,
	};
	use async_trait::async_trait;

	/// Provides a fixed list of extrinsics.
	struct FixedInherent(Vec<Vec<u8>>);

	#[async_trait]
	impl InherentProvider for FixedInherent {
		fn identifier(&self) -> &'static str {
			"Fixed"
		}

		async fn provide(
			&self,
			_parent: &Block,
			_params: &BuildParams,
		) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
			Ok(self.0.clone())
		}
	}

	async fn new_builder(chain: &TestChain) -> BlockBuilder {
		let parent = chain.fork_block().await;
		let header = create_next_header(&parent, parent.number + 1, vec![]);
		BlockBuilder::new(parent, header).await.unwrap()
	}

	async fn ready_builder(chain: &TestChain) -> BlockBuilder {
		let mut builder = new_builder(chain).await;
		builder.initialize().await.unwrap();
		builder.apply_inherents(&[], &BuildParams::default()).await.unwrap();
		builder
	}

	fn set(key: &[u8], value: &[u8]) -> Vec<u8> {
		mock_extrinsic(MockCall::Set { key: key.to_vec(), value: value.to_vec() })
	}

	#[tokio::test]
	async fn phases_are_enforced() {
		let chain = TestChain::new().await;
		let mut builder = new_builder(&chain).await;

		assert!(matches!(
			builder.apply_inherents(&[], &BuildParams::default()).await,
			Err(BlockBuilderError::NotInitialized)
		));
		assert!(matches!(
			builder.apply_extrinsic(vec![]).await,
			Err(BlockBuilderError::NotInitialized)
		));

		builder.initialize().await.unwrap();
		assert!(matches!(builder.initialize().await, Err(BlockBuilderError::AlreadyInitialized)));
		assert!(matches!(
			builder.apply_extrinsic(vec![]).await,
			Err(BlockBuilderError::InherentsNotApplied)
		));

		builder.apply_inherents(&[], &BuildParams::default()).await.unwrap();
		assert_eq!(builder.phase(), BuilderPhase::InherentsApplied);
		assert!(matches!(
			builder.apply_inherents(&[], &BuildParams::default()).await,
			Err(BlockBuilderError::InherentsAlreadyApplied)
		));
	}

	#[tokio::test]
	async fn finalize_before_inherents_fails() {
		let chain = TestChain::new().await;
		let mut builder = new_builder(&chain).await;
		builder.initialize().await.unwrap();
		assert!(matches!(
			builder.finalize(BlockOrigin::Local).await,
			Err(BlockBuilderError::InherentsNotApplied)
		));
	}

	#[tokio::test]
	async fn rejected_extrinsic_leaves_state_untouched() {
		let chain = TestChain::new().await;
		let mut builder = ready_builder(&chain).await;

		let outcome = builder.apply_extrinsic(mock_extrinsic(MockCall::Invalid)).await.unwrap();
		assert_eq!(
			outcome,
			ApplyOutcome::Rejected(TransactionValidityError::Invalid(InvalidTransaction::BadProof))
		);
		assert!(builder.extrinsics().is_empty());

		assert_eq!(builder.apply_extrinsic(set(b"k", b"v")).await.unwrap(), ApplyOutcome::Success);
		assert_eq!(builder.get(b"k").await.unwrap(), Some(b"v".to_vec()));
		assert_eq!(builder.extrinsics().len(), 1);
	}

	#[tokio::test]
	async fn dispatch_failure_is_included() {
		let chain = TestChain::new().await;
		let mut builder = ready_builder(&chain).await;

		let outcome = builder.apply_extrinsic(mock_extrinsic(MockCall::Fail)).await.unwrap();
		assert!(matches!(outcome, ApplyOutcome::DispatchFailed(_)));
		assert_eq!(builder.extrinsics().len(), 1);
	}

	#[tokio::test]
	async fn inherents_come_first() {
		let chain = TestChain::new().await;
		let mut builder = new_builder(&chain).await;
		builder.initialize().await.unwrap();
		let inherent = set(b"i", &[1]);
		let providers: Vec<Box<dyn InherentProvider>> =
			vec![Box::new(FixedInherent(vec![inherent.clone()]))];

		assert_eq!(builder.apply_inherents(&providers, &BuildParams::default()).await.unwrap(), 1);
		builder.apply_extrinsic(set(b"t", &[2])).await.unwrap();
		assert_eq!(builder.extrinsics()[0], inherent);
	}

	#[tokio::test]
	async fn rejected_inherent_aborts() {
		let chain = TestChain::new().await;
		let mut builder = new_builder(&chain).await;
		builder.initialize().await.unwrap();
		let providers: Vec<Box<dyn InherentProvider>> =
			vec![Box::new(FixedInherent(vec![encode_bare_extrinsic(&[0xaa])]))];

		assert!(matches!(
			builder.apply_inherents(&providers, &BuildParams::default()).await,
			Err(BlockBuilderError::InherentRejected(_))
		));
	}

	#[tokio::test]
	async fn finalize_produces_child_block() {
		let chain = TestChain::new().await;
		let mut builder = ready_builder(&chain).await;
		let parent = builder.parent().clone();
		let tx = set(b"k", b"v");
		builder.apply_extrinsic(tx.clone()).await.unwrap();

		let block = builder.finalize(BlockOrigin::Local).await.unwrap();
		assert_eq!(block.number, parent.number + 1);
		assert_eq!(block.parent_hash, parent.hash);
		assert_eq!(block.extrinsics().await.unwrap(), vec![tx]);
		assert_eq!(block.get(b"k").await.unwrap(), Some(b"v".to_vec()));
		assert_eq!(parent.get(b"k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn build_block_reports_rejected_transactions() {
		let chain = TestChain::new().await;
		let parent = chain.fork_block().await;
		let good = set(b"a", &[1]);
		let bad = mock_extrinsic(MockCall::Invalid);
		let params =
			BuildParams { transactions: vec![bad.clone(), good.clone()], ..Default::default() };

		let outcome = build_block(parent.clone(), &[], &params).await.unwrap();
		assert_eq!(outcome.included, vec![good]);
		assert_eq!(outcome.rejected.len(), 1);
		assert_eq!(outcome.rejected[0].extrinsic, bad);
		assert_eq!(outcome.block.number, parent.number + 1);
		assert_eq!(outcome.block.origin(), BlockOrigin::Local);
	}

	#[tokio::test]
	async fn build_block_is_deterministic() {
		let chain = TestChain::new().await;
		let parent = chain.fork_block().await;
		let params = BuildParams { transactions: vec![set(b"a", &[1])], ..Default::default() };

		let first = build_block(parent.clone(), &[], &params).await.unwrap();
		let second = build_block(parent.clone(), &[], &params).await.unwrap();
		assert_eq!(first.block.hash, second.block.hash);

		let empty = build_block(parent, &[], &BuildParams::default()).await.unwrap();
		assert_ne!(first.block.hash, empty.block.hash);
	}

	#[tokio::test]
	async fn unsafe_height_is_flagged() {
		let chain = TestChain::new().await;
		let parent = chain.fork_block().await;
		let params =
			BuildParams { unsafe_block_height: Some(parent.number + 10), ..Default::default() };

		let outcome = build_block(parent.clone(), &[], &params).await.unwrap();
		assert_eq!(outcome.block.number, parent.number + 10);
		assert!(outcome.block.is_unsafe());
	}

	#[test]
	fn build_params_emptiness_ignores_empty_queues() {
		let mut params = BuildParams::default();
		params.upward_messages.insert(2000, vec![]);
		assert!(params.is_empty());
		params.transactions.push(vec![1]);
		assert!(!params.is_empty());
	}
}
