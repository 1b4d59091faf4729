// SPDX-License-Identifier: GPL-3.0

//! Transaction pool and block production.
//!
//! The pool holds validated extrinsics and inbound cross-chain messages until a block
//! is built. When that happens depends on the [`BuildBlockMode`]:
//!
//! - `Batch`: a submission opens a batch window. The block is built once no submission
//!   arrived for [`BatchTiming::delay`], or [`BatchTiming::max_wait`] after the first
//!   one, whichever is earlier. Everything submitted in the window lands in one block.
//! - `Instant`: every submission gets a block of its own.
//! - `Manual`: blocks are only built on request through [`TxPool::build_blocks`].
//!
//! Builds are serialized per chain. An explicit request arriving while a build is in
//! flight waits in `Batch` mode and fails with [`TxPoolError::BuildInProgress`]
//! otherwise; builds triggered by submissions always wait.
//!
//! ```text
//!  submit ──► validate ──► pending ──► (mode) ──► build_block ──► register + set head
//!                 │                                    │
//!                 └─► Invalid / Unknown                └─► InBlock / Finalized / Invalid
//! ```

use crate::{
	block::Block,
	blockchain::Blockchain,
	builder::{BuildParams, build_block},
	error::{BlockchainError, TxPoolError},
	head_state::EventBus,
	relay::{DownwardMessage, HorizontalMessage},
	strings::{rpc::storage_keys, txpool::batch},
	validity::TransactionValidityError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
	collections::BTreeMap,
	sync::{Arc, Weak},
	time::Duration,
};
use subxt::config::substrate::H256;
use tokio::time::Instant;

/// When the pool turns pending work into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildBlockMode {
	/// Collect submissions for a short window, then build one block.
	#[default]
	#[serde(alias = "batch")]
	Batch,
	/// Build a block for every submission.
	#[serde(alias = "instant")]
	Instant,
	/// Only build when asked to.
	#[serde(alias = "manual")]
	Manual,
}

/// Timing of `Batch` mode builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTiming {
	/// Quiet period after the last submission.
	pub delay: Duration,
	/// Longest time the first submission of a batch waits.
	pub max_wait: Duration,
}

impl Default for BatchTiming {
	fn default() -> Self {
		Self {
			delay: Duration::from_millis(batch::DEFAULT_DELAY_MS),
			max_wait: Duration::from_millis(batch::DEFAULT_MAX_WAIT_MS),
		}
	}
}

/// Lifecycle of a submitted extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtrinsicStatus {
	/// Validated and queued.
	Ready,
	/// Handed to the (non-existent) network.
	Broadcast,
	/// Included in the block with this hash.
	InBlock(H256),
	/// The including block became final.
	Finalized(H256),
	/// Dropped by the runtime while building.
	Invalid(TransactionValidityError),
}

/// Status change of the extrinsic with `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtrinsicEvent {
	pub hash: H256,
	pub status: ExtrinsicStatus,
}

/// Parameters of an explicit block build.
#[derive(Debug, Clone, Default)]
pub struct NewBlockParams {
	/// Number of blocks to build. Defaults to one.
	pub count: Option<u32>,
	/// Build until the head reaches this height. Takes precedence over `count`.
	pub to: Option<u32>,
	/// Extra downward messages for the first block.
	pub dmp: Vec<DownwardMessage>,
	/// Extra upward messages for the first block, by sending para id.
	pub ump: BTreeMap<u32, Vec<Vec<u8>>>,
	/// Extra horizontal messages for the first block, by sending para id.
	pub hrmp: BTreeMap<u32, Vec<HorizontalMessage>>,
	/// Extrinsics appended after the pending ones in the first block.
	pub transactions: Vec<Vec<u8>>,
	/// Build the first block at this height.
	pub unsafe_block_height: Option<u32>,
}

/// Inbound messages waiting for the next block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMessages {
	pub downward: Vec<DownwardMessage>,
	/// By sending para id.
	pub upward: BTreeMap<u32, Vec<Vec<u8>>>,
	/// By sending para id.
	pub horizontal: BTreeMap<u32, Vec<HorizontalMessage>>,
}

impl PendingMessages {
	pub fn is_empty(&self) -> bool {
		self.downward.is_empty() &&
			self.upward.values().all(Vec::is_empty) &&
			self.horizontal.values().all(Vec::is_empty)
	}

	/// Remove the messages of `taken`, a snapshot of an earlier state of `self`.
	fn consume(&mut self, taken: &PendingMessages) {
		self.downward.drain(..taken.downward.len().min(self.downward.len()));
		consume_map(&mut self.upward, &taken.upward);
		consume_map(&mut self.horizontal, &taken.horizontal);
	}
}

fn consume_map<T>(queues: &mut BTreeMap<u32, Vec<T>>, taken: &BTreeMap<u32, Vec<T>>) {
	for (id, messages) in taken {
		if let Some(queue) = queues.get_mut(id) {
			queue.drain(..messages.len().min(queue.len()));
		}
	}
	queues.retain(|_, queue| !queue.is_empty());
}

fn merge_map<T>(into: &mut BTreeMap<u32, Vec<T>>, from: BTreeMap<u32, Vec<T>>) {
	for (id, messages) in from {
		into.entry(id).or_default().extend(messages);
	}
}

/// What a build takes from the pool.
#[derive(Debug, Clone)]
enum Selection {
	/// Every pending extrinsic and message.
	All,
	/// One extrinsic, if still pending.
	Extrinsic(Vec<u8>),
	/// Pending messages only.
	Messages,
}

#[derive(Debug, Clone, Copy)]
struct BatchWindow {
	first: Instant,
	last: Instant,
}

impl BatchWindow {
	fn deadline(&self, timing: BatchTiming) -> Instant {
		(self.last + timing.delay).min(self.first + timing.max_wait)
	}
}

#[derive(Default)]
struct PoolState {
	mode: BuildBlockMode,
	extrinsics: Vec<Vec<u8>>,
	messages: PendingMessages,
	batch: Option<BatchWindow>,
}

/// Pending extrinsics and messages of one chain.
pub struct TxPool {
	chain: Weak<Blockchain>,
	state: Mutex<PoolState>,
	timing: BatchTiming,
	building: tokio::sync::Mutex<()>,
	events: EventBus<ExtrinsicEvent>,
}

/// Hash identifying an extrinsic in the pool and in status events.
pub fn extrinsic_hash(extrinsic: &[u8]) -> H256 {
	H256(sp_core::blake2_256(extrinsic))
}

impl TxPool {
	pub fn new(chain: Weak<Blockchain>, mode: BuildBlockMode, timing: BatchTiming) -> Self {
		Self {
			chain,
			state: Mutex::new(PoolState { mode, ..Default::default() }),
			timing,
			building: tokio::sync::Mutex::new(()),
			events: EventBus::new(),
		}
	}

	pub fn mode(&self) -> BuildBlockMode {
		self.state.lock().mode
	}

	/// Switch the build mode. Pending work is kept; in `Instant` and `Batch` mode a build
	/// is scheduled for it.
	pub fn set_mode(&self, mode: BuildBlockMode) {
		let idle = {
			let mut state = self.state.lock();
			if state.mode == mode {
				return;
			}
			log::info!("Build block mode: {:?} -> {mode:?}", state.mode);
			state.mode = mode;
			state.extrinsics.is_empty() && state.messages.is_empty()
		};
		if !idle {
			self.schedule(Selection::All);
		}
	}

	/// Extrinsic lifecycle notifications.
	pub fn events(&self) -> &EventBus<ExtrinsicEvent> {
		&self.events
	}

	/// Pending extrinsics, in submission order.
	pub fn pending_extrinsics(&self) -> Vec<Vec<u8>> {
		self.state.lock().extrinsics.clone()
	}

	pub fn pending_messages(&self) -> PendingMessages {
		self.state.lock().messages.clone()
	}

	fn chain(&self) -> Result<Arc<Blockchain>, TxPoolError> {
		self.chain.upgrade().ok_or(TxPoolError::ChainDropped)
	}

	/// Validate `extrinsic` against the head and queue it. Returns its hash.
	///
	/// Submitting an extrinsic that is already pending returns the same hash without
	/// queueing it twice.
	pub async fn submit_extrinsic(&self, extrinsic: Vec<u8>) -> Result<H256, TxPoolError> {
		let chain = self.chain()?;
		let hash = extrinsic_hash(&extrinsic);
		if let Err(e) = chain.validate_extrinsic(&extrinsic).await? {
			log::debug!("Rejected extrinsic {hash:?}: {e:?}");
			return Err(e.into());
		}

		{
			let mut state = self.state.lock();
			if state.extrinsics.contains(&extrinsic) {
				return Ok(hash);
			}
			state.extrinsics.push(extrinsic.clone());
		}
		log::debug!("Extrinsic {hash:?} ready");
		self.events.publish(&ExtrinsicEvent { hash, status: ExtrinsicStatus::Ready });
		self.events.publish(&ExtrinsicEvent { hash, status: ExtrinsicStatus::Broadcast });
		self.schedule(Selection::Extrinsic(extrinsic));
		Ok(hash)
	}

	/// Queue messages from the relay chain.
	pub fn submit_downward_messages(
		&self,
		messages: Vec<DownwardMessage>,
	) -> Result<(), TxPoolError> {
		if messages.is_empty() {
			return Ok(());
		}
		self.state.lock().messages.downward.extend(messages);
		self.schedule(Selection::Messages);
		Ok(())
	}

	/// Queue messages sent upward by `para_id`.
	pub fn submit_upward_messages(
		&self,
		para_id: u32,
		messages: Vec<Vec<u8>>,
	) -> Result<(), TxPoolError> {
		if messages.is_empty() {
			return Ok(());
		}
		self.state.lock().messages.upward.entry(para_id).or_default().extend(messages);
		self.schedule(Selection::Messages);
		Ok(())
	}

	/// Queue messages sent by parachain `sender`.
	pub fn submit_horizontal_messages(
		&self,
		sender: u32,
		messages: Vec<HorizontalMessage>,
	) -> Result<(), TxPoolError> {
		if messages.is_empty() {
			return Ok(());
		}
		self.state.lock().messages.horizontal.entry(sender).or_default().extend(messages);
		self.schedule(Selection::Messages);
		Ok(())
	}

	/// Build blocks from the pending work and `params`. Returns the new head.
	pub async fn build_blocks(&self, params: NewBlockParams) -> Result<Arc<Block>, TxPoolError> {
		let chain = self.chain()?;
		let _guard = match self.mode() {
			BuildBlockMode::Batch => self.building.lock().await,
			BuildBlockMode::Instant | BuildBlockMode::Manual =>
				self.building.try_lock().map_err(|_| TxPoolError::BuildInProgress)?,
		};
		self.build_locked(&chain, params, Selection::All).await
	}

	fn schedule(&self, selection: Selection) {
		let mode = self.mode();
		if mode == BuildBlockMode::Manual {
			return;
		}
		let Some(chain) = self.chain.upgrade() else {
			return;
		};
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			log::warn!("No async runtime available, block build not scheduled");
			return;
		};

		match mode {
			BuildBlockMode::Instant => {
				runtime.spawn(async move {
					let pool = chain.txpool();
					let _guard = pool.building.lock().await;
					if let Err(e) =
						pool.build_locked(&chain, NewBlockParams::default(), selection).await
					{
						log::warn!("Instant block build failed: {e}");
					}
				});
			},
			BuildBlockMode::Batch => {
				let now = Instant::now();
				let open = {
					let mut state = self.state.lock();
					match &mut state.batch {
						Some(window) => {
							window.last = now;
							true
						},
						None => {
							state.batch = Some(BatchWindow { first: now, last: now });
							false
						},
					}
				};
				if !open {
					runtime.spawn(Self::run_batch(chain));
				}
			},
			BuildBlockMode::Manual => {},
		}
	}

	async fn run_batch(chain: Arc<Blockchain>) {
		let pool = chain.txpool();
		loop {
			let deadline = match pool.state.lock().batch {
				Some(window) => window.deadline(pool.timing),
				None => return,
			};
			if deadline > Instant::now() {
				tokio::time::sleep_until(deadline).await;
				continue;
			}
			pool.state.lock().batch = None;
			break;
		}

		let _guard = pool.building.lock().await;
		if pool.mode() != BuildBlockMode::Batch {
			return;
		}
		{
			let state = pool.state.lock();
			if state.extrinsics.is_empty() && state.messages.is_empty() {
				return;
			}
		}
		if let Err(e) = pool.build_locked(&chain, NewBlockParams::default(), Selection::All).await {
			log::warn!("Batch block build failed: {e}");
		}
	}

	/// Build with the build lock held.
	async fn build_locked(
		&self,
		chain: &Blockchain,
		params: NewBlockParams,
		selection: Selection,
	) -> Result<Arc<Block>, TxPoolError> {
		let head = chain.head();
		let count = match params.to {
			Some(to) if to <= head.number =>
				return Err(BlockchainError::InvalidTarget { target: to, head: head.number }.into()),
			Some(to) => to - head.number,
			None => params.count.unwrap_or(1).max(1),
		};
		if let Some(height) = params.unsafe_block_height &&
			height <= head.number
		{
			return Err(BlockchainError::InvalidTarget { target: height, head: head.number }.into());
		}

		let (extrinsics, messages) = {
			let state = self.state.lock();
			match &selection {
				Selection::All => (state.extrinsics.clone(), state.messages.clone()),
				Selection::Extrinsic(extrinsic) if state.extrinsics.contains(extrinsic) =>
					(vec![extrinsic.clone()], PendingMessages::default()),
				Selection::Extrinsic(_) => {
					log::trace!("Extrinsic already built, skipping");
					return Ok(head);
				},
				Selection::Messages if state.messages.is_empty() => return Ok(head),
				Selection::Messages => (Vec::new(), state.messages.clone()),
			}
		};

		let NewBlockParams { dmp, ump, hrmp, transactions, unsafe_block_height, .. } = params;
		let mut first = BuildParams {
			transactions: extrinsics,
			downward_messages: messages.downward.clone(),
			upward_messages: messages.upward.clone(),
			horizontal_messages: messages.horizontal.clone(),
			unsafe_block_height,
		};
		first.transactions.extend(transactions);
		first.downward_messages.extend(dmp);
		merge_map(&mut first.upward_messages, ump);
		merge_map(&mut first.horizontal_messages, hrmp);

		let mut parent = head;
		let mut pending = Some(first);
		for _ in 0..count {
			let build_params = pending.take();
			let is_first = build_params.is_some();
			let build_params = build_params.unwrap_or_default();

			let outcome = build_block(parent.clone(), chain.inherent_providers(), &build_params)
				.await
				.map_err(BlockchainError::from)?;
			let upgraded = outcome.block.storage_diff().contains_key(storage_keys::CODE);
			let block = Arc::new(outcome.block);
			chain.register_block(block.clone());
			chain.set_head(block.clone())?;
			if upgraded {
				chain.invalidate_runtime_caches();
			}

			if is_first {
				{
					let mut state = self.state.lock();
					state.extrinsics.retain(|e| {
						!outcome.included.contains(e) &&
							!outcome.rejected.iter().any(|r| &r.extrinsic == e)
					});
					state.messages.consume(&messages);
				}
				for extrinsic in &outcome.included {
					let hash = extrinsic_hash(extrinsic);
					self.events
						.publish(&ExtrinsicEvent { hash, status: ExtrinsicStatus::InBlock(block.hash) });
					self.events.publish(&ExtrinsicEvent {
						hash,
						status: ExtrinsicStatus::Finalized(block.hash),
					});
				}
				for rejected in &outcome.rejected {
					self.events.publish(&ExtrinsicEvent {
						hash: extrinsic_hash(&rejected.extrinsic),
						status: ExtrinsicStatus::Invalid(rejected.error),
					});
				}
			}
			log::info!(
				"Block #{} ({:?}) built with {} extrinsic(s)",
				block.number,
				block.hash,
				outcome.included.len()
			);
			parent = block;
		}
		Ok(parent)
	}
}
