// SPDX-License-Identifier: GPL-3.0

//! Cross-chain message relaying between forked chains.
//!
//! A [`MessageRelay`] connects one relay chain fork with any number of parachain forks
//! and moves messages between their transaction pools as blocks are produced:
//!
//! ```text
//!             Dmp::DownwardMessageQueues(para)
//!   relay ───────────────────────────────────────► para pool (downward)
//!
//!             ParachainSystem::UpwardMessages
//!   para  ───────────────────────────────────────► relay pool (upward)
//!
//!             ParachainSystem::HrmpOutboundMessages
//!   para  ───────────────────────────────────────► recipient pool (horizontal)
//! ```
//!
//! Messages are picked up through storage subscriptions on the sending chain's head.
//! Messages for a chain that is not attached yet are held until it is. A message is
//! delivered at most once per channel, identified by its content and sending height.
//! Each channel remembers a bounded number of recent sending heights; messages sent
//! below the oldest remembered height are treated as already delivered.
//!
//! Upward messages end up in the relay chain's `MessageQueue` pallet, written before
//! the block that receives them is initialized (see [`upward_message_entries`]).

use crate::{
	blockchain::Blockchain,
	builder::BlockBuilder,
	error::{BlockBuilderError, RelayError},
	executor::hex_bytes,
	head_state::StorageChange,
	storage::{storage_value_key, twox64_concat_key},
	strings::relay::{DELIVERED_HEIGHTS_PER_CHANNEL, dmp, message_queue, parachain_system},
};
use parking_lot::Mutex;
use scale::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Arc, Weak},
};

/// A message from the relay chain to a parachain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownwardMessage {
	/// Relay chain block number the message was sent at.
	pub sent_at: u32,
	#[serde(with = "hex_bytes")]
	pub msg: Vec<u8>,
}

/// A message from one parachain to another, routed through the relay chain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalMessage {
	/// Block number the message was sent at.
	pub sent_at: u32,
	#[serde(with = "hex_bytes")]
	pub data: Vec<u8>,
}

/// `polkadot_runtime_parachains::inclusion::AggregateMessageOrigin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum AggregateMessageOrigin {
	Ump(UmpQueueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum UmpQueueId {
	Para(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct Neighbours {
	prev: AggregateMessageOrigin,
	next: AggregateMessageOrigin,
}

/// `pallet_message_queue::BookState`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
struct BookState {
	begin: u32,
	end: u32,
	count: u32,
	ready_neighbours: Option<Neighbours>,
	message_count: u64,
	size: u64,
}

/// `pallet_message_queue::Page`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct Page {
	remaining: u32,
	remaining_size: u32,
	first_index: u32,
	first: u32,
	last: u32,
	heap: Vec<u8>,
}

impl Page {
	/// A page holding `messages`. Each item is `ItemHeader { len: u32, processed: bool }`
	/// followed by the payload.
	fn from_messages(messages: &[Vec<u8>]) -> Self {
		let mut heap = Vec::new();
		let mut last = 0;
		for message in messages {
			last = heap.len() as u32;
			heap.extend((message.len() as u32, false).encode());
			heap.extend_from_slice(message);
		}
		Self {
			remaining: messages.len() as u32,
			remaining_size: messages.iter().map(|m| m.len() as u32).sum(),
			first_index: 0,
			first: 0,
			last,
			heap,
		}
	}
}

fn book_state_key(origin: &AggregateMessageOrigin) -> Vec<u8> {
	twox64_concat_key(message_queue::PALLET, message_queue::BOOK_STATE_FOR, &origin.encode())
}

fn page_key(origin: &AggregateMessageOrigin, page: u32) -> Vec<u8> {
	let mut key = book_state_key(origin);
	key.splice(16..32, sp_core::twox_128(message_queue::PAGES));
	key.extend(sp_core::twox_64(&page.encode()));
	key.extend(page.encode());
	key
}

fn service_head_key() -> Vec<u8> {
	storage_value_key(message_queue::PALLET, message_queue::SERVICE_HEAD)
}

/// Storage writes enqueueing `upward` messages in the relay chain's `MessageQueue`, one
/// new page per sending parachain. Empty if the runtime has no `MessageQueue` pallet.
pub async fn upward_message_entries(
	builder: &BlockBuilder,
	upward: &BTreeMap<u32, Vec<Vec<u8>>>,
) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>, BlockBuilderError> {
	let name = String::from_utf8_lossy(message_queue::PALLET);
	match builder.parent().metadata().await {
		Ok(metadata) if metadata.pallet_by_name(&name).is_some() => {},
		Ok(_) => {
			log::warn!("Dropping upward messages: runtime has no {name} pallet");
			return Ok(Vec::new());
		},
		Err(e) => {
			log::debug!("No metadata to enqueue upward messages: {e}");
			return Ok(Vec::new());
		},
	}
	enqueue_upward(builder, upward).await
}

async fn enqueue_upward(
	builder: &BlockBuilder,
	upward: &BTreeMap<u32, Vec<Vec<u8>>>,
) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>, BlockBuilderError> {
	let mut books: BTreeMap<Vec<u8>, BookState> = BTreeMap::new();
	let mut writes = Vec::new();
	let mut service_head = read::<AggregateMessageOrigin>(builder, &service_head_key()).await?;

	for (para_id, messages) in upward.iter().filter(|(_, m)| !m.is_empty()) {
		let origin = AggregateMessageOrigin::Ump(UmpQueueId::Para(*para_id));
		let mut book = load_book(builder, &mut books, &origin).await?;

		let page_index = book.end;
		writes.push((page_key(&origin, page_index), Some(Page::from_messages(messages).encode())));
		book.end = book.end.saturating_add(1);
		book.count = book.count.saturating_add(1);
		book.message_count = book.message_count.saturating_add(messages.len() as u64);
		book.size = book.size.saturating_add(messages.iter().map(|m| m.len() as u64).sum());

		// Join the ready ring, just before the service head.
		if book.ready_neighbours.is_none() {
			match service_head {
				None => {
					book.ready_neighbours = Some(Neighbours { prev: origin, next: origin });
					service_head = Some(origin);
				},
				Some(head) => {
					let mut head_book = load_book(builder, &mut books, &head).await?;
					let prev = head_book.ready_neighbours.map(|n| n.prev).unwrap_or(head);
					book.ready_neighbours = Some(Neighbours { prev, next: head });
					if prev == head {
						head_book.ready_neighbours = Some(Neighbours { prev: origin, next: origin });
					} else {
						let mut prev_book = load_book(builder, &mut books, &prev).await?;
						if let Some(n) = prev_book.ready_neighbours.as_mut() {
							n.next = origin;
						}
						books.insert(book_state_key(&prev), prev_book);
						if let Some(n) = head_book.ready_neighbours.as_mut() {
							n.prev = origin;
						}
					}
					books.insert(book_state_key(&head), head_book);
				},
			}
		}
		log::debug!("Enqueued {} upward message(s) from para {para_id}", messages.len());
		books.insert(book_state_key(&origin), book);
	}

	writes.extend(books.into_iter().map(|(key, book)| (key, Some(book.encode()))));
	if let Some(head) = service_head {
		writes.push((service_head_key(), Some(head.encode())));
	}
	Ok(writes)
}

async fn load_book(
	builder: &BlockBuilder,
	books: &mut BTreeMap<Vec<u8>, BookState>,
	origin: &AggregateMessageOrigin,
) -> Result<BookState, BlockBuilderError> {
	let key = book_state_key(origin);
	if let Some(book) = books.get(&key) {
		return Ok(book.clone());
	}
	Ok(read::<BookState>(builder, &key).await?.unwrap_or_default())
}

async fn read<T: Decode>(builder: &BlockBuilder, key: &[u8]) -> Result<Option<T>, BlockBuilderError> {
	builder
		.get(key)
		.await?
		.map(|value| {
			T::decode(&mut value.as_slice()).map_err(|e| BlockBuilderError::Codec(e.to_string()))
		})
		.transpose()
}

/// `ParachainSystem::HrmpOutboundMessages` entry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct OutboundHrmpMessage {
	recipient: u32,
	data: Vec<u8>,
}

/// Storage key of the downward queue of `para_id` on the relay chain.
pub fn downward_queue_key(para_id: u32) -> Vec<u8> {
	twox64_concat_key(dmp::PALLET, dmp::DOWNWARD_MESSAGE_QUEUES, &para_id.encode())
}

/// Storage key of a parachain's outbound upward messages.
pub fn upward_messages_key() -> Vec<u8> {
	storage_value_key(parachain_system::PALLET, parachain_system::UPWARD_MESSAGES)
}

/// Storage key of a parachain's outbound horizontal messages.
pub fn hrmp_outbound_messages_key() -> Vec<u8> {
	storage_value_key(parachain_system::PALLET, parachain_system::HRMP_OUTBOUND_MESSAGES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
	Downward(u32),
	Upward(u32),
	Horizontal { sender: u32, recipient: u32 },
}

#[derive(Default)]
struct RelayState {
	relay: Option<Weak<Blockchain>>,
	paras: BTreeMap<u32, Weak<Blockchain>>,
	/// Downward messages for paras not attached yet.
	held_downward: BTreeMap<u32, Vec<DownwardMessage>>,
	/// Upward messages waiting for the relay chain, by sender.
	held_upward: BTreeMap<u32, Vec<Vec<u8>>>,
	/// Horizontal messages for paras not attached yet, by recipient and sender.
	held_horizontal: BTreeMap<u32, BTreeMap<u32, Vec<HorizontalMessage>>>,
	delivered: HashMap<Channel, Deliveries>,
}

/// Message hashes delivered on one channel, by sending height.
#[derive(Default)]
struct Deliveries {
	by_height: BTreeMap<u32, HashSet<[u8; 32]>>,
	/// Lowest height still remembered once older heights were dropped.
	floor: u32,
}

impl Deliveries {
	fn insert(&mut self, sent_at: u32, payload: &[u8]) -> bool {
		if sent_at < self.floor {
			return false;
		}
		let fresh =
			self.by_height.entry(sent_at).or_default().insert(sp_core::blake2_256(payload));
		while self.by_height.len() > DELIVERED_HEIGHTS_PER_CHANNEL {
			self.by_height.pop_first();
			if let Some((&lowest, _)) = self.by_height.first_key_value() {
				self.floor = lowest;
			}
		}
		fresh
	}
}

impl RelayState {
	/// Whether a message on `channel` is new, recording it as delivered.
	fn first_delivery(&mut self, channel: Channel, sent_at: u32, payload: &[u8]) -> bool {
		let fresh = self.delivered.entry(channel).or_default().insert(sent_at, payload);
		if !fresh {
			log::trace!("Skipping message on {channel:?} sent at #{sent_at}, already delivered");
		}
		fresh
	}

	fn para(&self, para_id: u32) -> Option<Arc<Blockchain>> {
		self.paras.get(&para_id).and_then(Weak::upgrade)
	}

	fn relay(&self) -> Option<Arc<Blockchain>> {
		self.relay.as_ref().and_then(Weak::upgrade)
	}
}

/// Routes messages between a relay chain fork and parachain forks.
#[derive(Clone, Default)]
pub struct MessageRelay {
	state: Arc<Mutex<RelayState>>,
}

impl MessageRelay {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach the relay chain. Held upward messages are delivered to it.
	pub fn attach_relay_chain(&self, relay: &Arc<Blockchain>) -> Result<(), RelayError> {
		let (paras, held) = {
			let mut state = self.state.lock();
			state.relay = Some(Arc::downgrade(relay));
			(state.paras.keys().copied().collect::<Vec<_>>(), std::mem::take(&mut state.held_upward))
		};
		for para_id in paras {
			self.watch_downward(relay, para_id);
		}
		for (para_id, messages) in held {
			relay.txpool().submit_upward_messages(para_id, messages)?;
		}
		log::info!("Attached relay chain {}", relay.name());
		Ok(())
	}

	/// Attach a parachain. Messages held for it are delivered.
	pub fn attach_parachain(&self, para: &Arc<Blockchain>) -> Result<(), RelayError> {
		let para_id = para.para_id().ok_or_else(|| RelayError::NotParachain(para.name().into()))?;
		let (relay, downward, horizontal) = {
			let mut state = self.state.lock();
			state.paras.insert(para_id, Arc::downgrade(para));
			(
				state.relay(),
				state.held_downward.remove(&para_id).unwrap_or_default(),
				state.held_horizontal.remove(&para_id).unwrap_or_default(),
			)
		};

		let router = self.clone();
		para.head_state().subscribe_storage(
			[upward_messages_key(), hrmp_outbound_messages_key()],
			move |change: &StorageChange| router.on_para_outbound(para_id, change),
		);
		if let Some(relay) = relay {
			self.watch_downward(&relay, para_id);
		}

		if !downward.is_empty() {
			para.txpool().submit_downward_messages(downward)?;
		}
		for (sender, messages) in horizontal {
			para.txpool().submit_horizontal_messages(sender, messages)?;
		}
		log::info!("Attached parachain {para_id} ({})", para.name());
		Ok(())
	}

	fn watch_downward(&self, relay: &Arc<Blockchain>, para_id: u32) {
		let router = self.clone();
		relay.head_state().subscribe_storage(
			[downward_queue_key(para_id)],
			move |change: &StorageChange| router.on_downward(para_id, change),
		);
	}

	fn on_downward(&self, para_id: u32, change: &StorageChange) {
		for (_, value) in &change.changes {
			let Some(value) = value else { continue };
			let messages = match Vec::<DownwardMessage>::decode(&mut value.as_slice()) {
				Ok(messages) => messages,
				Err(e) => {
					log::warn!("{}", RelayError::Decode { para_id, message: e.to_string() });
					continue;
				},
			};
			let (para, fresh) = {
				let mut state = self.state.lock();
				let fresh: Vec<_> = messages
					.into_iter()
					.filter(|m| state.first_delivery(Channel::Downward(para_id), m.sent_at, &m.msg))
					.collect();
				let para = state.para(para_id);
				if para.is_none() && !fresh.is_empty() {
					state.held_downward.entry(para_id).or_default().extend(fresh);
					continue;
				}
				(para, fresh)
			};
			if let Some(para) = para &&
				!fresh.is_empty()
			{
				log::debug!("Relaying {} downward message(s) to para {para_id}", fresh.len());
				if let Err(e) = para.txpool().submit_downward_messages(fresh) {
					log::warn!("Failed to deliver downward messages to para {para_id}: {e}");
				}
			}
		}
	}

	fn on_para_outbound(&self, para_id: u32, change: &StorageChange) {
		let sent_at = change.block.number;
		for (key, value) in &change.changes {
			let Some(value) = value else { continue };
			if *key == upward_messages_key() {
				match Vec::<Vec<u8>>::decode(&mut value.as_slice()) {
					Ok(messages) => self.route_upward(para_id, sent_at, messages),
					Err(e) =>
						log::warn!("{}", RelayError::Decode { para_id, message: e.to_string() }),
				}
			} else if *key == hrmp_outbound_messages_key() {
				match Vec::<OutboundHrmpMessage>::decode(&mut value.as_slice()) {
					Ok(messages) => self.route_horizontal(para_id, sent_at, messages),
					Err(e) =>
						log::warn!("{}", RelayError::Decode { para_id, message: e.to_string() }),
				}
			}
		}
	}

	fn route_upward(&self, para_id: u32, sent_at: u32, messages: Vec<Vec<u8>>) {
		let (relay, fresh) = {
			let mut state = self.state.lock();
			let fresh: Vec<_> = messages
				.into_iter()
				.filter(|m| state.first_delivery(Channel::Upward(para_id), sent_at, m))
				.collect();
			if fresh.is_empty() {
				return;
			}
			let Some(relay) = state.relay() else {
				state.held_upward.entry(para_id).or_default().extend(fresh);
				return;
			};
			(relay, fresh)
		};
		log::debug!("Relaying {} upward message(s) from para {para_id}", fresh.len());
		if let Err(e) = relay.txpool().submit_upward_messages(para_id, fresh) {
			log::warn!("Failed to deliver upward messages from para {para_id}: {e}");
		}
	}

	fn route_horizontal(&self, sender: u32, sent_at: u32, messages: Vec<OutboundHrmpMessage>) {
		let mut by_recipient: BTreeMap<u32, Vec<HorizontalMessage>> = BTreeMap::new();
		let mut deliveries = Vec::new();
		{
			let mut state = self.state.lock();
			for OutboundHrmpMessage { recipient, data } in messages {
				if state.first_delivery(Channel::Horizontal { sender, recipient }, sent_at, &data) {
					by_recipient.entry(recipient).or_default().push(HorizontalMessage { sent_at, data });
				}
			}
			for (recipient, messages) in by_recipient {
				match state.para(recipient) {
					Some(para) => deliveries.push((para, recipient, messages)),
					None => state
						.held_horizontal
						.entry(recipient)
						.or_default()
						.entry(sender)
						.or_default()
						.extend(messages),
				}
			}
		}
		for (para, recipient, messages) in deliveries {
			log::debug!("Relaying {} message(s) from para {sender} to {recipient}", messages.len());
			if let Err(e) = para.txpool().submit_horizontal_messages(sender, messages) {
				log::warn!("Failed to deliver horizontal messages to para {recipient}: {e}");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		builder::create_next_header,
		config::ReplayConfig,
		testing::TestChain,
		txpool::BuildBlockMode,
	};
	use serde_json::json;

	async fn manual_chain(para_id: Option<u32>) -> TestChain {
		TestChain::with_config(ReplayConfig {
			build_block_mode: BuildBlockMode::Manual,
			registered_para_id: para_id,
			..Default::default()
		})
		.await
	}

	fn raw(key: Vec<u8>, value: impl Encode) -> serde_json::Value {
		json!([[format!("0x{}", hex::encode(key)), format!("0x{}", hex::encode(value.encode()))]])
	}

	async fn builder(chain: &TestChain) -> BlockBuilder {
		let parent = chain.fork_block().await;
		let header = create_next_header(&parent, parent.number + 1, vec![]);
		BlockBuilder::new(parent, header).await.unwrap()
	}

	#[test]
	fn origin_encodes_as_ump_para() {
		let origin = AggregateMessageOrigin::Ump(UmpQueueId::Para(2000));
		assert_eq!(origin.encode(), [&[0u8, 0][..], &2000u32.to_le_bytes()].concat());
	}

	#[test]
	fn page_heap_holds_headers_and_payloads() {
		let page = Page::from_messages(&[vec![1, 2], vec![3]]);
		assert_eq!(page.remaining, 2);
		assert_eq!(page.remaining_size, 3);
		assert_eq!(page.heap, vec![2, 0, 0, 0, 0, 1, 2, 1, 0, 0, 0, 0, 3]);
		// Second item starts after the 5 byte header and 2 byte payload of the first.
		assert_eq!(page.last, 7);
	}

	#[test]
	fn page_key_shares_origin_suffix_with_book_key() {
		let origin = AggregateMessageOrigin::Ump(UmpQueueId::Para(1));
		let book = book_state_key(&origin);
		let page = page_key(&origin, 0);
		assert_eq!(&page[..16], &book[..16]);
		assert_eq!(&page[16..32], &sp_core::twox_128(b"Pages"));
		assert_eq!(&page[32..book.len()], &book[32..]);
	}

	#[tokio::test]
	async fn first_queue_becomes_service_head() {
		let chain = TestChain::new().await;
		let builder = builder(&chain).await;
		let upward = BTreeMap::from([(2000, vec![vec![1u8, 2, 3]])]);

		let writes: BTreeMap<_, _> = enqueue_upward(&builder, &upward).await.unwrap().into_iter().collect();
		let origin = AggregateMessageOrigin::Ump(UmpQueueId::Para(2000));

		let book = BookState::decode(&mut writes[&book_state_key(&origin)].as_deref().unwrap()).unwrap();
		assert_eq!((book.begin, book.end, book.count, book.message_count, book.size), (0, 1, 1, 1, 3));
		assert_eq!(book.ready_neighbours, Some(Neighbours { prev: origin, next: origin }));
		assert_eq!(writes[&service_head_key()], Some(origin.encode()));
		assert!(writes.contains_key(&page_key(&origin, 0)));
	}

	#[tokio::test]
	async fn second_queue_joins_ready_ring() {
		let chain = TestChain::new().await;
		let builder = builder(&chain).await;
		let first = BTreeMap::from([(1000, vec![vec![1u8]])]);
		builder.set_storage(enqueue_upward(&builder, &first).await.unwrap());

		let second = BTreeMap::from([(2000, vec![vec![2u8]]), (1000, vec![vec![3u8]])]);
		let writes: BTreeMap<_, _> =
			enqueue_upward(&builder, &second).await.unwrap().into_iter().collect();
		let a = AggregateMessageOrigin::Ump(UmpQueueId::Para(1000));
		let b = AggregateMessageOrigin::Ump(UmpQueueId::Para(2000));

		let book_a = BookState::decode(&mut writes[&book_state_key(&a)].as_deref().unwrap()).unwrap();
		let book_b = BookState::decode(&mut writes[&book_state_key(&b)].as_deref().unwrap()).unwrap();
		// Existing book gets a second page.
		assert_eq!((book_a.end, book_a.count, book_a.message_count), (2, 2, 2));
		assert!(writes.contains_key(&page_key(&a, 1)));
		assert_eq!(book_a.ready_neighbours, Some(Neighbours { prev: b, next: b }));
		assert_eq!(book_b.ready_neighbours, Some(Neighbours { prev: a, next: a }));
		assert_eq!(writes[&service_head_key()], Some(a.encode()));
	}

	#[tokio::test]
	async fn downward_messages_reach_the_parachain_once() {
		let relay = manual_chain(None).await;
		let para = manual_chain(Some(2000)).await;
		let router = MessageRelay::new();
		router.attach_relay_chain(&relay.chain).unwrap();
		router.attach_parachain(&para.chain).unwrap();

		let message = DownwardMessage { sent_at: 10, msg: vec![7] };
		let queue = raw(downward_queue_key(2000), vec![message.clone()]);
		relay.chain.set_storage(&queue, None).await.unwrap();
		relay.chain.set_storage(&queue, None).await.unwrap();

		assert_eq!(para.chain.txpool().pending_messages().downward, vec![message]);
	}

	#[tokio::test]
	async fn upward_messages_wait_for_the_relay_chain() {
		let relay = manual_chain(None).await;
		let para = manual_chain(Some(2000)).await;
		let router = MessageRelay::new();
		router.attach_parachain(&para.chain).unwrap();

		para.chain.set_storage(&raw(upward_messages_key(), vec![vec![1u8, 2]]), None).await.unwrap();
		assert!(relay.chain.txpool().pending_messages().upward.is_empty());

		router.attach_relay_chain(&relay.chain).unwrap();
		assert_eq!(
			relay.chain.txpool().pending_messages().upward,
			BTreeMap::from([(2000, vec![vec![1u8, 2]])])
		);
	}

	#[tokio::test]
	async fn horizontal_messages_are_held_for_late_recipients() {
		let sender = manual_chain(Some(1000)).await;
		let recipient = manual_chain(Some(2000)).await;
		let router = MessageRelay::new();
		router.attach_parachain(&sender.chain).unwrap();

		let outbound = vec![OutboundHrmpMessage { recipient: 2000, data: vec![9] }];
		sender.chain.set_storage(&raw(hrmp_outbound_messages_key(), outbound), None).await.unwrap();
		router.attach_parachain(&recipient.chain).unwrap();

		let number = sender.chain.head().number;
		assert_eq!(
			recipient.chain.txpool().pending_messages().horizontal,
			BTreeMap::from([(1000, vec![HorizontalMessage { sent_at: number, data: vec![9] }])])
		);
	}

	#[test]
	fn delivery_record_is_bounded_per_channel() {
		let mut state = RelayState::default();
		let channel = Channel::Upward(1000);
		let last = DELIVERED_HEIGHTS_PER_CHANNEL as u32 + 10;
		for height in 0..last {
			assert!(state.first_delivery(channel, height, &[1]));
		}
		let record = &state.delivered[&channel];
		assert_eq!(record.by_height.len(), DELIVERED_HEIGHTS_PER_CHANNEL);
		assert_eq!(record.floor, 10);

		// Recent messages are still deduplicated, forgotten heights count as delivered.
		assert!(!state.first_delivery(channel, last - 1, &[1]));
		assert!(state.first_delivery(channel, last - 1, &[2]));
		assert!(!state.first_delivery(channel, 3, &[9]));
		// Other channels keep their own window.
		assert!(state.first_delivery(Channel::Downward(1000), 3, &[9]));
	}

	#[tokio::test]
	async fn relay_chain_cannot_attach_as_parachain() {
		let relay = manual_chain(None).await;
		assert!(matches!(
			MessageRelay::new().attach_parachain(&relay.chain),
			Err(RelayError::NotParachain(_))
		));
	}
}
