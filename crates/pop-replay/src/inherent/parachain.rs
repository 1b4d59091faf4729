// SPDX-License-Identifier: GPL-3.0

//! Parachain validation data inherent.
//!
//! A parachain block must start with `parachainSystem.setValidationData`, carrying the
//! relay chain state the block was built against together with a storage proof of it.
//! There is no relay chain behind a fork, so the provider re-seals the inherent found in
//! the parent block:
//!
//! 1. Decode the parent's validation data and relay chain state proof.
//! 2. Advance the relay parent number and `Babe::CurrentSlot` by one parachain slot.
//! 3. Write the parent header into `Paras::Heads(para_id)`.
//! 4. Append pending downward and horizontal messages, moving the matching message
//!    queue chain heads in the proof.
//! 5. Rebuild the proof, put the new storage root in the validation data and re-encode.
//!
//! Two layouts of the call exist. Older runtimes take a single `ParachainInherentData`
//! with the messages inline. Newer ones take the basic data plus a separate
//! `InboundMessagesData` argument, and also carry relay parent descendants whose first
//! header must commit to the new storage root.

use super::{InherentProvider, provider_error, slot_duration};
use crate::{
	block::{Block, hash_header},
	builder::BuildParams,
	error::BlockBuilderError,
	executor::trie,
	relay::{DownwardMessage, HorizontalMessage},
	rpc::Header,
	storage::{storage_value_key, twox64_concat_key},
	strings::{
		builder::consensus_engine,
		executor::magic_signature,
		inherent::{parachain as strings, timestamp::slot_duration::PARACHAIN_FALLBACK_MS},
		relay::dmp,
	},
};
use async_trait::async_trait;
use scale::{Compact, Decode, Encode};
use std::collections::BTreeMap;
use subxt::config::substrate::{DigestItem, H256};

/// Extrinsic format versions a bare inherent may use.
const BARE_VERSIONS: [u8; 2] = [4, 5];

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct PersistedValidationData {
	parent_head: Vec<u8>,
	relay_parent_number: u32,
	relay_parent_storage_root: H256,
	max_pov_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct HashedMessage {
	sent_at: u32,
	msg_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct AbridgedInboundMessages<Full, Hashed> {
	full_messages: Vec<Full>,
	hashed_messages: Vec<Hashed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct InboundMessagesData {
	downward_messages: AbridgedInboundMessages<DownwardMessage, HashedMessage>,
	horizontal_messages: AbridgedInboundMessages<(u32, HorizontalMessage), (u32, HashedMessage)>,
}

/// HRMP channel as stored by the relay chain.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct AbridgedHrmpChannel {
	max_capacity: u32,
	max_total_size: u32,
	max_message_size: u32,
	msg_count: u32,
	total_size: u32,
	mqc_head: Option<H256>,
}

impl AbridgedHrmpChannel {
	fn open() -> Self {
		Self {
			max_capacity: 1_000,
			max_total_size: 102_400,
			max_message_size: 102_400,
			msg_count: 0,
			total_size: 0,
			mqc_head: None,
		}
	}
}

/// The part of the call following the relay chain state proof.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tail {
	/// `downward_messages, horizontal_messages` inline.
	Legacy { downward: Vec<DownwardMessage>, horizontal: BTreeMap<u32, Vec<HorizontalMessage>> },
	/// `relay_parent_descendants, collator_peer_id`, then the inbound messages argument.
	Split {
		descendants: Vec<Header>,
		collator_peer_id: Option<Vec<u8>>,
		messages: Option<InboundMessagesData>,
		/// Bytes that did not decode as `InboundMessagesData`, kept verbatim.
		opaque: Vec<u8>,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidationInherent {
	version: u8,
	pallet: u8,
	call: u8,
	validation_data: PersistedValidationData,
	proof: Vec<Vec<u8>>,
	tail: Tail,
}

impl ValidationInherent {
	fn decode(extrinsic: &[u8], split: bool) -> Result<Self, scale::Error> {
		let mut input = extrinsic;
		let _len = Compact::<u32>::decode(&mut input)?;
		let [version, pallet, call] = <[u8; 3]>::decode(&mut input)?;
		let validation_data = PersistedValidationData::decode(&mut input)?;
		let proof = Vec::<Vec<u8>>::decode(&mut input)?;
		let tail = if split {
			let descendants = Vec::<Header>::decode(&mut input)?;
			let collator_peer_id = Option::<Vec<u8>>::decode(&mut input)?;
			let opaque = input.to_vec();
			match InboundMessagesData::decode(&mut input) {
				Ok(messages) if input.is_empty() => Tail::Split {
					descendants,
					collator_peer_id,
					messages: Some(messages),
					opaque: Vec::new(),
				},
				_ => Tail::Split { descendants, collator_peer_id, messages: None, opaque },
			}
		} else {
			Tail::Legacy {
				downward: Decode::decode(&mut input)?,
				horizontal: Decode::decode(&mut input)?,
			}
		};
		Ok(Self { version, pallet, call, validation_data, proof, tail })
	}

	fn encode(&self) -> Vec<u8> {
		let mut body = vec![self.version, self.pallet, self.call];
		self.validation_data.encode_to(&mut body);
		self.proof.encode_to(&mut body);
		match &self.tail {
			Tail::Legacy { downward, horizontal } => {
				downward.encode_to(&mut body);
				horizontal.encode_to(&mut body);
			},
			Tail::Split { descendants, collator_peer_id, messages, opaque } => {
				descendants.encode_to(&mut body);
				collator_peer_id.encode_to(&mut body);
				match messages {
					Some(messages) => messages.encode_to(&mut body),
					None => body.extend_from_slice(opaque),
				}
			},
		}
		let mut extrinsic = Compact(body.len() as u32).encode();
		extrinsic.extend(body);
		extrinsic
	}

	/// Replace the inbound messages. Returns false if the messages could not be placed.
	fn set_messages(
		&mut self,
		downward: Vec<DownwardMessage>,
		horizontal: BTreeMap<u32, Vec<HorizontalMessage>>,
	) -> bool {
		match &mut self.tail {
			Tail::Legacy { downward: d, horizontal: h } => {
				*d = downward;
				*h = horizontal;
				true
			},
			Tail::Split { messages: Some(messages), .. } => {
				messages.downward_messages =
					AbridgedInboundMessages { full_messages: downward, hashed_messages: vec![] };
				messages.horizontal_messages = AbridgedInboundMessages {
					full_messages: horizontal
						.into_iter()
						.flat_map(|(sender, msgs)| msgs.into_iter().map(move |m| (sender, m)))
						.collect(),
					hashed_messages: vec![],
				};
				true
			},
			Tail::Split { messages: None, .. } => downward.is_empty() && horizontal.is_empty(),
		}
	}

	/// Make the first relay parent descendant commit to `state_root` and re-chain the
	/// following ones. BABE seals are replaced with mock signatures.
	fn reseal_descendants(&mut self, state_root: H256) {
		let Tail::Split { descendants, .. } = &mut self.tail else {
			return;
		};
		let mut parent_hash = None;
		for (i, header) in descendants.iter_mut().enumerate() {
			if i == 0 {
				header.state_root = state_root;
			}
			if let Some(parent_hash) = parent_hash {
				header.parent_hash = parent_hash;
			}
			for item in header.digest.logs.iter_mut() {
				if let DigestItem::Seal(engine, signature) = item &&
					*engine == consensus_engine::BABE
				{
					*signature = mock_signature();
				}
			}
			parent_hash = Some(hash_header(header));
		}
	}
}

fn mock_signature() -> Vec<u8> {
	let mut signature = magic_signature::PREFIX.to_vec();
	signature.resize(magic_signature::SR25519_SIZE, magic_signature::PADDING);
	signature
}

/// Next message queue chain head: `blake2_256((head, sent_at, blake2_256(payload)).encode())`
/// where the payload is SCALE encoded.
fn extend_mqc(head: H256, sent_at: u32, payload: &[u8]) -> H256 {
	let payload_hash = H256(sp_core::blake2_256(&payload.encode()));
	H256(sp_core::blake2_256(&(head, sent_at, payload_hash).encode()))
}

type ProofUpdates = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Parachain validation data inherent provider.
#[derive(Debug, Clone, Default)]
pub struct ParachainInherent;

impl ParachainInherent {
	pub fn new() -> Self {
		Self
	}

	async fn para_id(parent: &Block) -> Result<Option<u32>, BlockBuilderError> {
		let key = storage_value_key(
			strings::storage_keys::PARACHAIN_INFO_PALLET,
			strings::storage_keys::PARACHAIN_ID,
		);
		Ok(parent.get(&key).await?.and_then(|v| u32::decode(&mut v.as_slice()).ok()))
	}

	async fn last_dmq_head(parent: &Block) -> Result<H256, BlockBuilderError> {
		let key = storage_value_key(
			strings::storage_keys::PARACHAIN_SYSTEM_PALLET,
			strings::storage_keys::LAST_DMQ_MQC_HEAD,
		);
		Ok(parent
			.get(&key)
			.await?
			.and_then(|v| H256::decode(&mut v.as_slice()).ok())
			.unwrap_or_default())
	}

	async fn last_hrmp_heads(parent: &Block) -> Result<BTreeMap<u32, H256>, BlockBuilderError> {
		let key = storage_value_key(
			strings::storage_keys::PARACHAIN_SYSTEM_PALLET,
			strings::storage_keys::LAST_HRMP_MQC_HEADS,
		);
		Ok(parent
			.get(&key)
			.await?
			.and_then(|v| BTreeMap::decode(&mut v.as_slice()).ok())
			.unwrap_or_default())
	}

	/// Rewrite `inherent` for the child of `parent`.
	async fn reseal(
		&self,
		inherent: &mut ValidationInherent,
		parent: &Block,
		para_id: u32,
		params: &BuildParams,
	) -> Result<(), BlockBuilderError> {
		let error = |message: String| provider_error(strings::IDENTIFIER, message);
		let root = inherent.validation_data.relay_parent_storage_root;

		let para_slot = slot_duration(parent, PARACHAIN_FALLBACK_MS).await;
		let increment = (para_slot / strings::RELAY_SLOT_DURATION_MS).max(1);

		let slot_key =
			storage_value_key(strings::relay_keys::BABE_PALLET, strings::relay_keys::CURRENT_SLOT);
		let relay_slot = trie::read_from_proof(&root, &inherent.proof, &slot_key)
			.map_err(|e| error(e.to_string()))?
			.and_then(|v| u64::decode(&mut v.as_slice()).ok())
			.ok_or_else(|| error("relay chain proof has no Babe::CurrentSlot".into()))?
			.saturating_add(increment);

		let relay_number =
			inherent.validation_data.relay_parent_number.saturating_add(increment as u32);
		inherent.validation_data.relay_parent_number = relay_number;

		let mut updates: ProofUpdates = vec![
			(slot_key, Some(relay_slot.encode())),
			(
				twox64_concat_key(
					strings::relay_keys::PARAS_PALLET,
					strings::relay_keys::HEADS,
					&para_id.encode(),
				),
				Some(parent.header().encode().encode()),
			),
		];

		let downward: Vec<DownwardMessage> = params
			.downward_messages
			.iter()
			.map(|m| DownwardMessage { sent_at: relay_number, msg: m.msg.clone() })
			.collect();
		if !downward.is_empty() {
			let start = Self::last_dmq_head(parent).await?;
			let head = downward.iter().fold(start, |head, m| extend_mqc(head, m.sent_at, &m.msg));
			updates.push((
				twox64_concat_key(dmp::PALLET, dmp::DOWNWARD_MESSAGE_QUEUE_HEADS, &para_id.encode()),
				Some(head.encode()),
			));
		}

		let horizontal: BTreeMap<u32, Vec<HorizontalMessage>> = params
			.horizontal_messages
			.iter()
			.filter(|(_, messages)| !messages.is_empty())
			.map(|(sender, messages)| {
				let messages = messages
					.iter()
					.map(|m| HorizontalMessage { sent_at: relay_number, data: m.data.clone() })
					.collect();
				(*sender, messages)
			})
			.collect();
		if !horizontal.is_empty() {
			updates.extend(
				Self::hrmp_updates(parent, para_id, &root, &inherent.proof, &horizontal).await?,
			);
		}

		if !inherent.set_messages(downward, horizontal) {
			log::warn!("Inbound messages dropped: setValidationData messages could not be decoded");
		}

		let (new_root, nodes) = trie::create_proof(&root, &inherent.proof, updates)
			.map_err(|e| error(format!("failed to rebuild relay chain proof: {e}")))?;
		log::debug!(
			"Validation data for para {para_id}: relay #{relay_number}, slot {relay_slot}, root {new_root:?}"
		);
		inherent.validation_data.relay_parent_storage_root = new_root;
		inherent.proof = nodes;
		inherent.reseal_descendants(new_root);
		Ok(())
	}

	/// Proof updates opening or advancing the HRMP channels `sender -> para_id`.
	async fn hrmp_updates(
		parent: &Block,
		para_id: u32,
		root: &H256,
		proof: &[Vec<u8>],
		horizontal: &BTreeMap<u32, Vec<HorizontalMessage>>,
	) -> Result<ProofUpdates, BlockBuilderError> {
		let error = |message: String| provider_error(strings::IDENTIFIER, message);
		let last_heads = Self::last_hrmp_heads(parent).await?;
		let mut updates = Vec::new();

		let index_key = twox64_concat_key(
			strings::relay_keys::HRMP_PALLET,
			strings::relay_keys::HRMP_INGRESS_CHANNELS_INDEX,
			&para_id.encode(),
		);
		let mut ingress: Vec<u32> = trie::read_from_proof(root, proof, &index_key)
			.map_err(|e| error(e.to_string()))?
			.and_then(|v| Vec::decode(&mut v.as_slice()).ok())
			.unwrap_or_default();

		for (sender, messages) in horizontal {
			if let Err(pos) = ingress.binary_search(sender) {
				ingress.insert(pos, *sender);
			}
			let channel_key = twox64_concat_key(
				strings::relay_keys::HRMP_PALLET,
				strings::relay_keys::HRMP_CHANNELS,
				&(*sender, para_id).encode(),
			);
			let mut channel = trie::read_from_proof(root, proof, &channel_key)
				.map_err(|e| error(e.to_string()))?
				.and_then(|v| AbridgedHrmpChannel::decode(&mut v.as_slice()).ok())
				.unwrap_or_else(AbridgedHrmpChannel::open);
			let start = last_heads.get(sender).copied().or(channel.mqc_head).unwrap_or_default();
			let head = messages.iter().fold(start, |head, m| extend_mqc(head, m.sent_at, &m.data));
			channel.msg_count = channel.msg_count.saturating_add(messages.len() as u32);
			channel.total_size = channel
				.total_size
				.saturating_add(messages.iter().map(|m| m.data.len() as u32).sum::<u32>());
			channel.mqc_head = Some(head);
			updates.push((channel_key, Some(channel.encode())));
		}
		updates.push((index_key, Some(ingress.encode())));
		Ok(updates)
	}
}

#[async_trait]
impl InherentProvider for ParachainInherent {
	fn identifier(&self) -> &'static str {
		strings::IDENTIFIER
	}

	async fn provide(
		&self,
		parent: &Block,
		params: &BuildParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = parent.metadata().await?;
		let Some(pallet) = metadata.pallet_by_name(strings::metadata::PALLET_NAME) else {
			return Ok(vec![]);
		};
		let variant = pallet
			.call_variant_by_name(strings::metadata::SET_VALIDATION_DATA_CALL_NAME)
			.ok_or_else(|| {
				provider_error(
					self.identifier(),
					format!("call {} not found", strings::metadata::SET_VALIDATION_DATA_CALL_NAME),
				)
			})?;
		let (pallet_index, call_index) = (pallet.index(), variant.index);
		let split = variant.fields.len() > 1;

		let para_id = Self::para_id(parent)
			.await?
			.ok_or_else(|| provider_error(self.identifier(), "ParachainId not found in storage"))?;

		let extrinsics = parent.extrinsics().await?;
		let Some(extrinsic) = find_inherent(&extrinsics, pallet_index, call_index) else {
			log::warn!("No setValidationData in block #{}, skipping", parent.number);
			return Ok(vec![]);
		};

		let mut inherent = ValidationInherent::decode(extrinsic, split)
			.map_err(|e| provider_error(self.identifier(), format!("decode failed: {e}")))?;
		self.reseal(&mut inherent, parent, para_id, params).await?;
		Ok(vec![inherent.encode()])
	}
}

/// The bare `pallet::call` extrinsic in `extrinsics`.
fn find_inherent(extrinsics: &[Vec<u8>], pallet: u8, call: u8) -> Option<&[u8]> {
	extrinsics.iter().map(Vec::as_slice).find(|ext| {
		let mut input = *ext;
		Compact::<u32>::decode(&mut input).is_ok() &&
			input.len() >= 3 &&
			BARE_VERSIONS.contains(&input[0]) &&
			input[1] == pallet &&
			input[2] == call
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use subxt::config::substrate::Digest;

	fn relay_header(number: u32) -> Header {
		Header {
			parent_hash: H256::zero(),
			number,
			state_root: H256::zero(),
			extrinsics_root: H256::zero(),
			digest: Digest { logs: vec![DigestItem::Seal(consensus_engine::BABE, vec![7; 64])] },
		}
	}

	fn legacy_inherent() -> ValidationInherent {
		ValidationInherent {
			version: 4,
			pallet: 51,
			call: 0,
			validation_data: PersistedValidationData {
				parent_head: vec![1, 2, 3],
				relay_parent_number: 100,
				relay_parent_storage_root: H256::repeat_byte(1),
				max_pov_size: 5_000_000,
			},
			proof: vec![vec![1, 2], vec![3]],
			tail: Tail::Legacy { downward: vec![], horizontal: BTreeMap::new() },
		}
	}

	fn empty_inbound() -> InboundMessagesData {
		InboundMessagesData {
			downward_messages: AbridgedInboundMessages {
				full_messages: vec![],
				hashed_messages: vec![],
			},
			horizontal_messages: AbridgedInboundMessages {
				full_messages: vec![],
				hashed_messages: vec![],
			},
		}
	}

	#[test]
	fn legacy_layout_survives_reencoding() {
		let inherent = legacy_inherent();
		let decoded = ValidationInherent::decode(&inherent.encode(), false).unwrap();
		assert_eq!(decoded, inherent);
	}

	#[test]
	fn split_layout_keeps_undecodable_tail() {
		let inherent = ValidationInherent {
			tail: Tail::Split {
				descendants: vec![relay_header(1)],
				collator_peer_id: None,
				messages: None,
				opaque: vec![0xff, 0xff, 0xff],
			},
			..legacy_inherent()
		};
		let encoded = inherent.encode();
		let decoded = ValidationInherent::decode(&encoded, true).unwrap();
		assert_eq!(decoded.encode(), encoded);
		assert!(matches!(decoded.tail, Tail::Split { messages: None, .. }));
	}

	#[test]
	fn split_layout_carries_messages() {
		let mut inherent = ValidationInherent {
			tail: Tail::Split {
				descendants: vec![],
				collator_peer_id: Some(vec![9]),
				messages: Some(empty_inbound()),
				opaque: vec![],
			},
			..legacy_inherent()
		};
		let horizontal =
			BTreeMap::from([(2000, vec![HorizontalMessage { sent_at: 5, data: vec![1] }])]);
		assert!(
			inherent.set_messages(vec![DownwardMessage { sent_at: 5, msg: vec![2] }], horizontal)
		);

		let decoded = ValidationInherent::decode(&inherent.encode(), true).unwrap();
		let Tail::Split { messages: Some(messages), .. } = decoded.tail else {
			panic!("messages lost");
		};
		assert_eq!(messages.downward_messages.full_messages.len(), 1);
		assert_eq!(messages.horizontal_messages.full_messages[0].0, 2000);
	}

	#[test]
	fn opaque_tail_refuses_messages() {
		let mut inherent = ValidationInherent {
			tail: Tail::Split {
				descendants: vec![],
				collator_peer_id: None,
				messages: None,
				opaque: vec![1],
			},
			..legacy_inherent()
		};
		assert!(inherent.set_messages(vec![], BTreeMap::new()));
		assert!(
			!inherent.set_messages(vec![DownwardMessage { sent_at: 1, msg: vec![] }], BTreeMap::new())
		);
	}

	#[test]
	fn reseal_descendants_rechains_headers() {
		let mut inherent = ValidationInherent {
			tail: Tail::Split {
				descendants: vec![relay_header(1), relay_header(2)],
				collator_peer_id: None,
				messages: None,
				opaque: vec![],
			},
			..legacy_inherent()
		};
		let root = H256::repeat_byte(3);
		inherent.reseal_descendants(root);

		let Tail::Split { descendants, .. } = &inherent.tail else { unreachable!() };
		assert_eq!(descendants[0].state_root, root);
		assert_eq!(descendants[1].parent_hash, hash_header(&descendants[0]));
		assert!(matches!(
			&descendants[1].digest.logs[0],
			DigestItem::Seal(_, sig) if sig.starts_with(magic_signature::PREFIX) && sig.len() == 64
		));
	}

	#[test]
	fn mqc_extension_matches_manual_hash() {
		let head = H256::zero();
		let mut preimage = head.0.to_vec();
		preimage.extend(7u32.to_le_bytes());
		preimage.extend(sp_core::blake2_256(&vec![1u8, 2].encode()));
		assert_eq!(extend_mqc(head, 7, &[1, 2]), H256(sp_core::blake2_256(&preimage)));
	}

	#[test]
	fn find_inherent_matches_pallet_and_call() {
		let inherent = legacy_inherent().encode();
		let other = crate::inherent::encode_bare_extrinsic(&[3, 0, 1]);
		let extrinsics = vec![other, inherent.clone()];
		assert_eq!(find_inherent(&extrinsics, 51, 0), Some(inherent.as_slice()));
		assert_eq!(find_inherent(&extrinsics, 51, 1), None);
	}
}
