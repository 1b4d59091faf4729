// SPDX-License-Identifier: GPL-3.0

//! Storage items touched when relaying messages between chains.

/// Relay chain downward message queues.
pub mod dmp {
	pub const PALLET: &[u8] = b"Dmp";
	pub const DOWNWARD_MESSAGE_QUEUES: &[u8] = b"DownwardMessageQueues";
	pub const DOWNWARD_MESSAGE_QUEUE_HEADS: &[u8] = b"DownwardMessageQueueHeads";
}

/// Parachain outbound queues.
pub mod parachain_system {
	pub const PALLET: &[u8] = b"ParachainSystem";
	pub const UPWARD_MESSAGES: &[u8] = b"UpwardMessages";
	pub const HRMP_OUTBOUND_MESSAGES: &[u8] = b"HrmpOutboundMessages";
}

/// Relay chain message queue used to deliver upward messages.
pub mod message_queue {
	pub const PALLET: &[u8] = b"MessageQueue";
	pub const BOOK_STATE_FOR: &[u8] = b"BookStateFor";
	pub const PAGES: &[u8] = b"Pages";
	pub const SERVICE_HEAD: &[u8] = b"ServiceHead";
}

/// Distinct sending heights remembered per channel for delivery deduplication.
pub const DELIVERED_HEIGHTS_PER_CHANNEL: usize = 256;
