// Copyright 2023 The Otnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared types for the chain crate: the per-chain event bus, reorg plans,
//! the pluggable block validator and the filter oracle contract.

use std::sync::mpsc;

use crate::core::chains::Chain;
use crate::core::hash::Hash;
use crate::core::pos::BlockPosition;
use crate::util::Mutex;

/// An ordered description of one chain reorganization. Epochs increase
/// monotonically per chain so stale messages can be discarded downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
	/// Monotonically increasing reorg identifier
	pub epoch: u64,
	/// Highest position common to the old and new chains
	pub ancestor: BlockPosition,
	/// Tip being abandoned
	pub old_tip: BlockPosition,
	/// Tip being adopted
	pub new_tip: BlockPosition,
	/// Positions rolled back, ordered from the old tip down to (exclusive)
	/// the common ancestor
	pub rolled_back: Vec<BlockPosition>,
}

/// Supported compact filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterType {
	/// BIP-158 basic filters
	Basic,
	/// Extended filters carrying script subelements
	Extended,
}

impl FilterType {
	/// Stable numeric tag for storage keys and identifiers
	pub fn to_u8(&self) -> u8 {
		match *self {
			FilterType::Basic => 0,
			FilterType::Extended => 1,
		}
	}
}

/// Notifications published on a chain's event bus. One bus per chain; no
/// event of one chain is ever observed by another chain's actors.
#[derive(Debug, Clone)]
pub enum ChainEvent {
	/// The best header chain advanced without rolling anything back
	NewTip(BlockPosition),
	/// The best header chain was reorganized
	Reorg(ReorgPlan),
	/// A block passed validation and is available locally
	BlockReady(Hash),
	/// The download queue changed; payload is the number of blocks currently
	/// waiting or in flight
	DownloadQueue(usize),
	/// Batched download work is available for peer workers
	WorkAvailable,
	/// A compact filter is available for the given position
	FilterReady(FilterType, BlockPosition),
}

/// A simple fan-out bus for chain events. Subscribers that disappear are
/// pruned on the next publish.
pub struct EventBus {
	subscribers: Mutex<Vec<mpsc::Sender<ChainEvent>>>,
}

impl EventBus {
	/// A bus with no subscribers
	pub fn new() -> EventBus {
		EventBus {
			subscribers: Mutex::new(vec![]),
		}
	}

	/// Register a new subscriber, returning its receiving end
	pub fn subscribe(&self) -> mpsc::Receiver<ChainEvent> {
		let (tx, rx) = mpsc::channel();
		self.subscribers.lock().push(tx);
		rx
	}

	/// Publish an event to every live subscriber
	pub fn publish(&self, event: ChainEvent) {
		let mut subs = self.subscribers.lock();
		subs.retain(|tx| tx.send(event.clone()).is_ok());
	}
}

impl Default for EventBus {
	fn default() -> EventBus {
		EventBus::new()
	}
}

/// Pluggable block validation beyond parsing and hash checks. The default
/// accepts everything; chains wanting script-level validation plug in here.
pub trait BlockValidator: Send + Sync {
	/// Whether the block content is acceptable
	fn validate(&self, chain: Chain, hash: &Hash, bytes: &[u8]) -> bool;
}

/// The default validator, which accepts every structurally valid block
pub struct AcceptAll;

impl BlockValidator for AcceptAll {
	fn validate(&self, _chain: Chain, _hash: &Hash, _bytes: &[u8]) -> bool {
		true
	}
}

/// The contract the wallet consumes from a filter oracle. Implementations
/// publish `FilterReady` events on the chain bus as filters become
/// available.
pub trait FilterOracle: Send + Sync {
	/// The filter type scans default to
	fn default_type(&self) -> FilterType;
	/// Highest position a filter of the given type exists for
	fn tip(&self, filter_type: FilterType) -> BlockPosition;
	/// Compute and store filters for a freshly available block
	fn process_block(&self, position: &BlockPosition, block: &[u8]) -> bool;
	/// Ingest out-of-band filter data for the given positions
	fn process_sync_data(&self, prior: &BlockPosition, data: &[(BlockPosition, Vec<u8>)]);
	/// The filter bytes for one block, if known
	fn load_filter(&self, filter_type: FilterType, position: &BlockPosition) -> Option<Vec<u8>>;

	/// Whether a filter matches any of the given patterns. The default is a
	/// byte-containment test; probabilistic filter encodings override this
	/// with their own membership query.
	fn matches(&self, filter: &[u8], patterns: &[&[u8]]) -> bool {
		patterns.iter().any(|pattern| {
			!pattern.is_empty()
				&& filter
					.windows(pattern.len())
					.any(|window| window == *pattern)
		})
	}
}
