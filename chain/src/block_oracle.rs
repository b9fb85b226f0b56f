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

//! Content-addressed block access for one chain: the block cache or
//! persistent store, the validation pipeline, the download queue feeding
//! peer workers, and initial-block-download tracking.

use std::sync::{Arc, Weak};

use lru_cache::LruCache;

use crate::core::chains::Chain;
use crate::core::hash::Hash;
use crate::core::header::HEADER_LEN;
use crate::core::pos::BlockPosition;
use crate::error::Error;
use crate::futures::{BlockFuture, FuturesRegistry};
use crate::header_oracle::HeaderOracle;
use crate::queue::{DownloadQueue, JobId, QueueCounts};
use crate::store_schema::ChainStore;
use crate::types::{AcceptAll, BlockValidator, ChainEvent, EventBus};
use crate::util::{Mutex, OneTime};
use otnode_config::Profile;

// bounded in-memory block cache for the mobile profile
const CACHE_BLOCKS: usize = 32;

/// Outcome of the block validation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCheck {
	/// Parses, hashes to the requested id, and the validator accepts it
	Valid,
	/// Bytes don't parse as a block at all
	Malformed,
	/// Parses but hashes to something else or the validator rejects it
	Invalid,
}

/// The default validator, per the original: accept everything structurally
/// sound. Stricter per-chain validators plug in via `with_validator`.
pub fn get_validator(_chain: Chain) -> Box<dyn BlockValidator> {
	Box::new(AcceptAll)
}

/// Content-addressed block oracle for one chain.
pub struct BlockOracle {
	chain: Chain,
	db: Arc<ChainStore>,
	headers: Arc<HeaderOracle>,
	events: Arc<EventBus>,
	validator: Box<dyn BlockValidator>,
	download_all: bool,
	persistent: bool,
	futures: FuturesRegistry,
	queue: Mutex<DownloadQueue>,
	cache: Mutex<LruCache<Hash, Vec<u8>>>,
	tip: Mutex<BlockPosition>,
	in_ibd: Mutex<bool>,
	// back-reference so work batches can drive the receive pipeline
	self_ref: OneTime<Weak<BlockOracle>>,
}

impl BlockOracle {
	/// Build the oracle for one chain under the given deployment profile,
	/// with the default accept-all validator.
	pub fn new(
		db: Arc<ChainStore>,
		headers: Arc<HeaderOracle>,
		events: Arc<EventBus>,
		profile: Profile,
		peer_target: usize,
	) -> Arc<BlockOracle> {
		let chain = db.chain();
		Self::with_validator(db, headers, events, profile, peer_target, get_validator(chain))
	}

	/// Build the oracle with a specific pluggable validator.
	pub fn with_validator(
		db: Arc<ChainStore>,
		headers: Arc<HeaderOracle>,
		events: Arc<EventBus>,
		profile: Profile,
		peer_target: usize,
		validator: Box<dyn BlockValidator>,
	) -> Arc<BlockOracle> {
		let chain = db.chain();
		if profile.download_all_blocks() {
			info!("{}: beginning initial block download", chain);
		}
		let oracle = Arc::new(BlockOracle {
			chain,
			db,
			headers,
			events,
			validator,
			download_all: profile.download_all_blocks(),
			persistent: profile.persistent_blocks(),
			futures: FuturesRegistry::new(),
			queue: Mutex::new(DownloadQueue::new(peer_target)),
			cache: Mutex::new(LruCache::new(CACHE_BLOCKS)),
			tip: Mutex::new(BlockPosition::none()),
			in_ibd: Mutex::new(false),
			self_ref: OneTime::new(),
		});
		oracle.self_ref.init(Arc::downgrade(&oracle));
		oracle
	}

	/// The chain this oracle serves
	pub fn chain(&self) -> Chain {
		self.chain
	}

	/// Whether a block is locally available
	pub fn block_exists(&self, hash: &Hash) -> Result<bool, Error> {
		if self.persistent {
			self.db.block_exists(hash)
		} else {
			Ok(self.cache.lock().contains_key(hash))
		}
	}

	/// Request one block. Returns a ready future if the block is available
	/// and validates; otherwise a pending future, with the hash queued for
	/// download. A block failing validation is deleted and re-downloaded.
	pub fn load(&self, hash: &Hash) -> Result<BlockFuture, Error> {
		let mut out = self.load_batch(&[*hash])?;
		Ok(out.remove(0))
	}

	/// Request many blocks at once; one future per hash, in order.
	pub fn load_batch(&self, hashes: &[Hash]) -> Result<Vec<BlockFuture>, Error> {
		let mut out = Vec::with_capacity(hashes.len());
		let mut download = vec![];

		for hash in hashes {
			match self.load_local(hash)? {
				Some(bytes) => match self.check_block(hash, &bytes) {
					BlockCheck::Valid => {
						self.events.publish(ChainEvent::BlockReady(*hash));
						out.push(BlockFuture::ready(bytes));
					}
					BlockCheck::Malformed | BlockCheck::Invalid => {
						error!(
							"{}: block {} does not pass validation checks and must be re-downloaded",
							self.chain, hash
						);
						self.bad_block(hash)?;
						download.push(*hash);
						out.push(self.futures.queue(hash));
					}
				},
				None => {
					download.push(*hash);
					out.push(self.futures.queue(hash));
				}
			}
		}

		if !download.is_empty() {
			let counts = self.queue.lock().add(&download);
			self.publish_queue(counts);
		}
		Ok(out)
	}

	fn load_local(&self, hash: &Hash) -> Result<Option<Vec<u8>>, Error> {
		if self.persistent {
			self.db.get_block(hash)
		} else {
			Ok(self.cache.lock().get_mut(hash).cloned())
		}
	}

	// The three-step pipeline: structural parse, hash check, pluggable
	// validator.
	fn check_block(&self, hash: &Hash, bytes: &[u8]) -> BlockCheck {
		if !parse_block_structure(bytes) {
			return BlockCheck::Malformed;
		}
		let computed = (self.chain.params().hash_fn)(&bytes[..HEADER_LEN]);
		if computed != *hash {
			return BlockCheck::Invalid;
		}
		if !self.validator.validate(self.chain, hash, bytes) {
			return BlockCheck::Invalid;
		}
		BlockCheck::Valid
	}

	// Remove a bad block so the next load triggers a fresh download. The
	// mobile cache is cleared wholesale; it is small and rebuilds cheaply.
	fn bad_block(&self, hash: &Hash) -> Result<(), Error> {
		if self.persistent {
			self.db.delete_block(hash)
		} else {
			self.cache.lock().clear();
			Ok(())
		}
	}

	/// Ingest serialized block bytes, from a peer or local construction.
	/// Validates, persists, completes pending futures and promotes the
	/// download queue. Returns false for invalid bytes.
	pub fn receive(&self, bytes: &[u8]) -> Result<bool, Error> {
		if bytes.len() <= HEADER_LEN || !parse_block_structure(bytes) {
			warn!("{}: received malformed block", self.chain);
			return Ok(false);
		}
		let hash = (self.chain.params().hash_fn)(&bytes[..HEADER_LEN]);
		if self.check_block(&hash, bytes) != BlockCheck::Valid {
			warn!("{}: received an invalid block with apparent hash {}", self.chain, hash);
			return Ok(false);
		}
		debug!("{}: validated block {}", self.chain, hash);

		// make sure the header oracle knows about this block's header
		if !self.headers.exists(&hash) {
			if let Err(e) = self.headers.add_header_bytes(&bytes[..HEADER_LEN]) {
				debug!("{}: header for block {} not accepted: {}", self.chain, hash, e);
			}
		}

		self.save_block(&hash, bytes)?;
		debug!("{}: saved block {}", self.chain, hash);

		self.futures.receive(&hash, bytes);
		let counts = self.queue.lock().receive(&hash);
		self.publish_queue(counts);
		self.events.publish(ChainEvent::BlockReady(hash));
		Ok(true)
	}

	/// Path used for locally constructed blocks (e.g. from sync data); runs
	/// the same pipeline peers go through.
	pub fn submit_block(&self, bytes: &[u8]) -> Result<bool, Error> {
		self.receive(bytes)
	}

	// Store writes are retried once; a second failure is surfaced as fatal.
	fn save_block(&self, hash: &Hash, bytes: &[u8]) -> Result<(), Error> {
		if self.persistent {
			if let Err(first) = self.db.save_block(hash, bytes) {
				warn!(
					"{}: retrying block store write for {}: {}",
					self.chain, hash, first
				);
				self.db.save_block(hash, bytes).map_err(|e| {
					error!("{}: block store write failed twice: {}", self.chain, e);
					e
				})?;
			}
		} else {
			self.cache.lock().insert(*hash, bytes.to_vec());
		}
		Ok(())
	}

	/// Pull a batch of download work. The returned batch must be driven to
	/// completion or dropped; dropping requeues its unfinished hashes.
	pub fn get_work(&self) -> Option<BlockBatch> {
		let me = self.self_ref.borrow().upgrade()?;
		let work = self.queue.lock().get_work();
		match work {
			Some((id, hashes)) => {
				debug!(
					"{}: issuing job {} for {} blocks",
					self.chain,
					id,
					hashes.len()
				);
				Some(BlockBatch {
					id,
					hashes,
					oracle: me,
					finished: false,
				})
			}
			None => {
				trace!("{}: no download work", self.chain);
				None
			}
		}
	}

	/// A peer worker finished (or abandoned) a batch; unfinished hashes
	/// return to the waiting queue.
	pub fn finish_job(&self, id: JobId) {
		let counts = self.queue.lock().finish(id);
		self.publish_queue(counts);
	}

	/// Number of blocks waiting or in flight
	pub fn download_queue_size(&self) -> usize {
		self.queue.lock().len()
	}

	/// Whether peers should aggressively request every block rather than
	/// only wallet-relevant ones: server profile, once IBD is done.
	pub fn fetch_all_blocks(&self) -> bool {
		self.download_all && !self.ibd()
	}

	/// Whether the chain is still in initial block download: the best
	/// header height has passed the compiled checkpoint but blocks have not
	/// caught up with headers yet.
	pub fn ibd(&self) -> bool {
		let best = self.headers.best_chain().height;
		let checkpoint = self.chain.params().checkpoint_height();
		let tip = self.tip.lock().height;
		let current = best > checkpoint && tip < best;

		let mut state = self.in_ibd.lock();
		if *state && !current {
			info!("{}: finished with initial block download", self.chain);
		}
		*state = current;
		current
	}

	/// The current block tip without any verification
	pub fn tip(&self) -> BlockPosition {
		let cached = *self.tip.lock();
		if cached.is_none() {
			match self.db.block_tip() {
				Ok(Some(pos)) => pos,
				_ => self.genesis(),
			}
		} else {
			cached
		}
	}

	fn genesis(&self) -> BlockPosition {
		BlockPosition::new(0, self.chain.params().genesis_hash)
	}

	/// Persist a new block tip
	pub fn set_tip(&self, pos: BlockPosition) -> Result<(), Error> {
		self.db.save_block_tip(&pos)?;
		*self.tip.lock() = pos;
		Ok(())
	}

	/// Startup tip verification. Re-validates the trailing window of stored
	/// blocks; the tip is rewound to the highest block that still parses
	/// and hashes correctly, logging every missing or corrupt position,
	/// falling back further in 100-block steps until a good block is found
	/// or the window reaches height 1, then to genesis.
	pub fn get_tip(&self) -> Result<BlockPosition, Error> {
		const VERIFY: i64 = 100;
		let genesis = self.genesis();
		let stored = match self.db.block_tip()? {
			Some(pos) if !pos.is_none() => pos,
			_ => {
				*self.tip.lock() = genesis;
				return Ok(genesis);
			}
		};

		let mut target = (stored.height - VERIFY + 1).max(1);
		let best = loop {
			let count = (stored.height - target + 1).max(0) as usize;
			info!(
				"{}: verifying {} blocks starting from height {}",
				self.chain, count, target
			);
			let hashes = self.headers.best_hashes(target, count);
			let mut good: Option<BlockPosition> = None;
			let mut broken = false;

			for (i, hash) in hashes.iter().enumerate() {
				let height = target + i as i64;
				let pos = BlockPosition::new(height, *hash);
				match self.load_local(hash)? {
					None => {
						error!("{}: block {} at height {} is missing", self.chain, hash, height);
						broken = true;
					}
					Some(bytes) => {
						if self.check_block(hash, &bytes) == BlockCheck::Valid {
							if !broken {
								good = Some(pos);
							}
						} else {
							error!(
								"{}: block {} at height {} is corrupted",
								self.chain, hash, height
							);
							broken = true;
						}
					}
				}
			}

			if let Some(pos) = good {
				break pos;
			}
			if target <= 1 {
				break genesis;
			}
			target = (target - VERIFY).max(1);
		};

		if best != stored {
			self.db.save_block_tip(&best)?;
		}
		*self.tip.lock() = best;
		Ok(best)
	}

	fn publish_queue(&self, counts: QueueCounts) {
		self.events
			.publish(ChainEvent::DownloadQueue(counts.downloading));
		if counts.jobs_available > 0 {
			self.events.publish(ChainEvent::WorkAvailable);
		}
	}
}

/// A batch of download work assigned to one peer worker. The worker feeds
/// received blocks through `submit` and calls `finish` when done; dropping
/// the batch early cancels it and requeues the remainder.
pub struct BlockBatch {
	id: JobId,
	hashes: Vec<Hash>,
	oracle: Arc<BlockOracle>,
	finished: bool,
}

impl BlockBatch {
	/// The job identifier, monotonically increasing per chain
	pub fn id(&self) -> JobId {
		self.id
	}

	/// The block hashes this batch covers
	pub fn hashes(&self) -> &[Hash] {
		&self.hashes
	}

	/// Feed one downloaded block through the oracle's receive pipeline
	pub fn submit(&self, bytes: &[u8]) -> bool {
		self.oracle.receive(bytes).unwrap_or(false)
	}

	/// Signal the batch complete, promoting the queue
	pub fn finish(mut self) {
		self.finished = true;
		self.oracle.finish_job(self.id);
	}
}

impl Drop for BlockBatch {
	fn drop(&mut self) {
		if !self.finished {
			self.oracle.finish_job(self.id);
		}
	}
}

// Light structural check: an 80-byte header, a compact-size transaction
// count of at least one, and enough trailing bytes to plausibly carry the
// declared transactions. Script-level validation is the validator's job.
fn parse_block_structure(bytes: &[u8]) -> bool {
	if bytes.len() <= HEADER_LEN {
		return false;
	}
	let body = &bytes[HEADER_LEN..];
	let (tx_count, consumed) = match read_compact_size(body) {
		Some(v) => v,
		None => return false,
	};
	tx_count >= 1 && (body.len() - consumed) as u64 >= tx_count
}

fn read_compact_size(bytes: &[u8]) -> Option<(u64, usize)> {
	let first = *bytes.first()?;
	match first {
		0xfd => {
			if bytes.len() < 3 {
				return None;
			}
			Some((u64::from(bytes[1]) | u64::from(bytes[2]) << 8, 3))
		}
		0xfe => {
			if bytes.len() < 5 {
				return None;
			}
			let mut v = 0u64;
			for i in 0..4 {
				v |= u64::from(bytes[1 + i]) << (8 * i);
			}
			Some((v, 5))
		}
		0xff => {
			if bytes.len() < 9 {
				return None;
			}
			let mut v = 0u64;
			for i in 0..8 {
				v |= u64::from(bytes[1 + i]) << (8 * i);
			}
			Some((v, 9))
		}
		n => Some((u64::from(n), 1)),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn compact_size_forms() {
		assert_eq!(read_compact_size(&[5]), Some((5, 1)));
		assert_eq!(read_compact_size(&[0xfd, 0x01, 0x02]), Some((0x0201, 3)));
		assert_eq!(read_compact_size(&[]), None);
		assert_eq!(read_compact_size(&[0xfd, 0x01]), None);
	}

	#[test]
	fn block_structure_requires_txs() {
		let mut block = vec![0u8; HEADER_LEN];
		assert!(!parse_block_structure(&block));
		block.push(0); // zero transactions
		assert!(!parse_block_structure(&block));
		block[HEADER_LEN] = 1;
		assert!(!parse_block_structure(&block)); // declared tx but no bytes
		block.push(0xaa);
		assert!(parse_block_structure(&block));
	}
}
