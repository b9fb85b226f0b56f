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

//! The authoritative view of one chain's header DAG: acceptance of new
//! headers under parent-link, checkpoint and proof-of-work validation,
//! election of the best tip by cumulative work, and computation of
//! reorganization plans when the best tip moves across branches.
//!
//! All mutation is serialized behind a single writer; queries take a shared
//! lock on the same state and always observe a consistent snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::chains::Chain;
use crate::core::hash::Hash;
use crate::core::header::{Header, WireHeader, HEADER_LEN};
use crate::core::pos::BlockPosition;
use crate::error::{Error, ErrorKind};
use crate::store_schema::ChainStore;
use crate::types::{ChainEvent, EventBus, ReorgPlan};
use crate::util::RwLock;

/// Result of a single header submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
	/// Header accepted and stored
	Accepted,
	/// Header was already in the DAG; submission is idempotent
	AlreadyKnown,
}

/// A reorg participant task run under the oracle's exclusive lock. Returning
/// false vetoes the reorganization chain-wide.
pub type ReorgTask = Box<dyn FnMut(&ChainView<'_>, &ReorgPlan) -> bool + Send>;

enum OracleState {
	Normal,
	Reorg(ReorgPlan),
}

struct HeaderData {
	chain: Chain,
	headers: HashMap<Hash, Header>,
	cum_work: HashMap<Hash, u128>,
	tips: HashSet<Hash>,
	invalid: HashSet<Hash>,
	// best chain hash per height, index == height
	best: Vec<Hash>,
	checkpoint: Option<(i64, Hash)>,
	state: OracleState,
	epoch: u64,
	remote_height: i64,
	// registered reorg participants; with none, reorgs are final immediately
	participants: usize,
}

impl HeaderData {
	fn best_tip(&self) -> BlockPosition {
		let height = self.best.len() as i64 - 1;
		BlockPosition::new(height, self.best[height as usize])
	}

	fn best_work(&self) -> u128 {
		let tip = self.best_tip();
		*self.cum_work.get(&tip.hash).unwrap_or(&0)
	}

	fn best_hash(&self, height: i64) -> Option<Hash> {
		if height < 0 || height >= self.best.len() as i64 {
			None
		} else {
			Some(self.best[height as usize])
		}
	}

	fn position_of(&self, hash: &Hash) -> Option<BlockPosition> {
		self.headers
			.get(hash)
			.map(|h| BlockPosition::new(h.height, h.hash))
	}

	fn is_in_best_chain_pos(&self, pos: &BlockPosition) -> bool {
		self.best_hash(pos.height) == Some(pos.hash)
	}

	fn is_in_best_chain_hash(&self, hash: &Hash) -> bool {
		match self.headers.get(hash) {
			Some(h) => self.best_hash(h.height) == Some(*hash),
			None => false,
		}
	}

	// Ordered positions that must be rolled back to move from `tip` to the
	// best chain, from `tip` down to (exclusive) the fork point.
	fn calculate_reorg(&self, tip: &BlockPosition) -> Result<Vec<BlockPosition>, Error> {
		if !self.headers.contains_key(&tip.hash) {
			return Err(ErrorKind::UnknownHeader(tip.hash).into());
		}
		let mut out = vec![];
		let mut current = *tip;
		while !self.is_in_best_chain_pos(&current) {
			out.push(current);
			let header = self
				.headers
				.get(&current.hash)
				.ok_or_else(|| Error::from(ErrorKind::UnknownHeader(current.hash)))?;
			if header.height == 0 {
				break;
			}
			current = self
				.position_of(&header.prev_hash)
				.ok_or_else(|| Error::from(ErrorKind::UnknownHeader(header.prev_hash)))?;
		}
		Ok(out)
	}

	// The highest ancestor of `pos` lying on the best chain, plus the
	// current best tip.
	fn common_parent(&self, pos: &BlockPosition) -> (BlockPosition, BlockPosition) {
		let genesis = BlockPosition::new(0, self.best[0]);
		let mut current = *pos;
		loop {
			if self.is_in_best_chain_pos(&current) {
				return (current, self.best_tip());
			}
			match self.headers.get(&current.hash) {
				Some(h) if h.height > 0 => match self.position_of(&h.prev_hash) {
					Some(parent) => current = parent,
					None => return (genesis, self.best_tip()),
				},
				_ => return (genesis, self.best_tip()),
			}
		}
	}

	// Path from `start` back to the common ancestor with `target`,
	// inclusive, highest first, truncated to `limit` entries.
	fn ancestors(
		&self,
		start: &BlockPosition,
		target: &BlockPosition,
		limit: usize,
	) -> Result<Vec<BlockPosition>, Error> {
		if !self.headers.contains_key(&start.hash) {
			return Err(ErrorKind::UnknownHeader(start.hash).into());
		}
		if !self.headers.contains_key(&target.hash) {
			return Err(ErrorKind::UnknownHeader(target.hash).into());
		}

		// walk the target branch down to start's height, collecting its
		// ancestry line for membership checks
		let mut target_line = HashSet::new();
		let mut cursor = *target;
		loop {
			target_line.insert(cursor.hash);
			let header = &self.headers[&cursor.hash];
			if header.height == 0 {
				break;
			}
			match self.position_of(&header.prev_hash) {
				Some(parent) => cursor = parent,
				None => break,
			}
		}

		let mut out = vec![];
		let mut current = *start;
		loop {
			out.push(current);
			if target_line.contains(&current.hash) || out.len() >= limit {
				break;
			}
			let header = &self.headers[&current.hash];
			if header.height == 0 {
				break;
			}
			match self.position_of(&header.prev_hash) {
				Some(parent) => current = parent,
				None => break,
			}
		}
		Ok(out)
	}

	// Highest ancestor position shared between the candidate branch tip and
	// the current best chain.
	fn fork_point(&self, candidate: &Hash) -> BlockPosition {
		let mut current = self
			.position_of(candidate)
			.expect("fork point of unknown header");
		loop {
			if self.is_in_best_chain_pos(&current) {
				return current;
			}
			let header = &self.headers[&current.hash];
			assert!(header.height > 0, "branches share genesis");
			current = self
				.position_of(&header.prev_hash)
				.expect("parent link broken");
		}
	}

	// The hash chain from (exclusive) `ancestor` up to (inclusive) `tip`,
	// walking parent links on the candidate branch.
	fn branch_hashes(&self, ancestor: &BlockPosition, tip: &Hash) -> Vec<Hash> {
		let mut out = vec![];
		let mut current = *tip;
		loop {
			let header = &self.headers[&current];
			if header.height <= ancestor.height {
				break;
			}
			out.push(current);
			current = header.prev_hash;
		}
		out.reverse();
		out
	}

	// Candidate displaces the best tip iff it carries strictly more work, or
	// equal work with the lexicographically smaller hash. The intrinsic
	// tie-break keeps best-chain election independent of arrival order.
	fn better_than_best(&self, cum_work: u128, hash: &Hash) -> bool {
		let best_work = self.best_work();
		cum_work > best_work || (cum_work == best_work && *hash < self.best_tip().hash)
	}
}

/// Read-only view of the header DAG handed to reorg participant tasks while
/// the oracle holds its exclusive lock.
pub struct ChainView<'a> {
	data: &'a HeaderData,
}

impl<'a> ChainView<'a> {
	/// Current best tip
	pub fn best_chain(&self) -> BlockPosition {
		self.data.best_tip()
	}

	/// Best-chain hash at the given height
	pub fn best_hash(&self, height: i64) -> Option<Hash> {
		self.data.best_hash(height)
	}

	/// Whether the position is on the best chain
	pub fn is_in_best_chain(&self, pos: &BlockPosition) -> bool {
		self.data.is_in_best_chain_pos(pos)
	}

	/// Positions rolled back moving from `tip` to the best chain
	pub fn calculate_reorg(&self, tip: &BlockPosition) -> Result<Vec<BlockPosition>, Error> {
		self.data.calculate_reorg(tip)
	}

	/// Highest common ancestor with the best chain, plus the best tip
	pub fn common_parent(&self, pos: &BlockPosition) -> (BlockPosition, BlockPosition) {
		self.data.common_parent(pos)
	}

	/// Load a header by hash
	pub fn load_header(&self, hash: &Hash) -> Option<Header> {
		self.data.headers.get(hash).cloned()
	}
}

/// The authoritative header oracle for one chain.
pub struct HeaderOracle {
	chain: Chain,
	db: Arc<ChainStore>,
	events: Arc<EventBus>,
	inner: RwLock<HeaderData>,
}

impl HeaderOracle {
	/// Open the oracle over the given store, seeding genesis if the store is
	/// empty and rebuilding the in-memory DAG otherwise.
	pub fn new(db: Arc<ChainStore>, events: Arc<EventBus>) -> Result<HeaderOracle, Error> {
		let chain = db.chain();
		let params = chain.params();

		let mut data = HeaderData {
			chain,
			headers: HashMap::new(),
			cum_work: HashMap::new(),
			tips: HashSet::new(),
			invalid: HashSet::new(),
			best: vec![],
			checkpoint: params.checkpoint,
			state: OracleState::Normal,
			epoch: 0,
			remote_height: 0,
			participants: 0,
		};

		let stored = db.all_headers()?;
		if stored.is_empty() {
			let genesis = Header::from_wire(chain, &params.genesis_header(), 0)?;
			db.commit_header_update(
				&[&genesis],
				&[],
				&[(0, genesis.hash)],
				&BlockPosition::new(0, genesis.hash),
			)?;
			info!(
				"{}: initialized header store at genesis {}",
				chain, genesis.hash
			);
			data.cum_work.insert(genesis.hash, genesis.work);
			data.tips.insert(genesis.hash);
			data.best.push(genesis.hash);
			data.headers.insert(genesis.hash, genesis);
		} else {
			rebuild(&mut data, &db, stored)?;
			info!(
				"{}: loaded {} headers, best tip {}",
				chain,
				data.headers.len(),
				data.best_tip()
			);
		}

		Ok(HeaderOracle {
			chain,
			db,
			events,
			inner: RwLock::new(data),
		})
	}

	/// The chain this oracle serves
	pub fn chain(&self) -> Chain {
		self.chain
	}

	/// Validate and store a single header. Fails with `ParentUnknown`,
	/// `CheckpointViolation` or `PowInvalid`; re-adding a known header is
	/// idempotent.
	pub fn add_header(&self, header: Header) -> Result<AddOutcome, Error> {
		let mut inner = self.inner.write();
		let (outcome, event) = add_one(&mut inner, &self.db, header)?;
		drop(inner);
		if let Some(event) = event {
			self.events.publish(event);
		}
		Ok(outcome)
	}

	/// Validate and store a batch of headers, stopping at the first
	/// non-recoverable failure. Returns the number accepted.
	pub fn add_headers(&self, headers: Vec<Header>) -> Result<usize, Error> {
		let mut accepted = 0;
		for header in headers {
			match self.add_header(header) {
				Ok(_) => accepted += 1,
				Err(ref e) if e.is_recoverable() => {
					debug!("{}: deferring header: {}", self.chain, e);
				}
				Err(e) => return Err(e),
			}
		}
		Ok(accepted)
	}

	/// Parse raw wire bytes and add the header. The parent must already be
	/// known so the height can be derived.
	pub fn add_header_bytes(&self, raw: &[u8]) -> Result<AddOutcome, Error> {
		let header = self.parse_wire_header(raw)?;
		self.add_header(header)
	}

	/// Lower-trust ingestion path for a full block's bytes: only the header
	/// prefix is considered.
	pub fn submit_block(&self, block_bytes: &[u8]) -> Result<AddOutcome, Error> {
		if block_bytes.len() < HEADER_LEN {
			return Err(ErrorKind::MalformedHeader("short block".to_owned()).into());
		}
		self.add_header_bytes(&block_bytes[..HEADER_LEN])
	}

	/// Ingest a run of raw headers received through the sync layer. Returns
	/// the hashes accepted, in order.
	pub fn process_sync_data(&self, headers: &[Vec<u8>]) -> Result<Vec<Hash>, Error> {
		let mut accepted = vec![];
		for raw in headers {
			match self.add_header_bytes(raw) {
				Ok(_) => {
					accepted.push((self.chain.params().hash_fn)(raw));
				}
				Err(ref e) if e.is_recoverable() => {
					debug!("{}: sync data deferred: {}", self.chain, e);
				}
				Err(e) => {
					warn!("{}: sync data rejected: {}", self.chain, e);
					break;
				}
			}
		}
		Ok(accepted)
	}

	fn parse_wire_header(&self, raw: &[u8]) -> Result<Header, Error> {
		let wire = WireHeader::from_wire_bytes(raw)
			.map_err(|_| Error::from(ErrorKind::MalformedHeader("bad length".to_owned())))?;
		let inner = self.inner.read();
		let height = if wire.prev_hash.is_zero() {
			0
		} else {
			match inner.headers.get(&wire.prev_hash) {
				Some(parent) => parent.height + 1,
				None => return Err(ErrorKind::ParentUnknown(wire.prev_hash).into()),
			}
		};
		drop(inner);
		Header::from_wire(self.chain, raw, height).map_err(From::from)
	}

	/// Current best tip
	pub fn best_chain(&self) -> BlockPosition {
		self.inner.read().best_tip()
	}

	/// Best-chain hash at the given height
	pub fn best_hash(&self, height: i64) -> Option<Hash> {
		self.inner.read().best_hash(height)
	}

	/// Best-chain hash at the given height, provided `check` is still on the
	/// best chain
	pub fn best_hash_checked(&self, height: i64, check: &BlockPosition) -> Option<Hash> {
		let inner = self.inner.read();
		if inner.is_in_best_chain_pos(check) {
			inner.best_hash(height)
		} else {
			None
		}
	}

	/// Up to `limit` best-chain hashes starting at `start` height, ascending
	pub fn best_hashes(&self, start: i64, limit: usize) -> Vec<Hash> {
		let inner = self.inner.read();
		let mut out = vec![];
		let mut height = start.max(0);
		while out.len() < limit {
			match inner.best_hash(height) {
				Some(h) => out.push(h),
				None => break,
			}
			height += 1;
		}
		out
	}

	/// Locator-style query: returns best-chain hashes after the highest
	/// locator entry found on the best chain, ascending, stopping after
	/// including `stop` (if encountered) or `limit` entries. Falls back to
	/// scanning from the block after genesis when no entry matches.
	pub fn best_hashes_from_locator(
		&self,
		previous: &[Hash],
		stop: &Hash,
		limit: usize,
	) -> Vec<Hash> {
		let inner = self.inner.read();
		let mut start = 1;
		let mut found = -1i64;
		for hash in previous {
			if let Some(header) = inner.headers.get(hash) {
				if inner.best_hash(header.height) == Some(*hash) && header.height > found {
					found = header.height;
				}
			}
		}
		if found >= 0 {
			start = found + 1;
		}

		let mut out = vec![];
		let mut height = start;
		while out.len() < limit {
			match inner.best_hash(height) {
				Some(h) => {
					out.push(h);
					if h == *stop {
						break;
					}
				}
				None => break,
			}
			height += 1;
		}
		out
	}

	/// Path from `start` back to the common ancestor with `target`,
	/// inclusive, highest first. Fails if either position is unknown.
	pub fn ancestors(
		&self,
		start: &BlockPosition,
		target: &BlockPosition,
		limit: usize,
	) -> Result<Vec<BlockPosition>, Error> {
		self.inner.read().ancestors(start, target, limit)
	}

	/// Ordered positions that must be rolled back to move from `tip` to the
	/// best chain
	pub fn calculate_reorg(&self, tip: &BlockPosition) -> Result<Vec<BlockPosition>, Error> {
		self.inner.read().calculate_reorg(tip)
	}

	/// Highest ancestor of `pos` on the best chain, plus the best tip
	pub fn common_parent(&self, pos: &BlockPosition) -> (BlockPosition, BlockPosition) {
		self.inner.read().common_parent(pos)
	}

	/// Run reorg participant tasks under the exclusive header lock. Every
	/// task sees the same consistent snapshot; any task returning false
	/// aborts the reorganization and the best chain reverts to the prior
	/// tip. Returns whether the reorg (if any was pending) was committed.
	pub fn execute(&self, mut jobs: Vec<ReorgTask>) -> bool {
		let mut inner = self.inner.write();
		let plan = match inner.state {
			OracleState::Normal => return true,
			OracleState::Reorg(ref plan) => plan.clone(),
		};

		let approved = {
			let view = ChainView { data: &*inner };
			jobs.iter_mut().all(|job| job(&view, &plan))
		};

		if approved {
			inner.state = OracleState::Normal;
			debug!("{}: reorg {} acknowledged by all participants", self.chain, plan.epoch);
			true
		} else {
			warn!("{}: reorg {} vetoed, reverting to {}", self.chain, plan.epoch, plan.old_tip);
			revert_reorg(&mut inner, &self.db, &plan);
			inner.state = OracleState::Normal;
			false
		}
	}

	/// Set of tips other than the best one
	pub fn siblings(&self) -> HashSet<Hash> {
		let inner = self.inner.read();
		let best = inner.best_tip().hash;
		inner
			.tips
			.iter()
			.filter(|h| **h != best)
			.cloned()
			.collect()
	}

	/// Whether a header is known
	pub fn exists(&self, hash: &Hash) -> bool {
		self.inner.read().headers.contains_key(hash)
	}

	/// Load a header by hash
	pub fn load_header(&self, hash: &Hash) -> Option<Header> {
		self.inner.read().headers.get(hash).cloned()
	}

	/// Whether the hash is on the best chain
	pub fn is_in_best_chain(&self, hash: &Hash) -> bool {
		self.inner.read().is_in_best_chain_hash(hash)
	}

	/// Whether the position is on the best chain
	pub fn is_in_best_chain_pos(&self, pos: &BlockPosition) -> bool {
		self.inner.read().is_in_best_chain_pos(pos)
	}

	/// Best-chain position at the given height, or the `none` position
	pub fn get_position(&self, height: i64) -> BlockPosition {
		match self.inner.read().best_hash(height) {
			Some(hash) => BlockPosition::new(height, hash),
			None => BlockPosition::none(),
		}
	}

	/// Hashes of the best chain from the tip downward, most recent first
	pub fn recent_hashes(&self, limit: usize) -> Vec<Hash> {
		let inner = self.inner.read();
		inner.best.iter().rev().take(limit).cloned().collect()
	}

	/// Install a checkpoint. Only one may be active; returns false if one
	/// already is. Headers already accepted on the wrong fork at checkpoint
	/// height are retroactively marked invalid but retained for debugging.
	pub fn add_checkpoint(&self, height: i64, required: Hash) -> bool {
		let mut inner = self.inner.write();
		if inner.checkpoint.is_some() {
			return false;
		}
		inner.checkpoint = Some((height, required));
		let event = apply_checkpoint(&mut inner, &self.db);
		drop(inner);
		if let Some(event) = event {
			self.events.publish(event);
		}
		true
	}

	/// Remove the active checkpoint, if any. Headers it invalidated become
	/// eligible again.
	pub fn delete_checkpoint(&self) -> bool {
		let mut inner = self.inner.write();
		if inner.checkpoint.is_none() {
			return false;
		}
		inner.checkpoint = None;
		inner.invalid.clear();
		let event = reelect_best(&mut inner, &self.db);
		drop(inner);
		if let Some(event) = event {
			self.events.publish(event);
		}
		true
	}

	/// The active checkpoint as a position, or the `none` position
	pub fn get_checkpoint(&self) -> BlockPosition {
		match self.inner.read().checkpoint {
			Some((height, hash)) => BlockPosition::new(height, hash),
			None => BlockPosition::none(),
		}
	}

	/// The compiled default checkpoint for this chain
	pub fn get_default_checkpoint(&self) -> BlockPosition {
		match self.chain.params().checkpoint {
			Some((height, hash)) => BlockPosition::new(height, hash),
			None => BlockPosition::none(),
		}
	}

	/// Register a reorg participant. While any are registered, a tip change
	/// across branches parks the oracle in the reorg state until `execute`
	/// collects every participant's verdict; with none, reorgs are final as
	/// soon as they are computed.
	pub fn register_reorg_participant(&self) {
		self.inner.write().participants += 1;
	}

	/// Record the highest height advertised by remote peers
	pub fn update_remote_height(&self, height: i64) {
		let mut inner = self.inner.write();
		if height > inner.remote_height {
			inner.remote_height = height;
		}
	}

	/// The height this chain is expected to reach: the maximum of the
	/// compiled checkpoint and the remote-advertised height
	pub fn target_height(&self) -> i64 {
		let inner = self.inner.read();
		inner
			.remote_height
			.max(inner.checkpoint.map(|(h, _)| h).unwrap_or(0))
	}

	/// Whether the local best chain has reached the target height
	pub fn is_synchronized(&self) -> bool {
		let inner = self.inner.read();
		let target = inner
			.remote_height
			.max(inner.checkpoint.map(|(h, _)| h).unwrap_or(0));
		inner.best_tip().height >= target
	}
}

// Rebuild the in-memory DAG from stored headers: sort by height, re-link,
// recompute cumulative work and tips, then load the persisted best index.
fn rebuild(data: &mut HeaderData, db: &ChainStore, stored: Vec<Header>) -> Result<(), Error> {
	let mut by_height = stored;
	by_height.sort_by_key(|h| h.height);

	for header in by_height {
		let cum = if header.height == 0 {
			header.work
		} else {
			match data.cum_work.get(&header.prev_hash) {
				Some(parent) => parent + header.work,
				None => {
					warn!(
						"{}: dropping stored header {} with missing parent",
						data.chain, header.hash
					);
					continue;
				}
			}
		};
		data.tips.remove(&header.prev_hash);
		data.tips.insert(header.hash);
		data.cum_work.insert(header.hash, cum);
		data.headers.insert(header.hash, header);
	}

	let head = db
		.head()?
		.ok_or_else(|| Error::from(ErrorKind::Other("missing head".to_owned())))?;
	for height in 0..=head.height {
		let hash = db.get_best(height)?.ok_or_else(|| {
			Error::from(ErrorKind::Other(format!(
				"best index missing height {}",
				height
			)))
		})?;
		data.best.push(hash);
	}

	// recompute checkpoint invalidation
	if let Some((cp_height, cp_hash)) = data.checkpoint {
		let wrong: Vec<Hash> = data
			.headers
			.values()
			.filter(|h| h.height == cp_height && h.hash != cp_hash)
			.map(|h| h.hash)
			.collect();
		for hash in wrong {
			mark_invalid_with_descendants(data, hash);
		}
	}

	Ok(())
}

// Validate and insert one header under the write lock, returning the event
// to publish after the lock drops.
fn add_one(
	data: &mut HeaderData,
	db: &ChainStore,
	mut header: Header,
) -> Result<(AddOutcome, Option<ChainEvent>), Error> {
	let chain = data.chain;

	if data.headers.contains_key(&header.hash) {
		return Ok((AddOutcome::AlreadyKnown, None));
	}
	if header.raw.len() != HEADER_LEN || !header.verify_hash(chain) {
		return Err(ErrorKind::MalformedHeader("bytes do not round-trip".to_owned()).into());
	}

	let parent_cum = if header.prev_hash.is_zero() {
		// only the compiled genesis may sit at height zero
		if header.hash != chain.params().genesis_hash {
			return Err(ErrorKind::CheckpointViolation(0, header.hash).into());
		}
		header.height = 0;
		0
	} else {
		let parent_height = match data.headers.get(&header.prev_hash) {
			Some(parent) => parent.height,
			None => return Err(ErrorKind::ParentUnknown(header.prev_hash).into()),
		};
		header.height = parent_height + 1;
		if data.invalid.contains(&header.prev_hash) {
			// the child of an invalid header is invalid; retain for debugging
			let height = header.height;
			let hash = header.hash;
			store_invalid(data, db, header)?;
			return Err(ErrorKind::CheckpointViolation(height, hash).into());
		}
		*data.cum_work.get(&header.prev_hash).unwrap_or(&0)
	};

	if let Some((cp_height, cp_hash)) = data.checkpoint {
		if header.height == cp_height && header.hash != cp_hash {
			let height = header.height;
			let hash = header.hash;
			store_invalid(data, db, header)?;
			return Err(ErrorKind::CheckpointViolation(height, hash).into());
		}
	}

	if !header.verify_pow(chain) {
		return Err(ErrorKind::PowInvalid(header.hash).into());
	}

	let cum = parent_cum.saturating_add(header.work);
	let hash = header.hash;
	let prev = header.prev_hash;
	let height = header.height;

	if !data.better_than_best(cum, &hash) {
		// fork growth, no tip change
		db.commit_header_update(&[&header], &[], &[], &data.best_tip())?;
		data.tips.remove(&prev);
		data.tips.insert(hash);
		data.cum_work.insert(hash, cum);
		data.headers.insert(hash, header);
		return Ok((AddOutcome::Accepted, None));
	}

	// candidate wins the tip election; a true extension appends at the end
	// of the best chain, anything else rolls something back
	let extends_best = height == data.best.len() as i64
		&& height > 0
		&& data.best_hash(height - 1) == Some(prev);

	if let OracleState::Reorg(_) = data.state {
		if !extends_best {
			// a competing branch may not displace the pending candidate
			return Err(ErrorKind::ReorgInProgress.into());
		}
	}

	if extends_best || height == 0 {
		let new_tip = BlockPosition::new(height, hash);
		db.commit_header_update(&[&header], &[], &[(height, hash)], &new_tip)?;
		data.tips.remove(&prev);
		data.tips.insert(hash);
		data.cum_work.insert(hash, cum);
		data.headers.insert(hash, header);
		data.best.push(hash);
		// an extension during a pending reorg grows the same candidate; the
		// plan's new_tip stays at the point participants were told about
		debug!("{}: new tip {}", chain, new_tip);
		return Ok((AddOutcome::Accepted, Some(ChainEvent::NewTip(new_tip))));
	}

	// a fork displaced the best tip: compute and apply the reorg plan
	let old_tip = data.best_tip();
	data.tips.remove(&prev);
	data.tips.insert(hash);
	data.cum_work.insert(hash, cum);
	data.headers.insert(hash, header);

	let ancestor = data.fork_point(&hash);
	let rolled_back: Vec<BlockPosition> = (ancestor.height + 1..=old_tip.height)
		.rev()
		.map(|h| BlockPosition::new(h, data.best[h as usize]))
		.collect();
	let branch = data.branch_hashes(&ancestor, &hash);

	data.epoch += 1;
	let plan = ReorgPlan {
		epoch: data.epoch,
		ancestor,
		old_tip,
		new_tip: BlockPosition::new(height, hash),
		rolled_back,
	};

	let removed: Vec<i64> = if old_tip.height > height {
		(height + 1..=old_tip.height).collect()
	} else {
		vec![]
	};
	let added: Vec<(i64, Hash)> = branch
		.iter()
		.enumerate()
		.map(|(i, h)| (ancestor.height + 1 + i as i64, *h))
		.collect();

	data.best.truncate((ancestor.height + 1) as usize);
	data.best.extend(branch);

	let stored_header = data.headers[&hash].clone();
	db.commit_header_update(&[&stored_header], &removed, &added, &plan.new_tip)?;

	info!(
		"{}: reorg {}: {} -> {} (fork point {})",
		chain, plan.epoch, plan.old_tip, plan.new_tip, plan.ancestor
	);
	if data.participants > 0 {
		data.state = OracleState::Reorg(plan.clone());
	}
	Ok((AddOutcome::Accepted, Some(ChainEvent::Reorg(plan))))
}

// Store a header that failed checkpoint validation so the rejected branch
// remains inspectable.
fn store_invalid(data: &mut HeaderData, db: &ChainStore, header: Header) -> Result<(), Error> {
	db.commit_header_update(&[&header], &[], &[], &data.best_tip())?;
	let hash = header.hash;
	data.tips.remove(&header.prev_hash);
	data.tips.insert(hash);
	let parent_cum = *data.cum_work.get(&header.prev_hash).unwrap_or(&0);
	data.cum_work.insert(hash, parent_cum.saturating_add(header.work));
	data.headers.insert(hash, header);
	data.invalid.insert(hash);
	Ok(())
}

fn mark_invalid_with_descendants(data: &mut HeaderData, root: Hash) {
	let mut stack = vec![root];
	while let Some(hash) = stack.pop() {
		if !data.invalid.insert(hash) {
			continue;
		}
		let children: Vec<Hash> = data
			.headers
			.values()
			.filter(|h| h.prev_hash == hash)
			.map(|h| h.hash)
			.collect();
		stack.extend(children);
	}
}

// Re-run best-tip election among valid tips, rewriting the best index and
// emitting a reorg event if the tip moved.
fn reelect_best(data: &mut HeaderData, db: &ChainStore) -> Option<ChainEvent> {
	let old_tip = data.best_tip();
	let winner = data
		.tips
		.iter()
		.filter(|h| !data.invalid.contains(h))
		.max_by(|a, b| {
			let wa = data.cum_work.get(*a).unwrap_or(&0);
			let wb = data.cum_work.get(*b).unwrap_or(&0);
			// equal work resolved toward the smaller hash
			wa.cmp(wb).then_with(|| b.cmp(a))
		})
		.cloned()?;

	if winner == old_tip.hash {
		return None;
	}

	let winner_pos = data.position_of(&winner)?;
	let ancestor = data.fork_point(&winner);
	let rolled_back: Vec<BlockPosition> = (ancestor.height + 1..=old_tip.height)
		.rev()
		.map(|h| BlockPosition::new(h, data.best[h as usize]))
		.collect();
	let branch = data.branch_hashes(&ancestor, &winner);

	data.epoch += 1;
	let plan = ReorgPlan {
		epoch: data.epoch,
		ancestor,
		old_tip,
		new_tip: winner_pos,
		rolled_back,
	};

	let removed: Vec<i64> = if old_tip.height > winner_pos.height {
		(winner_pos.height + 1..=old_tip.height).collect()
	} else {
		vec![]
	};
	let added: Vec<(i64, Hash)> = branch
		.iter()
		.enumerate()
		.map(|(i, h)| (ancestor.height + 1 + i as i64, *h))
		.collect();

	data.best.truncate((ancestor.height + 1) as usize);
	data.best.extend(branch);

	if let Err(e) = db.commit_header_update(&[], &removed, &added, &plan.new_tip) {
		error!("{}: fatal store error applying reorg: {}", data.chain, e);
		panic!("unrecoverable storage failure: {}", e);
	}

	if data.participants > 0 {
		data.state = OracleState::Reorg(plan.clone());
	}
	Some(ChainEvent::Reorg(plan))
}

// Checkpoint activated after the fact: invalidate wrong-fork headers at
// checkpoint height and re-elect the best chain.
fn apply_checkpoint(data: &mut HeaderData, db: &ChainStore) -> Option<ChainEvent> {
	let (cp_height, cp_hash) = data.checkpoint?;
	let wrong: Vec<Hash> = data
		.headers
		.values()
		.filter(|h| h.height == cp_height && h.hash != cp_hash)
		.map(|h| h.hash)
		.collect();
	if wrong.is_empty() {
		return None;
	}
	for hash in wrong {
		mark_invalid_with_descendants(data, hash);
	}
	reelect_best(data, db)
}

// A participant vetoed: restore the best chain to the old tip recorded in
// the plan.
fn revert_reorg(data: &mut HeaderData, db: &ChainStore, plan: &ReorgPlan) {
	// the candidate may have grown since the plan was computed
	let current_height = data.best.len() as i64 - 1;
	let removed: Vec<i64> = if current_height > plan.old_tip.height {
		(plan.old_tip.height + 1..=current_height).collect()
	} else {
		vec![]
	};
	let added: Vec<(i64, Hash)> = plan
		.rolled_back
		.iter()
		.rev()
		.map(|p| (p.height, p.hash))
		.collect();

	data.best.truncate((plan.ancestor.height + 1) as usize);
	for (_, hash) in &added {
		data.best.push(*hash);
	}

	if let Err(e) = db.commit_header_update(&[], &removed, &added, &plan.old_tip) {
		error!("{}: fatal store error reverting reorg: {}", data.chain, e);
		panic!("unrecoverable storage failure: {}", e);
	}
}
