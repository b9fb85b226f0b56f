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

//! The process job: loads blocks flagged by the scanner, confirms which
//! registered patterns actually occur in them, and hands confirmed matches
//! to the parent coordinator. Blocks not yet downloaded are parked until
//! the block oracle announces their arrival.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::BlockOracle;
use crate::cache::SubchainCache;
use crate::core::hash::Hash;
use crate::core::pos::BlockPosition;
use crate::reorg::ReorgCallback;
use crate::subchain::job::{JobLogic, JobType, Work};
use crate::subchain::SubchainShared;
use crate::types::{PatternData, SubchainID};
use crate::util::Mutex;

pub struct ProcessJob {
	subchain_id: SubchainID,
	cache: Arc<SubchainCache>,
	blocks: Arc<BlockOracle>,
	shared: Arc<SubchainShared>,
	// positions waiting for their block to arrive, keyed by block hash;
	// shared with the reorg callback which prunes reverted entries
	pending: Arc<Mutex<HashMap<Hash, BlockPosition>>>,
}

impl ProcessJob {
	pub fn new(
		subchain_id: SubchainID,
		cache: Arc<SubchainCache>,
		blocks: Arc<BlockOracle>,
		shared: Arc<SubchainShared>,
	) -> ProcessJob {
		ProcessJob {
			subchain_id,
			cache,
			blocks,
			shared,
			pending: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	fn request(&mut self, position: BlockPosition) {
		match self.blocks.load(&position.hash) {
			Ok(mut future) => match future.try_get() {
				Some(bytes) => {
					let bytes = bytes.clone();
					self.confirm(position, &bytes);
				}
				None => {
					trace!("process: parking {} until its block arrives", position);
					self.pending.lock().insert(position.hash, position);
				}
			},
			Err(e) => {
				error!("process: block load failed for {}: {}", position, e);
			}
		}
	}

	fn block_arrived(&mut self, hash: Hash) {
		let position = match self.pending.lock().remove(&hash) {
			Some(p) => p,
			None => return,
		};
		self.request(position);
	}

	fn confirm(&mut self, position: BlockPosition, block: &[u8]) {
		let patterns = self.cache.patterns_for_subchain(&self.subchain_id);
		let matched: Vec<PatternData> = patterns
			.into_iter()
			.filter(|p| contains(block, &p.bytes))
			.collect();
		self.shared.handle_block_matches(&position, &matched, block);
	}

	fn mempool(&mut self, tx: &[u8]) {
		let patterns = self.cache.patterns_for_subchain(&self.subchain_id);
		let matched: Vec<PatternData> = patterns
			.into_iter()
			.filter(|p| contains(tx, &p.bytes))
			.collect();
		if !matched.is_empty() {
			self.shared.handle_mempool_match(&matched, tx);
		}
	}
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
	!needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

impl JobLogic for ProcessJob {
	fn job_type(&self) -> JobType {
		JobType::Process
	}

	fn handle(&mut self, _epoch: Option<u64>, work: Work) {
		match work {
			Work::Process(position) | Work::Reprocess(position) => self.request(position),
			Work::Block(hash) => self.block_arrived(hash),
			Work::Mempool(tx) => self.mempool(&tx),
			_ => trace!("process: unhandled message"),
		}
	}

	// Drop parked work for positions the reorg reverted; their blocks no
	// longer belong to the best chain.
	fn reorg_callback(&self, _plan_epoch: u64) -> ReorgCallback {
		let pending = self.pending.clone();
		Box::new(move |_view, plan| {
			pending
				.lock()
				.retain(|_, position| position.height <= plan.ancestor.height);
			true
		})
	}
}
