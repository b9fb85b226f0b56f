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

//! The scan job: walks compact filters from the last scanned position to
//! the filter tip, emitting process requests for every block whose filter
//! matches a registered pattern, and advancing the scan cursor atomically
//! with the database.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::chain::{FilterOracle, HeaderOracle};
use crate::cache::SubchainCache;
use crate::core::pos::BlockPosition;
use crate::reorg::ReorgCallback;
use crate::subchain::job::{JobLogic, JobType, Work};
use crate::types::SubchainID;

// cap on positions walked per message, so reorg preparation is never
// blocked behind an unbounded scan
const SCAN_BATCH: i64 = 1000;

pub struct ScanJob {
	subchain_id: SubchainID,
	cache: Arc<SubchainCache>,
	headers: Arc<HeaderOracle>,
	filters: Arc<dyn FilterOracle>,
	to_process: Sender<Work>,
	to_progress: Sender<Work>,
	to_self: Sender<Work>,
	filter_tip: Option<BlockPosition>,
	index_ready: bool,
}

impl ScanJob {
	pub fn new(
		subchain_id: SubchainID,
		cache: Arc<SubchainCache>,
		headers: Arc<HeaderOracle>,
		filters: Arc<dyn FilterOracle>,
		to_process: Sender<Work>,
		to_progress: Sender<Work>,
		to_self: Sender<Work>,
	) -> ScanJob {
		ScanJob {
			subchain_id,
			cache,
			headers,
			filters,
			to_process,
			to_progress,
			to_self,
			filter_tip: None,
			index_ready: false,
		}
	}

	fn caught_up(&self, current: &BlockPosition) -> bool {
		match self.filter_tip {
			Some(tip) => *current >= tip,
			None => false,
		}
	}

	fn scan(&mut self, epoch: Option<u64>) {
		if !self.index_ready {
			return;
		}
		let patterns = self.cache.patterns_for_subchain(&self.subchain_id);
		if patterns.is_empty() {
			return;
		}
		let filter_type = self.filters.default_type();
		let tip = match self.filter_tip {
			Some(tip) => tip,
			None => {
				let tip = self.filters.tip(filter_type);
				if tip.is_none() {
					return;
				}
				self.filter_tip = Some(tip);
				tip
			}
		};

		let start = self.cache.get_last_scanned(&self.subchain_id);
		if self.caught_up(&start) {
			return;
		}

		let pattern_refs: Vec<&[u8]> = patterns.iter().map(|p| p.bytes.as_slice()).collect();
		let mut last = start;
		let mut matched = 0usize;
		// genesis carries nothing spendable, scanning begins at height one
		let begin = (start.height + 1).max(1);
		let end = tip.height.min(begin + SCAN_BATCH);
		for height in begin..=end {
			let hash = match self.headers.best_hash(height) {
				Some(h) => h,
				None => break,
			};
			let position = BlockPosition::new(height, hash);
			let filter = match self.filters.load_filter(filter_type, &position) {
				Some(f) => f,
				// filters are sequential; a gap ends this pass
				None => break,
			};
			if self.filters.matches(&filter, &pattern_refs) {
				matched += 1;
				let _ = self.to_process.send(Work::Process(position));
			}
			last = position;
		}

		if last != start {
			let committed = match self.cache.batch() {
				Ok(batch) => {
					let ok = self.cache.set_last_scanned(&self.subchain_id, last, &batch);
					ok && batch.commit().is_ok()
				}
				Err(e) => {
					error!("scan: cannot open batch: {}", e);
					false
				}
			};
			if !committed {
				error!("scan: failed to persist cursor at {}", last);
				self.cache.clear();
				return;
			}
			debug!(
				"scanned {}..{} for {}: {} matches",
				start.height + 1,
				last.height,
				self.subchain_id,
				matched
			);
			let _ = self.to_progress.send(Work::Update {
				epoch,
				position: last,
			});
			// keep walking if the tip is still ahead
			if !self.caught_up(&last) {
				let _ = self.to_self.send(Work::StartScan);
			}
		}
	}
}

impl JobLogic for ScanJob {
	fn job_type(&self) -> JobType {
		JobType::Scan
	}

	fn do_startup(&mut self) {
		// resume from the persisted cursor
		let resume = self.cache.get_last_scanned(&self.subchain_id);
		if !resume.is_none() {
			debug!("resuming scan of {} from {}", self.subchain_id, resume);
		}
	}

	fn handle(&mut self, epoch: Option<u64>, work: Work) {
		match work {
			Work::Filter(filter_type, tip) => {
				if filter_type != self.filters.default_type() {
					return;
				}
				self.filter_tip = Some(tip);
				self.scan(epoch);
			}
			Work::StartScan => {
				self.index_ready = true;
				self.scan(epoch);
			}
			_ => trace!("scan: unhandled message"),
		}
	}

	// Rewind the cursor to the fork point when the scanned branch was
	// reverted. Runs under the header oracle lock; captures only shared
	// handles.
	fn reorg_callback(&self, _plan_epoch: u64) -> ReorgCallback {
		let cache = self.cache.clone();
		let id = self.subchain_id;
		Box::new(move |_view, plan| {
			let current = cache.get_last_scanned(&id);
			if current.height > plan.ancestor.height {
				let batch = match cache.batch() {
					Ok(b) => b,
					Err(e) => {
						error!("reorg rewind: cannot open batch: {}", e);
						return false;
					}
				};
				if !cache.set_last_scanned(&id, plan.ancestor, &batch) {
					return false;
				}
				if let Err(e) = batch.commit() {
					error!("reorg rewind: commit failed: {}", e);
					return false;
				}
				debug!("rewound {} scan cursor to {}", id, plan.ancestor);
			}
			true
		})
	}

	fn on_finish_reorg(&mut self) {
		// the old filter tip may describe the abandoned branch
		self.filter_tip = None;
	}
}
