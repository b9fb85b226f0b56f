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

//! The rescan job: rewinds the scan cursor on explicit user request and
//! kicks the scanner back over the rewound range, both for user-initiated
//! rescans and after a reorganization replaced part of the chain.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::cache::SubchainCache;
use crate::core::pos::BlockPosition;
use crate::subchain::job::{JobLogic, JobType, Work};
use crate::types::SubchainID;

pub struct RescanJob {
	subchain_id: SubchainID,
	cache: Arc<SubchainCache>,
	to_scan: Sender<Work>,
}

impl RescanJob {
	pub fn new(
		subchain_id: SubchainID,
		cache: Arc<SubchainCache>,
		to_scan: Sender<Work>,
	) -> RescanJob {
		RescanJob {
			subchain_id,
			cache,
			to_scan,
		}
	}

	fn rewind(&mut self, target: BlockPosition) {
		let current = self.cache.get_last_scanned(&self.subchain_id);
		if current <= target {
			debug!(
				"rescan: cursor {} already at or below {}",
				current, target
			);
			return;
		}
		let committed = match self.cache.batch() {
			Ok(batch) => {
				let ok = self
					.cache
					.set_last_scanned(&self.subchain_id, target, &batch);
				ok && batch.commit().is_ok()
			}
			Err(e) => {
				error!("rescan: cannot open batch: {}", e);
				false
			}
		};
		if !committed {
			error!("rescan: failed to rewind cursor to {}", target);
			self.cache.clear();
			return;
		}
		info!("rescanning {} from {}", self.subchain_id, target);
		let _ = self.to_scan.send(Work::StartScan);
	}
}

impl JobLogic for RescanJob {
	fn job_type(&self) -> JobType {
		JobType::Rescan
	}

	fn handle(&mut self, _epoch: Option<u64>, work: Work) {
		match work {
			Work::DoRescan(target) => self.rewind(target),
			_ => trace!("rescan: unhandled message"),
		}
	}

	// The scan cursor was already rewound under the header lock; all that
	// remains is feeding the replaced range back through the scanner.
	fn on_finish_reorg(&mut self) {
		let _ = self.to_scan.send(Work::StartScan);
	}
}
