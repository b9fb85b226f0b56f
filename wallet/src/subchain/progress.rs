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

//! The progress job: fan-in point for scan advancement. Publishes progress
//! upstream and backs the `check_cache` query.

use std::sync::Arc;

use crate::cache::SubchainCache;
use crate::subchain::job::{JobLogic, JobType, Work};
use crate::subchain::SubchainShared;
use crate::types::SubchainID;

pub struct ProgressJob {
	subchain_id: SubchainID,
	cache: Arc<SubchainCache>,
	shared: Arc<SubchainShared>,
}

impl ProgressJob {
	pub fn new(
		subchain_id: SubchainID,
		cache: Arc<SubchainCache>,
		shared: Arc<SubchainShared>,
	) -> ProgressJob {
		ProgressJob {
			subchain_id,
			cache,
			shared,
		}
	}
}

impl JobLogic for ProgressJob {
	fn job_type(&self) -> JobType {
		JobType::Progress
	}

	fn do_startup(&mut self) {
		// seed the published position from the persisted cursor
		let position = self.cache.get_last_scanned(&self.subchain_id);
		if !position.is_none() {
			self.shared.set_progress(position);
		}
	}

	fn handle(&mut self, _epoch: Option<u64>, work: Work) {
		match work {
			Work::Update { position, .. } => {
				self.shared.set_progress(position);
			}
			_ => trace!("progress: unhandled message"),
		}
	}

	// After a reorg the published position must not exceed the rewound
	// cursor.
	fn on_finish_reorg(&mut self) {
		let position = self.cache.get_last_scanned(&self.subchain_id);
		self.shared.set_progress(position);
	}
}
