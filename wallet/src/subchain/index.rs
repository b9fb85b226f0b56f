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

//! The index job: owns the registered element set for its subchain. When
//! keys are derived it persists the new patterns and the reverse index
//! under one transaction, advances `last_indexed`, and wakes the scanner.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::cache::SubchainCache;
use crate::subchain::job::{JobLogic, JobType, Work};
use crate::types::{ElementID, ElementSource, SubchainID};

pub struct IndexJob {
	subchain_id: SubchainID,
	cache: Arc<SubchainCache>,
	source: Arc<dyn ElementSource>,
	to_scan: Sender<Work>,
}

impl IndexJob {
	pub fn new(
		subchain_id: SubchainID,
		cache: Arc<SubchainCache>,
		source: Arc<dyn ElementSource>,
		to_scan: Sender<Work>,
	) -> IndexJob {
		IndexJob {
			subchain_id,
			cache,
			source,
			to_scan,
		}
	}

	fn index_elements(&mut self) {
		let count = self.source.element_count();
		if count == 0 {
			return;
		}
		let start = match self.cache.get_last_indexed(&self.subchain_id) {
			Some(last) => last + 1,
			None => 0,
		};
		if start >= count {
			return;
		}

		let batch = match self.cache.batch() {
			Ok(b) => b,
			Err(e) => {
				error!("index: cannot open batch: {}", e);
				return;
			}
		};
		let mut ok = true;
		for (index, bytes) in self.source.elements(start, count) {
			let element = ElementID::from_bytes(&bytes);
			ok &= self.cache.add_pattern(&element, index, &bytes, &batch);
			ok &= self
				.cache
				.add_pattern_index(&self.subchain_id, &element, &batch);
		}
		ok &= self
			.cache
			.set_last_indexed(&self.subchain_id, count - 1, &batch);
		if !ok {
			// the cache already rolled its memory back; abandon the batch
			error!("index: failed to persist elements {}..{}", start, count);
			return;
		}
		if let Err(e) = batch.commit() {
			error!("index: commit failed: {}", e);
			self.cache.clear();
			return;
		}
		debug!(
			"indexed elements {}..{} for {}",
			start, count, self.subchain_id
		);
		let _ = self.to_scan.send(Work::StartScan);
	}
}

impl JobLogic for IndexJob {
	fn job_type(&self) -> JobType {
		JobType::Index
	}

	fn do_startup(&mut self) {
		self.index_elements();
	}

	fn handle(&mut self, _epoch: Option<u64>, work: Work) {
		match work {
			Work::Key | Work::StartScan => self.index_elements(),
			_ => trace!("index: unhandled message"),
		}
	}
}
