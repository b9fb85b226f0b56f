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

//! The block download queue: hashes waiting for download, batches handed to
//! peer workers, and promotion of completed entries. At most one in-flight
//! batch covers any given hash.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::hash::Hash;

/// Identifier of one batch of download work
pub type JobId = i64;

/// Upper bound on hashes per batch handed to a single peer
pub const MAX_BATCH: usize = 250;

/// Queue state counters published for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
	/// Batches that could be formed right now
	pub jobs_available: usize,
	/// Hashes waiting or in flight
	pub downloading: usize,
}

pub struct DownloadQueue {
	waiting: VecDeque<Hash>,
	waiting_set: HashSet<Hash>,
	in_flight: HashMap<Hash, JobId>,
	jobs: HashMap<JobId, Vec<Hash>>,
	next_job: JobId,
	peer_target: usize,
}

impl DownloadQueue {
	pub fn new(peer_target: usize) -> DownloadQueue {
		DownloadQueue {
			waiting: VecDeque::new(),
			waiting_set: HashSet::new(),
			in_flight: HashMap::new(),
			jobs: HashMap::new(),
			next_job: 0,
			peer_target: peer_target.max(1),
		}
	}

	/// Add hashes to the queue. Hashes already waiting or covered by an
	/// in-flight batch are skipped.
	pub fn add(&mut self, hashes: &[Hash]) -> QueueCounts {
		for hash in hashes {
			if self.waiting_set.contains(hash) || self.in_flight.contains_key(hash) {
				continue;
			}
			self.waiting_set.insert(*hash);
			self.waiting.push_back(*hash);
		}
		self.counts()
	}

	/// Take the next batch of contiguous waiting hashes, marking them in
	/// flight under a fresh job id.
	pub fn get_work(&mut self) -> Option<(JobId, Vec<Hash>)> {
		if self.waiting.is_empty() {
			return None;
		}
		let batch_size = self.batch_size();
		let id = self.next_job;
		self.next_job += 1;

		let mut hashes = Vec::with_capacity(batch_size);
		while hashes.len() < batch_size {
			match self.waiting.pop_front() {
				Some(hash) => {
					self.waiting_set.remove(&hash);
					self.in_flight.insert(hash, id);
					hashes.push(hash);
				}
				None => break,
			}
		}
		self.jobs.insert(id, hashes.clone());
		Some((id, hashes))
	}

	// Spread the waiting backlog across the peer target without exceeding
	// the per-batch cap.
	fn batch_size(&self) -> usize {
		let spread = (self.waiting.len() + self.peer_target - 1) / self.peer_target;
		spread.max(1).min(MAX_BATCH)
	}

	/// A block arrived (from any source). Clears it from both the waiting
	/// list and any covering batch.
	pub fn receive(&mut self, hash: &Hash) -> QueueCounts {
		if self.waiting_set.remove(hash) {
			self.waiting.retain(|h| h != hash);
		}
		if let Some(id) = self.in_flight.remove(hash) {
			if let Some(job) = self.jobs.get_mut(&id) {
				job.retain(|h| h != hash);
				if job.is_empty() {
					self.jobs.remove(&id);
				}
			}
		}
		self.counts()
	}

	/// A batch finished or was cancelled: any of its hashes still
	/// outstanding return to the front of the waiting list in their
	/// original order.
	pub fn finish(&mut self, id: JobId) -> QueueCounts {
		if let Some(hashes) = self.jobs.remove(&id) {
			for hash in hashes.into_iter().rev() {
				if self.in_flight.remove(&hash).is_some() && !self.waiting_set.contains(&hash) {
					self.waiting_set.insert(hash);
					self.waiting.push_front(hash);
				}
			}
		}
		self.counts()
	}

	/// Whether the hash is already waiting or in flight
	pub fn covers(&self, hash: &Hash) -> bool {
		self.waiting_set.contains(hash) || self.in_flight.contains_key(hash)
	}

	/// Current counters
	pub fn counts(&self) -> QueueCounts {
		QueueCounts {
			jobs_available: if self.waiting.is_empty() { 0 } else { 1 },
			downloading: self.waiting.len() + self.in_flight.len(),
		}
	}

	/// Number of hashes waiting or in flight
	pub fn len(&self) -> usize {
		self.waiting.len() + self.in_flight.len()
	}

	/// Whether nothing is queued at all
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn hash(n: u8) -> Hash {
		Hash::from_vec(&[n; 32])
	}

	#[test]
	fn add_dedupes() {
		let mut q = DownloadQueue::new(4);
		q.add(&[hash(1), hash(2), hash(1)]);
		assert_eq!(q.len(), 2);
		q.add(&[hash(2), hash(3)]);
		assert_eq!(q.len(), 3);
	}

	#[test]
	fn at_most_one_batch_per_hash() {
		let mut q = DownloadQueue::new(1);
		q.add(&[hash(1), hash(2)]);
		let (id, hashes) = q.get_work().unwrap();
		assert_eq!(hashes.len(), 2);
		// re-adding in-flight hashes does not requeue them
		q.add(&[hash(1), hash(2)]);
		assert!(q.get_work().is_none());
		q.finish(id);
		// unfinished work is available again, in order
		let (_, hashes) = q.get_work().unwrap();
		assert_eq!(hashes, vec![hash(1), hash(2)]);
	}

	#[test]
	fn receive_promotes_batches() {
		let mut q = DownloadQueue::new(1);
		q.add(&[hash(1), hash(2)]);
		let (id, _) = q.get_work().unwrap();
		q.receive(&hash(1));
		q.receive(&hash(2));
		assert!(q.is_empty());
		// finishing a fully received batch requeues nothing
		q.finish(id);
		assert!(q.is_empty());
	}

	#[test]
	fn job_ids_increase() {
		let mut q = DownloadQueue::new(1);
		q.add(&[hash(1)]);
		let (a, _) = q.get_work().unwrap();
		q.add(&[hash(2)]);
		let (b, _) = q.get_work().unwrap();
		assert!(b > a);
	}

	#[test]
	fn batch_size_spreads_across_peers() {
		let mut q = DownloadQueue::new(4);
		let hashes: Vec<Hash> = (0..100u16)
			.map(|i| {
				let mut v = [0u8; 32];
				v[0] = (i >> 8) as u8;
				v[1] = i as u8;
				v[31] = 1;
				Hash::from_vec(&v)
			})
			.collect();
		q.add(&hashes);
		let (_, batch) = q.get_work().unwrap();
		assert_eq!(batch.len(), 25);
	}
}
