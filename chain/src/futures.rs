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

//! One-shot promises for in-flight block requests. Every `load` caller for a
//! hash gets its own future; delivery of the block completes all of them
//! with the same bytes. The registry is sharded by hash prefix.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

use crate::core::hash::Hash;
use crate::util::Mutex;

const SHARDS: usize = 16;

/// A one-shot handle to a block that may not be locally available yet.
/// Completed with the validated block bytes exactly once.
pub struct BlockFuture {
	ready: Option<Vec<u8>>,
	rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl BlockFuture {
	/// A future already resolved with the given bytes
	pub fn ready(bytes: Vec<u8>) -> BlockFuture {
		BlockFuture {
			ready: Some(bytes),
			rx: None,
		}
	}

	fn pending(rx: mpsc::Receiver<Vec<u8>>) -> BlockFuture {
		BlockFuture {
			ready: None,
			rx: Some(rx),
		}
	}

	/// The block bytes, if already delivered. Does not block.
	pub fn try_get(&mut self) -> Option<&Vec<u8>> {
		self.poll();
		self.ready.as_ref()
	}

	/// Whether the future has resolved. Does not block.
	pub fn is_ready(&mut self) -> bool {
		self.poll();
		self.ready.is_some()
	}

	/// Block the calling thread until delivery or the timeout elapses.
	pub fn wait_timeout(&mut self, timeout: Duration) -> Option<&Vec<u8>> {
		if self.ready.is_none() {
			if let Some(rx) = self.rx.take() {
				match rx.recv_timeout(timeout) {
					Ok(bytes) => self.ready = Some(bytes),
					Err(mpsc::RecvTimeoutError::Timeout) => self.rx = Some(rx),
					Err(mpsc::RecvTimeoutError::Disconnected) => (),
				}
			}
		}
		self.ready.as_ref()
	}

	fn poll(&mut self) {
		if self.ready.is_none() {
			if let Some(rx) = self.rx.take() {
				match rx.try_recv() {
					Ok(bytes) => self.ready = Some(bytes),
					Err(mpsc::TryRecvError::Empty) => self.rx = Some(rx),
					Err(mpsc::TryRecvError::Disconnected) => (),
				}
			}
		}
	}
}

/// Registry of pending futures, sharded by the first hash byte. A future
/// registered for hash `h` is observed by any delivery for `h`.
pub struct FuturesRegistry {
	shards: Vec<Mutex<HashMap<Hash, Vec<mpsc::Sender<Vec<u8>>>>>>,
}

impl FuturesRegistry {
	/// An empty registry
	pub fn new() -> FuturesRegistry {
		let mut shards = Vec::with_capacity(SHARDS);
		for _ in 0..SHARDS {
			shards.push(Mutex::new(HashMap::new()));
		}
		FuturesRegistry { shards }
	}

	fn shard(&self, hash: &Hash) -> &Mutex<HashMap<Hash, Vec<mpsc::Sender<Vec<u8>>>>> {
		&self.shards[hash.0[0] as usize % SHARDS]
	}

	/// Register a new pending future for the given hash
	pub fn queue(&self, hash: &Hash) -> BlockFuture {
		let (tx, rx) = mpsc::channel();
		self.shard(hash).lock().entry(*hash).or_default().push(tx);
		BlockFuture::pending(rx)
	}

	/// Complete every future registered for the hash with the same bytes.
	/// Returns how many futures were completed.
	pub fn receive(&self, hash: &Hash, bytes: &[u8]) -> usize {
		let senders = self.shard(hash).lock().remove(hash);
		match senders {
			Some(senders) => {
				let mut delivered = 0;
				for tx in senders {
					if tx.send(bytes.to_vec()).is_ok() {
						delivered += 1;
					}
				}
				delivered
			}
			None => 0,
		}
	}

	/// Number of hashes with at least one pending future
	pub fn pending_hashes(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}
}

impl Default for FuturesRegistry {
	fn default() -> FuturesRegistry {
		FuturesRegistry::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ready_future_resolves_immediately() {
		let mut f = BlockFuture::ready(vec![1, 2, 3]);
		assert!(f.is_ready());
		assert_eq!(f.try_get().unwrap(), &vec![1, 2, 3]);
	}

	#[test]
	fn all_futures_for_hash_complete_with_same_bytes() {
		let registry = FuturesRegistry::new();
		let hash = Hash::from_vec(&[9; 32]);
		let mut a = registry.queue(&hash);
		let mut b = registry.queue(&hash);
		assert!(!a.is_ready());
		assert_eq!(registry.pending_hashes(), 1);

		assert_eq!(registry.receive(&hash, &[7, 7]), 2);
		assert_eq!(a.try_get().unwrap(), &vec![7, 7]);
		assert_eq!(b.try_get().unwrap(), &vec![7, 7]);
		assert_eq!(registry.pending_hashes(), 0);

		// delivery is one-shot; later deliveries find nothing registered
		assert_eq!(registry.receive(&hash, &[8]), 0);
	}
}
