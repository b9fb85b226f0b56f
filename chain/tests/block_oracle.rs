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

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{genesis, make_block, mine_chain, setup, TestChain};
use otnode_chain::{BlockOracle, ChainEvent};
use otnode_config::Profile;
use otnode_core::pos::BlockPosition;

fn block_oracle(t: &TestChain, profile: Profile) -> Arc<BlockOracle> {
	BlockOracle::new(t.db.clone(), t.oracle.clone(), t.events.clone(), profile, 4)
}

#[test]
fn load_missing_block_queues_download() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let header = mine_chain(&genesis(), 1, 1).remove(0);
	t.oracle.add_header(header.clone()).unwrap();

	let mut future = blocks.load(&header.hash).unwrap();
	assert!(!future.is_ready());
	assert_eq!(blocks.download_queue_size(), 1);

	// work dispatch covers the hash exactly once
	let batch = blocks.get_work().unwrap();
	assert_eq!(batch.hashes(), &[header.hash]);
	assert!(blocks.get_work().is_none());

	// delivery through the batch completes the future
	let bytes = make_block(&header);
	assert!(batch.submit(&bytes));
	batch.finish();
	assert_eq!(future.try_get().unwrap(), &bytes);
	assert_eq!(blocks.download_queue_size(), 0);
	assert!(blocks.block_exists(&header.hash).unwrap());
}

#[test]
fn duplicate_loads_share_one_download() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let header = mine_chain(&genesis(), 1, 2).remove(0);
	t.oracle.add_header(header.clone()).unwrap();
	let bytes = make_block(&header);

	// two concurrent loaders for the same missing hash
	let blocks_a = blocks.clone();
	let hash = header.hash;
	let (registered_tx, registered_rx) = std::sync::mpsc::channel();
	let handle = thread::spawn(move || {
		let mut f = blocks_a.load(&hash).unwrap();
		registered_tx.send(()).unwrap();
		f.wait_timeout(Duration::from_secs(10)).cloned()
	});
	let mut local = blocks.load(&header.hash).unwrap();
	registered_rx
		.recv_timeout(Duration::from_secs(10))
		.unwrap();

	// exactly one batch emerges covering the hash once
	let batch = blocks.get_work().unwrap();
	assert_eq!(batch.hashes(), &[header.hash]);
	assert!(blocks.get_work().is_none());

	assert!(batch.submit(&bytes));
	batch.finish();

	assert_eq!(local.wait_timeout(Duration::from_secs(10)).unwrap(), &bytes);
	assert_eq!(handle.join().unwrap().unwrap(), bytes);
}

#[test]
fn ready_future_for_stored_block() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let header = mine_chain(&genesis(), 1, 3).remove(0);
	t.oracle.add_header(header.clone()).unwrap();
	let bytes = make_block(&header);
	assert!(blocks.submit_block(&bytes).unwrap());

	let mut future = blocks.load(&header.hash).unwrap();
	assert_eq!(future.try_get().unwrap(), &bytes);
	assert_eq!(blocks.download_queue_size(), 0);
}

#[test]
fn bad_block_is_deleted_and_redownloaded() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let header = mine_chain(&genesis(), 1, 4).remove(0);
	t.oracle.add_header(header.clone()).unwrap();

	// inject bytes that do not hash to the block id directly into the store
	let mut corrupt = make_block(&header);
	corrupt[0] ^= 0xff;
	t.db.save_block(&header.hash, &corrupt).unwrap();
	assert!(blocks.block_exists(&header.hash).unwrap());

	// loading notices, deletes and re-downloads
	let mut future = blocks.load(&header.hash).unwrap();
	assert!(!future.is_ready());
	assert!(!blocks.block_exists(&header.hash).unwrap());

	let batch = blocks.get_work().unwrap();
	assert_eq!(batch.hashes(), &[header.hash]);
	let good = make_block(&header);
	assert!(batch.submit(&good));
	batch.finish();
	assert_eq!(future.try_get().unwrap(), &good);
}

#[test]
fn receive_rejects_garbage() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	assert!(!blocks.receive(&[0u8; 10]).unwrap());
	let header = mine_chain(&genesis(), 1, 5).remove(0);
	// truncated body: header with no transactions
	assert!(!blocks.receive(&header.raw).unwrap());
}

#[test]
fn dropped_batch_requeues_unfinished_work() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let headers = mine_chain(&genesis(), 3, 6);
	for h in &headers {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let hashes: Vec<_> = headers.iter().map(|h| h.hash).collect();
	let mut futures = blocks.load_batch(&hashes).unwrap();

	{
		let batch = blocks.get_work().unwrap();
		assert!(!batch.hashes().is_empty());
		// dropped without finish: cancellation
	}
	// the cancelled work is available again; drive everything to completion
	let mut seen = std::collections::HashSet::new();
	while let Some(batch) = blocks.get_work() {
		for hash in batch.hashes().to_vec() {
			let header = headers.iter().find(|h| h.hash == hash).unwrap();
			assert!(batch.submit(&make_block(header)));
			seen.insert(hash);
		}
		batch.finish();
	}
	assert_eq!(seen.len(), hashes.len());
	for future in futures.iter_mut() {
		assert!(future.is_ready());
	}
}

#[test]
fn mobile_profile_serves_from_cache() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Mobile);
	let header = mine_chain(&genesis(), 1, 7).remove(0);
	t.oracle.add_header(header.clone()).unwrap();
	let bytes = make_block(&header);
	assert!(blocks.receive(&bytes).unwrap());

	// nothing lands in the persistent store under the mobile profile
	assert_eq!(t.db.get_block(&header.hash).unwrap(), None);
	assert!(blocks.block_exists(&header.hash).unwrap());
	let mut future = blocks.load(&header.hash).unwrap();
	assert_eq!(future.try_get().unwrap(), &bytes);
}

#[test]
fn ibd_clears_when_blocks_catch_up_with_headers() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Server);
	let headers = mine_chain(&genesis(), 101, 8);
	for h in &headers {
		t.oracle.add_header(h.clone()).unwrap();
	}
	assert_eq!(t.oracle.best_chain().height, 101);

	// headers ahead of blocks: still in initial block download
	assert!(blocks.ibd());
	assert!(!blocks.fetch_all_blocks());

	let last = headers.last().unwrap();
	assert!(blocks.receive(&make_block(last)).unwrap());
	blocks
		.set_tip(BlockPosition::new(101, last.hash))
		.unwrap();

	assert!(!blocks.ibd());
	assert!(blocks.fetch_all_blocks());
}

#[test]
fn tip_repair_rewinds_past_corruption() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let headers = mine_chain(&genesis(), 100, 9);
	for h in &headers {
		t.oracle.add_header(h.clone()).unwrap();
	}

	// store blocks 1..=100, then corrupt 97..=100 behind the oracle's back
	for h in &headers {
		t.db.save_block(&h.hash, &make_block(h)).unwrap();
	}
	for h in &headers[96..] {
		let mut corrupt = make_block(h);
		corrupt[40] ^= 0x55;
		t.db.save_block(&h.hash, &corrupt).unwrap();
	}
	t.db
		.save_block_tip(&BlockPosition::new(100, headers[99].hash))
		.unwrap();

	let repaired = blocks.get_tip().unwrap();
	assert_eq!(repaired, BlockPosition::new(96, headers[95].hash));
	assert_eq!(blocks.tip(), repaired);
	// the rewound tip is persisted
	assert_eq!(t.db.block_tip().unwrap(), Some(repaired));
}

#[test]
fn tip_repair_falls_back_to_genesis() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let headers = mine_chain(&genesis(), 5, 10);
	for h in &headers {
		t.oracle.add_header(h.clone()).unwrap();
	}
	// claim a tip but store nothing at all
	t.db
		.save_block_tip(&BlockPosition::new(5, headers[4].hash))
		.unwrap();

	let repaired = blocks.get_tip().unwrap();
	assert_eq!(repaired.height, 0);
	assert_eq!(repaired.hash, otnode_core::chains::Chain::UnitTest.params().genesis_hash);
}

#[test]
fn queue_size_events_are_published() {
	let t = setup();
	let blocks = block_oracle(&t, Profile::Desktop);
	let events = t.events.subscribe();
	let header = mine_chain(&genesis(), 1, 11).remove(0);
	t.oracle.add_header(header.clone()).unwrap();
	// drain header events
	while events.try_recv().is_ok() {}

	let _future = blocks.load(&header.hash).unwrap();
	let mut saw_queue = false;
	let mut saw_work = false;
	while let Ok(event) = events.try_recv() {
		match event {
			ChainEvent::DownloadQueue(n) => {
				assert_eq!(n, 1);
				saw_queue = true;
			}
			ChainEvent::WorkAvailable => saw_work = true,
			_ => (),
		}
	}
	assert!(saw_queue);
	assert!(saw_work);
}
