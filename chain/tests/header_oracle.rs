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

use rand::seq::SliceRandom;
use rand::thread_rng;
use std::sync::Arc;

use common::{genesis, mine_chain, mine_on, setup};
use otnode_chain::{AddOutcome, ChainEvent, ChainStore, ErrorKind, EventBus, HeaderOracle, ReorgTask};
use otnode_core::chains::Chain;
use otnode_core::pos::BlockPosition;

#[test]
fn cold_start_seeds_genesis() {
	let t = setup();
	let tip = t.oracle.best_chain();
	assert_eq!(tip.height, 0);
	assert_eq!(tip.hash, Chain::UnitTest.params().genesis_hash);
	assert!(t.oracle.exists(&tip.hash));
}

#[test]
fn linear_growth_advances_tip() {
	let t = setup();
	let headers = mine_chain(&genesis(), 10, 1);
	for header in &headers {
		assert_eq!(
			t.oracle.add_header(header.clone()).unwrap(),
			AddOutcome::Accepted
		);
	}
	let tip = t.oracle.best_chain();
	assert_eq!(tip.height, 10);
	assert_eq!(tip.hash, headers.last().unwrap().hash);

	// queries along the best chain
	assert_eq!(t.oracle.best_hash(3), Some(headers[2].hash));
	assert_eq!(t.oracle.best_hashes(1, 5), headers[..5].iter().map(|h| h.hash).collect::<Vec<_>>());
	assert_eq!(t.oracle.get_position(10), tip);
	assert!(t.oracle.is_in_best_chain(&headers[4].hash));
}

#[test]
fn re_adding_a_header_is_idempotent() {
	let t = setup();
	let header = mine_on(&genesis(), 7);
	assert_eq!(
		t.oracle.add_header(header.clone()).unwrap(),
		AddOutcome::Accepted
	);
	assert_eq!(
		t.oracle.add_header(header.clone()).unwrap(),
		AddOutcome::AlreadyKnown
	);
	assert_eq!(t.oracle.best_chain().height, 1);
}

#[test]
fn parent_unknown_is_recoverable() {
	let t = setup();
	let headers = mine_chain(&genesis(), 3, 2);
	let err = t.oracle.add_header(headers[2].clone()).unwrap_err();
	match err.kind() {
		ErrorKind::ParentUnknown(hash) => assert_eq!(hash, headers[1].hash),
		k => panic!("expected ParentUnknown, got {:?}", k),
	}
	assert!(err.is_recoverable());

	// supplying the ancestry makes the original header acceptable
	t.oracle.add_header(headers[0].clone()).unwrap();
	t.oracle.add_header(headers[1].clone()).unwrap();
	t.oracle.add_header(headers[2].clone()).unwrap();
	assert_eq!(t.oracle.best_chain().height, 3);
}

#[test]
fn pow_failure_is_permanent() {
	let t = setup();
	// a header claiming an impossible target never validates
	let mut wire = mine_on(&genesis(), 3).wire().unwrap();
	wire.bits = 0x1d000000;
	let raw = wire.to_wire_bytes();
	let header = otnode_core::header::Header::from_wire(Chain::UnitTest, &raw, 1).unwrap();
	let err = t.oracle.add_header(header).unwrap_err();
	match err.kind() {
		ErrorKind::PowInvalid(_) => (),
		k => panic!("expected PowInvalid, got {:?}", k),
	}
	assert!(!err.is_recoverable());
}

#[test]
fn best_chain_is_permutation_independent() {
	let t = setup();
	// two competing branches of different lengths plus stragglers
	let trunk = mine_chain(&genesis(), 8, 10);
	let fork = mine_chain(&trunk[2], 9, 20);
	let mut all: Vec<_> = trunk.iter().chain(fork.iter()).cloned().collect();

	let reference = {
		let r = setup();
		for h in &all {
			r.oracle.add_header(h.clone()).unwrap();
		}
		r.oracle.best_chain()
	};

	let mut rng = thread_rng();
	for _ in 0..5 {
		all.shuffle(&mut rng);
		let fresh = setup();
		// replay with retry until a full pass adds nothing new
		let mut pending: Vec<_> = all.clone();
		loop {
			let mut next = vec![];
			for header in pending {
				if let Err(e) = fresh.oracle.add_header(header.clone()) {
					assert!(e.is_recoverable(), "unexpected failure: {}", e);
					next.push(header);
				}
			}
			if next.is_empty() {
				break;
			}
			pending = next;
		}
		assert_eq!(fresh.oracle.best_chain(), reference);
	}
}

#[test]
fn equal_work_resolves_to_smaller_hash() {
	let a = setup();
	let b = setup();
	let left = mine_on(&genesis(), 100);
	let right = mine_on(&genesis(), 200);
	assert_eq!(left.work, right.work);

	a.oracle.add_header(left.clone()).unwrap();
	a.oracle.add_header(right.clone()).unwrap();
	// reversed arrival order
	b.oracle.add_header(right.clone()).unwrap();
	b.oracle.add_header(left.clone()).unwrap();

	let expected = if left.hash < right.hash { left.hash } else { right.hash };
	assert_eq!(a.oracle.best_chain().hash, expected);
	assert_eq!(b.oracle.best_chain().hash, expected);
}

#[test]
fn reorg_plan_covers_reverted_branch_exactly() {
	let t = setup();
	let events = t.events.subscribe();

	// best chain A0..A10
	let trunk = mine_chain(&genesis(), 10, 1);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let old_tip = t.oracle.best_chain();
	assert_eq!(old_tip.height, 10);

	// heavier fork from A5: B6..B12
	let fork = mine_chain(&trunk[4], 7, 2);
	for h in &fork {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let new_tip = t.oracle.best_chain();
	assert_eq!(new_tip.height, 12);
	assert_eq!(new_tip.hash, fork.last().unwrap().hash);

	// drain events; the reorg plan must cover A6..A10 tip-down
	let mut plan = None;
	while let Ok(event) = events.try_recv() {
		if let ChainEvent::Reorg(p) = event {
			plan = Some(p);
		}
	}
	let plan = plan.expect("no reorg event");
	assert_eq!(plan.old_tip, old_tip);
	assert_eq!(plan.ancestor.height, 5);
	assert_eq!(plan.ancestor.hash, trunk[4].hash);
	assert_eq!(
		plan.rolled_back,
		(6..=10)
			.rev()
			.map(|h| BlockPosition::new(h, trunk[(h - 1) as usize].hash))
			.collect::<Vec<_>>()
	);

	// calculate_reorg for the abandoned tip reports the same positions
	let rolled = t.oracle.calculate_reorg(&old_tip).unwrap();
	assert_eq!(rolled, plan.rolled_back);

	// the old branch survives as a sibling
	assert!(t.oracle.siblings().contains(&old_tip.hash));
}

#[test]
fn calculate_reorg_of_best_tip_is_empty() {
	let t = setup();
	let trunk = mine_chain(&genesis(), 4, 3);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let tip = t.oracle.best_chain();
	assert!(t.oracle.calculate_reorg(&tip).unwrap().is_empty());

	let unknown = BlockPosition::new(2, common::hash_of(0x42));
	assert!(t.oracle.calculate_reorg(&unknown).is_err());
}

#[test]
fn execute_ack_and_veto() {
	let t = setup();
	// with a registered participant the reorg parks until execute() runs
	t.oracle.register_reorg_participant();
	let trunk = mine_chain(&genesis(), 6, 4);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let old_tip = t.oracle.best_chain();

	let fork = mine_chain(&trunk[1], 7, 5);
	for h in &fork {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let candidate = t.oracle.best_chain();
	assert_eq!(candidate.hash, fork.last().unwrap().hash);

	// a vetoing participant aborts the reorg chain-wide
	let veto: ReorgTask = Box::new(|_view, _plan| false);
	assert!(!t.oracle.execute(vec![veto]));
	assert_eq!(t.oracle.best_chain(), old_tip);

	// with no reorg pending execute trivially succeeds
	let noop: ReorgTask = Box::new(|_view, _plan| true);
	assert!(t.oracle.execute(vec![noop]));
}

#[test]
fn checkpoint_rejects_wrong_fork() {
	let t = setup();
	let trunk = mine_chain(&genesis(), 5, 6);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}

	// checkpoint pinning height 3 to the trunk
	assert!(t.oracle.add_checkpoint(3, trunk[2].hash));
	// only one checkpoint may be active
	assert!(!t.oracle.add_checkpoint(4, trunk[3].hash));

	// a fork crossing checkpoint height with the wrong hash is rejected
	let fork = mine_chain(&trunk[0], 3, 7);
	t.oracle.add_header(fork[0].clone()).unwrap();
	let err = t.oracle.add_header(fork[1].clone()).unwrap_err();
	match err.kind() {
		ErrorKind::CheckpointViolation(height, _) => assert_eq!(height, 3),
		k => panic!("expected CheckpointViolation, got {:?}", k),
	}
	// the offending header is retained for debugging
	assert!(t.oracle.exists(&fork[1].hash));
	// and extending it stays rejected
	let err = t.oracle.add_header(fork[2].clone()).unwrap_err();
	match err.kind() {
		ErrorKind::CheckpointViolation(_, _) => (),
		k => panic!("expected CheckpointViolation, got {:?}", k),
	}

	assert_eq!(t.oracle.get_checkpoint().height, 3);
	assert!(t.oracle.delete_checkpoint());
	assert!(!t.oracle.delete_checkpoint());
}

#[test]
fn locator_returns_hashes_after_highest_match() {
	let t = setup();
	let trunk = mine_chain(&genesis(), 10, 8);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let fork = mine_chain(&trunk[3], 2, 9);
	for h in &fork {
		t.oracle.add_header(h.clone()).unwrap();
	}

	// locator carries a fork hash (not on best chain) and a trunk hash
	let locator = vec![fork[1].hash, trunk[5].hash, trunk[1].hash];
	let stop = common::hash_of(0);
	let hashes = t.oracle.best_hashes_from_locator(&locator, &stop, 100);
	assert_eq!(
		hashes,
		trunk[6..].iter().map(|h| h.hash).collect::<Vec<_>>()
	);

	// unknown locator falls back to the block after genesis
	let hashes = t.oracle.best_hashes_from_locator(&[common::hash_of(1)], &stop, 3);
	assert_eq!(hashes, trunk[..3].iter().map(|h| h.hash).collect::<Vec<_>>());

	// stop hash truncates the response
	let hashes = t.oracle.best_hashes_from_locator(&[trunk[1].hash], &trunk[4].hash, 100);
	assert_eq!(
		hashes,
		trunk[2..5].iter().map(|h| h.hash).collect::<Vec<_>>()
	);
}

#[test]
fn ancestors_walk_to_common_ancestor() {
	let t = setup();
	let trunk = mine_chain(&genesis(), 6, 10);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let fork = mine_chain(&trunk[2], 2, 11);
	for h in &fork {
		t.oracle.add_header(h.clone()).unwrap();
	}

	let start = BlockPosition::new(6, trunk[5].hash);
	let target = BlockPosition::new(5, fork[1].hash);
	let path = t.oracle.ancestors(&start, &target, 100).unwrap();
	// from A6 down to the fork point A3, inclusive
	assert_eq!(path.first().unwrap(), &start);
	assert_eq!(path.last().unwrap(), &BlockPosition::new(3, trunk[2].hash));
	assert_eq!(path.len(), 4);

	let unknown = BlockPosition::new(9, common::hash_of(0x33));
	assert!(t.oracle.ancestors(&unknown, &target, 100).is_err());
}

#[test]
fn state_survives_restart() {
	util_restart_inner();
}

fn util_restart_inner() {
	let t = setup();
	let trunk = mine_chain(&genesis(), 12, 12);
	for h in &trunk {
		t.oracle.add_header(h.clone()).unwrap();
	}
	let tip = t.oracle.best_chain();
	let db: Arc<ChainStore> = t.db.clone();
	drop(t.oracle);

	let events = Arc::new(EventBus::new());
	let reloaded = HeaderOracle::new(db, events).unwrap();
	assert_eq!(reloaded.best_chain(), tip);
	assert_eq!(reloaded.best_hash(7), Some(trunk[6].hash));
}

#[test]
fn remote_height_drives_synchronization() {
	let t = setup();
	assert!(t.oracle.is_synchronized());
	t.oracle.update_remote_height(5);
	assert_eq!(t.oracle.target_height(), 5);
	assert!(!t.oracle.is_synchronized());
	for h in &mine_chain(&genesis(), 5, 13) {
		t.oracle.add_header(h.clone()).unwrap();
	}
	assert!(t.oracle.is_synchronized());
	// remote heights never move backwards
	t.oracle.update_remote_height(2);
	assert_eq!(t.oracle.target_height(), 5);
}
