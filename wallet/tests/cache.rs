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

use std::sync::Arc;

use otnode_chain::FilterType;
use otnode_core::hash::sha256d;
use otnode_core::pos::BlockPosition;
use otnode_store as store;
use otnode_util as util;
use otnode_wallet::{ElementID, SubaccountID, SubchainCache, SubchainID, SubchainKind};

fn setup() -> (tempfile::TempDir, SubchainCache) {
	util::init_test_logger();
	let dir = tempfile::tempdir().unwrap();
	let env = Arc::new(store::new_named_env(
		dir.path().to_str().unwrap().to_owned(),
		"wallet".to_owned(),
	));
	let cache = SubchainCache::new(env);
	(dir, cache)
}

fn account(n: u8) -> SubaccountID {
	SubaccountID::from_bytes(&[n; 4])
}

#[test]
fn get_index_is_stable_and_persisted() {
	let (_dir, cache) = setup();
	let subaccount = account(1);

	let batch = cache.batch().unwrap();
	let id = cache.get_index(&subaccount, SubchainKind::External, FilterType::Basic, 1, &batch);
	batch.commit().unwrap();

	// derivation is content addressed
	assert_eq!(
		id,
		SubchainID::derive(&subaccount, SubchainKind::External, FilterType::Basic, 1)
	);
	// and resolves again, including through the decode path
	let batch = cache.batch().unwrap();
	let again = cache.get_index(&subaccount, SubchainKind::External, FilterType::Basic, 1, &batch);
	drop(batch);
	assert_eq!(id, again);

	let record = cache.decode_index(&id).unwrap();
	assert_eq!(record.subaccount, subaccount);
	assert_eq!(record.subchain, SubchainKind::External);
	assert_eq!(record.filter_type, FilterType::Basic);
	assert_eq!(record.version, 1);

	// distinct lanes derive distinct ids
	let batch = cache.batch().unwrap();
	let internal =
		cache.get_index(&subaccount, SubchainKind::Internal, FilterType::Basic, 1, &batch);
	batch.commit().unwrap();
	assert_ne!(id, internal);
}

#[test]
fn unknown_subchain_does_not_decode() {
	let (_dir, cache) = setup();
	let bogus = SubchainID::derive(&account(9), SubchainKind::Internal, FilterType::Basic, 7);
	assert!(cache.decode_index(&bogus).is_err());
}

#[test]
fn cursors_write_through_and_survive_clear() {
	let (_dir, cache) = setup();
	let subaccount = account(2);
	let batch = cache.batch().unwrap();
	let id = cache.get_index(&subaccount, SubchainKind::External, FilterType::Basic, 1, &batch);
	batch.commit().unwrap();

	assert_eq!(cache.get_last_indexed(&id), None);
	assert!(cache.get_last_scanned(&id).is_none());

	let pos = BlockPosition::new(7, sha256d(b"pos7"));
	let batch = cache.batch().unwrap();
	assert!(cache.set_last_indexed(&id, 19, &batch));
	assert!(cache.set_last_scanned(&id, pos, &batch));
	batch.commit().unwrap();

	assert_eq!(cache.get_last_indexed(&id), Some(19));
	assert_eq!(cache.get_last_scanned(&id), pos);

	// clear drops only the cursor caches; values reload from disk
	cache.clear();
	assert_eq!(cache.get_last_indexed(&id), Some(19));
	assert_eq!(cache.get_last_scanned(&id), pos);

	// a rewind lands exactly (erase then re-emplace)
	let rewound = BlockPosition::new(3, sha256d(b"pos3"));
	let batch = cache.batch().unwrap();
	assert!(cache.set_last_scanned(&id, rewound, &batch));
	batch.commit().unwrap();
	cache.clear();
	assert_eq!(cache.get_last_scanned(&id), rewound);
}

#[test]
fn patterns_are_idempotent_and_survive_clear() {
	let (_dir, cache) = setup();
	let subaccount = account(3);
	let batch = cache.batch().unwrap();
	let id = cache.get_index(&subaccount, SubchainKind::External, FilterType::Basic, 1, &batch);
	batch.commit().unwrap();

	let element = ElementID::from_bytes(b"element-0");
	let batch = cache.batch().unwrap();
	assert!(cache.add_pattern(&element, 0, b"pattern-bytes", &batch));
	// idempotent re-add succeeds without a second row
	assert!(cache.add_pattern(&element, 0, b"pattern-bytes", &batch));
	assert!(cache.add_pattern(&element, 1, b"other-bytes", &batch));
	assert!(cache.add_pattern_index(&id, &element, &batch));
	assert!(cache.add_pattern_index(&id, &element, &batch));
	batch.commit().unwrap();

	let patterns = cache.get_patterns(&element);
	assert_eq!(patterns.len(), 2);
	let index = cache.get_pattern_index(&id);
	assert_eq!(index.len(), 1);
	assert!(index.contains(&element));

	// patterns survive a cache clear
	cache.clear();
	assert_eq!(cache.get_patterns(&element).len(), 2);
	assert_eq!(cache.patterns_for_subchain(&id).len(), 2);
}

#[test]
fn uncommitted_writes_do_not_reach_disk() {
	let (_dir, cache) = setup();
	let subaccount = account(4);
	let batch = cache.batch().unwrap();
	let id = cache.get_index(&subaccount, SubchainKind::External, FilterType::Basic, 1, &batch);
	batch.commit().unwrap();

	{
		let batch = cache.batch().unwrap();
		assert!(cache.set_last_indexed(&id, 5, &batch));
		// dropped without commit
	}
	// the memory cache saw the write, but a cleared cache reloads from disk
	cache.clear();
	assert_eq!(cache.get_last_indexed(&id), None);
}
