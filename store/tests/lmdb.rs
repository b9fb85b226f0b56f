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

use otnode_store as store;
use otnode_util as util;

use std::sync::Arc;

fn setup() -> (tempfile::TempDir, Arc<lmdb_zero::Environment>) {
	util::init_test_logger();
	let dir = tempfile::tempdir().unwrap();
	let env = Arc::new(store::new_env(dir.path().to_str().unwrap().to_owned()));
	(dir, env)
}

#[test]
fn put_get_commit() {
	let (_dir, env) = setup();
	let db = store::Store::open(env, "test");

	{
		let batch = db.batch().unwrap();
		batch.put(b"key", b"value").unwrap();
		// visible inside the batch before commit
		assert_eq!(batch.get(b"key").unwrap(), Some(b"value".to_vec()));
		batch.commit().unwrap();
	}

	assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
	assert_eq!(db.get(b"missing").unwrap(), None);
	assert!(db.exists(b"key").unwrap());
}

#[test]
fn abandoned_batch_is_invisible() {
	let (_dir, env) = setup();
	let db = store::Store::open(env, "test");

	{
		let batch = db.batch().unwrap();
		batch.put(b"key", b"value").unwrap();
		// dropped without commit
	}

	assert_eq!(db.get(b"key").unwrap(), None);
}

#[test]
fn delete_round_trip() {
	let (_dir, env) = setup();
	let db = store::Store::open(env, "test");

	let batch = db.batch().unwrap();
	batch.put(b"key", b"value").unwrap();
	batch.commit().unwrap();

	let batch = db.batch().unwrap();
	batch.delete(b"key").unwrap();
	// deleting a missing key is not an error
	batch.delete(b"missing").unwrap();
	batch.commit().unwrap();

	assert_eq!(db.get(b"key").unwrap(), None);
}

#[test]
fn dup_values_sorted_and_deletable() {
	let (_dir, env) = setup();
	let db = store::Store::open_dup(env, "dup_test");

	let batch = db.batch().unwrap();
	batch.put(b"key", b"bbb").unwrap();
	batch.put(b"key", b"aaa").unwrap();
	batch.put(b"key", b"ccc").unwrap();
	// duplicate insert of an existing pair is a no-op
	batch.put(b"key", b"aaa").unwrap();
	batch.commit().unwrap();

	assert_eq!(
		db.dup_values(b"key").unwrap(),
		vec![b"aaa".to_vec(), b"bbb".to_vec(), b"ccc".to_vec()]
	);

	let batch = db.batch().unwrap();
	batch.delete_item(b"key", b"bbb").unwrap();
	batch.commit().unwrap();

	assert_eq!(
		db.dup_values(b"key").unwrap(),
		vec![b"aaa".to_vec(), b"ccc".to_vec()]
	);

	let batch = db.batch().unwrap();
	batch.delete(b"key").unwrap();
	batch.commit().unwrap();
	assert!(db.dup_values(b"key").unwrap().is_empty());
}

#[test]
fn cross_store_batch_is_atomic() {
	let (_dir, env) = setup();
	let first = store::Store::open(env.clone(), "first");
	let second = store::Store::open(env, "second");

	let batch = first.batch().unwrap();
	batch.put(b"a", b"1").unwrap();
	batch.put_in(&second, b"b", b"2").unwrap();
	batch.commit().unwrap();

	assert_eq!(first.get(b"a").unwrap(), Some(b"1".to_vec()));
	assert_eq!(second.get(b"b").unwrap(), Some(b"2".to_vec()));
}
