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

//! Shared fixtures for chain tests: a tempdir-backed oracle and a trivial
//! miner for the unit-test chain.

use std::sync::Arc;

use otnode_chain::{ChainStore, EventBus, HeaderOracle};
use otnode_core::chains::Chain;
use otnode_core::hash::{sha256d, Hash};
use otnode_core::header::{Header, WireHeader};
use otnode_util as util;

pub struct TestChain {
	// tempdir must outlive the stores
	#[allow(dead_code)]
	pub dir: tempfile::TempDir,
	pub db: Arc<ChainStore>,
	pub events: Arc<EventBus>,
	pub oracle: Arc<HeaderOracle>,
}

pub fn setup() -> TestChain {
	util::init_test_logger();
	let dir = tempfile::tempdir().unwrap();
	let db = Arc::new(ChainStore::new(dir.path().to_str().unwrap(), Chain::UnitTest).unwrap());
	let events = Arc::new(EventBus::new());
	let oracle = Arc::new(HeaderOracle::new(db.clone(), events.clone()).unwrap());
	TestChain {
		dir,
		db,
		events,
		oracle,
	}
}

pub fn genesis() -> Header {
	let params = Chain::UnitTest.params();
	Header::from_wire(Chain::UnitTest, &params.genesis_header(), 0).unwrap()
}

/// Mine one header on top of `prev` with the unit-test chain's trivial
/// target. `salt` varies the merkle root so distinct branches differ.
pub fn mine_on(prev: &Header, salt: u64) -> Header {
	let height = prev.height + 1;
	let mut wire = WireHeader {
		version: 1,
		prev_hash: prev.hash,
		merkle_root: sha256d(&salt.to_be_bytes()),
		time: 1296688602 + height as u32,
		bits: 0x207fffff,
		nonce: 0,
	};
	loop {
		let raw = wire.to_wire_bytes();
		let header = Header::from_wire(Chain::UnitTest, &raw, height).unwrap();
		if header.verify_pow(Chain::UnitTest) {
			return header;
		}
		wire.nonce += 1;
	}
}

/// Mine a run of headers on top of `prev`
pub fn mine_chain(prev: &Header, count: usize, salt: u64) -> Vec<Header> {
	let mut out = Vec::with_capacity(count);
	let mut prev = prev.clone();
	for i in 0..count {
		let header = mine_on(&prev, salt.wrapping_mul(1000).wrapping_add(i as u64));
		prev = header.clone();
		out.push(header);
	}
	out
}

/// A minimal structurally valid block for the given header: the header
/// bytes, one declared transaction, and a stub payload.
pub fn make_block(header: &Header) -> Vec<u8> {
	let mut block = header.raw.clone();
	block.push(1);
	block.extend_from_slice(&[0xaa; 8]);
	block
}

#[allow(dead_code)]
pub fn hash_of(n: u8) -> Hash {
	Hash::from_vec(&[n; 32])
}
