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

//! Implements storage primitives required by the chain: the header DAG
//! table, the best-chain height index, the block store and the tip keys.
//! One LMDB environment per chain; multi-step updates ride one transaction.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::core::chains::Chain;
use crate::core::hash::Hash;
use crate::core::header::Header;
use crate::core::pos::BlockPosition;
use crate::error::Error;
use crate::store::{self, option_to_not_found, Store};

const HEAD_KEY: &[u8] = b"head";
const BLOCK_TIP_KEY: &[u8] = b"block_tip";

/// An implementation of the chain's persisted state backed by LMDB. Writers
/// compose multi-table updates into a single transaction.
pub struct ChainStore {
	chain: Chain,
	#[allow(dead_code)]
	env: Arc<store::lmdb_impl::Environment>,
	headers: Store,
	best: Store,
	blocks: Store,
	meta: Store,
}

impl ChainStore {
	/// Open (or create) the chain's databases under the given root
	/// directory. Each chain gets its own environment named after it.
	pub fn new(db_root: &str, chain: Chain) -> Result<ChainStore, Error> {
		let env = Arc::new(store::new_named_env(
			db_root.to_owned(),
			chain.params().name.to_owned(),
		));
		Ok(ChainStore {
			chain,
			headers: Store::open(env.clone(), "header"),
			best: Store::open(env.clone(), "best"),
			blocks: Store::open(env.clone(), "block"),
			meta: Store::open(env.clone(), "meta"),
			env,
		})
	}

	/// The chain this store belongs to
	pub fn chain(&self) -> Chain {
		self.chain
	}

	fn height_key(height: i64) -> [u8; 8] {
		let mut key = [0u8; 8];
		BigEndian::write_i64(&mut key, height);
		key
	}

	/// The persisted best header position, if any
	pub fn head(&self) -> Result<Option<BlockPosition>, Error> {
		self.meta.get_ser(HEAD_KEY).map_err(From::from)
	}

	/// Load one header by hash
	pub fn get_header(&self, hash: &Hash) -> Result<Header, Error> {
		option_to_not_found(self.headers.get_ser(hash.as_bytes()), "header")
			.map_err(From::from)
	}

	/// Whether a header exists
	pub fn header_exists(&self, hash: &Hash) -> Result<bool, Error> {
		self.headers.exists(hash.as_bytes()).map_err(From::from)
	}

	/// Every stored header. Used to rebuild the in-memory DAG at startup.
	pub fn all_headers(&self) -> Result<Vec<Header>, Error> {
		Ok(self.headers.iter::<Header>(&[])?.collect())
	}

	/// The best-chain hash at the given height per the persisted index
	pub fn get_best(&self, height: i64) -> Result<Option<Hash>, Error> {
		self.best
			.get_ser(&Self::height_key(height))
			.map_err(From::from)
	}

	/// Atomically persist a header acceptance: the new headers, the changes
	/// to the best-chain index, and the head position. Either everything
	/// lands or nothing does.
	pub fn commit_header_update(
		&self,
		new_headers: &[&Header],
		removed_best: &[i64],
		added_best: &[(i64, Hash)],
		head: &BlockPosition,
	) -> Result<(), Error> {
		let batch = self.headers.batch()?;
		for header in new_headers {
			batch.put_ser(header.hash.as_bytes(), *header)?;
		}
		for height in removed_best {
			batch.delete_in(&self.best, &Self::height_key(*height))?;
		}
		for (height, hash) in added_best {
			batch.put_ser_in(&self.best, &Self::height_key(*height), hash)?;
		}
		batch.put_ser_in(&self.meta, HEAD_KEY, head)?;
		batch.commit()?;
		Ok(())
	}

	/// Persist an invalid-marker free header rewrite of a single header
	/// (used when checkpoints retroactively invalidate stored headers).
	pub fn update_header(&self, header: &Header) -> Result<(), Error> {
		let batch = self.headers.batch()?;
		batch.put_ser(header.hash.as_bytes(), header)?;
		batch.commit()?;
		Ok(())
	}

	/// Store raw block bytes under their hash
	pub fn save_block(&self, hash: &Hash, bytes: &[u8]) -> Result<(), Error> {
		let batch = self.blocks.batch()?;
		batch.put(hash.as_bytes(), bytes)?;
		batch.commit()?;
		Ok(())
	}

	/// Load raw block bytes by hash
	pub fn get_block(&self, hash: &Hash) -> Result<Option<Vec<u8>>, Error> {
		self.blocks.get(hash.as_bytes()).map_err(From::from)
	}

	/// Whether a block is stored
	pub fn block_exists(&self, hash: &Hash) -> Result<bool, Error> {
		self.blocks.exists(hash.as_bytes()).map_err(From::from)
	}

	/// Delete a stored block, typically after failed validation
	pub fn delete_block(&self, hash: &Hash) -> Result<(), Error> {
		let batch = self.blocks.batch()?;
		batch.delete(hash.as_bytes())?;
		batch.commit()?;
		Ok(())
	}

	/// The persisted block tip, the highest block known valid
	pub fn block_tip(&self) -> Result<Option<BlockPosition>, Error> {
		self.meta.get_ser(BLOCK_TIP_KEY).map_err(From::from)
	}

	/// Persist the block tip
	pub fn save_block_tip(&self, tip: &BlockPosition) -> Result<(), Error> {
		let batch = self.meta.batch()?;
		batch.put_ser(BLOCK_TIP_KEY, tip)?;
		batch.commit()?;
		Ok(())
	}
}
