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

//! A thin caching layer over the wallet's transactional tables: subchain id
//! index, scan cursors, pattern sets and the reverse pattern index. Writes
//! ride a caller-supplied batch; in-memory state is rolled back when the
//! backing write fails so cache and disk never diverge.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::chain::FilterType;
use crate::core::pos::BlockPosition;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::error::{Error, ErrorKind};
use crate::store::{Batch, Store};
use crate::types::{ElementID, PatternData, SubaccountID, SubchainID, SubchainKind};
use crate::util::RwLock;

/// The decoded fields a subchain id was derived from, as stored in the
/// `id_index` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubchainRecord {
	/// Owning sub-account
	pub subaccount: SubaccountID,
	/// Scan lane within the sub-account
	pub subchain: SubchainKind,
	/// Filter type the lane scans with
	pub filter_type: FilterType,
	/// Schema version of the derivation
	pub version: u32,
}

impl Writeable for SubchainRecord {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		(self.subaccount.0).write(writer)?;
		writer.write_u8(self.subchain.to_u8())?;
		writer.write_u8(self.filter_type.to_u8())?;
		writer.write_u32(self.version)
	}
}

impl Readable for SubchainRecord {
	fn read<R: Reader>(reader: &mut R) -> Result<SubchainRecord, ser::Error> {
		let subaccount = SubaccountID(crate::core::hash::Hash::read(reader)?);
		let subchain =
			SubchainKind::from_u8(reader.read_u8()?).ok_or(ser::Error::CorruptedData)?;
		let filter_type = match reader.read_u8()? {
			0 => FilterType::Basic,
			1 => FilterType::Extended,
			_ => return Err(ser::Error::CorruptedData),
		};
		let version = reader.read_u32()?;
		Ok(SubchainRecord {
			subaccount,
			subchain,
			filter_type,
			version,
		})
	}
}

/// The five logical wallet tables plus their in-memory mirrors.
pub struct SubchainCache {
	id_index: Store,
	last_indexed: Store,
	last_scanned: Store,
	patterns: Store,
	pattern_index: Store,

	id_map: RwLock<HashMap<SubchainID, SubchainRecord>>,
	indexed_map: RwLock<HashMap<SubchainID, u32>>,
	scanned_map: RwLock<HashMap<SubchainID, BlockPosition>>,
	patterns_map: RwLock<HashMap<ElementID, BTreeSet<PatternData>>>,
	index_map: RwLock<HashMap<SubchainID, HashSet<ElementID>>>,
}

impl SubchainCache {
	/// Open the wallet tables under the provided environment
	pub fn new(env: Arc<crate::store::lmdb_impl::Environment>) -> SubchainCache {
		SubchainCache {
			id_index: Store::open(env.clone(), "wallet_id_index"),
			last_indexed: Store::open(env.clone(), "wallet_last_indexed"),
			last_scanned: Store::open(env.clone(), "wallet_last_scanned"),
			patterns: Store::open_dup(env.clone(), "wallet_patterns"),
			pattern_index: Store::open_dup(env, "wallet_pattern_index"),
			id_map: RwLock::new(HashMap::new()),
			indexed_map: RwLock::new(HashMap::new()),
			scanned_map: RwLock::new(HashMap::new()),
			patterns_map: RwLock::new(HashMap::new()),
			index_map: RwLock::new(HashMap::new()),
		}
	}

	/// Open a write batch covering every wallet table
	pub fn batch(&self) -> Result<Batch<'_>, Error> {
		self.id_index.batch().map_err(From::from)
	}

	/// Resolve (and if necessary create) the subchain id for the given
	/// derivation fields. A returned id is guaranteed present in the
	/// `id_index` table once the caller's batch commits; if that invariant
	/// cannot be maintained the process aborts.
	pub fn get_index(
		&self,
		subaccount: &SubaccountID,
		subchain: SubchainKind,
		filter_type: FilterType,
		version: u32,
		batch: &Batch<'_>,
	) -> SubchainID {
		let id = SubchainID::derive(subaccount, subchain, filter_type, version);
		if self.load_index(&id).is_ok() {
			return id;
		}

		let record = SubchainRecord {
			subaccount: *subaccount,
			subchain,
			filter_type,
			version,
		};
		let write = || -> Result<(), Error> {
			if !batch.exists(&(id.0).0)? {
				batch.put_ser_in(&self.id_index, &(id.0).0, &record)?;
			}
			Ok(())
		};
		if let Err(e) = write() {
			// a subchain id the caller cannot look up again would corrupt
			// every table keyed by it
			error!("failed to write subchain index {}: {}", id, e);
			panic!("unrecoverable wallet database failure: {}", e);
		}
		self.id_map.write().insert(id, record);
		id
	}

	/// The decoded derivation fields for a known subchain id
	pub fn decode_index(&self, id: &SubchainID) -> Result<SubchainRecord, Error> {
		self.load_index(id)
	}

	fn load_index(&self, id: &SubchainID) -> Result<SubchainRecord, Error> {
		if let Some(record) = self.id_map.read().get(id) {
			return Ok(record.clone());
		}
		match self.id_index.get_ser::<SubchainRecord>(&(id.0).0)? {
			Some(record) => {
				self.id_map.write().insert(*id, record.clone());
				Ok(record)
			}
			None => Err(ErrorKind::UnknownSubchain(format!("{}", id)).into()),
		}
	}

	/// Highest element index registered with the scanner, if any
	pub fn get_last_indexed(&self, id: &SubchainID) -> Option<u32> {
		if let Some(v) = self.indexed_map.read().get(id) {
			return Some(*v);
		}
		match self.last_indexed.get_ser::<u32>(&(id.0).0) {
			Ok(Some(v)) => {
				self.indexed_map.write().insert(*id, v);
				Some(v)
			}
			Ok(None) => None,
			Err(e) => {
				trace!("last indexed for {} not loadable: {}", id, e);
				None
			}
		}
	}

	/// Record the highest element index. Write-through; the in-memory value
	/// is rolled back if the disk write fails.
	pub fn set_last_indexed(&self, id: &SubchainID, value: u32, batch: &Batch<'_>) -> bool {
		let previous = self.indexed_map.write().insert(*id, value);
		match batch.put_ser_in(&self.last_indexed, &(id.0).0, &value) {
			Ok(()) => true,
			Err(e) => {
				error!("failed to update last indexed for {}: {}", id, e);
				let mut map = self.indexed_map.write();
				match previous {
					Some(v) => {
						map.insert(*id, v);
					}
					None => {
						map.remove(id);
					}
				}
				false
			}
		}
	}

	/// Highest position scanning completed for, or the `none` position
	pub fn get_last_scanned(&self, id: &SubchainID) -> BlockPosition {
		if let Some(v) = self.scanned_map.read().get(id) {
			return *v;
		}
		match self.last_scanned.get_ser::<BlockPosition>(&(id.0).0) {
			Ok(Some(v)) => {
				self.scanned_map.write().insert(*id, v);
				v
			}
			Ok(None) => BlockPosition::none(),
			Err(e) => {
				debug!("last scanned for {} not loadable: {}", id, e);
				BlockPosition::none()
			}
		}
	}

	/// Record the scan cursor. The entry is erased then re-emplaced so a
	/// reorg rewind lands exactly; rolled back in memory on disk failure.
	pub fn set_last_scanned(
		&self,
		id: &SubchainID,
		value: BlockPosition,
		batch: &Batch<'_>,
	) -> bool {
		let previous = {
			let mut map = self.scanned_map.write();
			let previous = map.remove(id);
			map.insert(*id, value);
			previous
		};
		let write = || -> Result<(), Error> {
			batch.delete_in(&self.last_scanned, &(id.0).0)?;
			batch.put_ser_in(&self.last_scanned, &(id.0).0, &value)?;
			Ok(())
		};
		match write() {
			Ok(()) => true,
			Err(e) => {
				error!("failed to update last scanned for {}: {}", id, e);
				let mut map = self.scanned_map.write();
				match previous {
					Some(v) => {
						map.insert(*id, v);
					}
					None => {
						map.remove(id);
					}
				}
				false
			}
		}
	}

	/// Register a pattern for an element. Idempotent: re-adding an existing
	/// pattern succeeds without touching the store.
	pub fn add_pattern(
		&self,
		id: &ElementID,
		index: u32,
		bytes: &[u8],
		batch: &Batch<'_>,
	) -> bool {
		let data = PatternData {
			index,
			bytes: bytes.to_vec(),
		};
		{
			let patterns = self.load_patterns(id);
			if patterns.contains(&data) {
				trace!("pattern already exists");
				return true;
			}
		}
		self.patterns_map
			.write()
			.entry(*id)
			.or_default()
			.insert(data.clone());

		let serialized = match ser_vec_or_log(&data) {
			Some(v) => v,
			None => {
				self.patterns_map.write().entry(*id).or_default().remove(&data);
				return false;
			}
		};
		match batch.put_in(&self.patterns, &(id.0).0, &serialized) {
			Ok(()) => true,
			Err(e) => {
				error!("failed to write pattern for {}: {}", id, e);
				self.patterns_map.write().entry(*id).or_default().remove(&data);
				false
			}
		}
	}

	/// Register an element under its subchain in the reverse index.
	/// Idempotent like `add_pattern`.
	pub fn add_pattern_index(
		&self,
		key: &SubchainID,
		value: &ElementID,
		batch: &Batch<'_>,
	) -> bool {
		{
			let index = self.load_pattern_index(key);
			if index.contains(value) {
				trace!("pattern index already exists");
				return true;
			}
		}
		self.index_map.write().entry(*key).or_default().insert(*value);
		match batch.put_in(&self.pattern_index, &((key.0).0), &((value.0).0)) {
			Ok(()) => true,
			Err(e) => {
				error!("failed to write pattern index for {}: {}", key, e);
				self.index_map.write().entry(*key).or_default().remove(value);
				false
			}
		}
	}

	/// The registered patterns of one element
	pub fn get_patterns(&self, id: &ElementID) -> BTreeSet<PatternData> {
		self.load_patterns(id)
	}

	/// The elements registered under one subchain
	pub fn get_pattern_index(&self, id: &SubchainID) -> HashSet<ElementID> {
		self.load_pattern_index(id)
	}

	/// Every concrete pattern currently registered for a subchain
	pub fn patterns_for_subchain(&self, id: &SubchainID) -> Vec<PatternData> {
		let elements = self.load_pattern_index(id);
		let mut out = vec![];
		for element in elements {
			out.extend(self.load_patterns(&element).into_iter());
		}
		out
	}

	fn load_patterns(&self, id: &ElementID) -> BTreeSet<PatternData> {
		if let Some(set) = self.patterns_map.read().get(id) {
			return set.clone();
		}
		let mut set = BTreeSet::new();
		if let Ok(values) = self.patterns.dup_values(&(id.0).0) {
			for value in values {
				if let Ok(data) = ser::deserialize::<PatternData>(&mut &value[..]) {
					set.insert(data);
				}
			}
		}
		self.patterns_map.write().insert(*id, set.clone());
		set
	}

	fn load_pattern_index(&self, id: &SubchainID) -> HashSet<ElementID> {
		if let Some(set) = self.index_map.read().get(id) {
			return set.clone();
		}
		let mut set = HashSet::new();
		if let Ok(values) = self.pattern_index.dup_values(&(id.0).0) {
			for value in values {
				if value.len() == 32 {
					set.insert(ElementID(crate::core::hash::Hash::from_vec(&value)));
				}
			}
		}
		self.index_map.write().insert(*id, set.clone());
		set
	}

	/// Drop the scan cursor caches. Patterns and id mappings survive; they
	/// are content addressed and never change once written.
	pub fn clear(&self) {
		self.indexed_map.write().clear();
		self.scanned_map.write().clear();
	}
}

fn ser_vec_or_log<T: Writeable>(value: &T) -> Option<Vec<u8>> {
	match ser::ser_vec(value) {
		Ok(v) => Some(v),
		Err(e) => {
			error!("serialization failure: {}", e);
			None
		}
	}
}
