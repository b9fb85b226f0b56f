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

//! Block positions: the (height, hash) pair that identifies one slot in a
//! chain, with a distinguished "no position" value.

use std::cmp::Ordering;
use std::fmt;

use crate::hash::{Hash, ZERO_HASH};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// A (height, hash) pair. Totally ordered first by height, then by hash
/// lexicographically. Height -1 with a zero hash denotes "no position".
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPosition {
	/// Height in the chain, -1 for "no position"
	pub height: i64,
	/// Hash of the block at that height
	pub hash: Hash,
}

impl BlockPosition {
	/// A real position. Panics on negative heights, which only the `none`
	/// sentinel may carry.
	pub fn new(height: i64, hash: Hash) -> BlockPosition {
		assert!(height >= 0);
		BlockPosition { height, hash }
	}

	/// The "no position" sentinel
	pub fn none() -> BlockPosition {
		BlockPosition {
			height: -1,
			hash: ZERO_HASH,
		}
	}

	/// Whether this is the "no position" sentinel
	pub fn is_none(&self) -> bool {
		self.height < 0
	}
}

impl Default for BlockPosition {
	fn default() -> BlockPosition {
		BlockPosition::none()
	}
}

impl Ord for BlockPosition {
	fn cmp(&self, other: &BlockPosition) -> Ordering {
		self.height
			.cmp(&other.height)
			.then_with(|| self.hash.cmp(&other.hash))
	}
}

impl PartialOrd for BlockPosition {
	fn partial_cmp(&self, other: &BlockPosition) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Debug for BlockPosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "({}, {:?})", self.height, self.hash)
	}
}

impl fmt::Display for BlockPosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl Writeable for BlockPosition {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i64(self.height)?;
		self.hash.write(writer)
	}
}

impl Readable for BlockPosition {
	fn read<R: Reader>(reader: &mut R) -> Result<BlockPosition, ser::Error> {
		let height = reader.read_i64()?;
		let hash = Hash::read(reader)?;
		if height < -1 {
			return Err(ser::Error::CorruptedData);
		}
		Ok(BlockPosition { height, hash })
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hash::sha256d;

	#[test]
	fn ordering_by_height_then_hash() {
		let a = BlockPosition::new(5, Hash::from_vec(&[1; 32]));
		let b = BlockPosition::new(5, Hash::from_vec(&[2; 32]));
		let c = BlockPosition::new(6, Hash::from_vec(&[0; 32]));
		assert!(a < b);
		assert!(b < c);
		assert!(BlockPosition::none() < a);
	}

	#[test]
	fn none_round_trips() {
		let none = BlockPosition::none();
		assert!(none.is_none());
		let bytes = crate::ser::ser_vec(&none).unwrap();
		let back: BlockPosition = crate::ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(none, back);
	}

	#[test]
	fn real_position_round_trips() {
		let pos = BlockPosition::new(42, sha256d(b"pos"));
		let bytes = crate::ser::ser_vec(&pos).unwrap();
		let back: BlockPosition = crate::ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(pos, back);
	}
}
