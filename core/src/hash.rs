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

//! Hash function
//!
//! Fixed-width hash type used pervasively for blocks, transactions and
//! compact filters. The default provider is bitcoin-family double SHA256;
//! chains may substitute their own function through their `Params`.

use std::cmp::Ordering;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use crate::util;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Block hashes, transaction hashes and filter hashes share this
/// representation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

/// The "zero" hash, also the parent hash carried by every genesis header.
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let hash_hex = self.to_hex();
		const NUM_SHOW: usize = 12;

		write!(f, "{}", &hash_hex[..NUM_SHOW])
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl Hash {
	/// Builds a Hash from a byte vector. If the vector is too short, it will be
	/// completed by zeroes. If it's too long, it will be truncated.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; 32];
		let copy_size = v.len().min(32);
		h[..copy_size].copy_from_slice(&v[..copy_size]);
		Hash(h)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// The hash as a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Convert hash to hex string
	pub fn to_hex(&self) -> String {
		util::to_hex(&self.0)
	}

	/// Convert hex string back to hash
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let bytes = util::from_hex(hex).map_err(|_| ser::Error::CorruptedData)?;
		if bytes.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Hash::from_vec(&bytes))
	}

	/// Whether this is the all-zero hash
	pub fn is_zero(&self) -> bool {
		*self == ZERO_HASH
	}
}

impl Ord for Hash {
	fn cmp(&self, other: &Hash) -> Ordering {
		self.0.cmp(&other.0)
	}
}

impl PartialOrd for Hash {
	fn partial_cmp(&self, other: &Hash) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl AsRef<[u8]> for Hash {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read<R: Reader>(reader: &mut R) -> Result<Hash, ser::Error> {
		let v = reader.read_fixed_bytes(32)?;
		Ok(Hash::from_vec(&v))
	}
}

/// Double SHA256 of the provided bytes, the bitcoin-family block and
/// transaction hash function.
pub fn sha256d(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(&first);
	Hash::from_vec(&second)
}

/// Single SHA256, used for frame checksums.
pub fn sha256(data: &[u8]) -> Hash {
	Hash::from_vec(&Sha256::digest(data))
}

/// A trait for types hashed by their canonical byte serialization.
pub trait Hashed {
	/// The byte serialization the hash is computed over
	fn hash_bytes(&self) -> Vec<u8>;

	/// Double SHA256 of the serialization
	fn hash(&self) -> Hash {
		sha256d(&self.hash_bytes())
	}
}

impl Hashed for [u8] {
	fn hash_bytes(&self) -> Vec<u8> {
		self.to_owned()
	}
}

impl Hashed for Vec<u8> {
	fn hash_bytes(&self) -> Vec<u8> {
		self.clone()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn sha256d_empty() {
		// well known: double sha256 of the empty string
		assert_eq!(
			sha256d(b"").to_hex(),
			"5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
		);
	}

	#[test]
	fn hash_ordering_is_lexicographic() {
		let a = Hash::from_vec(&[1; 32]);
		let b = Hash::from_vec(&[2; 32]);
		assert!(a < b);
		assert_eq!(a.cmp(&a), Ordering::Equal);
	}

	#[test]
	fn hex_round_trip() {
		let h = sha256d(b"otnode");
		let h2 = Hash::from_hex(&h.to_hex()).unwrap();
		assert_eq!(h, h2);
		assert!(Hash::from_hex("abcd").is_err());
	}
}
