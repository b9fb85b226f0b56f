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

//! Block headers as the node sees them: the 80-byte bitcoin-family wire
//! encoding, the compact-bits proof-of-work target, and the work metric
//! accumulated along a chain.

use byteorder::{ByteOrder, LittleEndian};

use crate::chains::Chain;
use crate::hash::Hash;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Length of a serialized bitcoin-family header
pub const HEADER_LEN: usize = 80;

/// The wire fields of a bitcoin-family block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireHeader {
	/// Block version
	pub version: i32,
	/// Hash of the parent block
	pub prev_hash: Hash,
	/// Merkle root of the block's transactions
	pub merkle_root: Hash,
	/// Block timestamp
	pub time: u32,
	/// Compact encoding of the proof-of-work target
	pub bits: u32,
	/// Proof-of-work nonce
	pub nonce: u32,
}

impl WireHeader {
	/// Serialize to the 80-byte wire form. Hash fields and integers are
	/// little-endian per the bitcoin convention.
	pub fn to_wire_bytes(&self) -> [u8; HEADER_LEN] {
		let mut buf = [0u8; HEADER_LEN];
		LittleEndian::write_i32(&mut buf[0..4], self.version);
		write_hash_le(&mut buf[4..36], &self.prev_hash);
		write_hash_le(&mut buf[36..68], &self.merkle_root);
		LittleEndian::write_u32(&mut buf[68..72], self.time);
		LittleEndian::write_u32(&mut buf[72..76], self.bits);
		LittleEndian::write_u32(&mut buf[76..80], self.nonce);
		buf
	}

	/// Parse the 80-byte wire form.
	pub fn from_wire_bytes(bytes: &[u8]) -> Result<WireHeader, ser::Error> {
		if bytes.len() != HEADER_LEN {
			return Err(ser::Error::CorruptedData);
		}
		Ok(WireHeader {
			version: LittleEndian::read_i32(&bytes[0..4]),
			prev_hash: read_hash_le(&bytes[4..36]),
			merkle_root: read_hash_le(&bytes[36..68]),
			time: LittleEndian::read_u32(&bytes[68..72]),
			bits: LittleEndian::read_u32(&bytes[72..76]),
			nonce: LittleEndian::read_u32(&bytes[76..80]),
		})
	}
}

// Hashes transit the wire in reversed byte order relative to their display
// form. We keep the display form in memory.
fn write_hash_le(buf: &mut [u8], hash: &Hash) {
	for (i, b) in hash.0.iter().rev().enumerate() {
		buf[i] = *b;
	}
}

fn read_hash_le(buf: &[u8]) -> Hash {
	let mut h = [0u8; 32];
	for (i, b) in buf.iter().rev().enumerate() {
		h[i] = *b;
	}
	Hash(h)
}

/// The node's internal view of a header: identity, placement, target and the
/// work it contributes, alongside the raw wire bytes it round-trips to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
	/// The block hash, computed over `raw` with the chain's hash function
	pub hash: Hash,
	/// Hash of the parent block, zero for genesis
	pub prev_hash: Hash,
	/// Height in the chain the header was accepted at
	pub height: i64,
	/// Compact proof-of-work target
	pub bits: u32,
	/// Work contributed by this single header
	pub work: u128,
	/// The 80 wire bytes
	pub raw: Vec<u8>,
}

impl Header {
	/// Build the internal view from raw wire bytes at a known height,
	/// hashing with the given chain's block hash function.
	pub fn from_wire(chain: Chain, raw: &[u8], height: i64) -> Result<Header, ser::Error> {
		let wire = WireHeader::from_wire_bytes(raw)?;
		let hash = (chain.params().hash_fn)(raw);
		Ok(Header {
			hash,
			prev_hash: wire.prev_hash,
			height,
			bits: wire.bits,
			work: work_from_bits(wire.bits),
			raw: raw.to_vec(),
		})
	}

	/// The wire fields, re-parsed from the raw bytes.
	pub fn wire(&self) -> Result<WireHeader, ser::Error> {
		WireHeader::from_wire_bytes(&self.raw)
	}

	/// Whether the stored raw bytes still hash to our hash under the chain's
	/// block hash function.
	pub fn verify_hash(&self, chain: Chain) -> bool {
		(chain.params().hash_fn)(&self.raw) == self.hash
	}

	/// Whether the proof-of-work hash of the raw bytes satisfies the compact
	/// target carried in the header itself. The PoW hash function comes from
	/// the chain params and may differ from the block id function.
	pub fn verify_pow(&self, chain: Chain) -> bool {
		let target = match target_from_bits(self.bits) {
			Some(t) => t,
			None => return false,
		};
		let pow_hash = (chain.params().pow_fn)(&self.raw);
		hash_meets_target(&pow_hash, &target)
	}
}

impl Writeable for Header {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		self.prev_hash.write(writer)?;
		writer.write_i64(self.height)?;
		writer.write_u32(self.bits)?;
		writer.write_u128(self.work)?;
		writer.write_bytes(&self.raw)
	}
}

impl Readable for Header {
	fn read<R: Reader>(reader: &mut R) -> Result<Header, ser::Error> {
		let hash = Hash::read(reader)?;
		let prev_hash = Hash::read(reader)?;
		let height = reader.read_i64()?;
		let bits = reader.read_u32()?;
		let work = reader.read_u128()?;
		let raw = reader.read_bytes()?;
		if height < 0 || raw.len() != HEADER_LEN {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Header {
			hash,
			prev_hash,
			height,
			bits,
			work,
			raw,
		})
	}
}

/// Expand a compact-bits target into its 256-bit big-endian byte form.
/// Returns None for encodings that overflow or are negative.
pub fn target_from_bits(bits: u32) -> Option<[u8; 32]> {
	let exponent = (bits >> 24) as usize;
	let mantissa = bits & 0x007f_ffff;
	if bits & 0x0080_0000 != 0 {
		// sign bit set, never a valid target
		return None;
	}
	if mantissa == 0 {
		return None;
	}
	let mut target = [0u8; 32];
	if exponent <= 3 {
		let shifted = mantissa >> (8 * (3 - exponent));
		target[29] = (shifted >> 16) as u8;
		target[30] = (shifted >> 8) as u8;
		target[31] = shifted as u8;
	} else {
		if exponent > 32 {
			return None;
		}
		let pos = 32 - exponent;
		target[pos] = (mantissa >> 16) as u8;
		if pos + 1 < 32 {
			target[pos + 1] = (mantissa >> 8) as u8;
		}
		if pos + 2 < 32 {
			target[pos + 2] = mantissa as u8;
		}
	}
	Some(target)
}

/// Whether a block hash, interpreted as the 256-bit number the bitcoin
/// family defines (reversed byte order), is at or below the target.
pub fn hash_meets_target(hash: &Hash, target: &[u8; 32]) -> bool {
	// display-order hash bytes are already big-endian numerically
	hash.0[..] <= target[..]
}

/// Work contributed by a header with the given compact target, defined as
/// floor(2^256 / (target + 1)) and computed on the compact representation so
/// no 256-bit arithmetic is needed. Saturates at u128::MAX for pathologically
/// hard targets.
pub fn work_from_bits(bits: u32) -> u128 {
	let exponent = (bits >> 24) as i32;
	let mantissa = (bits & 0x007f_ffff) as u128;
	if mantissa == 0 || bits & 0x0080_0000 != 0 {
		return 0;
	}
	// target = mantissa * 2^(8 * (exponent - 3))
	// work ~= 2^(256 - 8 * (exponent - 3)) / (mantissa + 1)
	let shift = 256 - 8 * (exponent - 3);
	if shift <= 0 {
		return 0;
	}
	let divisor = mantissa + 1;
	if shift >= 128 {
		// numerator exceeds u128: divide first, then shift the spillover
		// back in, saturating once significant bits would be lost
		let spill = (shift - 127) as u32;
		let base = (1u128 << 127) / divisor;
		if spill >= base.leading_zeros() {
			return u128::max_value();
		}
		base << spill
	} else {
		(1u128 << shift) / divisor
	}
}
