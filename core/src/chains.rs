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

//! The supported blockchains and their compiled parameters: genesis data,
//! checkpoints, wire magic, hash providers.

use std::fmt;
use std::str::FromStr;

use crate::hash::{sha256d, Hash};
use crate::header::WireHeader;

/// One supported blockchain. Determines hash functions, genesis constants,
/// wire framing and checkpoint data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
	/// Bitcoin mainnet
	Bitcoin,
	/// Bitcoin testnet3
	BitcoinTestnet,
	/// Bitcoin Cash mainnet
	BitcoinCash,
	/// Bitcoin Cash testnet
	BitcoinCashTestnet,
	/// Litecoin mainnet
	Litecoin,
	/// Litecoin testnet4
	LitecoinTestnet,
	/// Regtest-style chain with a trivial target, used by tests only
	UnitTest,
}

impl Chain {
	/// All supported chains
	pub fn all() -> &'static [Chain] {
		&[
			Chain::Bitcoin,
			Chain::BitcoinTestnet,
			Chain::BitcoinCash,
			Chain::BitcoinCashTestnet,
			Chain::Litecoin,
			Chain::LitecoinTestnet,
			Chain::UnitTest,
		]
	}

	/// The compiled parameters for this chain
	pub fn params(&self) -> &'static Params {
		match *self {
			Chain::Bitcoin => &BITCOIN,
			Chain::BitcoinTestnet => &BITCOIN_TESTNET,
			Chain::BitcoinCash => &BITCOIN_CASH,
			Chain::BitcoinCashTestnet => &BITCOIN_CASH_TESTNET,
			Chain::Litecoin => &LITECOIN,
			Chain::LitecoinTestnet => &LITECOIN_TESTNET,
			Chain::UnitTest => &UNIT_TEST,
		}
	}

	/// Stable numeric tag, used in storage keys and wire frames
	pub fn to_u32(&self) -> u32 {
		match *self {
			Chain::Bitcoin => 0,
			Chain::BitcoinTestnet => 1,
			Chain::BitcoinCash => 2,
			Chain::BitcoinCashTestnet => 3,
			Chain::Litecoin => 4,
			Chain::LitecoinTestnet => 5,
			Chain::UnitTest => 100,
		}
	}

	/// Reverse of `to_u32`
	pub fn from_u32(tag: u32) -> Option<Chain> {
		match tag {
			0 => Some(Chain::Bitcoin),
			1 => Some(Chain::BitcoinTestnet),
			2 => Some(Chain::BitcoinCash),
			3 => Some(Chain::BitcoinCashTestnet),
			4 => Some(Chain::Litecoin),
			5 => Some(Chain::LitecoinTestnet),
			100 => Some(Chain::UnitTest),
			_ => None,
		}
	}
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.params().name)
	}
}

impl FromStr for Chain {
	type Err = String;

	fn from_str(s: &str) -> Result<Chain, String> {
		for chain in Chain::all() {
			if chain.params().name == s {
				return Ok(*chain);
			}
		}
		Err(format!("unknown chain: {}", s))
	}
}

/// Compiled parameters of one chain.
pub struct Params {
	/// Chain this belongs to
	pub chain: Chain,
	/// Canonical lowercase name, also used in configuration
	pub name: &'static str,
	/// Hash of the genesis block
	pub genesis_hash: Hash,
	/// Merkle root of the genesis block
	pub genesis_merkle: Hash,
	/// Genesis timestamp
	pub genesis_time: u32,
	/// Genesis compact target
	pub genesis_bits: u32,
	/// Genesis nonce
	pub genesis_nonce: u32,
	/// Compiled checkpoint the header chain must pass through, if any
	pub checkpoint: Option<(i64, Hash)>,
	/// Wire magic bytes prefixed to every p2p frame
	pub magic: [u8; 4],
	/// Default p2p port
	pub default_port: u16,
	/// Block id hash function (display byte order)
	pub hash_fn: fn(&[u8]) -> Hash,
	/// Proof-of-work hash function (display byte order)
	// TODO wire a scrypt provider for the litecoin chains
	pub pow_fn: fn(&[u8]) -> Hash,
}

impl Params {
	/// The 80 genesis header bytes, rebuilt from the compiled fields.
	pub fn genesis_header(&self) -> [u8; 80] {
		WireHeader {
			version: 1,
			prev_hash: crate::hash::ZERO_HASH,
			merkle_root: self.genesis_merkle,
			time: self.genesis_time,
			bits: self.genesis_bits,
			nonce: self.genesis_nonce,
		}
		.to_wire_bytes()
	}

	/// Height of the compiled checkpoint, 0 when the chain has none
	pub fn checkpoint_height(&self) -> i64 {
		self.checkpoint.map(|(h, _)| h).unwrap_or(0)
	}
}

/// Block id for the bitcoin family: double SHA256, presented in the
/// conventional reversed (display) byte order so lexicographic comparison
/// matches numeric comparison.
pub fn block_hash_sha256d(data: &[u8]) -> Hash {
	let mut h = sha256d(data);
	h.0.reverse();
	h
}

fn hash(hex: &str) -> Hash {
	Hash::from_hex(hex).expect("invalid compiled hash constant")
}

lazy_static! {
	static ref BITCOIN: Params = Params {
		chain: Chain::Bitcoin,
		name: "bitcoin",
		genesis_hash: hash("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
		genesis_merkle: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		genesis_time: 1231006505,
		genesis_bits: 0x1d00ffff,
		genesis_nonce: 2083236893,
		checkpoint: Some((
			11111,
			hash("0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"),
		)),
		magic: [0xf9, 0xbe, 0xb4, 0xd9],
		default_port: 8333,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref BITCOIN_TESTNET: Params = Params {
		chain: Chain::BitcoinTestnet,
		name: "bitcoin_testnet",
		genesis_hash: hash("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"),
		genesis_merkle: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		genesis_time: 1296688602,
		genesis_bits: 0x1d00ffff,
		genesis_nonce: 414098458,
		checkpoint: Some((
			546,
			hash("000000002a936ca763904c3c35fce2f3556c559c0214345d31b1bcebf76acb70"),
		)),
		magic: [0x0b, 0x11, 0x09, 0x07],
		default_port: 18333,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref BITCOIN_CASH: Params = Params {
		chain: Chain::BitcoinCash,
		name: "bitcoin_cash",
		genesis_hash: hash("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
		genesis_merkle: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		genesis_time: 1231006505,
		genesis_bits: 0x1d00ffff,
		genesis_nonce: 2083236893,
		checkpoint: Some((
			11111,
			hash("0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"),
		)),
		magic: [0xe3, 0xe1, 0xf3, 0xe8],
		default_port: 8333,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref BITCOIN_CASH_TESTNET: Params = Params {
		chain: Chain::BitcoinCashTestnet,
		name: "bitcoin_cash_testnet",
		genesis_hash: hash("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"),
		genesis_merkle: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		genesis_time: 1296688602,
		genesis_bits: 0x1d00ffff,
		genesis_nonce: 414098458,
		checkpoint: Some((
			546,
			hash("000000002a936ca763904c3c35fce2f3556c559c0214345d31b1bcebf76acb70"),
		)),
		magic: [0xf4, 0xe5, 0xf3, 0xf4],
		default_port: 18333,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref LITECOIN: Params = Params {
		chain: Chain::Litecoin,
		name: "litecoin",
		genesis_hash: hash("12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2"),
		genesis_merkle: hash("97ddfbbae6be97fd6cdf3e7ca13232a3afff2353e29badfab7f73011edd4ced9"),
		genesis_time: 1317972665,
		genesis_bits: 0x1e0ffff0,
		genesis_nonce: 2084524493,
		checkpoint: Some((
			1500,
			hash("841a2965955dd288cfa707a755d05a54e45f8bd476835ec9af4402a2b59a2967"),
		)),
		magic: [0xfb, 0xc0, 0xb6, 0xdb],
		default_port: 9333,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref LITECOIN_TESTNET: Params = Params {
		chain: Chain::LitecoinTestnet,
		name: "litecoin_testnet",
		genesis_hash: hash("4966625a4b2851d9fdee139e56211a0d88575f59ed816ff5e6a63deb4e3e29a0"),
		genesis_merkle: hash("97ddfbbae6be97fd6cdf3e7ca13232a3afff2353e29badfab7f73011edd4ced9"),
		genesis_time: 1486949366,
		genesis_bits: 0x1e0ffff0,
		genesis_nonce: 293345,
		checkpoint: None,
		magic: [0xfd, 0xd2, 0xc8, 0xf1],
		default_port: 19335,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
	static ref UNIT_TEST: Params = Params {
		chain: Chain::UnitTest,
		name: "unit_test",
		genesis_hash: unit_test_genesis_hash(),
		genesis_merkle: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		genesis_time: 1296688602,
		genesis_bits: 0x207fffff,
		genesis_nonce: 2,
		checkpoint: None,
		magic: [0xfa, 0xbf, 0xb5, 0xda],
		default_port: 18444,
		hash_fn: block_hash_sha256d,
		pow_fn: block_hash_sha256d,
	};
}

fn unit_test_genesis_hash() -> Hash {
	let genesis = WireHeader {
		version: 1,
		prev_hash: crate::hash::ZERO_HASH,
		merkle_root: hash("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"),
		time: 1296688602,
		bits: 0x207fffff,
		nonce: 2,
	};
	block_hash_sha256d(&genesis.to_wire_bytes())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::header::Header;

	#[test]
	fn chain_tags_round_trip() {
		for chain in Chain::all() {
			assert_eq!(Chain::from_u32(chain.to_u32()), Some(*chain));
		}
		assert_eq!(Chain::from_u32(9999), None);
	}

	#[test]
	fn chain_names_round_trip() {
		for chain in Chain::all() {
			assert_eq!(chain.params().name.parse::<Chain>().unwrap(), *chain);
		}
		assert!("dogecoin".parse::<Chain>().is_err());
	}

	#[test]
	fn genesis_headers_hash_to_compiled_hashes() {
		for chain in &[
			Chain::Bitcoin,
			Chain::BitcoinTestnet,
			Chain::BitcoinCash,
			Chain::UnitTest,
		] {
			let params = chain.params();
			let header = Header::from_wire(*chain, &params.genesis_header(), 0).unwrap();
			assert_eq!(header.hash, params.genesis_hash, "chain {}", chain);
		}
	}

	#[test]
	fn unit_test_target_is_trivial() {
		let params = Chain::UnitTest.params();
		let header = Header::from_wire(Chain::UnitTest, &params.genesis_header(), 0).unwrap();
		assert!(header.verify_pow(Chain::UnitTest));
	}
}
