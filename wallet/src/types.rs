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

//! Wallet-side identifiers and element types: sub-accounts, subchain roles,
//! the content-addressed subchain id, and the state of tracked outputs.

use std::fmt;

use crate::chain::FilterType;
use crate::core::hash::{sha256d, Hash};
use crate::core::pos::BlockPosition;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};

/// Opaque identifier of a wallet sub-account (HD account, payment-code
/// account or notification account).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubaccountID(pub Hash);

impl SubaccountID {
	/// Derive a sub-account id from arbitrary identifying bytes
	pub fn from_bytes(bytes: &[u8]) -> SubaccountID {
		SubaccountID(sha256d(bytes))
	}
}

impl fmt::Display for SubaccountID {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0)
	}
}

/// Identifier of a single wallet element (script/pattern source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementID(pub Hash);

impl ElementID {
	/// Derive an element id from its identifying bytes
	pub fn from_bytes(bytes: &[u8]) -> ElementID {
		ElementID(sha256d(bytes))
	}
}

impl fmt::Display for ElementID {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0)
	}
}

impl Writeable for ElementID {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.0.write(writer)
	}
}

impl Readable for ElementID {
	fn read<R: Reader>(reader: &mut R) -> Result<ElementID, ser::Error> {
		Ok(ElementID(Hash::read(reader)?))
	}
}

/// Enumerated role of a scan lane within a sub-account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubchainKind {
	/// Externally visible receive chain
	External,
	/// Internal change chain
	Internal,
	/// Incoming payment-code chain
	Incoming,
	/// Outgoing payment-code chain
	Outgoing,
	/// Payment-code notification chain
	Notification,
}

impl SubchainKind {
	/// Stable numeric tag used in the subchain id preimage
	pub fn to_u8(&self) -> u8 {
		match *self {
			SubchainKind::External => 0,
			SubchainKind::Internal => 1,
			SubchainKind::Incoming => 2,
			SubchainKind::Outgoing => 3,
			SubchainKind::Notification => 4,
		}
	}

	/// Reverse of `to_u8`
	pub fn from_u8(tag: u8) -> Option<SubchainKind> {
		match tag {
			0 => Some(SubchainKind::External),
			1 => Some(SubchainKind::Internal),
			2 => Some(SubchainKind::Incoming),
			3 => Some(SubchainKind::Outgoing),
			4 => Some(SubchainKind::Notification),
			_ => None,
		}
	}
}

impl fmt::Display for SubchainKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match *self {
			SubchainKind::External => "external",
			SubchainKind::Internal => "internal",
			SubchainKind::Incoming => "incoming",
			SubchainKind::Outgoing => "outgoing",
			SubchainKind::Notification => "notification",
		};
		write!(f, "{}", name)
	}
}

/// Content-addressed identifier of one subchain: stable over the preimage
/// `subaccount ∥ subchain ∥ filter_type ∥ version`. The primary key for
/// scan cursors and pattern indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubchainID(pub Hash);

impl SubchainID {
	/// Derive the id from its defining fields
	pub fn derive(
		subaccount: &SubaccountID,
		subchain: SubchainKind,
		filter_type: FilterType,
		version: u32,
	) -> SubchainID {
		let mut preimage = Vec::with_capacity(32 + 1 + 1 + 4);
		preimage.extend_from_slice((subaccount.0).as_bytes());
		preimage.push(subchain.to_u8());
		preimage.push(filter_type.to_u8());
		preimage.extend_from_slice(&version.to_be_bytes());
		SubchainID(sha256d(&preimage))
	}
}

impl fmt::Display for SubchainID {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0)
	}
}

/// One registered pattern: the element index it derives from and its raw
/// script/element bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternData {
	/// Derivation index of the element within its subchain
	pub index: u32,
	/// Raw pattern bytes matched against compact filters
	pub bytes: Vec<u8>,
}

impl Writeable for PatternData {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.index)?;
		writer.write_bytes(&self.bytes)
	}
}

impl Readable for PatternData {
	fn read<R: Reader>(reader: &mut R) -> Result<PatternData, ser::Error> {
		let index = reader.read_u32()?;
		let bytes = reader.read_bytes()?;
		Ok(PatternData { index, bytes })
	}
}

/// Lifecycle state of a tracked transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxoState {
	/// Seen only in the mempool
	UnconfirmedNew,
	/// Spent by an unconfirmed transaction
	UnconfirmedSpend,
	/// Created by a confirmed transaction
	ConfirmedNew,
	/// Spent by a confirmed transaction
	ConfirmedSpend,
	/// Created by a transaction no longer on the best chain
	OrphanedNew,
	/// Spent by a transaction no longer on the best chain
	OrphanedSpend,
	/// Confirmed coinbase output below maturity
	Immature,
}

/// The source of wallet elements for one subchain. Key derivation itself is
/// a crypto-provider concern; the scanner only needs the derived bytes.
pub trait ElementSource: Send + Sync {
	/// Number of elements currently derivable
	fn element_count(&self) -> u32;
	/// The derived elements with indexes in `[start, end)`, as
	/// `(index, pattern bytes)` pairs
	fn elements(&self, start: u32, end: u32) -> Vec<(u32, Vec<u8>)>;
}

/// Events published by wallet components
#[derive(Debug, Clone)]
pub enum WalletEvent {
	/// A subchain finished scanning up to the given position
	ScanProgress(SubchainID, BlockPosition),
	/// A block contained matches for a subchain
	BlockMatches(SubchainID, BlockPosition, usize),
	/// A mempool transaction matched a subchain's patterns
	MempoolMatch(SubchainID, Hash),
}
