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

//! Peer-facing types: transports, addresses, capabilities, ban scoring and
//! the peer manager contract.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::msg::{Message, MsgKind};

/// Ban threshold: a peer reaching this score is disconnected
pub const BAN_THRESHOLD: u32 = 100;

/// Errors specific to the peer layer
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// A frame failed to parse or carried a bad checksum
	#[fail(display = "Malformed frame: {}", _0)]
	MalformedFrame(String),
	/// A frame declared a payload larger than the protocol allows
	#[fail(display = "Oversized payload: {}", _0)]
	OversizedPayload(u64),
	/// The frame's magic bytes belong to a different chain
	#[fail(display = "Wrong network magic")]
	WrongMagic,
	/// Serialization failure
	#[fail(display = "Serialization error: {}", _0)]
	SerErr(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::SerErr(format!("{}", e))
	}
}

bitflags! {
	/// Capabilities advertised during the handshake
	pub struct Capabilities: u32 {
		/// We don't know (yet) what the peer can do
		const UNKNOWN = 0b0000_0000;
		/// Peer serves full blocks
		const FULL_BLOCKS = 0b0000_0001;
		/// Peer serves compact filters
		const COMPACT_FILTERS = 0b0000_0010;
		/// Peer participates in out-of-band sync
		const OTDHT = 0b0000_0100;
	}
}

/// Connection transports supported for peer addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
	/// Plain IPv4
	Ipv4,
	/// Plain IPv6
	Ipv6,
	/// Tor onion service (v3 public key bytes)
	Onion,
	/// In-process channel, used by tests
	InProc,
}

impl Transport {
	fn to_u8(self) -> u8 {
		match self {
			Transport::Ipv4 => 0,
			Transport::Ipv6 => 1,
			Transport::Onion => 2,
			Transport::InProc => 3,
		}
	}

	fn from_u8(tag: u8) -> Option<Transport> {
		match tag {
			0 => Some(Transport::Ipv4),
			1 => Some(Transport::Ipv6),
			2 => Some(Transport::Onion),
			3 => Some(Transport::InProc),
			_ => None,
		}
	}
}

/// A peer address: transport discriminant, raw address bytes and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
	/// How to reach the peer
	pub transport: Transport,
	/// Address bytes; length depends on the transport
	pub bytes: Vec<u8>,
	/// Port, zero where the transport has no port concept
	pub port: u16,
}

impl PeerAddr {
	/// Wrap a socket address
	pub fn from_socket(addr: SocketAddr) -> PeerAddr {
		match addr.ip() {
			IpAddr::V4(ip) => PeerAddr {
				transport: Transport::Ipv4,
				bytes: ip.octets().to_vec(),
				port: addr.port(),
			},
			IpAddr::V6(ip) => PeerAddr {
				transport: Transport::Ipv6,
				bytes: ip.octets().to_vec(),
				port: addr.port(),
			},
		}
	}

	/// The socket address, for IP transports
	pub fn to_socket(&self) -> Option<SocketAddr> {
		match self.transport {
			Transport::Ipv4 if self.bytes.len() == 4 => {
				let mut octets = [0u8; 4];
				octets.copy_from_slice(&self.bytes);
				Some(SocketAddr::new(
					IpAddr::V4(Ipv4Addr::from(octets)),
					self.port,
				))
			}
			Transport::Ipv6 if self.bytes.len() == 16 => {
				let mut octets = [0u8; 16];
				octets.copy_from_slice(&self.bytes);
				Some(SocketAddr::new(
					IpAddr::V6(Ipv6Addr::from(octets)),
					self.port,
				))
			}
			_ => None,
		}
	}
}

impl fmt::Display for PeerAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.to_socket() {
			Some(addr) => write!(f, "{}", addr),
			None => write!(f, "{:?}({})", self.transport, self.bytes.len()),
		}
	}
}

impl Writeable for PeerAddr {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.transport.to_u8())?;
		writer.write_bytes(&self.bytes)?;
		writer.write_u16(self.port)
	}
}

impl Readable for PeerAddr {
	fn read<R: Reader>(reader: &mut R) -> Result<PeerAddr, ser::Error> {
		let transport =
			Transport::from_u8(reader.read_u8()?).ok_or(ser::Error::CorruptedData)?;
		let bytes = reader.read_bytes()?;
		let port = reader.read_u16()?;
		let expected = match transport {
			Transport::Ipv4 => Some(4),
			Transport::Ipv6 => Some(16),
			Transport::Onion => Some(32),
			Transport::InProc => None,
		};
		if let Some(len) = expected {
			if bytes.len() != len {
				return Err(ser::Error::CorruptedData);
			}
		}
		Ok(PeerAddr {
			transport,
			bytes,
			port,
		})
	}
}

/// Opaque peer identity assigned by the peer manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "peer-{}", self.0)
	}
}

/// Misbehavior accounting for one peer. Protocol errors raise the score;
/// crossing the threshold flags the peer for disconnection.
#[derive(Debug, Clone, Default)]
pub struct BanScore {
	score: u32,
}

impl BanScore {
	/// Fresh score
	pub fn new() -> BanScore {
		BanScore::default()
	}

	/// Record a protocol offense of the given weight
	pub fn offense(&mut self, weight: u32, what: &str) -> bool {
		self.score = self.score.saturating_add(weight);
		trace!("ban score +{} ({}): now {}", weight, what, self.score);
		self.banned()
	}

	/// Whether the peer crossed the ban threshold
	pub fn banned(&self) -> bool {
		self.score >= BAN_THRESHOLD
	}

	/// Current score
	pub fn score(&self) -> u32 {
		self.score
	}
}

/// The contract the node core consumes from the peer layer. Implementations
/// own sockets and connection lifecycle; the core only pushes and receives
/// framed messages.
pub trait PeerManager: Send + Sync {
	/// Send a message to every connected peer
	fn broadcast(&self, message: &Message);
	/// Send a message to one peer
	fn send_to(&self, peer: PeerId, message: &Message) -> bool;
	/// Number of connected peers
	fn peer_count(&self) -> usize;
	/// Peers advertising the given message kind's capability
	fn peers_supporting(&self, kind: MsgKind) -> Vec<PeerId>;
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn socket_round_trip() {
		let addr: SocketAddr = "203.0.113.7:8333".parse().unwrap();
		let peer = PeerAddr::from_socket(addr);
		assert_eq!(peer.transport, Transport::Ipv4);
		assert_eq!(peer.to_socket(), Some(addr));

		let addr6: SocketAddr = "[2001:db8::1]:18333".parse().unwrap();
		let peer6 = PeerAddr::from_socket(addr6);
		assert_eq!(peer6.transport, Transport::Ipv6);
		assert_eq!(peer6.to_socket(), Some(addr6));
	}

	#[test]
	fn addr_ser_round_trip() {
		let peer = PeerAddr {
			transport: Transport::Onion,
			bytes: vec![7; 32],
			port: 0,
		};
		let bytes = crate::core::ser::ser_vec(&peer).unwrap();
		let back: PeerAddr = crate::core::ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(peer, back);

		// onion addresses must carry exactly 32 bytes
		let bad = PeerAddr {
			transport: Transport::Onion,
			bytes: vec![7; 10],
			port: 0,
		};
		let bytes = crate::core::ser::ser_vec(&bad).unwrap();
		assert!(crate::core::ser::deserialize::<PeerAddr>(&mut &bytes[..]).is_err());
	}

	#[test]
	fn ban_score_threshold() {
		let mut score = BanScore::new();
		assert!(!score.offense(10, "malformed header"));
		assert!(!score.banned());
		assert!(score.offense(90, "repeated garbage"));
		assert!(score.banned());
	}
}
