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

//! Message framing for the bitcoin-family wire protocol. Each frame is a
//! fixed-size header (chain magic, command, payload length, checksum)
//! followed by the payload. The decoder yields `{kind, payload}` pairs; the
//! core never interprets payloads it doesn't use.

use byteorder::{ByteOrder, LittleEndian};

use crate::core::chains::Chain;
use crate::core::hash::sha256d;
use crate::types::Error;

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 24;

/// Maximum payload accepted from a peer (the bitcoin 32 MiB cap)
pub const MAX_PAYLOAD: u64 = 32 * 1024 * 1024;

const COMMAND_LEN: usize = 12;

/// Message kinds the node core consumes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgKind {
	/// Handshake offer
	Version,
	/// Handshake acknowledgement
	Verack,
	/// A run of block headers
	Headers,
	/// Header request by locator
	GetHeaders,
	/// Inventory announcement
	Inv,
	/// Inventory request
	GetData,
	/// A full block
	Block,
	/// Protocol-level rejection (optional in modern protocols)
	Reject,
	/// Anything this node doesn't interpret
	Unknown(String),
}

impl MsgKind {
	/// The wire command string
	pub fn command(&self) -> &str {
		match *self {
			MsgKind::Version => "version",
			MsgKind::Verack => "verack",
			MsgKind::Headers => "headers",
			MsgKind::GetHeaders => "getheaders",
			MsgKind::Inv => "inv",
			MsgKind::GetData => "getdata",
			MsgKind::Block => "block",
			MsgKind::Reject => "reject",
			MsgKind::Unknown(ref other) => other,
		}
	}

	fn from_command(command: &str) -> MsgKind {
		match command {
			"version" => MsgKind::Version,
			"verack" => MsgKind::Verack,
			"headers" => MsgKind::Headers,
			"getheaders" => MsgKind::GetHeaders,
			"inv" => MsgKind::Inv,
			"getdata" => MsgKind::GetData,
			"block" => MsgKind::Block,
			"reject" => MsgKind::Reject,
			other => MsgKind::Unknown(other.to_owned()),
		}
	}
}

/// Header of any protocol message, used to identify incoming messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
	/// Chain magic bytes
	pub magic: [u8; 4],
	/// Zero-padded ascii command
	pub command: [u8; COMMAND_LEN],
	/// Payload length
	pub length: u32,
	/// First four bytes of the payload's double SHA256
	pub checksum: [u8; 4],
}

impl MsgHeader {
	/// Parse the fixed-size frame header, validating the chain magic.
	pub fn from_bytes(chain: Chain, bytes: &[u8]) -> Result<MsgHeader, Error> {
		if bytes.len() < FRAME_HEADER_LEN {
			return Err(Error::MalformedFrame(format!(
				"frame header needs {} bytes, got {}",
				FRAME_HEADER_LEN,
				bytes.len()
			)));
		}
		let mut magic = [0u8; 4];
		magic.copy_from_slice(&bytes[0..4]);
		if magic != chain.params().magic {
			return Err(Error::WrongMagic);
		}
		let mut command = [0u8; COMMAND_LEN];
		command.copy_from_slice(&bytes[4..16]);
		let length = LittleEndian::read_u32(&bytes[16..20]);
		if u64::from(length) > MAX_PAYLOAD {
			return Err(Error::OversizedPayload(u64::from(length)));
		}
		let mut checksum = [0u8; 4];
		checksum.copy_from_slice(&bytes[20..24]);
		Ok(MsgHeader {
			magic,
			command,
			length,
			checksum,
		})
	}

	/// The command as a string, if it is valid zero-padded ascii
	pub fn command_str(&self) -> Result<String, Error> {
		let end = self
			.command
			.iter()
			.position(|b| *b == 0)
			.unwrap_or(COMMAND_LEN);
		let name = &self.command[..end];
		if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
			return Err(Error::MalformedFrame("bad command encoding".to_owned()));
		}
		// the padding must be all zero
		if self.command[end..].iter().any(|b| *b != 0) {
			return Err(Error::MalformedFrame("bad command padding".to_owned()));
		}
		Ok(String::from_utf8_lossy(name).into_owned())
	}
}

/// One decoded message: its kind and the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	/// What the frame declared itself as
	pub kind: MsgKind,
	/// Uninterpreted payload
	pub payload: Vec<u8>,
}

fn checksum_of(payload: &[u8]) -> [u8; 4] {
	let digest = sha256d(payload);
	let mut out = [0u8; 4];
	out.copy_from_slice(&digest.0[..4]);
	out
}

/// Encode a message into a complete frame for the given chain.
pub fn encode_message(chain: Chain, message: &Message) -> Result<Vec<u8>, Error> {
	let command = message.kind.command();
	if command.len() > COMMAND_LEN || !command.bytes().all(|b| b.is_ascii_graphic()) {
		return Err(Error::MalformedFrame(format!(
			"unencodable command {:?}",
			command
		)));
	}
	if message.payload.len() as u64 > MAX_PAYLOAD {
		return Err(Error::OversizedPayload(message.payload.len() as u64));
	}

	let mut out = Vec::with_capacity(FRAME_HEADER_LEN + message.payload.len());
	out.extend_from_slice(&chain.params().magic);
	let mut cmd = [0u8; COMMAND_LEN];
	cmd[..command.len()].copy_from_slice(command.as_bytes());
	out.extend_from_slice(&cmd);
	let mut len = [0u8; 4];
	LittleEndian::write_u32(&mut len, message.payload.len() as u32);
	out.extend_from_slice(&len);
	out.extend_from_slice(&checksum_of(&message.payload));
	out.extend_from_slice(&message.payload);
	Ok(out)
}

/// Decode one complete frame. Returns the message plus the number of bytes
/// consumed, so callers can run it over a growing buffer; `Ok(None)` means
/// more bytes are needed.
pub fn decode_message(chain: Chain, bytes: &[u8]) -> Result<Option<(Message, usize)>, Error> {
	if bytes.len() < FRAME_HEADER_LEN {
		return Ok(None);
	}
	let header = MsgHeader::from_bytes(chain, bytes)?;
	let total = FRAME_HEADER_LEN + header.length as usize;
	if bytes.len() < total {
		return Ok(None);
	}
	let payload = &bytes[FRAME_HEADER_LEN..total];
	if checksum_of(payload) != header.checksum {
		return Err(Error::MalformedFrame("checksum mismatch".to_owned()));
	}
	let command = header.command_str()?;
	let kind = MsgKind::from_command(&command);
	if let MsgKind::Unknown(ref name) = kind {
		debug!("ignoring unknown message kind {:?}", name);
	}
	Ok(Some((
		Message {
			kind,
			payload: payload.to_vec(),
		},
		total,
	)))
}
