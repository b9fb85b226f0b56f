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

//! Wire messages of the sync protocol. Every message travels as a list of
//! frames whose first frame carries the type tag; unknown tags are rejected
//! with a typed error so peers speaking newer revisions degrade cleanly.

use crate::core::chains::Chain;
use crate::core::hash::Hash;
use crate::core::pos::BlockPosition;
use crate::core::ser::{self, BinReader, BinWriter, Readable, Reader, Writeable, Writer};

/// Errors produced by the codec
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// The first frame carried a tag this revision doesn't know
	#[fail(display = "Unknown message type: {}", _0)]
	UnknownType(u8),
	/// A frame was missing or failed to deserialize
	#[fail(display = "Malformed message: {}", _0)]
	Malformed(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Malformed(format!("{}", e))
	}
}

/// Message type tags, the first frame of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
	/// Status request, also used as keepalive
	Query,
	/// Contract lookup request
	QueryContract,
	/// Status response listing per-chain states
	Acknowledgement,
	/// Sync payload carrying headers for one chain
	Data,
	/// Response to a pushed transaction
	PushTransactionReply,
	/// Response to a contract publication
	PublishAck,
	/// A contract payload
	Contract,
	/// A transaction pushed toward the network
	PushTransaction,
	/// Request for sync data above a position
	SyncRequest,
	/// Sync data answering a request
	SyncReply,
	/// Unsolicited announcement of a new block header
	NewBlockHeader,
	/// Lookup of a published contract
	ContractQuery,
}

impl MessageType {
	/// The wire tag
	pub fn to_u8(self) -> u8 {
		match self {
			MessageType::Query => 1,
			MessageType::QueryContract => 2,
			MessageType::Acknowledgement => 3,
			MessageType::Data => 4,
			MessageType::PushTransactionReply => 5,
			MessageType::PublishAck => 6,
			MessageType::Contract => 7,
			MessageType::PushTransaction => 8,
			MessageType::SyncRequest => 9,
			MessageType::SyncReply => 10,
			MessageType::NewBlockHeader => 11,
			MessageType::ContractQuery => 12,
		}
	}

	/// Reverse of `to_u8`
	pub fn from_u8(tag: u8) -> Option<MessageType> {
		match tag {
			1 => Some(MessageType::Query),
			2 => Some(MessageType::QueryContract),
			3 => Some(MessageType::Acknowledgement),
			4 => Some(MessageType::Data),
			5 => Some(MessageType::PushTransactionReply),
			6 => Some(MessageType::PublishAck),
			7 => Some(MessageType::Contract),
			8 => Some(MessageType::PushTransaction),
			9 => Some(MessageType::SyncRequest),
			10 => Some(MessageType::SyncReply),
			11 => Some(MessageType::NewBlockHeader),
			12 => Some(MessageType::ContractQuery),
			_ => None,
		}
	}
}

/// One chain's sync state as carried by acknowledgements and data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
	/// Which chain the state describes
	pub chain: Chain,
	/// The chain's tip as the sender sees it
	pub position: BlockPosition,
	/// Genesis hash, guarding against chain confusion
	pub genesis: Hash,
}

impl Writeable for State {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.chain.to_u32())?;
		self.position.write(writer)?;
		self.genesis.write(writer)
	}
}

impl Readable for State {
	fn read<R: Reader>(reader: &mut R) -> Result<State, ser::Error> {
		let chain =
			Chain::from_u32(reader.read_u32()?).ok_or(ser::Error::CorruptedData)?;
		let position = BlockPosition::read(reader)?;
		let genesis = Hash::read(reader)?;
		Ok(State {
			chain,
			position,
			genesis,
		})
	}
}

/// Status response: one state per chain the remote serves, plus an optional
/// publish endpoint for new-block notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
	/// Per-chain states
	pub states: Vec<State>,
	/// Subscription endpoint, empty when the remote doesn't publish
	pub endpoint: String,
}

/// Sync payload: one chain's state plus encoded headers/blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
	/// The chain and tip the payload belongs to
	pub state: State,
	/// Raw encoded items, oldest first
	pub items: Vec<Vec<u8>>,
}

/// All messages of the sync protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Keepalive / status request
	Query,
	/// Contract lookup
	QueryContract {
		/// Contract identifier
		id: Vec<u8>,
	},
	/// Status response
	Acknowledgement(Acknowledgement),
	/// Bulk sync payload
	Data(Data),
	/// Push-transaction outcome
	PushTransactionReply {
		/// Chain the transaction was pushed to
		chain: Chain,
		/// Transaction id
		txid: Hash,
		/// Whether the remote accepted it
		success: bool,
	},
	/// Contract publication outcome
	PublishAck {
		/// Contract identifier
		id: Vec<u8>,
	},
	/// A contract payload
	Contract {
		/// Contract identifier
		id: Vec<u8>,
		/// Serialized contract
		payload: Vec<u8>,
	},
	/// A raw transaction pushed toward the network
	PushTransaction {
		/// Chain to broadcast on
		chain: Chain,
		/// Raw transaction bytes
		tx: Vec<u8>,
	},
	/// Request for sync data above the given states
	SyncRequest {
		/// The requester's current positions
		states: Vec<State>,
	},
	/// Sync data answering a request
	SyncReply(Data),
	/// Unsolicited new-header announcement
	NewBlockHeader(Data),
	/// Lookup of a published contract
	ContractQuery {
		/// Contract identifier
		id: Vec<u8>,
	},
}

impl Message {
	/// The type tag this message travels under
	pub fn message_type(&self) -> MessageType {
		match *self {
			Message::Query => MessageType::Query,
			Message::QueryContract { .. } => MessageType::QueryContract,
			Message::Acknowledgement(..) => MessageType::Acknowledgement,
			Message::Data(..) => MessageType::Data,
			Message::PushTransactionReply { .. } => MessageType::PushTransactionReply,
			Message::PublishAck { .. } => MessageType::PublishAck,
			Message::Contract { .. } => MessageType::Contract,
			Message::PushTransaction { .. } => MessageType::PushTransaction,
			Message::SyncRequest { .. } => MessageType::SyncRequest,
			Message::SyncReply(..) => MessageType::SyncReply,
			Message::NewBlockHeader(..) => MessageType::NewBlockHeader,
			Message::ContractQuery { .. } => MessageType::ContractQuery,
		}
	}
}

fn write_states<W: Writer>(writer: &mut W, states: &[State]) -> Result<(), ser::Error> {
	writer.write_u32(states.len() as u32)?;
	for state in states {
		state.write(writer)?;
	}
	Ok(())
}

fn read_states<R: Reader>(reader: &mut R) -> Result<Vec<State>, ser::Error> {
	let count = reader.read_u32()?;
	if count > 1024 {
		return Err(ser::Error::TooLargeReadErr(format!(
			"{} states in message",
			count
		)));
	}
	let mut out = Vec::with_capacity(count as usize);
	for _ in 0..count {
		out.push(State::read(reader)?);
	}
	Ok(out)
}

fn write_data<W: Writer>(writer: &mut W, data: &Data) -> Result<(), ser::Error> {
	data.state.write(writer)?;
	writer.write_u32(data.items.len() as u32)?;
	for item in &data.items {
		writer.write_bytes(item)?;
	}
	Ok(())
}

fn read_data<R: Reader>(reader: &mut R) -> Result<Data, ser::Error> {
	let state = State::read(reader)?;
	let count = reader.read_u32()?;
	if count > 1_000_000 {
		return Err(ser::Error::TooLargeReadErr(format!(
			"{} items in message",
			count
		)));
	}
	let mut items = Vec::with_capacity(count as usize);
	for _ in 0..count {
		items.push(reader.read_bytes()?);
	}
	Ok(Data { state, items })
}

/// Encode a message into its frames: the tag frame followed by one payload
/// frame.
pub fn encode(message: &Message) -> Vec<Vec<u8>> {
	let tag = vec![message.message_type().to_u8()];
	let mut payload = vec![];
	{
		let mut writer = BinWriter::new(&mut payload);
		// writes into a Vec cannot fail
		encode_payload(message, &mut writer).expect("in-memory serialization failed");
	}
	vec![tag, payload]
}

fn encode_payload<W: Writer>(message: &Message, writer: &mut W) -> Result<(), ser::Error> {
	match message {
		Message::Query => Ok(()),
		Message::QueryContract { id }
		| Message::PublishAck { id }
		| Message::ContractQuery { id } => writer.write_bytes(id),
		Message::Acknowledgement(ack) => {
			write_states(writer, &ack.states)?;
			writer.write_bytes(ack.endpoint.as_bytes())
		}
		Message::Data(data) | Message::SyncReply(data) | Message::NewBlockHeader(data) => {
			write_data(writer, data)
		}
		Message::PushTransactionReply {
			chain,
			txid,
			success,
		} => {
			writer.write_u32(chain.to_u32())?;
			txid.write(writer)?;
			writer.write_u8(if *success { 1 } else { 0 })
		}
		Message::Contract { id, payload } => {
			writer.write_bytes(id)?;
			writer.write_bytes(payload)
		}
		Message::PushTransaction { chain, tx } => {
			writer.write_u32(chain.to_u32())?;
			writer.write_bytes(tx)
		}
		Message::SyncRequest { states } => write_states(writer, states),
	}
}

/// Decode a message from its frames. The first frame must carry a known
/// type tag; unknown tags produce `Error::UnknownType`.
pub fn decode(frames: &[Vec<u8>]) -> Result<Message, Error> {
	let tag_frame = frames
		.first()
		.ok_or_else(|| Error::Malformed("empty message".to_owned()))?;
	if tag_frame.len() != 1 {
		return Err(Error::Malformed("bad tag frame".to_owned()));
	}
	let message_type =
		MessageType::from_u8(tag_frame[0]).ok_or(Error::UnknownType(tag_frame[0]))?;
	let payload = frames
		.get(1)
		.ok_or_else(|| Error::Malformed("missing payload frame".to_owned()))?;
	let mut cursor = &payload[..];
	let mut reader = BinReader::new(&mut cursor);

	let message = match message_type {
		MessageType::Query => Message::Query,
		MessageType::QueryContract => Message::QueryContract {
			id: reader.read_bytes()?,
		},
		MessageType::Acknowledgement => {
			let states = read_states(&mut reader)?;
			let endpoint = String::from_utf8(reader.read_bytes()?)
				.map_err(|_| Error::Malformed("endpoint is not utf-8".to_owned()))?;
			Message::Acknowledgement(Acknowledgement { states, endpoint })
		}
		MessageType::Data => Message::Data(read_data(&mut reader)?),
		MessageType::PushTransactionReply => {
			let chain = Chain::from_u32(reader.read_u32()?)
				.ok_or_else(|| Error::Malformed("unknown chain".to_owned()))?;
			let txid = Hash::read(&mut reader)?;
			let success = reader.read_u8()? != 0;
			Message::PushTransactionReply {
				chain,
				txid,
				success,
			}
		}
		MessageType::PublishAck => Message::PublishAck {
			id: reader.read_bytes()?,
		},
		MessageType::Contract => Message::Contract {
			id: reader.read_bytes()?,
			payload: reader.read_bytes()?,
		},
		MessageType::PushTransaction => {
			let chain = Chain::from_u32(reader.read_u32()?)
				.ok_or_else(|| Error::Malformed("unknown chain".to_owned()))?;
			Message::PushTransaction {
				chain,
				tx: reader.read_bytes()?,
			}
		}
		MessageType::SyncRequest => Message::SyncRequest {
			states: read_states(&mut reader)?,
		},
		MessageType::SyncReply => Message::SyncReply(read_data(&mut reader)?),
		MessageType::NewBlockHeader => Message::NewBlockHeader(read_data(&mut reader)?),
		MessageType::ContractQuery => Message::ContractQuery {
			id: reader.read_bytes()?,
		},
	};
	Ok(message)
}
