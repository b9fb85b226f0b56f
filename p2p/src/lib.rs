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

//! Bitcoin-family peer-to-peer plumbing as the node core consumes it:
//! transport addresses, chain-parameterized message framing, and the peer
//! manager contract. Actual socket handling lives with the embedding
//! application.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;

use otnode_core as core;

mod msg;
mod types;

pub use crate::msg::{
	decode_message, encode_message, Message, MsgHeader, MsgKind, FRAME_HEADER_LEN, MAX_PAYLOAD,
};
pub use crate::types::{BanScore, Capabilities, Error, PeerAddr, PeerId, PeerManager, Transport};
