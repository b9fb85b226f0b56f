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

//! The out-of-band sync protocol: typed wire messages exchanged with
//! remote sync peers and the long-lived peer actor that bridges one remote
//! endpoint to the per-chain workers of the local process.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;

use otnode_core as core;

mod messages;
mod peer;

pub use crate::messages::{
	decode, encode, Acknowledgement, Data, Error, Message, MessageType, State,
};
pub use crate::peer::{spawn_peer, OtdhtPeer, PeerMsg, WorkerMsg};
