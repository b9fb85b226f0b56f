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

//! The scanning side of the wallet: per-subchain scan cursors and pattern
//! indexes under a transactional store, the reorg broker, and the
//! Index/Scan/Process/Rescan/Progress job pipeline that walks compact
//! filters and confirms matches against downloaded blocks.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;

use otnode_chain as chain;
use otnode_core as core;
use otnode_store as store;
use otnode_util as util;

mod cache;
mod error;
mod reorg;
pub mod subchain;
mod types;

pub use crate::cache::{SubchainCache, SubchainRecord};
pub use crate::error::{Error, ErrorKind};
pub use crate::reorg::{ReorgBroker, ReorgCallback, ReorgSlave};
pub use crate::types::{
	ElementID, ElementSource, PatternData, SubaccountID, SubchainID, SubchainKind, TxoState,
	WalletEvent,
};
