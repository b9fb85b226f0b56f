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

//! The per-chain node core: the header oracle owning the authoritative view
//! of the header DAG and best chain, and the block oracle owning
//! content-addressed block access, validation and the download queue.

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
use otnode_store as store;
use otnode_util as util;

mod block_oracle;
mod error;
mod futures;
mod header_oracle;
mod queue;
pub mod store_schema;
mod types;

pub use crate::block_oracle::{get_validator, BlockBatch, BlockOracle};
pub use crate::error::{Error, ErrorKind};
pub use crate::futures::BlockFuture;
pub use crate::header_oracle::{AddOutcome, ChainView, HeaderOracle, ReorgTask};
pub use crate::store_schema::ChainStore;
pub use crate::types::{
	AcceptAll, BlockValidator, ChainEvent, EventBus, FilterOracle, FilterType, ReorgPlan,
};
