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

//! The primitive types every other crate in the workspace builds on: the
//! supported chain enumeration and per-chain parameters, fixed-width hashes,
//! block positions, headers with their proof-of-work arithmetic, and the
//! binary serialization framework shared by storage and wire code.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;

use otnode_util as util;

pub mod chains;
pub mod hash;
pub mod header;
pub mod pos;
pub mod ser;

pub use crate::chains::{Chain, Params};
pub use crate::hash::{Hash, Hashed, ZERO_HASH};
pub use crate::header::Header;
pub use crate::pos::BlockPosition;
