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

//! Crate wrapping up the node configuration file handling and the
//! process-level controls (deployment profile, peer targets, sync timers).

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate serde_derive;

use otnode_util as util;

mod config;
mod types;

pub use crate::config::{config_file_exists, initial_setup, GlobalConfig};
pub use crate::types::{
	ConfigError, ConfigMembers, NodeConfig, OtdhtConfig, Profile, CONFIG_FILE_NAME,
};
