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

//! Public types for config modules

use std::fmt;
use std::io;

use crate::util::LoggingConfig;

/// Name of the config file expected in the node directory
pub const CONFIG_FILE_NAME: &str = "otnode.toml";

/// Error type wrapping config errors.
#[derive(Debug)]
pub enum ConfigError {
	/// Error with parsing of config file
	ParseError(String, String),

	/// Error with fileIO while reading config file
	FileIOError(String, String),

	/// No file found
	FileNotFoundError(String),

	/// Error serializing config values
	SerializationError(String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ConfigError::ParseError(ref file_name, ref message) => write!(
				f,
				"Error parsing configuration file at {} - {}",
				file_name, message
			),
			ConfigError::FileIOError(ref file_name, ref message) => {
				write!(f, "{} {}", message, file_name)
			}
			ConfigError::FileNotFoundError(ref file_name) => {
				write!(f, "Configuration file not found: {}", file_name)
			}
			ConfigError::SerializationError(ref message) => {
				write!(f, "Error serializing configuration: {}", message)
			}
		}
	}
}

impl From<io::Error> for ConfigError {
	fn from(error: io::Error) -> ConfigError {
		ConfigError::FileIOError(
			String::from(""),
			format!("Error loading config file: {}", error),
		)
	}
}

/// Deployment profile of the process. Chooses between the in-memory block
/// cache (mobile) and persistent block storage, and how aggressively blocks
/// are fetched during and after initial block download.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Profile {
	/// Memory-constrained client, blocks held in a bounded cache only
	Mobile,
	/// Standard desktop client with persistent block storage
	Desktop,
	/// Desktop client using platform-native key storage
	DesktopNative,
	/// Always-on server, downloads and serves all blocks
	Server,
}

impl Profile {
	/// Whether blocks are stored durably rather than in the bounded cache
	pub fn persistent_blocks(&self) -> bool {
		*self != Profile::Mobile
	}

	/// Whether all blocks should be downloaded, not just wallet-relevant ones
	pub fn download_all_blocks(&self) -> bool {
		*self == Profile::Server
	}
}

impl Default for Profile {
	fn default() -> Profile {
		Profile::Desktop
	}
}

/// Timers for the OTDHT sync peer. These were hard-coded upstream and are
/// deliberately configuration here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtdhtConfig {
	/// Seconds of remote silence before a keepalive query is sent
	pub ping_interval_secs: u64,
	/// Seconds between registration retries for unregistered chain workers
	pub registration_retry_secs: u64,
}

impl Default for OtdhtConfig {
	fn default() -> OtdhtConfig {
		OtdhtConfig {
			ping_interval_secs: 120,
			registration_retry_secs: 1,
		}
	}
}

/// Top-level node configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
	/// Root directory for chain databases
	pub db_root: String,
	/// Deployment profile
	pub profile: Profile,
	/// Chains to enable, by name ("bitcoin", "bitcoin_testnet", ...)
	pub chains: Vec<String>,
	/// Desired peer count per chain
	pub peer_target: u32,
	/// OTDHT sync settings
	pub otdht: OtdhtConfig,
}

impl Default for NodeConfig {
	fn default() -> NodeConfig {
		NodeConfig {
			db_root: String::from(".otnode"),
			profile: Profile::default(),
			chains: vec![String::from("bitcoin")],
			peer_target: 8,
			otdht: OtdhtConfig::default(),
		}
	}
}

/// Wrapper for the node and logging sections of the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigMembers {
	/// Node config
	pub node: NodeConfig,
	/// Logging config
	pub logging: Option<LoggingConfig>,
}
