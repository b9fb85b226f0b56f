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

//! Configuration file management

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::types::{ConfigError, ConfigMembers, NodeConfig, CONFIG_FILE_NAME};
use crate::util::LoggingConfig;

/// Global config wrapper keeping track of where it was loaded from
#[derive(Debug, Clone)]
pub struct GlobalConfig {
	/// Keep track of the file we've read
	pub config_file_path: Option<PathBuf>,
	/// Whether a config file was used or defaults applied
	pub using_config_file: bool,
	/// Config file contents
	pub members: Option<ConfigMembers>,
}

impl Default for GlobalConfig {
	fn default() -> GlobalConfig {
		GlobalConfig {
			config_file_path: None,
			using_config_file: false,
			members: Some(ConfigMembers {
				node: NodeConfig::default(),
				logging: Some(LoggingConfig::default()),
			}),
		}
	}
}

/// Returns the defaults, as strewn throughout the code
impl GlobalConfig {
	/// Requires the path to a config file
	pub fn new(file_path: &str) -> Result<GlobalConfig, ConfigError> {
		let mut return_value = GlobalConfig::default();
		return_value.config_file_path = Some(PathBuf::from(&file_path));

		// Config file path is given but not valid
		let config_file = return_value.config_file_path.clone().unwrap();
		if !config_file.exists() {
			return Err(ConfigError::FileNotFoundError(String::from(
				config_file.to_str().unwrap(),
			)));
		}

		// Try to parse the config file if it exists, explode if it does exist but
		// something's wrong with it
		return_value.read_config()
	}

	/// Read config file and parse it
	fn read_config(mut self) -> Result<GlobalConfig, ConfigError> {
		let mut file = File::open(self.config_file_path.as_mut().unwrap())?;
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;
		let decoded: Result<ConfigMembers, toml::de::Error> = toml::from_str(&contents);
		match decoded {
			Ok(gc) => {
				self.using_config_file = true;
				self.members = Some(gc);
				Ok(self)
			}
			Err(e) => Err(ConfigError::ParseError(
				String::from(self.config_file_path.as_mut().unwrap().to_str().unwrap()),
				format!("{}", e),
			)),
		}
	}

	/// Serialize config
	pub fn ser_config(&mut self) -> Result<String, ConfigError> {
		let encoded: Result<String, toml::ser::Error> =
			toml::to_string(self.members.as_mut().unwrap());
		match encoded {
			Ok(enc) => Ok(enc),
			Err(e) => Err(ConfigError::SerializationError(format!("{}", e))),
		}
	}

	/// Write config file to a given location
	pub fn write_to_file(&mut self, name: &str) -> Result<(), ConfigError> {
		let conf_out = self.ser_config()?;
		let mut file = File::create(name)?;
		file.write_all(conf_out.as_bytes())?;
		Ok(())
	}

	/// Accessor for the node config section, panics if not loaded
	pub fn node(&self) -> &NodeConfig {
		&self.members.as_ref().unwrap().node
	}
}

/// Check if the config file exists in the given directory
pub fn config_file_exists(path: &str) -> bool {
	let mut config_path = PathBuf::from(path);
	config_path.push(CONFIG_FILE_NAME);
	config_path.exists()
}

/// Handles setup and detection of paths for the node: returns a loaded (or
/// freshly written default) config from the given directory, the current
/// directory, or `~/.otnode`, in that order of preference.
pub fn initial_setup(node_dir: Option<&str>) -> Result<GlobalConfig, ConfigError> {
	let dir = match node_dir {
		Some(d) => PathBuf::from(d),
		None => {
			// prefer a config in the current directory, fall back to the
			// home directory
			let current = env::current_dir()?;
			if config_file_exists(current.to_str().unwrap()) {
				current
			} else {
				match dirs::home_dir() {
					Some(mut home) => {
						home.push(".otnode");
						home
					}
					None => current,
				}
			}
		}
	};

	let mut config_path = dir.clone();
	config_path.push(CONFIG_FILE_NAME);

	if config_path.exists() {
		GlobalConfig::new(config_path.to_str().unwrap())
	} else {
		// Return defaults and write them out for the next run
		let mut default_config = GlobalConfig::default();
		fs::create_dir_all(&dir)?;
		default_config.config_file_path = Some(config_path.clone());
		default_config.write_to_file(config_path.to_str().unwrap())?;
		Ok(default_config)
	}
}
