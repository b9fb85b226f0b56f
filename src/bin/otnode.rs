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

//! Main entry point for the otnode daemon: loads configuration, starts the
//! per-chain oracles, repairs block tips, and pumps chain events until
//! interrupted.

#[macro_use]
extern crate log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};

use otnode_chain::{BlockOracle, ChainEvent, ChainStore, EventBus, HeaderOracle};
use otnode_config as config;
use otnode_core::chains::Chain;
use otnode_util as util;

struct ChainNode {
	chain: Chain,
	headers: Arc<HeaderOracle>,
	blocks: Arc<BlockOracle>,
	#[allow(dead_code)]
	events: Arc<EventBus>,
	pump: Option<thread::JoinHandle<()>>,
}

impl ChainNode {
	fn start(
		node_config: &config::NodeConfig,
		chain: Chain,
		running: Arc<AtomicBool>,
	) -> Result<ChainNode, String> {
		let db = Arc::new(
			ChainStore::new(&node_config.db_root, chain).map_err(|e| format!("{}", e))?,
		);
		let events = Arc::new(EventBus::new());
		let headers =
			Arc::new(HeaderOracle::new(db.clone(), events.clone()).map_err(|e| format!("{}", e))?);
		let blocks = BlockOracle::new(
			db,
			headers.clone(),
			events.clone(),
			node_config.profile,
			node_config.peer_target as usize,
		);

		// verify the trailing blocks and rewind past any corruption
		let tip = blocks.get_tip().map_err(|e| format!("{}", e))?;
		info!("{}: block tip {}", chain, tip);

		let pump = {
			let rx = events.subscribe();
			let chain_name = chain;
			thread::Builder::new()
				.name(format!("{} events", chain))
				.spawn(move || loop {
					match rx.recv_timeout(Duration::from_secs(1)) {
						Ok(ChainEvent::NewTip(pos)) => {
							debug!("{}: new tip {}", chain_name, pos);
						}
						Ok(ChainEvent::Reorg(plan)) => {
							info!(
								"{}: reorg {} rolls back {} blocks",
								chain_name,
								plan.epoch,
								plan.rolled_back.len()
							);
						}
						Ok(_) => (),
						Err(RecvTimeoutError::Timeout) => {
							if !running.load(Ordering::SeqCst) {
								break;
							}
						}
						Err(RecvTimeoutError::Disconnected) => break,
					}
				})
				.map_err(|e| format!("{}", e))?
		};

		Ok(ChainNode {
			chain,
			headers,
			blocks,
			events,
			pump: Some(pump),
		})
	}

	fn status(&self) {
		info!(
			"{}: headers {} blocks {} queue {} ibd {}",
			self.chain,
			self.headers.best_chain().height,
			self.blocks.tip().height,
			self.blocks.download_queue_size(),
			self.blocks.ibd(),
		);
	}

	fn stop(mut self) {
		if let Some(handle) = self.pump.take() {
			let _ = handle.join();
		}
	}
}

fn main() {
	let args = App::new("otnode")
		.version("0.1.0")
		.about("Multi-chain blockchain light client node core")
		.arg(
			Arg::with_name("dir")
				.short("d")
				.long("dir")
				.help("Node directory containing otnode.toml")
				.takes_value(true),
		)
		.get_matches();

	let global = match config::initial_setup(args.value_of("dir")) {
		Ok(global) => global,
		Err(e) => {
			eprintln!("failed to load configuration: {}", e);
			std::process::exit(1);
		}
	};
	let members = global.members.as_ref().unwrap();
	util::init_logger(members.logging.clone());
	let node_config = &members.node;

	let running = Arc::new(AtomicBool::new(true));
	{
		let running = running.clone();
		ctrlc::set_handler(move || {
			warn!("shutdown signal received");
			running.store(false, Ordering::SeqCst);
		})
		.expect("failed to install shutdown handler");
	}

	let mut nodes = vec![];
	for name in &node_config.chains {
		let chain: Chain = match name.parse() {
			Ok(chain) => chain,
			Err(e) => {
				// an unknown chain is a configuration error; give up on it
				// and keep the rest of the process alive
				error!("{}", e);
				continue;
			}
		};
		match ChainNode::start(node_config, chain, running.clone()) {
			Ok(node) => {
				info!("{}: started", chain);
				nodes.push(node);
			}
			Err(e) => {
				error!("{}: failed to start: {}", chain, e);
			}
		}
	}

	if nodes.is_empty() {
		error!("no chains started, exiting");
		std::process::exit(1);
	}

	while running.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_secs(10));
		for node in &nodes {
			node.status();
		}
	}

	info!("stopping {} chains", nodes.len());
	for node in nodes {
		node.stop();
	}
}
