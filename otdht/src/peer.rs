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

//! The sync peer actor: one per remote endpoint. Bridges the remote's
//! dealer/subscribe sockets to the per-chain workers of the local process,
//! queueing traffic for workers that haven't registered yet, pinging the
//! remote when it goes quiet, and retrying worker registration on a timer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use otnode_config::OtdhtConfig;

use crate::core::chains::Chain;
use crate::messages::{decode, Acknowledgement, Error, Message};

/// Messages delivered to a chain worker by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMsg {
	/// The peer asks the worker to (re)send its registration
	RegisterRequest,
	/// A wire message forwarded from the remote
	Remote(Message),
}

/// The peer actor's inbox
#[derive(Debug, Clone)]
pub enum PeerMsg {
	/// Frames received from the remote endpoint
	Remote(Vec<Vec<u8>>),
	/// Egress frames from a local chain worker: an internal routing frame
	/// followed by the wire frames
	WorkerFrames(Chain, Vec<Vec<u8>>),
	/// A chain was enabled or disabled locally
	ChainState(Chain, bool),
	/// A chain worker announced itself
	Registration(Chain),
	/// Terminate the actor
	Shutdown,
}

/// A long-lived actor bridging one remote sync peer to local chain workers.
pub struct OtdhtPeer {
	name: String,
	ping_interval: Duration,
	registration_retry: Duration,
	to_remote: Sender<Vec<Vec<u8>>>,
	to_local: Sender<Message>,
	workers: HashMap<Chain, Sender<WorkerMsg>>,
	subscriptions: HashSet<String>,
	active_chains: HashSet<Chain>,
	registered_chains: HashSet<Chain>,
	queue: HashMap<Chain, VecDeque<Message>>,
	last_activity: Instant,
	last_ack: Option<Message>,
}

impl OtdhtPeer {
	/// Build a peer for one remote endpoint. `to_remote` carries encoded
	/// frames toward the remote; `to_local` receives contract/publish
	/// responses for the local pipeline.
	pub fn new(
		name: &str,
		config: &OtdhtConfig,
		to_remote: Sender<Vec<Vec<u8>>>,
		to_local: Sender<Message>,
	) -> OtdhtPeer {
		OtdhtPeer {
			name: format!("OTDHT peer {}", name),
			ping_interval: Duration::from_secs(config.ping_interval_secs),
			registration_retry: Duration::from_secs(config.registration_retry_secs),
			to_remote,
			to_local,
			workers: HashMap::new(),
			subscriptions: HashSet::new(),
			active_chains: HashSet::new(),
			registered_chains: HashSet::new(),
			queue: HashMap::new(),
			last_activity: Instant::now(),
			last_ack: None,
		}
	}

	/// Wire up the dealer toward one chain's local worker
	pub fn connect_worker(&mut self, chain: Chain, worker: Sender<WorkerMsg>) {
		self.workers.insert(chain, worker);
	}

	/// Mark a chain active from the start (normally driven by
	/// `PeerMsg::ChainState`)
	pub fn activate_chain(&mut self, chain: Chain) {
		self.active_chains.insert(chain);
	}

	/// The actor's display name
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Endpoints subscribed for new-block notifications
	pub fn subscriptions(&self) -> &HashSet<String> {
		&self.subscriptions
	}

	/// Chains whose workers have registered
	pub fn registered_chains(&self) -> &HashSet<Chain> {
		&self.registered_chains
	}

	/// Route one inbox message. Returns false when the actor should stop.
	pub fn handle(&mut self, msg: PeerMsg) -> bool {
		match msg {
			PeerMsg::Remote(frames) => {
				self.last_activity = Instant::now();
				match decode(&frames) {
					Ok(message) => self.process_remote(message),
					Err(Error::UnknownType(tag)) => {
						warn!("{}: remote sent unknown message type {}", self.name, tag);
					}
					Err(e) => {
						warn!("{}: undecodable remote message: {}", self.name, e);
					}
				}
			}
			PeerMsg::WorkerFrames(chain, frames) => self.process_worker_frames(chain, frames),
			PeerMsg::ChainState(chain, enabled) => self.process_chain_state(chain, enabled),
			PeerMsg::Registration(chain) => self.process_registration(chain),
			PeerMsg::Shutdown => return false,
		}
		true
	}

	fn process_remote(&mut self, message: Message) {
		debug!("{}: received {:?}", self.name, message.message_type());
		match message {
			Message::Acknowledgement(ref ack) => {
				self.subscribe(ack);
				for state in &ack.states {
					self.forward_to_chain(state.chain, message.clone());
				}
				self.last_ack = Some(message);
			}
			Message::SyncReply(ref data) | Message::NewBlockHeader(ref data) => {
				let chain = data.state.chain;
				self.forward_to_chain(chain, message.clone());
			}
			Message::PushTransactionReply { chain, .. } => {
				self.forward_to_chain(chain, message);
			}
			Message::PublishAck { .. } | Message::Contract { .. } => {
				let _ = self.to_local.send(message);
			}
			other => {
				warn!(
					"{}: unsupported message type on external socket: {:?}",
					self.name,
					other.message_type()
				);
			}
		}
	}

	// Egress from a local worker: strip the internal routing frame and
	// forward the wire frames to the remote.
	fn process_worker_frames(&mut self, chain: Chain, frames: Vec<Vec<u8>>) {
		if frames.is_empty() {
			warn!("{}: empty egress from {} worker", self.name, chain);
			return;
		}
		let stripped: Vec<Vec<u8>> = frames[1..].to_vec();
		match decode(&stripped) {
			Ok(Message::SyncRequest { .. }) | Ok(Message::PushTransaction { .. }) => {
				debug!("{}: forwarding {} egress to remote peer", self.name, chain);
				let _ = self.to_remote.send(stripped);
			}
			Ok(other) => {
				warn!(
					"{}: unexpected egress type {:?} from {} worker",
					self.name,
					other.message_type(),
					chain
				);
			}
			Err(e) => {
				warn!("{}: undecodable egress from {} worker: {}", self.name, chain, e);
			}
		}
	}

	fn process_chain_state(&mut self, chain: Chain, enabled: bool) {
		if enabled {
			self.active_chains.insert(chain);
		} else {
			self.active_chains.remove(&chain);
			self.registered_chains.remove(&chain);
		}
	}

	fn process_registration(&mut self, chain: Chain) {
		debug!(
			"{}: received registration message from {} worker",
			self.name, chain
		);
		self.registered_chains.insert(chain);

		if let Some(queued) = self.queue.remove(&chain) {
			debug!(
				"{}: flushing {} queued messages for {} worker",
				self.name,
				queued.len(),
				chain
			);
			for message in queued {
				self.forward_to_chain(chain, message);
			}
		} else if let Some(last) = self.last_ack.clone() {
			let covers_chain = match last {
				Message::Acknowledgement(ref ack) => {
					ack.states.iter().any(|s| s.chain == chain)
				}
				_ => false,
			};
			if covers_chain {
				debug!(
					"{}: sending last acknowledgement message to {} worker",
					self.name, chain
				);
				self.forward_to_chain(chain, last);
			}
		}
	}

	fn forward_to_chain(&mut self, chain: Chain, message: Message) {
		if !self.active_chains.contains(&chain) {
			debug!("{}: {} is not active", self.name, chain);
			return;
		}
		if !self.registered_chains.contains(&chain) {
			debug!(
				"{}: adding message to queue until {} completes registration",
				self.name, chain
			);
			self.queue.entry(chain).or_default().push_back(message);
			return;
		}
		match self.workers.get(&chain) {
			Some(worker) => {
				debug!("{}: forwarding message to {}", self.name, chain);
				let _ = worker.send(WorkerMsg::Remote(message));
			}
			None => {
				warn!("{}: no worker connected for {}", self.name, chain);
			}
		}
	}

	fn subscribe(&mut self, ack: &Acknowledgement) {
		if ack.endpoint.is_empty() {
			return;
		}
		if self.subscriptions.contains(&ack.endpoint) {
			return;
		}
		debug!(
			"{}: subscribed to endpoint {} for new block notifications",
			self.name, ack.endpoint
		);
		self.subscriptions.insert(ack.endpoint.clone());
	}

	/// Send a keepalive query if the remote has been silent longer than the
	/// ping interval. Returns the delay until the next check is due.
	pub fn check_ping(&mut self, now: Instant) -> Duration {
		let elapsed = now.saturating_duration_since(self.last_activity);
		if elapsed >= self.ping_interval {
			debug!("{}: requesting status", self.name);
			let _ = self.to_remote.send(crate::messages::encode(&Message::Query));
			// the timer restarts from this ping
			self.last_activity = now;
			self.ping_interval
		} else {
			self.ping_interval - elapsed
		}
	}

	/// Ask every active-but-unregistered chain worker to register. Returns
	/// the retry delay while any remain, or None once all are registered.
	pub fn check_registration(&mut self) -> Option<Duration> {
		let unregistered: Vec<Chain> = self
			.active_chains
			.difference(&self.registered_chains)
			.cloned()
			.collect();
		if unregistered.is_empty() {
			return None;
		}
		for chain in unregistered {
			if let Some(worker) = self.workers.get(&chain) {
				let _ = worker.send(WorkerMsg::RegisterRequest);
			}
		}
		Some(self.registration_retry)
	}
}

/// Drive a peer on its own thread until shutdown. Timers fire through the
/// inbox timeout: registration retries while workers are missing, pings
/// when the remote goes quiet.
pub fn spawn_peer(mut peer: OtdhtPeer, inbox: Receiver<PeerMsg>) -> thread::JoinHandle<()> {
	let name = peer.name.clone();
	thread::Builder::new()
		.name(name)
		.spawn(move || loop {
			let ping_due = peer.check_ping(Instant::now());
			let wait = match peer.check_registration() {
				Some(retry) => retry.min(ping_due),
				None => ping_due,
			};
			match inbox.recv_timeout(wait) {
				Ok(msg) => {
					if !peer.handle(msg) {
						break;
					}
				}
				Err(RecvTimeoutError::Timeout) => (),
				Err(RecvTimeoutError::Disconnected) => break,
			}
		})
		.expect("failed to spawn peer thread")
}
