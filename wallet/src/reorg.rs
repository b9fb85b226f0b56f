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

//! The reorg broker mediating between the header oracle and the wallet
//! jobs. Every job holds a slave handle; when a reorg is prepared each
//! slave acknowledges with a callback, and once all have acknowledged the
//! callbacks run together under the oracle's exclusive header lock. Any
//! callback may veto, aborting the reorg chain-wide.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::chain::{ChainView, HeaderOracle, ReorgPlan, ReorgTask};
use crate::util::Mutex;
use std::sync::Arc;

/// A reorg participant's response to `prepare_reorg`: runs with the header
/// oracle snapshot and the reorg parameters, returning false to veto.
pub type ReorgCallback = Box<dyn FnMut(&ChainView<'_>, &ReorgPlan) -> bool + Send>;

enum SlaveMsg {
	PrepareAck(String, ReorgCallback),
	ShutdownAck(String),
}

/// One job's handle into the broker.
pub struct ReorgSlave {
	name: String,
	tx: Sender<SlaveMsg>,
}

impl ReorgSlave {
	/// Acknowledge a `prepare_reorg`, supplying the callback to run under
	/// the header lock.
	pub fn acknowledge_prepare_reorg(&self, callback: ReorgCallback) {
		let _ = self
			.tx
			.send(SlaveMsg::PrepareAck(self.name.clone(), callback));
	}

	/// Acknowledge a `prepare_shutdown`.
	pub fn acknowledge_shutdown(&self) {
		let _ = self.tx.send(SlaveMsg::ShutdownAck(self.name.clone()));
	}

	/// The participant's name, for logging
	pub fn name(&self) -> &str {
		&self.name
	}
}

/// The per-chain-wallet master side of reorg coordination.
pub struct ReorgBroker {
	oracle: Arc<HeaderOracle>,
	slaves: Mutex<Vec<String>>,
	tx: Sender<SlaveMsg>,
	rx: Mutex<Receiver<SlaveMsg>>,
}

impl ReorgBroker {
	/// A broker bound to one chain's header oracle
	pub fn new(oracle: Arc<HeaderOracle>) -> ReorgBroker {
		let (tx, rx) = channel();
		ReorgBroker {
			oracle,
			slaves: Mutex::new(vec![]),
			tx,
			rx: Mutex::new(rx),
		}
	}

	/// Register a participant and hand back its slave handle. The header
	/// oracle parks reorgs until every registered participant has answered.
	pub fn get_slave(&self, name: &str) -> ReorgSlave {
		self.oracle.register_reorg_participant();
		self.slaves.lock().push(name.to_owned());
		ReorgSlave {
			name: name.to_owned(),
			tx: self.tx.clone(),
		}
	}

	/// Number of registered participants
	pub fn participant_count(&self) -> usize {
		self.slaves.lock().len()
	}

	/// Collect `prepare_reorg` acknowledgements from every registered
	/// participant, then execute their callbacks under the header oracle's
	/// exclusive lock. Returns whether the reorg was committed; a missing
	/// acknowledgement within the timeout or any veto aborts it.
	pub fn perform_reorg(&self, timeout: Duration) -> bool {
		let expected = self.participant_count();
		let mut callbacks: Vec<ReorgTask> = Vec::with_capacity(expected);
		{
			let rx = self.rx.lock();
			while callbacks.len() < expected {
				match rx.recv_timeout(timeout) {
					Ok(SlaveMsg::PrepareAck(name, callback)) => {
						debug!("{} ready to process reorg", name);
						callbacks.push(callback);
					}
					Ok(SlaveMsg::ShutdownAck(name)) => {
						debug!("{} acknowledged shutdown during reorg", name);
						return false;
					}
					Err(RecvTimeoutError::Timeout) => {
						warn!(
							"reorg abandoned: {} of {} participants acknowledged",
							callbacks.len(),
							expected
						);
						return false;
					}
					Err(RecvTimeoutError::Disconnected) => return false,
				}
			}
		}
		self.oracle.execute(callbacks)
	}

	/// Collect shutdown acknowledgements from every participant
	pub fn await_shutdown(&self, timeout: Duration) -> bool {
		let expected = self.participant_count();
		let mut seen = 0;
		let rx = self.rx.lock();
		while seen < expected {
			match rx.recv_timeout(timeout) {
				Ok(SlaveMsg::ShutdownAck(_)) => seen += 1,
				Ok(SlaveMsg::PrepareAck(..)) => (),
				Err(_) => return false,
			}
		}
		true
	}
}
