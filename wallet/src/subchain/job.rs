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

//! The common state machine every subchain job embeds: state transitions
//! between normal, reorg and shutdown, the per-state work routing table,
//! reorg epoch gating for update messages, and watchdog acknowledgements.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::chain::FilterType;
use crate::core::hash::Hash;
use crate::core::pos::BlockPosition;
use crate::reorg::{ReorgCallback, ReorgSlave};

/// Watchdog acknowledgement period
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// The lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
	/// Processing work
	Normal,
	/// Parked while a reorg is coordinated; most work is deferred
	Reorg,
	/// Draining; incoming work is discarded without error
	PreShutdown,
	/// Terminal
	Shutdown,
}

impl fmt::Display for JobState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match *self {
			JobState::Normal => "normal",
			JobState::Reorg => "reorg",
			JobState::PreShutdown => "pre_shutdown",
			JobState::Shutdown => "shutdown",
		};
		write!(f, "{}", name)
	}
}

/// The five job roles of a subchain pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
	/// Maintains the registered element set
	Index,
	/// Walks compact filters for matches
	Scan,
	/// Confirms matches against downloaded blocks
	Process,
	/// Rewinds and replays ranges
	Rescan,
	/// Publishes advancement upstream
	Progress,
}

impl fmt::Display for JobType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match *self {
			JobType::Index => "index",
			JobType::Scan => "scan",
			JobType::Process => "process",
			JobType::Rescan => "rescan",
			JobType::Progress => "progress",
		};
		write!(f, "{}", name)
	}
}

/// Messages routed to subchain jobs
#[derive(Debug, Clone)]
pub enum Work {
	/// A compact filter became available up to the given tip
	Filter(FilterType, BlockPosition),
	/// Progress/state report from an upstream job, tagged with the reorg
	/// epoch current when it was produced
	Update {
		/// Epoch the sender had last seen; stale values drop the message
		epoch: Option<u64>,
		/// Position the sender advanced to
		position: BlockPosition,
	},
	/// A raw mempool transaction to match
	Mempool(Vec<u8>),
	/// The element set changed or scanning should (re)start
	StartScan,
	/// Enter the reorg state for the given epoch
	PrepareReorg(u64),
	/// A block at this position needs processing
	Process(BlockPosition),
	/// A block at this position needs processing again
	Reprocess(BlockPosition),
	/// Internal rescan coordination
	Rescan,
	/// Explicit user-requested rescan back to the given position
	DoRescan(BlockPosition),
	/// A block became locally available
	Block(Hash),
	/// New keys were derived
	Key,
	/// Begin draining ahead of shutdown
	PrepareShutdown,
	/// Leave the reorg state for the given epoch
	FinishReorg(u64),
	/// Timer tick requesting an acknowledgement
	Watchdog,
	/// Terminate
	Shutdown,
}

/// Reports jobs send to their parent coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentReport {
	/// Liveness acknowledgement
	WatchdogAck(JobType),
	/// Shutdown completed
	ShutdownComplete(JobType),
}

/// The per-job behavior plugged into the common state machine.
pub trait JobLogic: Send {
	/// Which of the five roles this logic implements
	fn job_type(&self) -> JobType;

	/// One-time initialization once the pipeline is wired
	fn do_startup(&mut self) {}

	/// Handle a unit of processable work while in the normal state.
	/// `epoch` is the job's most recently recorded reorg epoch.
	fn handle(&mut self, epoch: Option<u64>, work: Work);

	/// Build the callback handed to the reorg broker when this job
	/// acknowledges `prepare_reorg`. Runs under the exclusive header lock
	/// on the coordinator's thread; capture shared handles, not `self`.
	fn reorg_callback(&self, plan_epoch: u64) -> ReorgCallback {
		let _ = plan_epoch;
		Box::new(|_view, _plan| true)
	}

	/// Invoked after `finish_reorg`, before deferred work replays
	fn on_finish_reorg(&mut self) {}
}

/// A subchain job: the shared state machine wrapped around one role's
/// logic.
pub struct Job<L: JobLogic> {
	/// Display name, `<role> job for <subchain>`
	pub name: String,
	state: JobState,
	reorgs: BTreeSet<u64>,
	deferred: VecDeque<Work>,
	slave: ReorgSlave,
	to_parent: Sender<ParentReport>,
	logic: L,
}

impl<L: JobLogic> Job<L> {
	/// Wrap role logic into a job
	pub fn new(
		name: String,
		slave: ReorgSlave,
		to_parent: Sender<ParentReport>,
		logic: L,
	) -> Job<L> {
		Job {
			name,
			state: JobState::Normal,
			reorgs: BTreeSet::new(),
			deferred: VecDeque::new(),
			slave,
			to_parent,
			logic,
		}
	}

	/// Current state
	pub fn state(&self) -> JobState {
		self.state
	}

	/// Whether the job reached its terminal state
	pub fn is_shutdown(&self) -> bool {
		self.state == JobState::Shutdown
	}

	/// The most recent reorg epoch this job recorded
	pub fn last_reorg(&self) -> Option<u64> {
		self.reorgs.iter().next_back().cloned()
	}

	/// Run startup logic
	pub fn startup(&mut self) {
		self.logic.do_startup();
		self.process_watchdog();
	}

	/// Route one message through the state machine
	pub fn handle(&mut self, work: Work) {
		match self.state {
			JobState::Normal => self.state_normal(work),
			JobState::Reorg => self.state_reorg(work),
			JobState::PreShutdown => self.state_pre_shutdown(work),
			JobState::Shutdown => (),
		}
	}

	fn state_normal(&mut self, work: Work) {
		match work {
			Work::Update { epoch, position } => {
				if self.stale_epoch(&epoch) {
					debug!("{} ignoring stale update", self.name);
					return;
				}
				let last = self.last_reorg();
				self.logic.handle(last, Work::Update { epoch, position });
			}
			Work::Filter(..)
			| Work::Mempool(..)
			| Work::StartScan
			| Work::Process(..)
			| Work::Reprocess(..)
			| Work::DoRescan(..)
			| Work::Block(..)
			| Work::Key => {
				let last = self.last_reorg();
				self.logic.handle(last, work);
			}
			Work::Rescan => {
				// internal coordination message, nothing to do here
			}
			Work::PrepareReorg(epoch) => self.transition_state_reorg(epoch),
			Work::FinishReorg(_) => {
				error!("{}: wrong state for finish_reorg message", self.name);
			}
			Work::PrepareShutdown => self.transition_state_pre_shutdown(),
			Work::Watchdog => self.process_watchdog(),
			Work::Shutdown => self.transition_state_shutdown(),
		}
	}

	fn state_reorg(&mut self, work: Work) {
		match work {
			Work::Filter(..) | Work::Update { .. } => {
				// superseded by the reorg, drop silently
			}
			Work::Mempool(..)
			| Work::StartScan
			| Work::Process(..)
			| Work::Reprocess(..)
			| Work::Rescan
			| Work::DoRescan(..)
			| Work::Block(..)
			| Work::Key => {
				debug!(
					"{} deferring message processing until reorg is complete",
					self.name
				);
				self.deferred.push_back(work);
			}
			Work::PrepareReorg(epoch) => {
				error!("{}: prepare_reorg {} while already in reorg", self.name, epoch);
			}
			Work::FinishReorg(epoch) => self.transition_state_normal(epoch),
			Work::PrepareShutdown => {
				error!("{}: wrong state for prepare_shutdown message", self.name);
			}
			Work::Watchdog => self.process_watchdog(),
			Work::Shutdown => self.transition_state_shutdown(),
		}
	}

	fn state_pre_shutdown(&mut self, work: Work) {
		match work {
			Work::Filter(..)
			| Work::Update { .. }
			| Work::Mempool(..)
			| Work::StartScan
			| Work::Process(..)
			| Work::Reprocess(..)
			| Work::Rescan
			| Work::DoRescan(..)
			| Work::Block(..)
			| Work::Key
			| Work::Watchdog => {
				// discarded without error while draining
			}
			Work::PrepareReorg(..) | Work::FinishReorg(..) | Work::PrepareShutdown => {
				error!("{}: wrong state for message in pre_shutdown", self.name);
			}
			Work::Shutdown => self.transition_state_shutdown(),
		}
	}

	// An update is stale when its epoch doesn't match the last reorg this
	// job went through, in either direction.
	fn stale_epoch(&self, epoch: &Option<u64>) -> bool {
		*epoch != self.last_reorg()
	}

	fn transition_state_reorg(&mut self, epoch: u64) {
		assert!(epoch > 0);
		if self.reorgs.insert(epoch) {
			self.state = JobState::Reorg;
			debug!("{} ready to process reorg {}", self.name, epoch);
			self.slave
				.acknowledge_prepare_reorg(self.logic.reorg_callback(epoch));
		} else {
			error!("{} reorg {} already handled", self.name, epoch);
		}
	}

	fn transition_state_normal(&mut self, epoch: u64) {
		self.state = JobState::Normal;
		debug!("{} transitioned to normal state after reorg {}", self.name, epoch);
		self.logic.on_finish_reorg();
		// replay work deferred during the reorg, in arrival order
		while let Some(work) = self.deferred.pop_front() {
			if self.state != JobState::Normal {
				self.deferred.push_front(work);
				break;
			}
			self.state_normal(work);
		}
	}

	fn transition_state_pre_shutdown(&mut self) {
		self.slave.acknowledge_shutdown();
		self.state = JobState::PreShutdown;
		debug!("{}: transitioned to pre_shutdown state", self.name);
	}

	fn transition_state_shutdown(&mut self) {
		self.state = JobState::Shutdown;
		let _ = self
			.to_parent
			.send(ParentReport::ShutdownComplete(self.logic.job_type()));
	}

	fn process_watchdog(&mut self) {
		let _ = self
			.to_parent
			.send(ParentReport::WatchdogAck(self.logic.job_type()));
	}
}

/// Drive a job on its own thread: messages from the inbox, watchdog ticks
/// on timeout, until shutdown.
pub fn spawn<L: JobLogic + 'static>(
	mut job: Job<L>,
	inbox: Receiver<Work>,
) -> thread::JoinHandle<()> {
	let name = job.name.clone();
	thread::Builder::new()
		.name(name)
		.spawn(move || {
			job.startup();
			loop {
				match inbox.recv_timeout(WATCHDOG_INTERVAL) {
					Ok(work) => job.handle(work),
					Err(RecvTimeoutError::Timeout) => job.handle(Work::Watchdog),
					Err(RecvTimeoutError::Disconnected) => break,
				}
				if job.is_shutdown() {
					break;
				}
			}
		})
		.expect("failed to spawn job thread")
}
