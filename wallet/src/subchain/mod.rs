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

//! One coordinator per (sub-account, subchain role): owns the five pipeline
//! jobs, brokers their reorg participation, routes chain events into the
//! pipeline and records confirmed wallet activity.

pub mod job;

mod index;
mod process;
mod progress;
mod rescan;
mod scan;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cache::SubchainCache;
use crate::chain::{BlockOracle, ChainEvent, FilterOracle, HeaderOracle};
use crate::core::chains::Chain;
use crate::core::hash::{sha256d, Hash};
use crate::core::pos::BlockPosition;
use crate::error::Error;
use crate::reorg::ReorgBroker;
use crate::types::{
	ElementSource, PatternData, SubaccountID, SubchainID, SubchainKind, TxoState, WalletEvent,
};
use crate::util::Mutex;

pub use self::job::{spawn, Job, JobLogic, JobState, JobType, ParentReport, Work};

// BIP47-style notification payload length
const NOTIFICATION_PAYLOAD: usize = 80;

/// State shared between the coordinator, the process/progress jobs and
/// external readers: confirmed output bookkeeping, decoded notifications
/// and the published scan position.
pub struct SubchainShared {
	/// Chain this subchain scans
	pub chain: Chain,
	/// Owning sub-account
	pub subaccount: SubaccountID,
	/// Role within the sub-account
	pub kind: SubchainKind,
	/// Content-addressed identity, the key for all persisted scan state
	pub subchain_id: SubchainID,
	/// Display name
	pub name: String,
	events: Sender<WalletEvent>,
	txos: Mutex<HashMap<Hash, TxoState>>,
	notifications: Mutex<HashSet<Vec<u8>>>,
	progress: Mutex<BlockPosition>,
}

impl SubchainShared {
	/// Record one match with its output state and reason
	pub fn process(&self, match_id: Hash, state: TxoState, reason: &str) {
		debug!("{}: match {:?} -> {:?} ({})", self.name, match_id, state, reason);
		self.txos.lock().insert(match_id, state);
	}

	/// Confirmed matches found in a downloaded block
	pub fn handle_block_matches(
		&self,
		position: &BlockPosition,
		matches: &[PatternData],
		block: &[u8],
	) {
		if matches.is_empty() {
			return;
		}
		for matched in matches {
			let match_id = match_id(&position.hash, &matched.bytes);
			self.process(match_id, TxoState::ConfirmedNew, "block match");
			if self.kind == SubchainKind::Notification {
				if let Some(payload) = decode_notification(block, &matched.bytes) {
					debug!("{}: decoded notification payload", self.name);
					self.notifications.lock().insert(payload);
				}
			}
		}
		let _ = self.events.send(WalletEvent::BlockMatches(
			self.subchain_id,
			*position,
			matches.len(),
		));
	}

	/// Matches found in an unconfirmed mempool transaction
	pub fn handle_mempool_match(&self, matches: &[PatternData], tx: &[u8]) {
		let txid = sha256d(tx);
		for matched in matches {
			let match_id = match_id(&txid, &matched.bytes);
			self.process(match_id, TxoState::UnconfirmedNew, "mempool match");
		}
		let _ = self
			.events
			.send(WalletEvent::MempoolMatch(self.subchain_id, txid));
	}

	/// Update the published scan position
	pub fn set_progress(&self, position: BlockPosition) {
		*self.progress.lock() = position;
		let _ = self
			.events
			.send(WalletEvent::ScanProgress(self.subchain_id, position));
	}

	/// The position scanning has been reported complete through
	pub fn check_cache(&self) -> BlockPosition {
		*self.progress.lock()
	}

	/// Current state of one tracked match, if known
	pub fn txo_state(&self, match_id: &Hash) -> Option<TxoState> {
		self.txos.lock().get(match_id).cloned()
	}

	/// Count of tracked matches in the given state
	pub fn txo_count(&self, state: TxoState) -> usize {
		self.txos.lock().values().filter(|s| **s == state).count()
	}

	/// Payment-code payloads decoded from notification transactions
	pub fn notifications(&self) -> HashSet<Vec<u8>> {
		self.notifications.lock().clone()
	}
}

fn match_id(anchor: &Hash, pattern: &[u8]) -> Hash {
	let mut preimage = Vec::with_capacity(32 + pattern.len());
	preimage.extend_from_slice(anchor.as_bytes());
	preimage.extend_from_slice(pattern);
	sha256d(&preimage)
}

// A notification element is followed by its 80-byte payload; anything
// shorter is not a valid notification.
fn decode_notification(data: &[u8], pattern: &[u8]) -> Option<Vec<u8>> {
	if pattern.is_empty() {
		return None;
	}
	let at = data
		.windows(pattern.len())
		.position(|window| window == pattern)?;
	let start = at + pattern.len();
	if data.len() < start + NOTIFICATION_PAYLOAD {
		return None;
	}
	Some(data[start..start + NOTIFICATION_PAYLOAD].to_vec())
}

/// Message senders into the five jobs
#[derive(Clone)]
pub struct JobSenders {
	/// Index job inbox
	pub to_index: Sender<Work>,
	/// Scan job inbox
	pub to_scan: Sender<Work>,
	/// Process job inbox
	pub to_process: Sender<Work>,
	/// Rescan job inbox
	pub to_rescan: Sender<Work>,
	/// Progress job inbox
	pub to_progress: Sender<Work>,
}

impl JobSenders {
	fn broadcast(&self, work: &Work) {
		let _ = self.to_index.send(work.clone());
		let _ = self.to_scan.send(work.clone());
		let _ = self.to_process.send(work.clone());
		let _ = self.to_rescan.send(work.clone());
		let _ = self.to_progress.send(work.clone());
	}
}

/// The per-subchain coordinator owning the job pipeline.
pub struct SubchainStateData {
	/// Shared state readable by external observers
	pub shared: Arc<SubchainShared>,
	/// Inboxes of the five jobs
	pub senders: JobSenders,
	reports: Receiver<ParentReport>,
	threads: Vec<JoinHandle<()>>,
}

impl SubchainStateData {
	/// Wire up and start the pipeline for one subchain. Registers five
	/// reorg participants with the broker, spawns the job threads and
	/// seeds the index job.
	pub fn new(
		chain: Chain,
		subaccount: SubaccountID,
		kind: SubchainKind,
		version: u32,
		source: Arc<dyn ElementSource>,
		cache: Arc<SubchainCache>,
		headers: Arc<HeaderOracle>,
		blocks: Arc<BlockOracle>,
		filters: Arc<dyn FilterOracle>,
		broker: &ReorgBroker,
		events: Sender<WalletEvent>,
	) -> Result<SubchainStateData, Error> {
		let filter_type = filters.default_type();
		let subchain_id = {
			let batch = cache.batch()?;
			let id = cache.get_index(&subaccount, kind, filter_type, version, &batch);
			batch.commit().map_err(Error::from)?;
			id
		};
		let name = format!("{} {} subchain {}", chain, kind, subchain_id);
		info!("starting {}", name);

		let (report_tx, report_rx) = channel();
		let (index_tx, index_rx) = channel();
		let (scan_tx, scan_rx) = channel();
		let (process_tx, process_rx) = channel();
		let (rescan_tx, rescan_rx) = channel();
		let (progress_tx, progress_rx) = channel();

		let shared = Arc::new(SubchainShared {
			chain,
			subaccount,
			kind,
			subchain_id,
			name: name.clone(),
			events,
			txos: Mutex::new(HashMap::new()),
			notifications: Mutex::new(HashSet::new()),
			progress: Mutex::new(BlockPosition::none()),
		});

		let mut threads = vec![];
		{
			let logic = index::IndexJob::new(
				subchain_id,
				cache.clone(),
				source,
				scan_tx.clone(),
			);
			let job = Job::new(
				format!("index job for {}", name),
				broker.get_slave(&format!("index job for {}", name)),
				report_tx.clone(),
				logic,
			);
			threads.push(spawn(job, index_rx));
		}
		{
			let logic = scan::ScanJob::new(
				subchain_id,
				cache.clone(),
				headers,
				filters,
				process_tx.clone(),
				progress_tx.clone(),
				scan_tx.clone(),
			);
			let job = Job::new(
				format!("scan job for {}", name),
				broker.get_slave(&format!("scan job for {}", name)),
				report_tx.clone(),
				logic,
			);
			threads.push(spawn(job, scan_rx));
		}
		{
			let logic = process::ProcessJob::new(
				subchain_id,
				cache.clone(),
				blocks,
				shared.clone(),
			);
			let job = Job::new(
				format!("process job for {}", name),
				broker.get_slave(&format!("process job for {}", name)),
				report_tx.clone(),
				logic,
			);
			threads.push(spawn(job, process_rx));
		}
		{
			let logic = rescan::RescanJob::new(subchain_id, cache.clone(), scan_tx.clone());
			let job = Job::new(
				format!("rescan job for {}", name),
				broker.get_slave(&format!("rescan job for {}", name)),
				report_tx.clone(),
				logic,
			);
			threads.push(spawn(job, rescan_rx));
		}
		{
			let logic = progress::ProgressJob::new(subchain_id, cache.clone(), shared.clone());
			let job = Job::new(
				format!("progress job for {}", name),
				broker.get_slave(&format!("progress job for {}", name)),
				report_tx.clone(),
				logic,
			);
			threads.push(spawn(job, progress_rx));
		}

		let senders = JobSenders {
			to_index: index_tx,
			to_scan: scan_tx,
			to_process: process_tx,
			to_rescan: rescan_tx,
			to_progress: progress_tx,
		};

		// seed the pipeline
		let _ = senders.to_index.send(Work::Key);

		Ok(SubchainStateData {
			shared,
			senders,
			reports: report_rx,
			threads,
		})
	}

	/// Route a chain event into the pipeline. Reorg events only mark the
	/// jobs; the chain-level wallet runs the broker afterwards.
	pub fn handle_chain_event(&self, event: &ChainEvent) {
		match event {
			ChainEvent::FilterReady(filter_type, position) => {
				let _ = self
					.senders
					.to_scan
					.send(Work::Filter(*filter_type, *position));
			}
			ChainEvent::BlockReady(hash) => {
				let _ = self.senders.to_process.send(Work::Block(*hash));
			}
			ChainEvent::Reorg(plan) => {
				self.prepare_reorg(plan.epoch);
			}
			_ => (),
		}
	}

	/// Move every job into the reorg state for the given epoch
	pub fn prepare_reorg(&self, epoch: u64) {
		self.senders.broadcast(&Work::PrepareReorg(epoch));
	}

	/// Return every job to normal processing after the reorg resolved
	pub fn finish_reorg(&self, epoch: u64) {
		self.senders.broadcast(&Work::FinishReorg(epoch));
	}

	/// Request an explicit rescan back to the given position
	pub fn rescan(&self, target: BlockPosition) {
		let _ = self.senders.to_rescan.send(Work::DoRescan(target));
	}

	/// Feed a raw mempool transaction through the matcher
	pub fn mempool(&self, tx: Vec<u8>) {
		let _ = self.senders.to_process.send(Work::Mempool(tx));
	}

	/// Begin the shutdown sequence
	pub fn prepare_shutdown(&self) {
		self.senders.broadcast(&Work::PrepareShutdown);
	}

	/// Terminate the pipeline and join the job threads
	pub fn shutdown(mut self) {
		self.senders.broadcast(&Work::Shutdown);
		for handle in self.threads.drain(..) {
			let _ = handle.join();
		}
	}

	/// Drain pending job reports (watchdog acks, shutdown completions)
	pub fn drain_reports(&self) -> Vec<ParentReport> {
		let mut out = vec![];
		while let Ok(report) = self.reports.try_recv() {
			out.push(report);
		}
		out
	}

	/// Wait for a single report, for callers tracking job liveness
	pub fn next_report(&self, timeout: Duration) -> Option<ParentReport> {
		self.reports.recv_timeout(timeout).ok()
	}

	/// The position scanning has completed through
	pub fn check_cache(&self) -> BlockPosition {
		self.shared.check_cache()
	}
}

/// Run one reorganization across a set of subchain pipelines: every job is
/// moved into the reorg state, the broker collects their acknowledgements
/// and executes the callbacks under the header lock, and the jobs return
/// to normal processing whether or not the reorg was committed.
pub fn coordinate_reorg(
	participants: &[&SubchainStateData],
	broker: &ReorgBroker,
	epoch: u64,
	timeout: Duration,
) -> bool {
	for participant in participants {
		participant.prepare_reorg(epoch);
	}
	let committed = broker.perform_reorg(timeout);
	for participant in participants {
		participant.finish_reorg(epoch);
	}
	committed
}
