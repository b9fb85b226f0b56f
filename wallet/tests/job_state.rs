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

//! Exercises the job state machine directly: per-state routing, deferral
//! during reorgs, epoch gating of updates, and watchdog acknowledgements.

use std::sync::mpsc::channel;
use std::sync::Arc;

use otnode_chain::{ChainStore, EventBus, HeaderOracle};
use otnode_core::chains::Chain;
use otnode_core::pos::BlockPosition;
use otnode_util::{self as util, Mutex};
use otnode_wallet::subchain::{Job, JobLogic, JobState, JobType, ParentReport, Work};
use otnode_wallet::ReorgBroker;

#[derive(Clone, Default)]
struct Recorder {
	handled: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
	fn take(&self) -> Vec<String> {
		self.handled.lock().drain(..).collect()
	}
}

struct TestLogic {
	recorder: Recorder,
}

impl JobLogic for TestLogic {
	fn job_type(&self) -> JobType {
		JobType::Scan
	}

	fn handle(&mut self, epoch: Option<u64>, work: Work) {
		let label = match work {
			Work::Filter(..) => "filter".to_owned(),
			Work::Update { position, .. } => format!("update:{}", position.height),
			Work::Mempool(..) => "mempool".to_owned(),
			Work::StartScan => "start_scan".to_owned(),
			Work::Process(p) => format!("process:{}", p.height),
			Work::Block(..) => "block".to_owned(),
			Work::Key => "key".to_owned(),
			other => format!("other:{:?}", other),
		};
		self.recorder
			.handled
			.lock()
			.push(format!("{}@{:?}", label, epoch));
	}
}

struct Harness {
	#[allow(dead_code)]
	dir: tempfile::TempDir,
	#[allow(dead_code)]
	broker: ReorgBroker,
	job: Job<TestLogic>,
	recorder: Recorder,
	reports: std::sync::mpsc::Receiver<ParentReport>,
}

fn setup() -> Harness {
	util::init_test_logger();
	let dir = tempfile::tempdir().unwrap();
	let db = Arc::new(ChainStore::new(dir.path().to_str().unwrap(), Chain::UnitTest).unwrap());
	let events = Arc::new(EventBus::new());
	let headers = Arc::new(HeaderOracle::new(db, events).unwrap());
	let broker = ReorgBroker::new(headers);
	let slave = broker.get_slave("test job");
	let (report_tx, report_rx) = channel();
	let recorder = Recorder::default();
	let job = Job::new(
		"test job".to_owned(),
		slave,
		report_tx,
		TestLogic {
			recorder: recorder.clone(),
		},
	);
	Harness {
		dir,
		broker,
		job,
		recorder,
		reports: report_rx,
	}
}

fn pos(height: i64) -> BlockPosition {
	BlockPosition::new(height, otnode_core::hash::sha256d(&height.to_be_bytes()))
}

#[test]
fn normal_state_processes_work() {
	let mut h = setup();
	assert_eq!(h.job.state(), JobState::Normal);
	h.job.handle(Work::StartScan);
	h.job.handle(Work::Process(pos(3)));
	assert_eq!(h.recorder.take(), vec!["start_scan@None", "process:3@None"]);
}

#[test]
fn watchdog_acknowledges_with_job_type() {
	let mut h = setup();
	h.job.handle(Work::Watchdog);
	assert_eq!(
		h.reports.try_recv().unwrap(),
		ParentReport::WatchdogAck(JobType::Scan)
	);
}

#[test]
fn reorg_defers_work_and_replays_in_order() {
	let mut h = setup();
	h.job.handle(Work::PrepareReorg(1));
	assert_eq!(h.job.state(), JobState::Reorg);
	assert_eq!(h.job.last_reorg(), Some(1));

	// filters are dropped, the rest deferred
	h.job.handle(Work::Filter(
		otnode_chain::FilterType::Basic,
		pos(5),
	));
	h.job.handle(Work::Process(pos(4)));
	h.job.handle(Work::Key);
	assert!(h.recorder.take().is_empty());

	// watchdog still acknowledges during a reorg
	h.job.handle(Work::Watchdog);
	assert_eq!(
		h.reports.try_recv().unwrap(),
		ParentReport::WatchdogAck(JobType::Scan)
	);

	h.job.handle(Work::FinishReorg(1));
	assert_eq!(h.job.state(), JobState::Normal);
	assert_eq!(
		h.recorder.take(),
		vec!["process:4@Some(1)", "key@Some(1)"]
	);
}

#[test]
fn stale_updates_are_dropped() {
	let mut h = setup();
	// no reorg yet: an update without an epoch passes
	h.job.handle(Work::Update {
		epoch: None,
		position: pos(1),
	});
	// one tagged with an epoch that never happened is dropped
	h.job.handle(Work::Update {
		epoch: Some(9),
		position: pos(2),
	});
	assert_eq!(h.recorder.take(), vec!["update:1@None"]);

	h.job.handle(Work::PrepareReorg(1));
	h.job.handle(Work::FinishReorg(1));

	// now only updates tagged with epoch 1 pass
	h.job.handle(Work::Update {
		epoch: None,
		position: pos(3),
	});
	h.job.handle(Work::Update {
		epoch: Some(1),
		position: pos(4),
	});
	h.job.handle(Work::Update {
		epoch: Some(2),
		position: pos(5),
	});
	assert_eq!(h.recorder.take(), vec!["update:4@Some(1)"]);
}

#[test]
fn duplicate_prepare_reorg_is_rejected() {
	let mut h = setup();
	h.job.handle(Work::PrepareReorg(1));
	h.job.handle(Work::FinishReorg(1));
	// the same epoch cannot be prepared twice
	h.job.handle(Work::PrepareReorg(1));
	assert_eq!(h.job.state(), JobState::Normal);
	// a later epoch is fine
	h.job.handle(Work::PrepareReorg(2));
	assert_eq!(h.job.state(), JobState::Reorg);
	assert_eq!(h.job.last_reorg(), Some(2));
}

#[test]
fn pre_shutdown_discards_work_silently() {
	let mut h = setup();
	h.job.handle(Work::PrepareShutdown);
	assert_eq!(h.job.state(), JobState::PreShutdown);

	h.job.handle(Work::StartScan);
	h.job.handle(Work::Process(pos(1)));
	h.job.handle(Work::Watchdog);
	assert!(h.recorder.take().is_empty());
	// watchdog is ignored too in pre_shutdown
	assert!(h.reports.try_recv().is_err());

	h.job.handle(Work::Shutdown);
	assert_eq!(h.job.state(), JobState::Shutdown);
	assert_eq!(
		h.reports.try_recv().unwrap(),
		ParentReport::ShutdownComplete(JobType::Scan)
	);

	// terminal: everything is ignored
	h.job.handle(Work::StartScan);
	assert!(h.recorder.take().is_empty());
}
