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

//! Exercises the sync peer's routing: registration queueing and flush
//! order, acknowledgement fan-out and subscription, egress stripping,
//! ping timing.

use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

use otnode_config::OtdhtConfig;
use otnode_core::chains::Chain;
use otnode_core::hash::sha256d;
use otnode_core::pos::BlockPosition;
use otnode_otdht::{
	encode, Acknowledgement, Data, Message, OtdhtPeer, PeerMsg, State, WorkerMsg,
};

struct Harness {
	peer: OtdhtPeer,
	remote_rx: Receiver<Vec<Vec<u8>>>,
	local_rx: Receiver<Message>,
	worker_rx: Receiver<WorkerMsg>,
}

fn state(chain: Chain, height: i64) -> State {
	State {
		chain,
		position: BlockPosition::new(height, sha256d(&height.to_be_bytes())),
		genesis: chain.params().genesis_hash,
	}
}

fn reply(chain: Chain, height: i64, item: u8) -> Message {
	Message::SyncReply(Data {
		state: state(chain, height),
		items: vec![vec![item; 80]],
	})
}

fn setup(chain: Chain) -> Harness {
	otnode_util::init_test_logger();
	let (remote_tx, remote_rx) = channel();
	let (local_tx, local_rx) = channel();
	let (worker_tx, worker_rx) = channel();
	let mut peer = OtdhtPeer::new(
		"tcp://remote:8814",
		&OtdhtConfig::default(),
		remote_tx,
		local_tx,
	);
	peer.connect_worker(chain, worker_tx);
	peer.activate_chain(chain);
	Harness {
		peer,
		remote_rx,
		local_rx,
		worker_rx,
	}
}

#[test]
fn queued_messages_flush_in_order_on_registration() {
	let mut h = setup(Chain::Bitcoin);

	// three replies arrive before the worker registers
	for i in 0..3u8 {
		h.peer
			.handle(PeerMsg::Remote(encode(&reply(Chain::Bitcoin, 5 + i as i64, i))));
	}
	assert!(h.worker_rx.try_recv().is_err());

	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));

	// all three arrive, in order, before any later traffic
	for i in 0..3u8 {
		match h.worker_rx.try_recv().unwrap() {
			WorkerMsg::Remote(Message::SyncReply(data)) => {
				assert_eq!(data.items[0][0], i);
			}
			other => panic!("unexpected worker message: {:?}", other),
		}
	}

	// later traffic flows directly
	h.peer
		.handle(PeerMsg::Remote(encode(&reply(Chain::Bitcoin, 9, 9))));
	match h.worker_rx.try_recv().unwrap() {
		WorkerMsg::Remote(Message::SyncReply(data)) => assert_eq!(data.items[0][0], 9),
		other => panic!("unexpected worker message: {:?}", other),
	}
}

#[test]
fn acknowledgement_fans_out_and_subscribes_once() {
	let mut h = setup(Chain::Bitcoin);
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));

	let ack = Message::Acknowledgement(Acknowledgement {
		states: vec![state(Chain::Bitcoin, 10), state(Chain::Litecoin, 3)],
		endpoint: "tcp://remote:8815".to_owned(),
	});
	h.peer.handle(PeerMsg::Remote(encode(&ack)));

	// the bitcoin worker got the ack; litecoin isn't active so its copy
	// was dropped
	match h.worker_rx.try_recv().unwrap() {
		WorkerMsg::Remote(Message::Acknowledgement(..)) => (),
		other => panic!("unexpected worker message: {:?}", other),
	}
	assert!(h.worker_rx.try_recv().is_err());
	assert!(h.peer.subscriptions().contains("tcp://remote:8815"));

	// re-subscription is a no-op
	h.peer.handle(PeerMsg::Remote(encode(&ack)));
	assert_eq!(h.peer.subscriptions().len(), 1);
}

#[test]
fn late_registration_replays_last_acknowledgement() {
	let mut h = setup(Chain::Bitcoin);

	let ack = Message::Acknowledgement(Acknowledgement {
		states: vec![state(Chain::Bitcoin, 10)],
		endpoint: String::new(),
	});
	h.peer.handle(PeerMsg::Remote(encode(&ack)));

	// the ack was queued (worker unregistered), so registration flushes the
	// queue; drain it, then confirm direct flow afterwards
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));
	match h.worker_rx.try_recv().unwrap() {
		WorkerMsg::Remote(Message::Acknowledgement(..)) => (),
		other => panic!("unexpected worker message: {:?}", other),
	}

	// a worker re-registering with nothing queued receives the last ack
	h.peer.handle(PeerMsg::ChainState(Chain::Bitcoin, false));
	h.peer.handle(PeerMsg::ChainState(Chain::Bitcoin, true));
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));
	match h.worker_rx.try_recv().unwrap() {
		WorkerMsg::Remote(Message::Acknowledgement(..)) => (),
		other => panic!("unexpected worker message: {:?}", other),
	}
}

#[test]
fn pushtx_reply_routes_to_its_chain_and_responses_go_local() {
	let mut h = setup(Chain::Bitcoin);
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));

	h.peer.handle(PeerMsg::Remote(encode(&Message::PushTransactionReply {
		chain: Chain::Bitcoin,
		txid: sha256d(b"tx"),
		success: true,
	})));
	match h.worker_rx.try_recv().unwrap() {
		WorkerMsg::Remote(Message::PushTransactionReply { success: true, .. }) => (),
		other => panic!("unexpected worker message: {:?}", other),
	}

	h.peer.handle(PeerMsg::Remote(encode(&Message::PublishAck { id: vec![1] })));
	h.peer.handle(PeerMsg::Remote(encode(&Message::Contract {
		id: vec![2],
		payload: vec![3],
	})));
	assert_eq!(h.local_rx.try_recv().unwrap(), Message::PublishAck { id: vec![1] });
	match h.local_rx.try_recv().unwrap() {
		Message::Contract { id, .. } => assert_eq!(id, vec![2]),
		other => panic!("unexpected local message: {:?}", other),
	}
}

#[test]
fn inactive_chains_drop_traffic() {
	let mut h = setup(Chain::Bitcoin);
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));
	h.peer.handle(PeerMsg::ChainState(Chain::Bitcoin, false));

	h.peer
		.handle(PeerMsg::Remote(encode(&reply(Chain::Bitcoin, 5, 1))));
	assert!(h.worker_rx.try_recv().is_err());

	// disabling also forgets the registration
	h.peer.handle(PeerMsg::ChainState(Chain::Bitcoin, true));
	h.peer
		.handle(PeerMsg::Remote(encode(&reply(Chain::Bitcoin, 6, 2))));
	// queued again until the worker re-registers
	assert!(h.worker_rx.try_recv().is_err());
	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));
	assert!(h.worker_rx.try_recv().is_ok());
}

#[test]
fn egress_strips_the_internal_header_frame() {
	let mut h = setup(Chain::Bitcoin);

	let request = Message::SyncRequest {
		states: vec![state(Chain::Bitcoin, 4)],
	};
	let mut frames = vec![b"internal-routing-header".to_vec()];
	frames.extend(encode(&request));
	h.peer.handle(PeerMsg::WorkerFrames(Chain::Bitcoin, frames));

	let sent = h.remote_rx.try_recv().unwrap();
	assert_eq!(otnode_otdht::decode(&sent).unwrap(), request);

	// non-egress types are not forwarded
	let mut bogus = vec![b"header".to_vec()];
	bogus.extend(encode(&Message::Query));
	h.peer.handle(PeerMsg::WorkerFrames(Chain::Bitcoin, bogus));
	assert!(h.remote_rx.try_recv().is_err());
}

#[test]
fn silence_triggers_a_keepalive_query() {
	let mut h = setup(Chain::Bitcoin);
	let interval = Duration::from_secs(OtdhtConfig::default().ping_interval_secs);

	// activity just happened: no ping, and the delay is the remainder
	let soon = h.peer.check_ping(Instant::now());
	assert!(soon <= interval);
	assert!(h.remote_rx.try_recv().is_err());

	// long silence: a Query goes out
	let later = Instant::now() + interval + Duration::from_secs(1);
	h.peer.check_ping(later);
	let sent = h.remote_rx.try_recv().unwrap();
	assert_eq!(otnode_otdht::decode(&sent).unwrap(), Message::Query);

	// the timer continues from the ping
	let immediately_after = later + Duration::from_millis(10);
	h.peer.check_ping(immediately_after);
	assert!(h.remote_rx.try_recv().is_err());
}

#[test]
fn registration_retry_targets_unregistered_workers() {
	let mut h = setup(Chain::Bitcoin);

	let retry = h.peer.check_registration();
	assert_eq!(
		retry,
		Some(Duration::from_secs(
			OtdhtConfig::default().registration_retry_secs
		))
	);
	assert_eq!(h.worker_rx.try_recv().unwrap(), WorkerMsg::RegisterRequest);

	h.peer.handle(PeerMsg::Registration(Chain::Bitcoin));
	assert_eq!(h.peer.check_registration(), None);
	assert!(h.worker_rx.try_recv().is_err());
}
