//! Protocol tests across several in-process nodes.
//!
//! A small router stands in for TCP: it hands each envelope to the node
//! listening on the destination address and queues the replies.

use ledger_node::config::Config;
use ledger_node::core::{OwnerKeyAuthorizer, Transaction};
use ledger_node::network::message::TxData;
use ledger_node::network::{Envelope, Node, Package, SyncState};
use ledger_node::storage::UTXOSet;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const SEED: &str = "127.0.0.1:3000";
const PEER: &str = "127.0.0.1:3001";
const WALLET_CLIENT: &str = "127.0.0.1:4000";

struct Router {
    nodes: HashMap<String, Arc<Node>>,
    queue: VecDeque<Envelope>,
}

impl Router {
    fn new(nodes: &[&Arc<Node>]) -> Router {
        Router {
            nodes: nodes
                .iter()
                .map(|node| (node.addr().to_string(), Arc::clone(node)))
                .collect(),
            queue: VecDeque::new(),
        }
    }

    fn send(&mut self, envelopes: Vec<Envelope>) {
        self.queue.extend(envelopes);
    }

    fn run(&mut self) {
        let mut steps = 0;
        while let Some(envelope) = self.queue.pop_front() {
            steps += 1;
            assert!(steps < 1000, "message storm");

            let node = match self.nodes.get(&envelope.to) {
                Some(node) => Arc::clone(node),
                None => continue,
            };
            let dispatch = node.handle(envelope.package).unwrap();
            self.queue.extend(dispatch.replies);
            if dispatch.mine {
                let announcements = node.mine_pending().unwrap();
                self.queue.extend(announcements);
            }
        }
    }
}

fn seed_config(data_dir: &Path) -> Config {
    let mut config = Config::default()
        .with_node_id("3000")
        .with_miner(Some("alice".to_string()));
    config.data_dir = data_dir.to_path_buf();
    config.known_nodes = vec![SEED.to_string()];
    config.mempool_threshold = 1;
    config
}

fn peer_config(data_dir: &Path) -> Config {
    let mut config = Config::default()
        .with_node_id("3001")
        .with_bootnode(Some(SEED.to_string()));
    config.data_dir = data_dir.to_path_buf();
    config.known_nodes = vec![SEED.to_string()];
    config
}

fn bootstrapped_pair(data_dir: &Path) -> (Arc<Node>, Arc<Node>, Router) {
    let seed = Arc::new(Node::open(&seed_config(data_dir), Arc::new(OwnerKeyAuthorizer)).unwrap());
    let peer = Arc::new(Node::open(&peer_config(data_dir), Arc::new(OwnerKeyAuthorizer)).unwrap());
    assert_eq!(peer.sync_state(), SyncState::Uninitialized);

    let mut router = Router::new(&[&seed, &peer]);
    router.send(peer.startup_messages(Some(SEED)).unwrap());
    router.run();
    (seed, peer, router)
}

#[test]
fn test_new_node_bootstraps_genesis_from_seed() {
    let dir = tempdir().unwrap();
    let (seed, peer, _) = bootstrapped_pair(dir.path());

    assert_eq!(peer.sync_state(), SyncState::Ready);
    let seed_chain = seed.chain().unwrap();
    let peer_chain = peer.chain().unwrap();
    assert_eq!(
        peer_chain.get_genesis_block().unwrap().get_hash(),
        seed_chain.get_genesis_block().unwrap().get_hash()
    );
    assert_eq!(peer_chain.get_best_height(), 1);
    assert_eq!(UTXOSet::new(peer_chain).get_balance("alice").unwrap(), 33);
    assert!(seed.known_nodes().contains(&PEER.to_string()));
}

#[test]
fn test_mined_block_reaches_peer() {
    let dir = tempdir().unwrap();
    let (seed, peer, mut router) = bootstrapped_pair(dir.path());

    let seed_chain = seed.chain().unwrap();
    let tx = Transaction::new_utxo_transaction(
        "alice",
        "bob",
        10,
        &UTXOSet::new(seed_chain.clone()),
        &OwnerKeyAuthorizer,
    )
    .unwrap();
    router.send(vec![Envelope::new(
        SEED,
        Package::Tx(TxData {
            addr_from: WALLET_CLIENT.to_string(),
            transaction: tx.serialize().unwrap(),
        }),
    )]);
    router.run();

    let peer_chain = peer.chain().unwrap();
    assert_eq!(seed_chain.get_best_height(), 2);
    assert_eq!(peer_chain.get_tip_hash(), seed_chain.get_tip_hash());
    assert_eq!(seed.mempool_len(), 0);
    assert_eq!(peer.mempool_len(), 0);

    let seed_utxo = UTXOSet::new(seed_chain);
    let peer_utxo = UTXOSet::new(peer_chain);
    assert_eq!(peer_utxo.snapshot().unwrap(), seed_utxo.snapshot().unwrap());
    assert_eq!(peer_utxo.get_balance("alice").unwrap(), 23 + 33);
    assert_eq!(peer_utxo.get_balance("bob").unwrap(), 10);
}

#[test]
fn test_lagging_node_catches_up_on_version() {
    let dir = tempdir().unwrap();
    let (seed, peer, mut router) = bootstrapped_pair(dir.path());

    let seed_chain = seed.chain().unwrap();
    for _ in 0..2 {
        let coinbase = Transaction::new_coinbase_tx("alice", "").unwrap();
        seed_chain.mine_block(&[coinbase]).unwrap();
    }
    UTXOSet::new(seed_chain.clone()).reindex().unwrap();

    router.send(seed.startup_messages(None).unwrap());
    router.run();

    let peer_chain = peer.chain().unwrap();
    assert_eq!(peer_chain.get_best_height(), 3);
    assert_eq!(peer_chain.get_tip_hash(), seed_chain.get_tip_hash());
    assert_eq!(
        UTXOSet::new(peer_chain).get_balance("alice").unwrap(),
        3 * 33
    );
}
