use crate::network::node::Node;
use crate::network::server::{deliver, Transport};
use log::{error, info};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Dedicated mining thread. Each trigger mines the mempool until it is empty;
/// triggers that arrive while a round is running are coalesced.
pub struct Miner {
    trigger: Sender<()>,
    handle: JoinHandle<()>,
}

impl Miner {
    pub fn spawn(node: Arc<Node>, transport: Arc<dyn Transport>) -> Miner {
        let (trigger, signals) = mpsc::channel();
        let handle = thread::spawn(move || Self::run(&node, transport.as_ref(), signals));
        Miner { trigger, handle }
    }

    fn run(node: &Node, transport: &dyn Transport, signals: Receiver<()>) {
        info!("Miner thread started");
        while signals.recv().is_ok() {
            while signals.try_recv().is_ok() {}

            match node.mine_pending() {
                Ok(announcements) => deliver(node, transport, announcements),
                Err(e) => error!("Mining failed: {e}"),
            }
        }
        info!("Miner thread stopped");
    }

    /// A handle that wakes the miner.
    pub fn trigger(&self) -> Sender<()> {
        self.trigger.clone()
    }

    /// Stop the thread once it finishes the current round.
    pub fn shutdown(self) {
        let Miner { trigger, handle } = self;
        drop(trigger);
        if handle.join().is_err() {
            error!("Miner thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{OwnerKeyAuthorizer, Transaction};
    use crate::error::Result;
    use crate::network::message::{Package, TxData};
    use crate::network::node::Envelope;
    use crate::storage::UTXOSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
    }

    impl Transport for Recorder {
        fn send(&self, envelope: &Envelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    #[test]
    fn test_miner_thread_mines_and_announces() {
        let dir = tempdir().unwrap();
        let mut config = Config::default().with_miner(Some("alice".to_string()));
        config.data_dir = dir.path().to_path_buf();
        config.known_nodes = vec!["127.0.0.1:3001".to_string()];
        let node = Arc::new(Node::open(&config, Arc::new(OwnerKeyAuthorizer)).unwrap());
        let chain = node.chain().unwrap();

        let utxo_set = UTXOSet::new(chain.clone());
        let tx = Transaction::new_utxo_transaction("alice", "bob", 10, &utxo_set, &OwnerKeyAuthorizer)
            .unwrap();
        node.handle(Package::Tx(TxData {
            addr_from: "127.0.0.1:3001".to_string(),
            transaction: tx.serialize().unwrap(),
        }))
        .unwrap();

        let recorder = Arc::new(Recorder::default());
        let miner = Miner::spawn(Arc::clone(&node), Arc::clone(&recorder) as Arc<dyn Transport>);
        miner.trigger().send(()).unwrap();
        miner.shutdown();

        assert_eq!(chain.get_best_height(), 2);
        assert_eq!(node.mempool_len(), 0);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].package, Package::Inv(_)));
    }
}
