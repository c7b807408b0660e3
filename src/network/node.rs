//! Peer protocol engine
//!
//! [`Node::handle`] applies one decoded message to the node state and
//! returns the messages to send in response. It performs no I/O, so the
//! TCP server and in-process tests drive it the same way.

use crate::config::Config;
use crate::core::{
    check_transactions, AddBlockOutcome, Authorizer, Block, Blockchain, Transaction,
};
use crate::error::{BlockchainError, Result};
use crate::network::message::{
    Addr, BlockData, Bootnode, GetBlocks, GetData, Inv, OpType, Package, TxData, Version,
    NODE_VERSION,
};
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Ordered set of known peer addresses.
#[derive(Debug, Default, Clone)]
pub struct Nodes {
    inner: Vec<String>,
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes::default()
    }

    /// Returns false if the address was already known.
    pub fn add_node(&mut self, addr: &str) -> bool {
        if self.node_is_known(addr) {
            return false;
        }
        self.inner.push(addr.to_string());
        true
    }

    pub fn evict_node(&mut self, addr: &str) {
        self.inner.retain(|x| x != addr);
    }

    pub fn get_nodes(&self) -> &[String] {
        self.inner.as_slice()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.inner.iter().any(|x| x == addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No chain yet; waiting to ask a bootnode for its genesis.
    Uninitialized,
    /// Genesis requested from the bootnode.
    Bootstrapping,
    Ready,
}

/// A message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub package: Package,
}

impl Envelope {
    pub fn new(to: &str, package: Package) -> Envelope {
        Envelope {
            to: to.to_string(),
            package,
        }
    }
}

/// Outcome of handling one message.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub replies: Vec<Envelope>,
    /// The mempool reached the mining threshold on a mining node.
    pub mine: bool,
}

impl Dispatch {
    fn reply(to: &str, package: Package) -> Dispatch {
        Dispatch {
            replies: vec![Envelope::new(to, package)],
            mine: false,
        }
    }
}

/// Everything a message handler may mutate, guarded by one lock.
struct NodeState {
    chain: Option<Blockchain>,
    nodes: Nodes,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    sync_state: SyncState,
    /// Peer asked for the genesis block while bootstrapping.
    bootnode: Option<String>,
}

pub struct Node {
    addr: String,
    db_path: PathBuf,
    miner_address: Option<String>,
    mempool_threshold: usize,
    authorizer: Arc<dyn Authorizer>,
    // Set when a peer block moves the tip so an in-progress mine gives up.
    mining_cancel: AtomicBool,
    state: Mutex<NodeState>,
}

impl Node {
    /// Build a node around an already opened chain, or `None` for a node that
    /// will bootstrap from a peer.
    pub fn new(config: &Config, chain: Option<Blockchain>, authorizer: Arc<dyn Authorizer>) -> Node {
        let addr = config.get_node_addr();
        let mut nodes = Nodes::new();
        for known in &config.known_nodes {
            if *known != addr {
                nodes.add_node(known);
            }
        }
        let sync_state = if chain.is_some() {
            SyncState::Ready
        } else {
            SyncState::Uninitialized
        };

        Node {
            addr,
            db_path: config.db_path(),
            miner_address: config.miner_address.clone(),
            mempool_threshold: config.mempool_threshold,
            authorizer,
            mining_cancel: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                chain,
                nodes,
                mempool: MemoryPool::new(),
                blocks_in_transit: BlockInTransit::new(),
                sync_state,
                bootnode: None,
            }),
        }
    }

    /// Open the node's chain according to the startup rules:
    /// resume an existing chain, otherwise create one paying the miner, or
    /// start empty when a bootnode will supply the genesis block.
    pub fn open(config: &Config, authorizer: Arc<dyn Authorizer>) -> Result<Node> {
        let path = config.db_path();
        let chain = if Blockchain::exists(&path)? {
            if config.bootnode.is_some() {
                info!("Chain already exists; ignoring bootnode genesis and syncing instead");
            }
            info!("Resumed chain at {}", path.display());
            Some(Blockchain::new_blockchain_with_path(&path)?)
        } else if config.bootnode.is_some() {
            None
        } else if let Some(miner) = &config.miner_address {
            info!("Created new chain with {miner}");
            Some(Blockchain::create_blockchain_with_path(miner, &path)?)
        } else {
            return Err(BlockchainError::NoChain(format!(
                "{} (set a miner address or a bootnode)",
                path.display()
            )));
        };

        if let Some(chain) = &chain {
            UTXOSet::new(chain.clone()).reindex()?;
        }
        Ok(Node::new(config, chain, authorizer))
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn sync_state(&self) -> SyncState {
        self.lock().sync_state
    }

    pub fn chain(&self) -> Option<Blockchain> {
        self.lock().chain.clone()
    }

    pub fn known_nodes(&self) -> Vec<String> {
        self.lock().nodes.get_nodes().to_vec()
    }

    pub fn mempool_len(&self) -> usize {
        self.lock().mempool.len()
    }

    pub fn is_miner(&self) -> bool {
        self.miner_address.is_some()
    }

    /// Drop a peer that could not be reached.
    pub fn evict_peer(&self, addr: &str) {
        info!("Evicting unreachable peer {addr}");
        self.lock().nodes.evict_node(addr);
    }

    /// Messages to send once the listener is up.
    pub fn startup_messages(&self, bootnode: Option<&str>) -> Result<Vec<Envelope>> {
        let mut state = self.lock();
        match (state.sync_state, bootnode) {
            (SyncState::Uninitialized, Some(bootnode)) => {
                state.nodes.evict_node(bootnode);
                state.nodes.inner.insert(0, bootnode.to_string());
                state.sync_state = SyncState::Bootstrapping;
                state.bootnode = Some(bootnode.to_string());
                info!("Requesting genesis from bootnode {bootnode}");
                Ok(vec![Envelope::new(
                    bootnode,
                    Package::Bootnode(Bootnode {
                        addr_from: self.addr.clone(),
                    }),
                )])
            }
            (SyncState::Uninitialized, None) => Err(BlockchainError::NoChain(
                "no chain and no bootnode to bootstrap from".to_string(),
            )),
            (SyncState::Ready, Some(bootnode)) => {
                state.nodes.add_node(bootnode);
                let version = self.version_package(&state)?;
                Ok(vec![Envelope::new(bootnode, version)])
            }
            (SyncState::Ready, None) => {
                let version = self.version_package(&state)?;
                Ok(state
                    .nodes
                    .get_nodes()
                    .iter()
                    .map(|peer| Envelope::new(peer, version.clone()))
                    .collect())
            }
            (SyncState::Bootstrapping, _) => Ok(vec![]),
        }
    }

    fn version_package(&self, state: &NodeState) -> Result<Package> {
        let chain = Self::require_chain(state)?;
        Ok(Package::Version(Version {
            version: NODE_VERSION,
            best_height: chain.get_best_height(),
            addr_from: self.addr.clone(),
        }))
    }

    fn require_chain(state: &NodeState) -> Result<&Blockchain> {
        state.chain.as_ref().ok_or_else(|| {
            BlockchainError::Protocol(format!(
                "No chain yet (state {:?})",
                state.sync_state
            ))
        })
    }

    /// Apply one message and collect the replies.
    pub fn handle(&self, package: Package) -> Result<Dispatch> {
        debug!("Handling {} command", package.command());
        let mut state = self.lock();
        match package {
            Package::Addr(p) => self.handle_addr(&mut state, p),
            Package::Block(p) => self.handle_block(&mut state, p),
            Package::Bootnode(p) => self.handle_bootnode(&state, p),
            Package::Genesis(p) => self.handle_genesis(&mut state, p),
            Package::GetBlocks(p) => self.handle_get_blocks(&state, p),
            Package::GetData(p) => self.handle_get_data(&state, p),
            Package::Inv(p) => self.handle_inv(&mut state, p),
            Package::Tx(p) => self.handle_tx(&mut state, p),
            Package::Version(p) => self.handle_version(&mut state, p),
        }
    }

    fn handle_addr(&self, state: &mut NodeState, payload: Addr) -> Result<Dispatch> {
        for addr in &payload.addr_list {
            if *addr != self.addr {
                state.nodes.add_node(addr);
            }
        }
        info!("There are {} known nodes", state.nodes.len());

        let get_blocks = Package::GetBlocks(GetBlocks {
            addr_from: self.addr.clone(),
        });
        Ok(Dispatch {
            replies: state
                .nodes
                .get_nodes()
                .iter()
                .map(|peer| Envelope::new(peer, get_blocks.clone()))
                .collect(),
            mine: false,
        })
    }

    fn handle_block(&self, state: &mut NodeState, payload: BlockData) -> Result<Dispatch> {
        let chain = Self::require_chain(state)?.clone();
        let received = Block::deserialize(&payload.block).and_then(|block| {
            info!("Received block {} from {}", block.hash_hex(), payload.addr_from);
            let outcome = chain.add_block(&block)?;
            Ok((block, outcome))
        });
        let (block, outcome) = match received {
            Ok(received) => received,
            Err(e) => {
                // Abandon the sync but index whatever was appended so far.
                warn!("Rejected block from {}: {e}", payload.addr_from);
                state.blocks_in_transit.clear();
                UTXOSet::new(chain).reindex()?;
                return Err(e);
            }
        };

        if outcome == AddBlockOutcome::Appended {
            self.mining_cancel.store(true, Ordering::Relaxed);
            for tx in block.get_transactions() {
                state.mempool.remove(&tx.id_hex());
            }
        }

        if let Some(next) = state.blocks_in_transit.pop_front() {
            return Ok(Dispatch::reply(
                &payload.addr_from,
                Package::GetData(GetData {
                    addr_from: self.addr.clone(),
                    op_type: OpType::Block,
                    id: next,
                }),
            ));
        }

        UTXOSet::new(chain.clone()).reindex()?;
        info!("Chain synced at height {}", chain.get_best_height());
        Ok(Dispatch::default())
    }

    fn handle_bootnode(&self, state: &NodeState, payload: Bootnode) -> Result<Dispatch> {
        let chain = Self::require_chain(state)?;
        let genesis = chain.get_genesis_block()?;
        info!("Sending genesis {} to {}", genesis.hash_hex(), payload.addr_from);
        Ok(Dispatch::reply(
            &payload.addr_from,
            Package::Genesis(BlockData {
                addr_from: self.addr.clone(),
                block: genesis.serialize()?,
            }),
        ))
    }

    fn handle_genesis(&self, state: &mut NodeState, payload: BlockData) -> Result<Dispatch> {
        let solicited = state.sync_state == SyncState::Bootstrapping
            && state.bootnode.as_deref() == Some(payload.addr_from.as_str());
        if !solicited {
            warn!(
                "Ignoring unsolicited genesis from {} in state {:?}",
                payload.addr_from, state.sync_state
            );
            return Ok(Dispatch::default());
        }

        let genesis = Block::deserialize(&payload.block)?;
        info!("Received genesis block {}", genesis.hash_hex());
        let chain = Blockchain::init_with_genesis(&genesis, &self.db_path)?;
        UTXOSet::new(chain.clone()).reindex()?;

        state.chain = Some(chain);
        state.sync_state = SyncState::Ready;
        state.nodes.add_node(&payload.addr_from);

        let version = self.version_package(state)?;
        Ok(Dispatch::reply(&payload.addr_from, version))
    }

    fn handle_get_blocks(&self, state: &NodeState, payload: GetBlocks) -> Result<Dispatch> {
        let chain = Self::require_chain(state)?;
        Ok(Dispatch::reply(
            &payload.addr_from,
            Package::Inv(Inv {
                addr_from: self.addr.clone(),
                op_type: OpType::Block,
                items: chain.get_block_hashes()?,
            }),
        ))
    }

    fn handle_get_data(&self, state: &NodeState, payload: GetData) -> Result<Dispatch> {
        match payload.op_type {
            OpType::Block => {
                let chain = Self::require_chain(state)?;
                let block = match chain.get_block(&payload.id) {
                    Ok(block) => block,
                    Err(BlockchainError::NotFound(what)) => {
                        warn!("{} requested unknown {what}", payload.addr_from);
                        return Ok(Dispatch::default());
                    }
                    Err(e) => return Err(e),
                };
                Ok(Dispatch::reply(
                    &payload.addr_from,
                    Package::Block(BlockData {
                        addr_from: self.addr.clone(),
                        block: block.serialize()?,
                    }),
                ))
            }
            OpType::Tx => match state.mempool.get(&HEXLOWER.encode(&payload.id)) {
                Some(tx) => Ok(Dispatch::reply(
                    &payload.addr_from,
                    Package::Tx(TxData {
                        addr_from: self.addr.clone(),
                        transaction: tx.serialize()?,
                    }),
                )),
                None => Ok(Dispatch::default()),
            },
        }
    }

    fn handle_inv(&self, state: &mut NodeState, payload: Inv) -> Result<Dispatch> {
        info!(
            "Received inventory with {} {:?}",
            payload.items.len(),
            payload.op_type
        );
        match payload.op_type {
            OpType::Block => {
                state.blocks_in_transit.replace(&payload.items);
                match state.blocks_in_transit.pop_front() {
                    Some(first) => Ok(Dispatch::reply(
                        &payload.addr_from,
                        Package::GetData(GetData {
                            addr_from: self.addr.clone(),
                            op_type: OpType::Block,
                            id: first,
                        }),
                    )),
                    None => Ok(Dispatch::default()),
                }
            }
            OpType::Tx => {
                let replies = payload
                    .items
                    .iter()
                    .filter(|txid| !state.mempool.contains(&HEXLOWER.encode(txid)))
                    .map(|txid| {
                        Envelope::new(
                            &payload.addr_from,
                            Package::GetData(GetData {
                                addr_from: self.addr.clone(),
                                op_type: OpType::Tx,
                                id: txid.clone(),
                            }),
                        )
                    })
                    .collect();
                Ok(Dispatch {
                    replies,
                    mine: false,
                })
            }
        }
    }

    fn handle_tx(&self, state: &mut NodeState, payload: TxData) -> Result<Dispatch> {
        let chain = Self::require_chain(state)?.clone();
        let tx = Transaction::deserialize(&payload.transaction)?;
        tx.verify_id()?;

        if state.mempool.contains(&tx.id_hex()) {
            debug!("Transaction {} already pooled", tx.id_hex());
            return Ok(Dispatch::default());
        }
        if tx.is_coinbase() {
            return Err(BlockchainError::Transaction(format!(
                "Coinbase {} cannot be relayed",
                tx.id_hex()
            )));
        }
        let utxo_set = UTXOSet::new(chain);
        if !tx.verify_inputs(&utxo_set, self.authorizer.as_ref())? {
            return Err(BlockchainError::Consensus(format!(
                "Transaction {} has invalid inputs",
                tx.id_hex()
            )));
        }

        let txid = tx.get_id().to_vec();
        state.mempool.add(tx);
        info!("{}: {} transactions in mempool", self.addr, state.mempool.len());

        let inv = Package::Inv(Inv {
            addr_from: self.addr.clone(),
            op_type: OpType::Tx,
            items: vec![txid],
        });
        let replies = state
            .nodes
            .get_nodes()
            .iter()
            .filter(|peer| **peer != self.addr && **peer != payload.addr_from)
            .map(|peer| Envelope::new(peer, inv.clone()))
            .collect();

        Ok(Dispatch {
            replies,
            mine: self.is_miner() && state.mempool.len() >= self.mempool_threshold,
        })
    }

    fn handle_version(&self, state: &mut NodeState, payload: Version) -> Result<Dispatch> {
        let chain = Self::require_chain(state)?;
        let best_height = chain.get_best_height();
        debug!(
            "Version from {}: their height {}, ours {best_height}",
            payload.addr_from, payload.best_height
        );

        let mut dispatch = Dispatch::default();
        if best_height < payload.best_height {
            dispatch.replies.push(Envelope::new(
                &payload.addr_from,
                Package::GetBlocks(GetBlocks {
                    addr_from: self.addr.clone(),
                }),
            ));
        } else if best_height > payload.best_height {
            dispatch
                .replies
                .push(Envelope::new(&payload.addr_from, self.version_package(state)?));
        }

        if payload.addr_from != self.addr && state.nodes.add_node(&payload.addr_from) {
            info!("Registered peer {}", payload.addr_from);
        }
        Ok(dispatch)
    }

    /// Mine the mempool until it is empty.
    ///
    /// Each round snapshots the pool, runs the proof-of-work without the
    /// state lock, and only appends if the tip did not move meanwhile.
    /// Returns the `inv` announcements for every block mined.
    pub fn mine_pending(&self) -> Result<Vec<Envelope>> {
        let miner = match &self.miner_address {
            Some(miner) => miner.clone(),
            None => return Ok(vec![]),
        };
        let mut announcements = vec![];

        loop {
            let (chain, pooled) = {
                let state = self.lock();
                if state.mempool.is_empty() {
                    break;
                }
                (Self::require_chain(&state)?.clone(), state.mempool.get_all())
            };
            let utxo_set = UTXOSet::new(chain.clone());

            let mut txs = vec![];
            let mut rejected = vec![];
            for tx in pooled {
                if tx.verify_inputs(&utxo_set, self.authorizer.as_ref())? {
                    txs.push(tx);
                } else {
                    rejected.push(tx);
                }
            }
            if !rejected.is_empty() {
                warn!("Dropping {} transactions with spent or invalid inputs", rejected.len());
            }
            if !check_transactions(&txs, &utxo_set)? {
                warn!("Pending batch overspends; discarding {} transactions", txs.len());
                rejected.append(&mut txs);
            }
            if txs.is_empty() {
                let mut state = self.lock();
                for tx in &rejected {
                    state.mempool.remove(&tx.id_hex());
                }
                info!("All pending transactions are invalid");
                continue;
            }

            let mut block_txs = txs.clone();
            block_txs.push(Transaction::new_coinbase_tx(&miner, "")?);

            let tip = chain.get_tip_hash();
            self.mining_cancel.store(false, Ordering::Relaxed);
            let block = match Block::new_block_cancellable(&tip, &block_txs, &self.mining_cancel) {
                Ok(block) => block,
                Err(BlockchainError::MiningCancelled) | Err(BlockchainError::ProofExhausted) => {
                    info!("Restarting mining round");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut state = self.lock();
            if chain.get_tip_hash() != tip {
                info!("Tip moved while mining; discarding block {}", block.hash_hex());
                continue;
            }
            chain.append(&block)?;
            utxo_set.reindex()?;
            info!("New block {} is mined", block.hash_hex());

            for tx in txs.iter().chain(rejected.iter()) {
                state.mempool.remove(&tx.id_hex());
            }
            info!("{}: {} transactions left in mempool", self.addr, state.mempool.len());

            let inv = Package::Inv(Inv {
                addr_from: self.addr.clone(),
                op_type: OpType::Block,
                items: vec![block.get_hash().to_vec()],
            });
            announcements.extend(
                state
                    .nodes
                    .get_nodes()
                    .iter()
                    .filter(|peer| **peer != self.addr)
                    .map(|peer| Envelope::new(peer, inv.clone())),
            );
        }
        Ok(announcements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OwnerKeyAuthorizer;
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir, node_id: &str) -> Config {
        let mut config = Config::default().with_node_id(node_id);
        config.data_dir = dir.path().to_path_buf();
        config.known_nodes = vec![];
        config
    }

    fn ready_node(dir: &TempDir, owner: &str) -> Node {
        let config = config(dir, "3000");
        let chain = Blockchain::create_blockchain_with_path(owner, config.db_path()).unwrap();
        UTXOSet::new(chain.clone()).reindex().unwrap();
        Node::new(&config, Some(chain), Arc::new(OwnerKeyAuthorizer))
    }

    #[test]
    fn test_nodes_registry_is_an_ordered_set() {
        let mut nodes = Nodes::new();
        assert!(nodes.add_node("a"));
        assert!(nodes.add_node("b"));
        assert!(!nodes.add_node("a"));
        assert_eq!(nodes.get_nodes(), &["a".to_string(), "b".to_string()]);
        nodes.evict_node("a");
        assert_eq!(nodes.get_nodes(), &["b".to_string()]);
    }

    #[test]
    fn test_version_with_lower_remote_height_replies_version() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        node.chain()
            .unwrap()
            .mine_block(&[Transaction::new_coinbase_tx("alice", "").unwrap()])
            .unwrap();

        let dispatch = node
            .handle(Package::Version(Version {
                version: NODE_VERSION,
                best_height: 1,
                addr_from: "127.0.0.1:3001".to_string(),
            }))
            .unwrap();
        assert_eq!(dispatch.replies.len(), 1);
        assert!(matches!(
            &dispatch.replies[0].package,
            Package::Version(v) if v.best_height == 2
        ));
        assert_eq!(node.known_nodes(), vec!["127.0.0.1:3001".to_string()]);
    }

    #[test]
    fn test_version_with_higher_remote_height_requests_blocks() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let dispatch = node
            .handle(Package::Version(Version {
                version: NODE_VERSION,
                best_height: 5,
                addr_from: "127.0.0.1:3001".to_string(),
            }))
            .unwrap();
        assert!(matches!(&dispatch.replies[0].package, Package::GetBlocks(_)));
    }

    #[test]
    fn test_getblocks_lists_genesis_first() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let chain = node.chain().unwrap();
        let genesis = chain.get_tip_hash();
        chain
            .mine_block(&[Transaction::new_coinbase_tx("alice", "").unwrap()])
            .unwrap();

        let dispatch = node
            .handle(Package::GetBlocks(GetBlocks {
                addr_from: "127.0.0.1:3001".to_string(),
            }))
            .unwrap();
        match &dispatch.replies[0].package {
            Package::Inv(inv) => {
                assert_eq!(inv.op_type, OpType::Block);
                assert_eq!(inv.items.len(), 2);
                assert_eq!(inv.items[0], genesis);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_tx_pooled_and_threshold_triggers_mining() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, "3000");
        config.miner_address = Some("miner".to_string());
        config.mempool_threshold = 1;
        let chain = Blockchain::create_blockchain_with_path("alice", config.db_path()).unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();
        let node = Node::new(&config, Some(chain.clone()), Arc::new(OwnerKeyAuthorizer));

        let tx = Transaction::new_utxo_transaction("alice", "bob", 10, &utxo_set, &OwnerKeyAuthorizer)
            .unwrap();
        let dispatch = node
            .handle(Package::Tx(TxData {
                addr_from: "127.0.0.1:3001".to_string(),
                transaction: tx.serialize().unwrap(),
            }))
            .unwrap();
        assert!(dispatch.mine);
        assert_eq!(node.mempool_len(), 1);

        node.mine_pending().unwrap();
        assert_eq!(node.mempool_len(), 0);
        assert_eq!(chain.get_best_height(), 2);
        assert_eq!(utxo_set.get_balance("bob").unwrap(), 10);
        assert_eq!(utxo_set.get_balance("alice").unwrap(), 23);
        assert_eq!(utxo_set.get_balance("miner").unwrap(), 33);
    }

    #[test]
    fn test_tx_with_forged_proof_rejected() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let utxo_set = UTXOSet::new(node.chain().unwrap());

        // Signed as if "mallory" owned alice's output.
        struct Forger;
        impl Authorizer for Forger {
            fn prove(&self, _owner: &str, _txid: &[u8], _vout: usize) -> Result<Vec<u8>> {
                Ok(b"mallory".to_vec())
            }
            fn verify(&self, _proof: &[u8], _owner: &str, _txid: &[u8], _vout: usize) -> bool {
                true
            }
        }
        let tx = Transaction::new_utxo_transaction("alice", "mallory", 5, &utxo_set, &Forger)
            .unwrap();
        let result = node.handle(Package::Tx(TxData {
            addr_from: "127.0.0.1:3001".to_string(),
            transaction: tx.serialize().unwrap(),
        }));
        assert!(matches!(result, Err(BlockchainError::Consensus(_))));
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn test_overspending_batch_is_discarded() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, "3000");
        config.miner_address = Some("miner".to_string());
        let chain = Blockchain::create_blockchain_with_path("alice", config.db_path()).unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();
        let node = Node::new(&config, Some(chain.clone()), Arc::new(OwnerKeyAuthorizer));

        // Both spend the genesis output.
        for to in ["bob", "carol"] {
            let tx = Transaction::new_utxo_transaction("alice", to, 20, &utxo_set, &OwnerKeyAuthorizer)
                .unwrap();
            node.handle(Package::Tx(TxData {
                addr_from: "127.0.0.1:3001".to_string(),
                transaction: tx.serialize().unwrap(),
            }))
            .unwrap();
        }
        assert_eq!(node.mempool_len(), 2);

        let announcements = node.mine_pending().unwrap();
        assert!(announcements.is_empty());
        assert_eq!(node.mempool_len(), 0);
        assert_eq!(chain.get_best_height(), 1);
    }

    #[test]
    fn test_messages_before_bootstrap_are_rejected() {
        let dir = tempdir().unwrap();
        let node = Node::new(
            &config(&dir, "3001"),
            None,
            Arc::new(OwnerKeyAuthorizer),
        );
        assert_eq!(node.sync_state(), SyncState::Uninitialized);
        let result = node.handle(Package::GetBlocks(GetBlocks {
            addr_from: "127.0.0.1:3000".to_string(),
        }));
        assert!(matches!(result, Err(BlockchainError::Protocol(_))));

        let startup = node.startup_messages(Some("127.0.0.1:3000")).unwrap();
        assert!(matches!(startup[0].package, Package::Bootnode(_)));
        assert_eq!(node.sync_state(), SyncState::Bootstrapping);
        assert_eq!(node.known_nodes()[0], "127.0.0.1:3000");
    }

    fn pooled_tx(node: &Node, from_peer: &str) -> Transaction {
        let utxo_set = UTXOSet::new(node.chain().unwrap());
        let tx = Transaction::new_utxo_transaction("alice", "bob", 10, &utxo_set, &OwnerKeyAuthorizer)
            .unwrap();
        node.handle(Package::Tx(TxData {
            addr_from: from_peer.to_string(),
            transaction: tx.serialize().unwrap(),
        }))
        .unwrap();
        tx
    }

    #[test]
    fn test_addr_merges_peers_and_requests_blocks_from_all() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let dispatch = node
            .handle(Package::Addr(Addr {
                addr_list: vec![
                    "127.0.0.1:3001".to_string(),
                    "127.0.0.1:3002".to_string(),
                    node.addr().to_string(),
                    "127.0.0.1:3001".to_string(),
                ],
            }))
            .unwrap();

        assert_eq!(
            node.known_nodes(),
            vec!["127.0.0.1:3001".to_string(), "127.0.0.1:3002".to_string()]
        );
        let targets: Vec<&str> = dispatch.replies.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(targets, vec!["127.0.0.1:3001", "127.0.0.1:3002"]);
        assert!(dispatch
            .replies
            .iter()
            .all(|e| matches!(&e.package, Package::GetBlocks(g) if g.addr_from == node.addr())));
    }

    #[test]
    fn test_tx_inv_requests_only_unpooled_items() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let pooled = pooled_tx(&node, "127.0.0.1:3001");
        let unknown = vec![7u8; 32];

        let dispatch = node
            .handle(Package::Inv(Inv {
                addr_from: "127.0.0.1:3002".to_string(),
                op_type: OpType::Tx,
                items: vec![pooled.get_id().to_vec(), unknown.clone()],
            }))
            .unwrap();
        assert_eq!(dispatch.replies.len(), 1);
        assert_eq!(dispatch.replies[0].to, "127.0.0.1:3002");
        assert!(matches!(
            &dispatch.replies[0].package,
            Package::GetData(d) if d.op_type == OpType::Tx && d.id == unknown
        ));
    }

    #[test]
    fn test_getdata_tx_answers_from_mempool() {
        let dir = tempdir().unwrap();
        let node = ready_node(&dir, "alice");
        let pooled = pooled_tx(&node, "127.0.0.1:3001");

        let dispatch = node
            .handle(Package::GetData(GetData {
                addr_from: "127.0.0.1:3002".to_string(),
                op_type: OpType::Tx,
                id: pooled.get_id().to_vec(),
            }))
            .unwrap();
        match &dispatch.replies[0].package {
            Package::Tx(data) => {
                assert_eq!(Transaction::deserialize(&data.transaction).unwrap(), pooled);
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let dispatch = node
            .handle(Package::GetData(GetData {
                addr_from: "127.0.0.1:3002".to_string(),
                op_type: OpType::Tx,
                id: vec![7u8; 32],
            }))
            .unwrap();
        assert!(dispatch.replies.is_empty());
    }

    #[test]
    fn test_tx_relay_skips_sender() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, "3000");
        config.known_nodes = vec!["127.0.0.1:3001".to_string(), "127.0.0.1:3002".to_string()];
        let chain = Blockchain::create_blockchain_with_path("alice", config.db_path()).unwrap();
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();
        let node = Node::new(&config, Some(chain), Arc::new(OwnerKeyAuthorizer));

        let tx = Transaction::new_utxo_transaction("alice", "bob", 10, &utxo_set, &OwnerKeyAuthorizer)
            .unwrap();
        let dispatch = node
            .handle(Package::Tx(TxData {
                addr_from: "127.0.0.1:3001".to_string(),
                transaction: tx.serialize().unwrap(),
            }))
            .unwrap();

        assert!(!dispatch.mine);
        assert_eq!(dispatch.replies.len(), 1);
        assert_eq!(dispatch.replies[0].to, "127.0.0.1:3002");
        assert!(matches!(
            &dispatch.replies[0].package,
            Package::Inv(inv) if inv.op_type == OpType::Tx && inv.items == vec![tx.get_id().to_vec()]
        ));
    }

    #[test]
    fn test_rejected_block_mid_sync_keeps_index_consistent() {
        let source_dir = tempdir().unwrap();
        let source = Blockchain::create_blockchain_with_path("alice", source_dir.path()).unwrap();
        for _ in 0..2 {
            source
                .mine_block(&[Transaction::new_coinbase_tx("alice", "").unwrap()])
                .unwrap();
        }
        let hashes = source.get_block_hashes().unwrap();

        let dir = tempdir().unwrap();
        let config = config(&dir, "3001");
        let chain =
            Blockchain::init_with_genesis(&source.get_genesis_block().unwrap(), config.db_path())
                .unwrap();
        UTXOSet::new(chain.clone()).reindex().unwrap();
        let node = Node::new(&config, Some(chain.clone()), Arc::new(OwnerKeyAuthorizer));

        let peer = "127.0.0.1:3000";
        let block_message = |hash: &[u8]| {
            Package::Block(BlockData {
                addr_from: peer.to_string(),
                block: source.get_block(hash).unwrap().serialize().unwrap(),
            })
        };

        node.handle(Package::Inv(Inv {
            addr_from: peer.to_string(),
            op_type: OpType::Block,
            items: hashes.clone(),
        }))
        .unwrap();
        node.handle(block_message(&hashes[0][..])).unwrap();
        let dispatch = node.handle(block_message(&hashes[1][..])).unwrap();
        assert!(matches!(
            &dispatch.replies[0].package,
            Package::GetData(d) if d.id == hashes[2]
        ));

        // Arrives in place of the third block; its parent is unknown.
        let orphan = Block::new_block(
            &[9u8; 32],
            &[Transaction::new_coinbase_tx("mallory", "").unwrap()],
        )
        .unwrap();
        let result = node.handle(Package::Block(BlockData {
            addr_from: peer.to_string(),
            block: orphan.serialize().unwrap(),
        }));
        assert!(matches!(result, Err(BlockchainError::Consensus(_))));

        let utxo_set = UTXOSet::new(chain.clone());
        assert_eq!(chain.get_best_height(), 2);
        assert_eq!(utxo_set.get_balance("alice").unwrap(), 66);
        assert_eq!(utxo_set.get_balance("mallory").unwrap(), 0);

        // The fetch queue was dropped, so nothing stale is requested.
        let dispatch = node.handle(block_message(&hashes[2][..])).unwrap();
        assert!(dispatch.replies.is_empty());
        assert_eq!(chain.get_best_height(), 3);
        assert_eq!(utxo_set.get_balance("alice").unwrap(), 99);
    }

    #[test]
    fn test_genesis_accepted_only_from_contacted_bootnode() {
        let source_dir = tempdir().unwrap();
        let source = Blockchain::create_blockchain_with_path("alice", source_dir.path()).unwrap();
        let genesis = source.get_genesis_block().unwrap().serialize().unwrap();
        let genesis_from = |addr: &str| {
            Package::Genesis(BlockData {
                addr_from: addr.to_string(),
                block: genesis.clone(),
            })
        };

        let dir = tempdir().unwrap();
        let node = Node::new(&config(&dir, "3001"), None, Arc::new(OwnerKeyAuthorizer));

        let dispatch = node.handle(genesis_from("127.0.0.1:3000")).unwrap();
        assert!(dispatch.replies.is_empty());
        assert_eq!(node.sync_state(), SyncState::Uninitialized);
        assert!(node.chain().is_none());

        node.startup_messages(Some("127.0.0.1:3000")).unwrap();
        let dispatch = node.handle(genesis_from("127.0.0.1:3002")).unwrap();
        assert!(dispatch.replies.is_empty());
        assert_eq!(node.sync_state(), SyncState::Bootstrapping);
        assert!(node.chain().is_none());

        let dispatch = node.handle(genesis_from("127.0.0.1:3000")).unwrap();
        assert_eq!(node.sync_state(), SyncState::Ready);
        assert!(matches!(&dispatch.replies[0].package, Package::Version(_)));
        assert_eq!(
            node.chain().unwrap().get_tip_hash(),
            source.get_tip_hash()
        );
    }
}
