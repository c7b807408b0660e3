// The ledger store. Blocks live in the `blocks` tree keyed by their hash and
// the key "lh" points at the tip. The tip hash and the chain height are
// cached in memory and only change together with the stored pointer.

use crate::core::block::GENESIS_DATA;
use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::UnspentOutput;
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "lh";
const BLOCKS_TREE: &str = "blocks";

/// What `add_block` did with a peer-supplied block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockOutcome {
    /// The block extended the tip.
    Appended,
    /// The block was already stored.
    Known,
    /// Stored, but its parent is not the tip so the tip did not move.
    Detached,
}

#[derive(Debug, Clone)]
struct ChainTip {
    hash: Vec<u8>,
    height: usize,
}

#[derive(Clone)]
pub struct Blockchain {
    tip: Arc<RwLock<ChainTip>>,
    db: Db,
    db_path: PathBuf,
}

impl Blockchain {
    /// Initialize a new chain whose genesis coinbase pays `genesis_address`.
    pub fn create_blockchain_with_path<P: AsRef<Path>>(
        genesis_address: &str,
        db_path: P,
    ) -> Result<Blockchain> {
        let path = db_path.as_ref().to_path_buf();
        let db = Self::open_db(&path)?;
        let blocks_tree = Self::open_blocks_tree(&db)?;
        if blocks_tree.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::ChainExists(path.display().to_string()));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx)?;
        Self::update_blocks_tree(&blocks_tree, &genesis)?;
        info!("Genesis created: {}", genesis.hash_hex());

        Ok(Self::from_parts(db, path, genesis.get_hash().to_vec(), 1))
    }

    /// Initialize a new chain from a genesis block received from a peer.
    pub fn init_with_genesis<P: AsRef<Path>>(genesis: &Block, db_path: P) -> Result<Blockchain> {
        if !genesis.is_genesis() {
            return Err(BlockchainError::Consensus(format!(
                "Block {} is not a genesis block",
                genesis.hash_hex()
            )));
        }
        genesis.verify()?;

        let path = db_path.as_ref().to_path_buf();
        let db = Self::open_db(&path)?;
        let blocks_tree = Self::open_blocks_tree(&db)?;
        if blocks_tree.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::ChainExists(path.display().to_string()));
        }
        Self::update_blocks_tree(&blocks_tree, genesis)?;
        info!("Initialized chain from genesis {}", genesis.hash_hex());

        Ok(Self::from_parts(db, path, genesis.get_hash().to_vec(), 1))
    }

    /// Open an existing chain.
    pub fn new_blockchain_with_path<P: AsRef<Path>>(db_path: P) -> Result<Blockchain> {
        let path = db_path.as_ref().to_path_buf();
        let db = Self::open_db(&path)?;
        let blocks_tree = Self::open_blocks_tree(&db)?;
        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::NoChain(path.display().to_string()))?
            .to_vec();

        let mut height = 0;
        for block in BlockchainIterator::new(tip_hash.clone(), blocks_tree) {
            block?;
            height += 1;
        }

        Ok(Self::from_parts(db, path, tip_hash, height))
    }

    /// Whether a chain has been initialized at `db_path`.
    pub fn exists<P: AsRef<Path>>(db_path: P) -> Result<bool> {
        if !db_path.as_ref().exists() {
            return Ok(false);
        }
        let db = Self::open_db(db_path.as_ref())?;
        let blocks_tree = Self::open_blocks_tree(&db)?;
        Ok(blocks_tree.get(TIP_BLOCK_HASH_KEY)?.is_some())
    }

    fn from_parts(db: Db, db_path: PathBuf, hash: Vec<u8>, height: usize) -> Blockchain {
        Blockchain {
            tip: Arc::new(RwLock::new(ChainTip { hash, height })),
            db,
            db_path,
        }
    }

    fn open_db(path: &Path) -> Result<Db> {
        sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))
    }

    fn open_blocks_tree(db: &Db) -> Result<Tree> {
        db.open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))
    }

    fn blocks_tree(&self) -> Result<Tree> {
        Self::open_blocks_tree(&self.db)
    }

    // Store the block and move "lh" to it in one transaction. The stored tip
    // must be the block's parent, or absent for a genesis block.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;
        let parent = block.get_prev_hash();

        blocks_tree
            .transaction(|tx_db| {
                let extends_tip = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                    Some(tip) => tip.as_ref() == parent,
                    None => parent.is_empty(),
                };
                if !extends_tip {
                    return sled::transaction::abort(());
                }
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Abort(()) => BlockchainError::Consensus(format!(
                    "Block {} does not extend the stored tip",
                    block.hash_hex()
                )),
                TransactionError::Storage(e) => {
                    BlockchainError::Database(format!("Failed to update blocks tree: {e}"))
                }
            })?;

        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hash
            .clone()
    }

    /// Number of blocks from the tip back to genesis, inclusive.
    pub fn get_best_height(&self) -> usize {
        self.tip.read().unwrap_or_else(PoisonError::into_inner).height
    }

    /// Persist a block that extends the tip and re-point the tip to it.
    pub fn append(&self, block: &Block) -> Result<()> {
        let blocks_tree = self.blocks_tree()?;
        Self::update_blocks_tree(&blocks_tree, block)?;

        let mut tip = self.tip.write().unwrap_or_else(PoisonError::into_inner);
        tip.hash = block.get_hash().to_vec();
        tip.height += 1;
        Ok(())
    }

    /// Mine `transactions` as given on top of the tip and append the result.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.mine_block_cancellable(transactions, &AtomicBool::new(false))
    }

    pub fn mine_block_cancellable(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let block = Block::new_block_cancellable(&self.get_tip_hash(), transactions, cancel)?;
        self.append(&block)?;
        Ok(block)
    }

    /// Accept a block supplied by a peer.
    pub fn add_block(&self, block: &Block) -> Result<AddBlockOutcome> {
        if self.contains_block(block.get_hash())? {
            return Ok(AddBlockOutcome::Known);
        }
        block.verify()?;

        if block.is_genesis() {
            return Err(BlockchainError::Consensus(format!(
                "Refusing second genesis block {}",
                block.hash_hex()
            )));
        }

        if block.get_prev_hash() == self.get_tip_hash().as_slice() {
            self.append(block)?;
            info!(
                "Added block {} at height {}",
                block.hash_hex(),
                self.get_best_height()
            );
            return Ok(AddBlockOutcome::Appended);
        }

        if !self.contains_block(block.get_prev_hash())? {
            return Err(BlockchainError::Consensus(format!(
                "Block {} has unknown parent {}",
                block.hash_hex(),
                HEXLOWER.encode(block.get_prev_hash())
            )));
        }

        warn!(
            "Block {} does not extend the tip; stored without switching branches",
            block.hash_hex()
        );
        self.blocks_tree()?
            .insert(block.get_hash(), block.serialize()?)?;
        Ok(AddBlockOutcome::Detached)
    }

    pub fn contains_block(&self, block_hash: &[u8]) -> Result<bool> {
        if block_hash.is_empty() {
            return Ok(false);
        }
        Ok(self.blocks_tree()?.contains_key(block_hash)?)
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        let bytes = self.blocks_tree()?.get(block_hash)?.ok_or_else(|| {
            BlockchainError::NotFound(format!("Block {}", HEXLOWER.encode(block_hash)))
        })?;
        Block::deserialize(bytes.as_ref())
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(
            self.get_tip_hash(),
            self.blocks_tree()?,
        ))
    }

    /// All block hashes on the tip's branch, genesis first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = vec![];
        for block in self.iterator()? {
            hashes.push(block?.get_hash().to_vec());
        }
        hashes.reverse();
        Ok(hashes)
    }

    pub fn get_genesis_block(&self) -> Result<Block> {
        let mut genesis = None;
        for block in self.iterator()? {
            genesis = Some(block?);
        }
        genesis.ok_or_else(|| BlockchainError::Corruption("Chain has no blocks".to_string()))
    }

    /// Unspent outputs of the tip's branch, keyed by transaction ID.
    ///
    /// Blocks are visited tip first and the transactions of a block in
    /// reverse, so every spend is seen before the output it consumes.
    pub fn find_utxo(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        let mut utxo: BTreeMap<Vec<u8>, Vec<UnspentOutput>> = BTreeMap::new();
        let mut spent_txos: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();

        for block in self.iterator()? {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.map_or(false, |outs| outs.contains(&idx)) {
                        continue;
                    }
                    utxo.entry(tx.get_id().to_vec())
                        .or_default()
                        .push(UnspentOutput::new(idx, out.clone()));
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(vout) = txin.output_index() {
                        spent_txos
                            .entry(txin.get_txid().to_vec())
                            .or_default()
                            .insert(vout);
                    }
                }
            }
        }
        Ok(utxo)
    }
}

/// Walks from a block back to genesis along `prev_hash` links.
pub struct BlockchainIterator {
    blocks_tree: Tree,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks_tree: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks_tree,
            current_hash: Some(tip_hash),
        }
    }

    fn load(&self, hash: &[u8]) -> Result<Block> {
        let data = self.blocks_tree.get(hash)?.ok_or_else(|| {
            BlockchainError::Corruption(format!(
                "Block {} is referenced but missing",
                HEXLOWER.encode(hash)
            ))
        })?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match self.load(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_prev_hash().to_vec());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
