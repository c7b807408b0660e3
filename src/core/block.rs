use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Payload of the coinbase in a freshly created genesis block.
pub const GENESIS_DATA: &str = "1st Coinbase transaction in Genesis block";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    hash: Vec<u8>,
    prev_hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
}

impl Block {
    pub fn new_block(prev_hash: &[u8], transactions: &[Transaction]) -> Result<Block> {
        Self::new_block_cancellable(prev_hash, transactions, &AtomicBool::new(false))
    }

    /// Mine a block, aborting with `MiningCancelled` once `cancel` is set.
    pub fn new_block_cancellable(
        prev_hash: &[u8],
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::Consensus(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let pow = ProofOfWork::new_proof_of_work(prev_hash, transactions)?;
        let (nonce, hash) = pow.run_cancellable(cancel)?;
        let block = Block {
            hash,
            prev_hash: prev_hash.to_vec(),
            transactions: transactions.to_vec(),
            nonce,
        };
        info!(
            "Mined block {} with {} transactions",
            block.hash_hex(),
            block.transactions.len()
        );
        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        Block::new_block(&[], &[transaction.clone()])
    }

    /// Digest of the canonical encoding of `transactions`, the part of the
    /// proof-of-work input that commits to block contents.
    pub fn hash_transactions(transactions: &[Transaction]) -> Result<Vec<u8>> {
        let encoded = serialize(&transactions.to_vec())?;
        Ok(sha256_digest(encoded.as_slice()))
    }

    /// Checks a peer-supplied block without touching the store: the
    /// proof-of-work must hold and every transaction ID must match its content.
    pub fn verify(&self) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(BlockchainError::Consensus(format!(
                "Block {} has no transactions",
                self.hash_hex()
            )));
        }
        if !ProofOfWork::validate(self)? {
            return Err(BlockchainError::Consensus(format!(
                "Block {} fails proof-of-work",
                self.hash_hex()
            )));
        }
        for tx in &self.transactions {
            tx.verify_id()?;
        }
        Ok(())
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &[u8] {
        self.prev_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: i64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }
}
