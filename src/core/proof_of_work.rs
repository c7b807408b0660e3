use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::borrow::Borrow;
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

/// Required leading zero bits of a block hash.
pub const TARGET_BITS: u32 = 12;

const MAX_NONCE: i64 = i64::MAX;

// How many nonces are tried between checks of the cancel flag.
const CANCEL_CHECK_INTERVAL: i64 = 1024;

pub struct ProofOfWork {
    prev_hash: Vec<u8>,
    tx_digest: Vec<u8>,
    target: BigInt,
    max_nonce: i64,
}

impl ProofOfWork {
    pub fn new_proof_of_work(prev_hash: &[u8], transactions: &[Transaction]) -> Result<ProofOfWork> {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        Ok(ProofOfWork {
            prev_hash: prev_hash.to_vec(),
            tx_digest: Block::hash_transactions(transactions)?,
            target,
            max_nonce: MAX_NONCE,
        })
    }

    /// Lower the exhaustion bound of the nonce search.
    pub fn with_max_nonce(mut self, max_nonce: i64) -> ProofOfWork {
        self.max_nonce = max_nonce;
        self
    }

    /// True iff the block's hash is below target and matches its contents.
    pub fn validate(block: &Block) -> Result<bool> {
        let pow = ProofOfWork::new_proof_of_work(block.get_prev_hash(), block.get_transactions())?;
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        Ok(pow.meets_target(&hash) && hash.as_slice() == block.get_hash())
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash);
        hash_int.lt(self.target.borrow())
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.prev_hash.as_slice());
        data_bytes.extend(self.tx_digest.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes
    }

    /// Search nonces from zero until the hash falls below target.
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        self.run_cancellable(&AtomicBool::new(false))
    }

    /// Like [`ProofOfWork::run`], but gives up with `MiningCancelled` once
    /// `cancel` is set.
    pub fn run_cancellable(&self, cancel: &AtomicBool) -> Result<(i64, Vec<u8>)> {
        debug!("Mining block on top of {}", HEXLOWER.encode(&self.prev_hash));
        let mut nonce = 0;
        while nonce < self.max_nonce {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                info!("Mining cancelled after {nonce} attempts");
                return Err(BlockchainError::MiningCancelled);
            }
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::ProofExhausted)
    }
}
