use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sled::{Batch, Tree};
use std::collections::{BTreeMap, HashMap};

const UTXO_TREE: &str = "chainstate";

/// An unspent output together with its index in the creating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// Index of unspent outputs derived from the chain, stored in the
/// `chainstate` tree as txid -> `Vec<UnspentOutput>`.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<UnspentOutput>)>> {
        let mut entries = vec![];
        for item in self.utxo_tree()?.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let outs: Vec<UnspentOutput> = deserialize(v.as_ref())?;
            entries.push((k.to_vec(), outs));
        }
        Ok(entries)
    }

    /// Pick outputs of `owner` in txid order, then output index order,
    /// stopping as soon as `amount` is covered. If the owner cannot cover
    /// `amount`, the accumulated total is the owner's whole balance.
    pub fn find_spendable_outputs(
        &self,
        owner: &str,
        amount: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, usize)>)> {
        let mut unspent_outputs = vec![];
        let mut accumulated = 0u64;

        'outer: for (txid, outs) in self.entries()? {
            for out in outs {
                if accumulated >= amount {
                    break 'outer;
                }
                if out.output.is_locked_with_key(owner) {
                    accumulated = accumulated.saturating_add(out.output.get_value());
                    unspent_outputs.push((txid.clone(), out.index));
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, owner: &str) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for (_, outs) in self.entries()? {
            utxos.extend(
                outs.into_iter()
                    .filter(|out| out.output.is_locked_with_key(owner))
                    .map(|out| out.output),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, owner: &str) -> Result<u64> {
        Ok(self
            .find_utxo(owner)?
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.get_value())))
    }

    /// The unspent output `index` of `txid`, if it is still indexed.
    pub fn find_output(&self, txid: &[u8], index: usize) -> Result<Option<TXOutput>> {
        let bytes = match self.utxo_tree()?.get(txid)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let outs: Vec<UnspentOutput> = deserialize(bytes.as_ref())?;
        Ok(outs
            .into_iter()
            .find(|out| out.index == index)
            .map(|out| out.output))
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let mut counter = 0;
        for item in self.utxo_tree()?.iter() {
            item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            counter += 1;
        }
        Ok(counter)
    }

    /// The whole index as an ordered map.
    pub fn snapshot(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        Ok(self.entries()?.into_iter().collect())
    }

    /// Rebuild the index from the chain, replacing the old contents in one batch.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outs) in &utxo_map {
            batch.insert(txid.as_slice(), serialize(outs)?);
        }
        utxo_tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to reindex UTXO set: {e}")))?;

        debug!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(())
    }

    /// Advance the index by one block: drop the outputs its inputs consume,
    /// then add its own outputs. All writes land in one batch.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let mut pending: HashMap<Vec<u8>, Option<Vec<UnspentOutput>>> = HashMap::new();

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let txid = vin.get_txid().to_vec();
                    let current = match pending.get(&txid) {
                        Some(entry) => entry.clone(),
                        None => match utxo_tree.get(&txid)? {
                            Some(bytes) => Some(deserialize::<Vec<UnspentOutput>>(bytes.as_ref())?),
                            None => None,
                        },
                    };
                    let outs = match current {
                        Some(outs) => outs,
                        None => {
                            warn!(
                                "UTXO update: no unspent outputs for {}",
                                HEXLOWER.encode(&txid)
                            );
                            continue;
                        }
                    };

                    let remaining: Vec<UnspentOutput> = outs
                        .into_iter()
                        .filter(|out| Some(out.index) != vin.output_index())
                        .collect();
                    if remaining.is_empty() {
                        pending.insert(txid, None);
                    } else {
                        pending.insert(txid, Some(remaining));
                    }
                }
            }

            let new_outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            if new_outputs.is_empty() {
                pending.insert(tx.get_id().to_vec(), None);
            } else {
                pending.insert(tx.get_id().to_vec(), Some(new_outputs));
            }
        }

        let mut batch = Batch::default();
        for (txid, entry) in pending {
            match entry {
                Some(outs) => batch.insert(txid, serialize(&outs)?),
                None => batch.remove(txid),
            }
        }
        utxo_tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to update UTXO set: {e}")))?;
        Ok(())
    }
}
