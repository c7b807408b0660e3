// Transactions move value by consuming earlier outputs and creating new ones.
// A transaction's ID is the hash of its canonical encoding with the ID cleared,
// so any tampering with inputs or outputs changes the ID.

use crate::core::authorization::Authorizer;
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Reward minted by every coinbase transaction.
pub const SUBSIDY: u64 = 33;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i64 = -1;

// A reference to one output of an earlier transaction plus the proof that
// the spender may consume it. Coinbase inputs reference nothing and carry
// arbitrary data in `signature` instead.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize, signature: Vec<u8>) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature,
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, or `None` for the coinbase sentinel.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }
}

// An indivisible amount locked to an owner key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key: String,
}

impl TXOutput {
    pub fn new(value: u64, owner: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Output value must be positive".to_string(),
            ));
        }
        if owner.is_empty() {
            return Err(BlockchainError::Transaction(
                "Output owner must not be empty".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key: owner.to_string(),
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key(&self) -> &str {
        self.pub_key.as_str()
    }

    pub fn is_locked_with_key(&self, owner: &str) -> bool {
        self.pub_key == owner
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mint `SUBSIDY` to `to`. An empty `data` is replaced with a random
    /// payload so two coinbases for the same address get distinct IDs.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let data = if data.is_empty() {
            Uuid::new_v4().simple().to_string()
        } else {
            data.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: data.into_bytes(),
        };
        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build a transfer of `amount` from `from` to `to`, spending the
    /// outputs chosen by `UTXOSet::find_spendable_outputs` and returning any
    /// excess to `from` as change.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
        authorizer: &dyn Authorizer,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let (accumulated, valid_outputs) = utxo_set.find_spendable_outputs(from, amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid, vout) in valid_outputs {
            let proof = authorizer.prove(from, &txid, vout)?;
            inputs.push(TXInput::new(&txid, vout, proof));
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// SHA-256 of the canonical encoding with the ID cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    /// Reject a transaction whose ID is not the hash of its contents.
    pub fn verify_id(&self) -> Result<()> {
        if self.hash()? != self.id {
            return Err(BlockchainError::Consensus(format!(
                "Transaction {} does not match its content hash",
                self.id_hex()
            )));
        }
        Ok(())
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Every input must reference an indexed unspent output and carry a proof
    /// the authorizer accepts for that output's owner.
    pub fn verify_inputs(&self, utxo_set: &UTXOSet, authorizer: &dyn Authorizer) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.vin.is_empty() || self.vout.is_empty() {
            return Ok(false);
        }

        for input in &self.vin {
            let vout = match input.output_index() {
                Some(vout) => vout,
                None => return Ok(false),
            };
            let output = match utxo_set.find_output(input.get_txid(), vout)? {
                Some(output) => output,
                None => {
                    warn!(
                        "Input {}:{vout} of {} is not an unspent output",
                        HEXLOWER.encode(input.get_txid()),
                        self.id_hex()
                    );
                    return Ok(false);
                }
            };
            if !authorizer.verify(
                input.get_signature(),
                output.get_pub_key(),
                input.get_txid(),
                vout,
            ) {
                warn!("Input authorization failed for {}", self.id_hex());
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Owner of the output spent by the first input.
    pub fn sender(&self, utxo_set: &UTXOSet) -> Result<Option<String>> {
        if self.is_coinbase() {
            return Ok(None);
        }
        let input = match self.vin.first() {
            Some(input) => input,
            None => return Ok(None),
        };
        let vout = match input.output_index() {
            Some(vout) => vout,
            None => return Ok(None),
        };
        Ok(utxo_set
            .find_output(input.get_txid(), vout)?
            .map(|out| out.get_pub_key().to_string()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(id: Vec<u8>, vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Transaction {
        Transaction { id, vin, vout }
    }
}

/// Coarse admission check for a batch about to be mined together.
///
/// Sums what each sender pays to other owners across the whole batch and
/// compares it with the sender's indexed unspent total. The batch is also
/// rejected if two inputs reference the same output, or if a sender cannot
/// be resolved. Returns `Ok(false)` to reject; no partial acceptance.
pub fn check_transactions(batch: &[Transaction], utxo_set: &UTXOSet) -> Result<bool> {
    let mut referenced: HashSet<(Vec<u8>, i64)> = HashSet::new();
    let mut spending: BTreeMap<String, u64> = BTreeMap::new();

    for tx in batch {
        if tx.is_coinbase() {
            continue;
        }

        for input in tx.get_vin() {
            if !referenced.insert((input.get_txid().to_vec(), input.get_vout())) {
                warn!(
                    "Output {}:{} spent twice in one batch",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                );
                return Ok(false);
            }
        }

        let sender = match tx.sender(utxo_set)? {
            Some(sender) => sender,
            None => {
                warn!("Cannot resolve sender of transaction {}", tx.id_hex());
                return Ok(false);
            }
        };

        let mut spent = 0u64;
        for out in tx.get_vout() {
            if !out.is_locked_with_key(&sender) {
                spent = match spent.checked_add(out.get_value()) {
                    Some(sum) => sum,
                    None => return Ok(false),
                };
            }
        }

        let total = spending.entry(sender).or_insert(0);
        *total = match total.checked_add(spent) {
            Some(sum) => sum,
            None => return Ok(false),
        };
    }

    for (sender, total) in &spending {
        let available = utxo_set.get_balance(sender)?;
        if *total > available {
            warn!("Batch spends {total} from {sender} but only {available} is unspent");
            return Ok(false);
        }
    }
    Ok(true)
}
