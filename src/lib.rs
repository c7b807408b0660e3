//! # ledger-node
//!
//! A peer-to-peer UTXO ledger node: proof-of-work blocks persisted in sled,
//! an unspent-output index kept beside the chain, a mempool that triggers
//! mining once it holds enough transactions, and a small TCP protocol that
//! bootstraps new nodes from a seed and keeps peers in sync.
//!
//! ## Layout
//! - `core/`: blocks, transactions, proof of work, the persistent chain and
//!   input authorization
//! - `storage/`: the UTXO index, the mempool and the block download queue
//! - `network/`: message framing, the protocol engine, the server and the
//!   mining thread
//! - `config/`: node settings from TOML and environment variables
//! - `utils/`: hashing, signing and binary encoding helpers
//! - `cli/`: command-line arguments for the `ledger-node` binary

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    AddBlockOutcome, Authorizer, Block, Blockchain, EcdsaAuthorizer, OwnerKeyAuthorizer,
    ProofOfWork, TXInput, TXOutput, Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use network::{send_tx, Miner, Node, Nodes, Server, SyncState};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::sha256_digest;
