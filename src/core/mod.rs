//! Core ledger functionality
//!
//! Blocks, transactions, the sled-backed chain and the proof-of-work that
//! links them.

pub mod authorization;
pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod transaction;

pub use authorization::{Authorizer, EcdsaAuthorizer, OwnerKeyAuthorizer};
pub use block::{Block, GENESIS_DATA};
pub use blockchain::{AddBlockOutcome, Blockchain, BlockchainIterator};
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{check_transactions, TXInput, TXOutput, Transaction, SUBSIDY};
