//! Derived and in-memory state
//!
//! The UTXO index lives next to the blocks in the same sled database. The
//! mempool and the block-fetch queue are in memory only.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::{UTXOSet, UnspentOutput};
