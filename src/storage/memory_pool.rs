use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::{BTreeMap, VecDeque};

/// Pending transactions keyed by hex txid. Callers serialize access through
/// the node state lock.
#[derive(Debug, Default)]
pub struct MemoryPool {
    inner: BTreeMap<String, Transaction>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::default()
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        self.inner.get(txid).cloned()
    }

    /// Returns false if the transaction was already pooled.
    pub fn add(&mut self, tx: Transaction) -> bool {
        let txid = HEXLOWER.encode(tx.get_id());
        if self.inner.contains_key(&txid) {
            return false;
        }
        self.inner.insert(txid, tx);
        true
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.inner.contains_key(txid)
    }

    pub fn remove(&mut self, txid: &str) -> Option<Transaction> {
        self.inner.remove(txid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All pooled transactions in txid order.
    pub fn get_all(&self) -> Vec<Transaction> {
        self.inner.values().cloned().collect()
    }

}

/// Hashes of blocks still to be requested from the peer being synced from.
#[derive(Debug, Default)]
pub struct BlockInTransit {
    inner: VecDeque<Vec<u8>>,
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit::default()
    }

    /// Replace the queue with `blocks`, in order.
    pub fn replace(&mut self, blocks: &[Vec<u8>]) {
        self.inner = blocks.iter().cloned().collect();
    }

    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        self.inner.pop_front()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_add_and_remove() {
        let mut pool = MemoryPool::new();
        let tx = Transaction::new_coinbase_tx("alice", "").unwrap();
        let txid = tx.id_hex();

        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx.clone()));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&txid), Some(tx));

        assert!(pool.remove(&txid).is_some());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_transit_is_fifo() {
        let mut transit = BlockInTransit::new();
        transit.replace(&[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(transit.pop_front(), Some(b"a".to_vec()));
        assert_eq!(transit.pop_front(), Some(b"b".to_vec()));
        assert!(transit.is_empty());

        transit.replace(&[b"c".to_vec()]);
        transit.replace(&[b"d".to_vec()]);
        assert_eq!(transit.len(), 1);
        assert_eq!(transit.pop_front(), Some(b"d".to_vec()));
    }

    #[test]
    fn test_transit_clear_drops_pending_hashes() {
        let mut transit = BlockInTransit::new();
        transit.replace(&[b"a".to_vec(), b"b".to_vec()]);
        transit.clear();
        assert!(transit.is_empty());
        assert_eq!(transit.pop_front(), None);
    }
}
