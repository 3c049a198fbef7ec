//! In-memory transaction sources.

use parking_lot::{RwLock, RwLockReadGuard};
use shared_types::{Hash, TransactionRef};
use std::collections::HashMap;

use crate::domain::{PoolSource, PoolView};
use crate::ports::TransactionPools;

type TxMap = HashMap<Hash, TransactionRef>;

/// Orphan cache, pending pool and commit queue behind one lock each.
#[derive(Debug, Default)]
pub struct InMemoryTransactionPools {
    orphans: RwLock<TxMap>,
    mempool: RwLock<TxMap>,
    commit_queue: RwLock<TxMap>,
}

impl InMemoryTransactionPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: PoolSource, tx: TransactionRef) {
        self.lock(source).write().insert(tx.txid(), tx);
    }

    pub fn remove(&self, source: PoolSource, txid: &Hash) -> Option<TransactionRef> {
        self.lock(source).write().remove(txid)
    }

    /// Move a transaction from one source to another.
    pub fn migrate(&self, from: PoolSource, to: PoolSource, txid: &Hash) -> bool {
        match self.remove(from, txid) {
            Some(tx) => {
                self.insert(to, tx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self, source: PoolSource) -> usize {
        self.lock(source).read().len()
    }

    pub fn is_empty(&self) -> bool {
        PoolSource::INDEX_ORDER
            .iter()
            .all(|&source| self.lock(source).read().is_empty())
    }

    fn lock(&self, source: PoolSource) -> &RwLock<TxMap> {
        match source {
            PoolSource::Orphan => &self.orphans,
            PoolSource::Mempool => &self.mempool,
            PoolSource::CommitQueue => &self.commit_queue,
        }
    }
}

struct LockedPools<'a> {
    orphans: RwLockReadGuard<'a, TxMap>,
    mempool: RwLockReadGuard<'a, TxMap>,
    commit_queue: RwLockReadGuard<'a, TxMap>,
}

impl PoolView for LockedPools<'_> {
    fn hashes(&self, source: PoolSource) -> Vec<Hash> {
        self.map(source).keys().copied().collect()
    }

    fn get(&self, source: PoolSource, hash: &Hash) -> Option<TransactionRef> {
        self.map(source).get(hash).cloned()
    }

    fn contains(&self, source: PoolSource, hash: &Hash) -> bool {
        self.map(source).contains_key(hash)
    }
}

impl LockedPools<'_> {
    fn map(&self, source: PoolSource) -> &TxMap {
        match source {
            PoolSource::Orphan => &self.orphans,
            PoolSource::Mempool => &self.mempool,
            PoolSource::CommitQueue => &self.commit_queue,
        }
    }
}

impl TransactionPools for InMemoryTransactionPools {
    fn with_view<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&dyn PoolView) -> R,
    {
        // Lock order: orphan cache, pending pool, commit queue
        let view = LockedPools {
            orphans: self.orphans.read(),
            mempool: self.mempool.read(),
            commit_queue: self.commit_queue.read(),
        };
        f(&view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Transaction;
    use std::sync::Arc;

    fn tx(tag: u8) -> TransactionRef {
        Arc::new(Transaction::new_coinbase(&[tag], 50, vec![tag]))
    }

    #[test]
    fn test_view_sees_every_source() {
        let pools = InMemoryTransactionPools::new();
        let (a, b, c) = (tx(1), tx(2), tx(3));
        pools.insert(PoolSource::Orphan, a.clone());
        pools.insert(PoolSource::Mempool, b.clone());
        pools.insert(PoolSource::CommitQueue, c.clone());

        pools.with_view(|view| {
            assert_eq!(view.get(PoolSource::Orphan, &a.txid()), Some(a.clone()));
            assert!(view.contains(PoolSource::Mempool, &b.txid()));
            assert!(!view.contains(PoolSource::Mempool, &c.txid()));
            assert_eq!(view.hashes(PoolSource::CommitQueue), vec![c.txid()]);
        });
    }

    #[test]
    fn test_migrate_between_sources() {
        let pools = InMemoryTransactionPools::new();
        let t = tx(7);
        pools.insert(PoolSource::CommitQueue, t.clone());
        assert!(pools.migrate(PoolSource::CommitQueue, PoolSource::Mempool, &t.txid()));
        assert_eq!(pools.len(PoolSource::CommitQueue), 0);
        assert_eq!(pools.len(PoolSource::Mempool), 1);
        assert!(!pools.migrate(PoolSource::CommitQueue, PoolSource::Mempool, &t.txid()));
        assert!(!pools.is_empty());
    }
}
