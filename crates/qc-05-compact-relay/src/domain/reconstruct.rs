//! # Reconstructor
//!
//! Turns a compact block into a full block using locally held transactions.
//!
//! ## Steps
//!
//! 1. [`merge_short_ids`]: interleave prefilled entries with the short id
//!    stream into one list as long as the block.
//! 2. [`build_reverse_index`]: map short ids of every locally known
//!    transaction back to full hashes, flagging collisions.
//! 3. [`resolve`]: look each merged entry up; unresolved entries become
//!    `None` and form the missing set.
//! 4. [`merkle_root_matches`]: check the resolved hash list against the
//!    header once nothing is missing.
//! 5. [`assemble`]: fetch every transaction, charging the memory governor.
//!
//! Steps 2 to 5 must run inside one [`PoolView`] so no transaction moves
//! between sources halfway through.

use std::collections::{HashMap, HashSet};

use shared_types::{compute_merkle_root, Block, BlockHeader, Hash, TransactionRef};

use super::{CompactBlock, MemoryCheck, MemoryGovernor, SessionBudget, ShortId, ShortIdKeys};

/// Where a locally known transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSource {
    Orphan,
    Mempool,
    CommitQueue,
}

impl PoolSource {
    /// Index-building order; matches the lock acquisition order.
    pub const INDEX_ORDER: [PoolSource; 3] =
        [PoolSource::Orphan, PoolSource::Mempool, PoolSource::CommitQueue];
}

/// Consistent read-only view over all transaction sources.
///
/// Implementations hold every source's lock for the view's lifetime.
pub trait PoolView {
    fn hashes(&self, source: PoolSource) -> Vec<Hash>;
    fn get(&self, source: PoolSource, hash: &Hash) -> Option<TransactionRef>;

    fn contains(&self, source: PoolSource, hash: &Hash) -> bool {
        self.get(source, hash).is_some()
    }
}

/// Merged short id list plus the prefilled transactions keyed by short id.
#[derive(Debug, Clone, Default)]
pub struct MergedIds {
    pub short_ids: Vec<ShortId>,
    pub known_missing: HashMap<ShortId, TransactionRef>,
}

/// Interleave prefilled entries with the short id stream.
///
/// Expects a message that passed structural validation.
pub fn merge_short_ids(compact: &CompactBlock, keys: &ShortIdKeys) -> MergedIds {
    let mut merged = Vec::with_capacity(compact.tx_count());
    let mut known_missing = HashMap::with_capacity(compact.prefilled.len());
    let mut stream = compact.short_ids.iter().copied();

    for prefilled in &compact.prefilled {
        merged.extend(stream.by_ref().take(usize::from(prefilled.position_delta)));
        let id = keys.short_id(&prefilled.tx.txid());
        merged.push(id);
        known_missing.insert(id, prefilled.tx.clone());
    }
    merged.extend(stream);

    MergedIds {
        short_ids: merged,
        known_missing,
    }
}

/// Short id to full hash over every known transaction.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    map: HashMap<ShortId, Hash>,
    collision: bool,
}

impl ReverseIndex {
    fn insert(&mut self, id: ShortId, hash: Hash) {
        match self.map.get(&id) {
            Some(existing) if *existing != hash => self.collision = true,
            Some(_) => {}
            None => {
                self.map.insert(id, hash);
            }
        }
    }

    pub fn get(&self, id: &ShortId) -> Option<Hash> {
        self.map.get(id).copied()
    }

    /// Two different transactions share a short id.
    pub fn has_collision(&self) -> bool {
        self.collision
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub fn build_reverse_index(
    keys: &ShortIdKeys,
    view: &dyn PoolView,
    known_missing: &HashMap<ShortId, TransactionRef>,
) -> ReverseIndex {
    let mut index = ReverseIndex::default();
    for source in PoolSource::INDEX_ORDER {
        for hash in view.hashes(source) {
            index.insert(keys.short_id(&hash), hash);
        }
    }
    for (id, tx) in known_missing {
        index.insert(*id, tx.txid());
    }
    index
}

/// Outcome of resolving merged entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Some positions could not be resolved; `missing` is ascending.
    Partial {
        hashes: Vec<Option<Hash>>,
        missing: Vec<u16>,
    },
    Complete { hashes: Vec<Hash> },
    /// The missing set cannot be expressed with 16-bit positions.
    TooManyMissing { count: usize },
}

pub fn resolve(merged: &[ShortId], index: &ReverseIndex) -> Resolution {
    let hashes: Vec<Option<Hash>> = merged.iter().map(|id| index.get(id)).collect();
    resolution_from(hashes)
}

/// Classify a partially filled hash list.
pub fn resolution_from(hashes: Vec<Option<Hash>>) -> Resolution {
    let missing_positions: Vec<usize> = hashes
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.is_none().then_some(i))
        .collect();

    if missing_positions.is_empty() {
        return Resolution::Complete {
            hashes: hashes.into_iter().flatten().collect(),
        };
    }

    let fits = missing_positions.len() <= usize::from(u16::MAX)
        && missing_positions
            .last()
            .is_some_and(|p| *p <= usize::from(u16::MAX));
    if !fits {
        return Resolution::TooManyMissing {
            count: missing_positions.len(),
        };
    }

    Resolution::Partial {
        hashes,
        missing: missing_positions.into_iter().map(|p| p as u16).collect(),
    }
}

/// A list whose tree repeats a node is rejected even if its root matches.
pub fn merkle_root_matches(header: &BlockHeader, hashes: &[Hash]) -> bool {
    let (root, mutated) = compute_merkle_root(hashes);
    root == header.merkle_root && !mutated
}

/// Why assembly stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    DuplicateTransactions { txid: Hash },
    /// A hash resolved earlier is in no source any more.
    Vanished { position: usize },
    /// The governor refused a charge.
    Memory(MemoryCheck),
}

/// A reassembled block.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub block: Block,
    /// Prefilled transactions the receiver already had.
    pub unnecessary: usize,
}

/// Fetch every transaction, preferring the commit queue over the mempool.
///
/// Each added transaction is charged `footprint` bytes to `budget`.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    header: &BlockHeader,
    hashes: &[Hash],
    keys: &ShortIdKeys,
    view: &dyn PoolView,
    known_missing: &HashMap<ShortId, TransactionRef>,
    governor: &MemoryGovernor,
    budget: &SessionBudget,
    footprint: u64,
) -> Result<Assembled, AssemblyError> {
    let mut seen = HashSet::with_capacity(hashes.len());
    for hash in hashes {
        if !seen.insert(*hash) {
            return Err(AssemblyError::DuplicateTransactions { txid: *hash });
        }
    }

    let mut transactions = Vec::with_capacity(hashes.len());
    let mut unnecessary = 0;
    for (position, hash) in hashes.iter().enumerate() {
        let local = view
            .get(PoolSource::CommitQueue, hash)
            .or_else(|| view.get(PoolSource::Mempool, hash))
            .or_else(|| view.get(PoolSource::Orphan, hash));
        let prefilled = known_missing.get(&keys.short_id(hash)).filter(|tx| tx.txid() == *hash);

        if local.is_some() && prefilled.is_some() {
            unnecessary += 1;
        }
        let tx = local
            .or_else(|| prefilled.cloned())
            .ok_or(AssemblyError::Vanished { position })?;

        let check = governor.add(footprint, budget);
        if !check.is_within() {
            return Err(AssemblyError::Memory(check));
        }
        transactions.push(tx);
    }

    Ok(Assembled {
        block: Block {
            header: *header,
            transactions,
        },
        unnecessary,
    })
}
