//! # Reconciliation Session
//!
//! Per-peer state for one in-flight compact block.
//!
//! ```text
//! Empty -> Announced -> Reconciling -> Complete
//!                           |    ^
//!                           v    |
//!                      AwaitingMissing
//!
//! any -> Failed
//! ```
//!
//! Every reconcile pass first drops the session's previous memory charge,
//! so running the same pass twice charges and reports the same thing.

use std::collections::HashMap;
use std::sync::Arc;

use shared_types::{BlockHeader, Hash, TransactionRef};

use super::reconstruct::{
    assemble, build_reverse_index, merge_short_ids, merkle_root_matches, resolution_from,
    resolve, Assembled, AssemblyError, PoolView, Resolution,
};
use super::{
    build_rerequest, BlockTxn, CompactBlock, GetBlockTxn, MemoryCheck, MemoryGovernor, PeerId,
    SessionBudget, ShortId, ShortIdKeys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session exists for the peer.
    Empty,
    Announced,
    Reconciling,
    AwaitingMissing,
    Complete,
    Failed,
}

/// Why reconstruction gave up in favour of a full block request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// Two local transactions share a short id.
    Collision,
    /// Missing positions do not fit the 16-bit index space.
    TooManyMissing,
    /// Resolved hashes do not commit to the header's merkle root.
    MerkleMismatch,
    /// Positions are still unresolved after the re-request response.
    StillMissing,
    /// A resolved transaction left every pool during assembly.
    TransactionVanished,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Collision => "short id collision",
            Self::TooManyMissing => "too many missing transactions",
            Self::MerkleMismatch => "merkle root mismatch",
            Self::StillMissing => "transactions still missing after re-request",
            Self::TransactionVanished => "transaction vanished during assembly",
        };
        f.write_str(text)
    }
}

/// Result of one reconcile pass.
#[derive(Debug)]
pub enum ReconcileStep {
    Complete(Assembled),
    NeedTransactions(GetBlockTxn),
    Fallback(FallbackReason),
    DuplicateTransactions(Hash),
    /// The governor refused a charge; the pass was aborted.
    MemoryBreach(MemoryCheck),
}

/// Per-peer reconstruction state.
#[derive(Debug)]
pub struct ReconciliationSession {
    id: u64,
    peer: PeerId,
    header: BlockHeader,
    block_hash: Hash,
    keys: ShortIdKeys,
    merged: Vec<ShortId>,
    resolved: Vec<Option<Hash>>,
    known_missing: HashMap<ShortId, TransactionRef>,
    budget: Arc<SessionBudget>,
    state: SessionState,
    missing_count: usize,
    unnecessary_count: usize,
    message_size: u64,
    started_at_ms: u64,
}

impl ReconciliationSession {
    /// Start a session for a structurally valid, solicited announcement.
    pub fn announce(
        id: u64,
        peer: PeerId,
        compact: &CompactBlock,
        message_size: u64,
        started_at_ms: u64,
    ) -> Self {
        let keys = compact.keys();
        let merged = merge_short_ids(compact, &keys);
        Self {
            id,
            peer,
            header: compact.header,
            block_hash: compact.block_hash(),
            keys,
            resolved: vec![None; merged.short_ids.len()],
            merged: merged.short_ids,
            known_missing: merged.known_missing,
            budget: Arc::new(SessionBudget::new()),
            state: SessionState::Announced,
            missing_count: 0,
            unnecessary_count: 0,
            message_size,
            started_at_ms,
        }
    }

    /// Resolve against local pools and either assemble or ask for the rest.
    pub fn reconcile(
        &mut self,
        view: &dyn PoolView,
        governor: &MemoryGovernor,
        footprint: u64,
    ) -> ReconcileStep {
        self.state = SessionState::Reconciling;
        governor.reset(&self.budget);

        let index = build_reverse_index(&self.keys, view, &self.known_missing);
        if index.has_collision() {
            return self.fall_back(FallbackReason::Collision);
        }

        match resolve(&self.merged, &index) {
            Resolution::TooManyMissing { .. } => self.fall_back(FallbackReason::TooManyMissing),
            Resolution::Complete { hashes } => self.finish(hashes, view, governor, footprint),
            Resolution::Partial { hashes, missing } => {
                self.resolved = hashes;
                self.missing_count = missing.len();
                // Placeholders for every position are held until the response
                for _ in 0..self.resolved.len() {
                    let check = governor.add(footprint, &self.budget);
                    if !check.is_within() {
                        return ReconcileStep::MemoryBreach(check);
                    }
                }
                match build_rerequest(self.block_hash, &self.resolved) {
                    Some(request) => {
                        self.state = SessionState::AwaitingMissing;
                        ReconcileStep::NeedTransactions(request)
                    }
                    None => self.fall_back(FallbackReason::TooManyMissing),
                }
            }
        }
    }

    /// Merge a re-request response into the known-missing map and fill the
    /// unresolved positions it covers.
    pub fn accept_response(&mut self, response: &BlockTxn, wire_size: u64) {
        self.message_size += wire_size;
        for tx in &response.transactions {
            self.known_missing
                .insert(self.keys.short_id(&tx.txid()), tx.clone());
        }
        for (slot, id) in self.resolved.iter_mut().zip(&self.merged) {
            if slot.is_none() {
                *slot = self.known_missing.get(id).map(|tx| tx.txid());
            }
        }
    }

    /// Finish after [`accept_response`](Self::accept_response). Anything
    /// still unresolved falls back to a full block.
    pub fn complete_from_response(
        &mut self,
        view: &dyn PoolView,
        governor: &MemoryGovernor,
        footprint: u64,
    ) -> ReconcileStep {
        self.state = SessionState::Reconciling;
        governor.reset(&self.budget);

        match resolution_from(self.resolved.clone()) {
            Resolution::Complete { hashes } => self.finish(hashes, view, governor, footprint),
            Resolution::Partial { missing, .. } => {
                self.missing_count = missing.len();
                self.fall_back(FallbackReason::StillMissing)
            }
            Resolution::TooManyMissing { .. } => self.fall_back(FallbackReason::StillMissing),
        }
    }

    fn finish(
        &mut self,
        hashes: Vec<Hash>,
        view: &dyn PoolView,
        governor: &MemoryGovernor,
        footprint: u64,
    ) -> ReconcileStep {
        if !merkle_root_matches(&self.header, &hashes) {
            return self.fall_back(FallbackReason::MerkleMismatch);
        }

        let result = assemble(
            &self.header,
            &hashes,
            &self.keys,
            view,
            &self.known_missing,
            governor,
            &self.budget,
            footprint,
        );
        self.resolved = hashes.into_iter().map(Some).collect();

        match result {
            Ok(assembled) => {
                self.unnecessary_count = assembled.unnecessary;
                self.missing_count = 0;
                self.state = SessionState::Complete;
                ReconcileStep::Complete(assembled)
            }
            Err(AssemblyError::DuplicateTransactions { txid }) => {
                self.state = SessionState::Failed;
                ReconcileStep::DuplicateTransactions(txid)
            }
            Err(AssemblyError::Vanished { .. }) => {
                self.fall_back(FallbackReason::TransactionVanished)
            }
            Err(AssemblyError::Memory(check)) => ReconcileStep::MemoryBreach(check),
        }
    }

    fn fall_back(&mut self, reason: FallbackReason) -> ReconcileStep {
        self.state = SessionState::Failed;
        ReconcileStep::Fallback(reason)
    }

    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn block_hash(&self) -> Hash {
        self.block_hash
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn budget(&self) -> &Arc<SessionBudget> {
        &self.budget
    }

    pub fn tx_count(&self) -> usize {
        self.merged.len()
    }

    pub fn missing_count(&self) -> usize {
        self.missing_count
    }

    pub fn unnecessary_count(&self) -> usize {
        self.unnecessary_count
    }

    /// Announcement plus response bytes received for this block.
    pub fn message_size(&self) -> u64 {
        self.message_size
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn resolved(&self) -> &[Option<Hash>] {
        &self.resolved
    }
}
