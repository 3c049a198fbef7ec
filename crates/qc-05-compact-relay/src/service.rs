//! # Compact Relay Service
//!
//! Drives reconciliation sessions from announcement to reassembled block.
//!
//! ## Architecture
//!
//! This service implements the inbound port [`CompactRelayApi`] and depends
//! on six outbound ports:
//! - [`TransactionPools`]: orphan cache, pending pool and commit queue
//! - [`BlockStore`]: stored blocks for serving re-requests
//! - [`ConsensusGateway`]: header checks and block processing
//! - [`PeerNetwork`]: sending, penalties, disconnects, full block fallback
//! - [`InFlightTracker`]: which blocks we asked which peer for
//! - [`TimeSource`]: clock for rate limiting and statistics
//!
//! ## Shared State
//!
//! [`ReconciliationContext`] holds everything shared across peers: the
//! memory governor, bandwidth statistics, re-request rate limiter and the
//! session table. Lock order is table, then budget; session, then budget.
//! Teardown never locks a session, so it is safe from any thread.
//!
//! ## Memory Pressure
//!
//! A breach aborts the running pass and drops its charge. Outside the pool
//! locks, the largest other session is evicted if it holds more than the
//! breaching one did, and the pass is retried once. Otherwise the breaching
//! session is torn down and its peer disconnected.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::reconstruct::Assembled;
use crate::domain::{
    build_compact_block, largest_consumer, serve_request, validate_block_txn,
    validate_compact_block, validate_get_block_txn, BandwidthStatsTracker, BlockTxn,
    CompactBlock, ConfigError, GetBlockTxn, MemoryCheck, MemoryGovernor, PeerId,
    PrefillGapTooLarge, RateDecision, ReconcileStep, ReconciliationSession, RelayConfig,
    RequestRateLimiter, SessionBudget, SessionState, StatsSnapshot,
};
use crate::events::{compression_ratio, CompletedBlock, RelayError, RelayMessage, RelayOutcome};
use crate::ports::inbound::CompactRelayApi;
use crate::ports::outbound::{
    BlockStore, ConsensusGateway, HeaderCheck, InFlightTracker, PeerNetwork, TimeSource,
    TransactionPools,
};
use shared_types::{Block, Hash, HashHex};

/// Table entry for one live session.
#[derive(Clone)]
struct SessionEntry {
    id: u64,
    peer: PeerId,
    block_hash: Hash,
    session: Arc<Mutex<ReconciliationSession>>,
    budget: Arc<SessionBudget>,
}

/// State shared by every peer's reconciliation.
pub struct ReconciliationContext {
    config: RelayConfig,
    governor: MemoryGovernor,
    stats: BandwidthStatsTracker,
    rate_limiter: RequestRateLimiter,
    sessions: Mutex<HashMap<PeerId, SessionEntry>>,
    next_id: AtomicU64,
}

impl ReconciliationContext {
    pub fn new(config: RelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            governor: MemoryGovernor::new(config.memory_ceiling()),
            stats: BandwidthStatsTracker::new(config.stats_window_ms),
            rate_limiter: RequestRateLimiter::new(
                config.rerequest_threshold,
                config.rerequest_decay(),
            ),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn governor(&self) -> &MemoryGovernor {
        &self.governor
    }

    pub fn stats(&self) -> &BandwidthStatsTracker {
        &self.stats
    }

    pub fn rate_limiter(&self) -> &RequestRateLimiter {
        &self.rate_limiter
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Bytes held by the peer's session, if it has one.
    pub fn session_usage(&self, peer: PeerId) -> Option<u64> {
        self.sessions.lock().get(&peer).map(|entry| entry.budget.used())
    }

    /// Remove the peer's session and release its memory.
    ///
    /// With `only_id`, a newer session for the same peer is left alone.
    pub fn teardown(&self, peer: PeerId, only_id: Option<u64>) -> bool {
        let mut sessions = self.sessions.lock();
        let matches = sessions
            .get(&peer)
            .map_or(false, |entry| only_id.map_or(true, |id| entry.id == id));
        if !matches {
            return false;
        }
        match sessions.remove(&peer) {
            Some(entry) => {
                let freed = self.governor.release(&entry.budget);
                debug!(
                    peer = %peer,
                    block_hash = %HashHex(&entry.block_hash),
                    freed,
                    "session torn down"
                );
                true
            }
            None => false,
        }
    }

    fn insert(&self, session: ReconciliationSession) -> SessionEntry {
        let entry = SessionEntry {
            id: session.id(),
            peer: session.peer(),
            block_hash: session.block_hash(),
            budget: session.budget().clone(),
            session: Arc::new(Mutex::new(session)),
        };
        if let Some(previous) = self.sessions.lock().insert(entry.peer, entry.clone()) {
            self.governor.release(&previous.budget);
        }
        entry
    }

    fn lookup(&self, peer: PeerId) -> Option<SessionEntry> {
        self.sessions.lock().get(&peer).cloned()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The largest session other than `exclude`: `(peer, id, bytes)`.
    fn largest_other(&self, exclude: u64) -> Option<(PeerId, u64, u64)> {
        let sessions = self.sessions.lock();
        largest_consumer(
            sessions
                .values()
                .filter(|entry| entry.id != exclude)
                .map(|entry| ((entry.peer, entry.id), entry.budget.used())),
        )
        .map(|((peer, id), used)| (peer, id, used))
    }
}

/// Which session operation a reconcile pass runs.
#[derive(Clone, Copy, Debug)]
enum Pass {
    Announcement,
    Response,
}

/// Compact Relay Service.
///
/// ## Thread Safety
///
/// Shareable across peer threads via `Arc`. Each peer's messages must be
/// delivered in order by one thread at a time.
pub struct CompactRelayService<P, B, C, N, F, T>
where
    P: TransactionPools,
    B: BlockStore,
    C: ConsensusGateway,
    N: PeerNetwork,
    F: InFlightTracker,
    T: TimeSource,
{
    context: Arc<ReconciliationContext>,
    pools: Arc<P>,
    store: Arc<B>,
    consensus: Arc<C>,
    network: Arc<N>,
    in_flight: Arc<F>,
    clock: Arc<T>,
}

impl<P, B, C, N, F, T> CompactRelayService<P, B, C, N, F, T>
where
    P: TransactionPools,
    B: BlockStore,
    C: ConsensusGateway,
    N: PeerNetwork,
    F: InFlightTracker,
    T: TimeSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RelayConfig,
        pools: Arc<P>,
        store: Arc<B>,
        consensus: Arc<C>,
        network: Arc<N>,
        in_flight: Arc<F>,
        clock: Arc<T>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            context: Arc::new(ReconciliationContext::new(config)?),
            pools,
            store,
            consensus,
            network,
            in_flight,
            clock,
        })
    }

    pub fn context(&self) -> &Arc<ReconciliationContext> {
        &self.context
    }

    fn config(&self) -> &RelayConfig {
        &self.context.config
    }

    /// Apply the error's penalty to its peer and return it.
    fn reject(&self, err: RelayError) -> Result<RelayOutcome, RelayError> {
        if let Some(peer) = err.peer() {
            let score = err.penalty(&self.config().penalties);
            if score > 0 {
                warn!(peer = %peer, score, error = %err, "penalizing peer");
                self.network.penalize(peer, score, &err.to_string());
            }
        }
        Err(err)
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    fn drive(&self, entry: &SessionEntry, pass: Pass) -> Result<RelayOutcome, RelayError> {
        let governor = &self.context.governor;
        let footprint = self.config().tx_ref_footprint;
        let mut retried = false;

        loop {
            let step = {
                let mut session = entry.session.lock();
                self.pools.with_view(|view| match pass {
                    Pass::Announcement => session.reconcile(view, governor, footprint),
                    Pass::Response => session.complete_from_response(view, governor, footprint),
                })
            };

            return match step {
                ReconcileStep::MemoryBreach(check) => {
                    let used = entry.budget.used();
                    governor.reset(&entry.budget);
                    if !retried && self.evict_larger(entry, check, used) {
                        retried = true;
                        continue;
                    }
                    self.exhausted(entry, used)
                }
                ReconcileStep::Complete(assembled) => self.complete(entry, assembled),
                ReconcileStep::NeedTransactions(request) => self.rerequest(entry, request),
                ReconcileStep::Fallback(reason) => {
                    self.context.teardown(entry.peer, Some(entry.id));
                    warn!(
                        peer = %entry.peer,
                        block_hash = %HashHex(&entry.block_hash),
                        %reason,
                        "compact block reconstruction failed, requesting full block"
                    );
                    self.network.request_full_block(entry.peer, entry.block_hash);
                    Ok(RelayOutcome::FullBlockRequested {
                        peer: entry.peer,
                        block_hash: entry.block_hash,
                        reason,
                    })
                }
                ReconcileStep::DuplicateTransactions(txid) => {
                    self.context.teardown(entry.peer, Some(entry.id));
                    self.reject(RelayError::DuplicateTransactions {
                        peer: entry.peer,
                        block_hash: entry.block_hash,
                        txid,
                    })
                }
            };
        }
    }

    /// Evict the largest other session if it outweighs `used`.
    fn evict_larger(&self, entry: &SessionEntry, check: MemoryCheck, used: u64) -> bool {
        if !matches!(check, MemoryCheck::GlobalBreach { .. }) {
            return false;
        }
        match self.context.largest_other(entry.id) {
            Some((victim, victim_id, victim_used)) if victim_used > used => {
                warn!(
                    peer = %victim,
                    bytes = victim_used,
                    in_use = self.context.governor.in_use(),
                    ceiling = self.context.governor.ceiling(),
                    "memory ceiling reached, evicting largest compact block session"
                );
                self.context.teardown(victim, Some(victim_id));
                self.network.disconnect(victim);
                true
            }
            _ => false,
        }
    }

    fn exhausted(&self, entry: &SessionEntry, used: u64) -> Result<RelayOutcome, RelayError> {
        let ceiling = self.context.governor.ceiling();
        warn!(
            peer = %entry.peer,
            block_hash = %HashHex(&entry.block_hash),
            bytes = used,
            ceiling,
            "memory ceiling reached, dropping compact block session"
        );
        self.context.teardown(entry.peer, Some(entry.id));
        entry.session.lock().fail();
        self.network.disconnect(entry.peer);
        Err(RelayError::MemoryExhausted {
            peer: entry.peer,
            block_hash: entry.block_hash,
            used,
            ceiling,
        })
    }

    fn rerequest(
        &self,
        entry: &SessionEntry,
        request: GetBlockTxn,
    ) -> Result<RelayOutcome, RelayError> {
        let missing = request.indexes.len();
        if let Err(err) = self
            .network
            .send(entry.peer, RelayMessage::GetBlockTxn(request))
        {
            self.context.teardown(entry.peer, Some(entry.id));
            return Err(err);
        }
        self.context
            .stats
            .record_rerequested_tx(self.clock.now_ms(), missing);
        debug!(
            peer = %entry.peer,
            block_hash = %HashHex(&entry.block_hash),
            missing,
            "requesting missing compact block transactions"
        );
        Ok(RelayOutcome::AwaitingTransactions {
            peer: entry.peer,
            block_hash: entry.block_hash,
            missing,
        })
    }

    fn complete(
        &self,
        entry: &SessionEntry,
        assembled: Assembled,
    ) -> Result<RelayOutcome, RelayError> {
        let message_size = entry.session.lock().message_size();
        self.context.teardown(entry.peer, Some(entry.id));

        let block = assembled.block;
        let block_size = block.serialized_size() as u64;
        let tx_count = block.transactions.len();
        let ratio = compression_ratio(message_size, block_size);
        self.context
            .stats
            .record_inbound(self.clock.now_ms(), message_size, block_size);
        info!(
            peer = %entry.peer,
            block_hash = %HashHex(&entry.block_hash),
            block_size,
            message_size,
            compression = format!("{:.1}%", ratio),
            unnecessary = assembled.unnecessary,
            "reassembled compact block"
        );

        let started = Instant::now();
        self.consensus.process_block(entry.peer, block);
        self.context.stats.record_validation_time(
            self.clock.now_ms(),
            started.elapsed().as_secs_f64(),
        );

        Ok(RelayOutcome::Completed(CompletedBlock {
            peer: entry.peer,
            block_hash: entry.block_hash,
            tx_count,
            block_size,
            message_size,
            compression_ratio: ratio,
            unnecessary_prefilled: assembled.unnecessary,
        }))
    }

    fn record_announcement_stats(&self, peer: PeerId, compact: &CompactBlock, message_size: u64) {
        let now = self.clock.now_ms();
        let block_hash = compact.block_hash();
        if let Some(requested_at) = self.in_flight.requested_at(peer, &block_hash) {
            let seconds = now.saturating_sub(requested_at) as f64 / 1000.0;
            self.context.stats.record_response_time(now, seconds);
        }
        self.context
            .stats
            .record_compact_block_size(now, message_size);
        let prefilled_bytes: usize = compact
            .prefilled
            .iter()
            .map(|p| p.tx.serialized_size())
            .sum();
        self.context
            .stats
            .record_full_tx_size(now, prefilled_bytes as u64);
    }

    fn max_message_size(&self) -> u64 {
        self.config()
            .message_size_multiplier
            .saturating_mul(self.config().max_block_size)
    }
}

impl<P, B, C, N, F, T> CompactRelayApi for CompactRelayService<P, B, C, N, F, T>
where
    P: TransactionPools,
    B: BlockStore,
    C: ConsensusGateway,
    N: PeerNetwork,
    F: InFlightTracker,
    T: TimeSource,
{
    fn on_compact_block_received(
        &self,
        peer: PeerId,
        compact: CompactBlock,
        message_size: u64,
    ) -> Result<RelayOutcome, RelayError> {
        if !self.network.supports_compact_blocks(peer) {
            return self.reject(RelayError::NotCapable {
                peer,
                message: RelayMessage::CMPCTBLOCK,
            });
        }
        if !self.config().enabled {
            return Ok(RelayOutcome::Ignored {
                peer,
                reason: "compact block relay disabled",
            });
        }

        // A new announcement always replaces the peer's previous session
        if self.context.teardown(peer, None) {
            debug!(peer = %peer, "previous compact block session superseded");
        }

        if let Err(violation) = validate_compact_block(&compact) {
            return self.reject(RelayError::Malformed {
                peer,
                message: RelayMessage::CMPCTBLOCK,
                reason: violation.to_string(),
            });
        }

        let block_hash = compact.block_hash();
        match self.consensus.check_header(&compact.header) {
            HeaderCheck::Valid => {}
            HeaderCheck::UnknownParent => {
                debug!(
                    peer = %peer,
                    block_hash = %HashHex(&block_hash),
                    "compact block does not connect, dropping"
                );
                return Err(RelayError::UnknownParent { peer, block_hash });
            }
            HeaderCheck::Invalid(reason) => {
                return self.reject(RelayError::InvalidHeader {
                    peer,
                    block_hash,
                    reason,
                });
            }
        }

        if !self.in_flight.is_in_flight(peer, &block_hash) {
            return self.reject(RelayError::Unsolicited { peer, block_hash });
        }

        if self.store.has_block_on_disk(&block_hash) {
            self.in_flight.clear(&block_hash);
            debug!(
                peer = %peer,
                block_hash = %HashHex(&block_hash),
                "compact block already stored"
            );
            return Ok(RelayOutcome::AlreadyHave { peer, block_hash });
        }

        self.record_announcement_stats(peer, &compact, message_size);
        debug!(
            peer = %peer,
            block_hash = %HashHex(&block_hash),
            short_ids = compact.short_ids.len(),
            prefilled = compact.prefilled.len(),
            message_size,
            "received compact block"
        );

        let session = ReconciliationSession::announce(
            self.context.next_id(),
            peer,
            &compact,
            message_size,
            self.clock.now_ms(),
        );
        let entry = self.context.insert(session);
        self.drive(&entry, Pass::Announcement)
    }

    fn on_get_block_txn_received(
        &self,
        peer: PeerId,
        request: GetBlockTxn,
    ) -> Result<RelayOutcome, RelayError> {
        if !self.network.supports_compact_blocks(peer) {
            return self.reject(RelayError::NotCapable {
                peer,
                message: RelayMessage::GETBLOCKTXN,
            });
        }

        if let Err(violation) = validate_get_block_txn(&request) {
            return self.reject(RelayError::Malformed {
                peer,
                message: RelayMessage::GETBLOCKTXN,
                reason: violation.to_string(),
            });
        }

        if self.config().rerequest_limit_enabled {
            if let RateDecision::Exceeded { count } =
                self.context.rate_limiter.record(peer, self.clock.now_ms())
            {
                return self.reject(RelayError::ExcessiveRerequests { peer, count });
            }
        }

        let block_hash = request.block_hash;
        if !self.store.has_block_index(&block_hash) {
            return self.reject(RelayError::PrematureRequest { peer, block_hash });
        }

        let Some(block) = self.store.read_block(&block_hash) else {
            warn!(
                peer = %peer,
                block_hash = %HashHex(&block_hash),
                "cannot read block to answer getblocktxn"
            );
            return Err(RelayError::BlockUnavailable { block_hash });
        };

        let response = match serve_request(&block, &request.indexes) {
            Ok(response) => response,
            Err(err) => {
                return self.reject(RelayError::Malformed {
                    peer,
                    message: RelayMessage::GETBLOCKTXN,
                    reason: err.to_string(),
                });
            }
        };

        let tx_count = response.transactions.len();
        self.network.send(peer, RelayMessage::BlockTxn(response))?;
        debug!(
            peer = %peer,
            block_hash = %HashHex(&block_hash),
            tx_count,
            "served getblocktxn"
        );
        Ok(RelayOutcome::Served {
            peer,
            block_hash,
            tx_count,
        })
    }

    fn on_block_txn_received(
        &self,
        peer: PeerId,
        response: BlockTxn,
        message_size: u64,
    ) -> Result<RelayOutcome, RelayError> {
        if !self.network.supports_compact_blocks(peer) {
            return self.reject(RelayError::NotCapable {
                peer,
                message: RelayMessage::BLOCKTXN,
            });
        }

        if let Err(violation) = validate_block_txn(&response) {
            self.context.teardown(peer, None);
            return self.reject(RelayError::Malformed {
                peer,
                message: RelayMessage::BLOCKTXN,
                reason: violation.to_string(),
            });
        }

        // Trusted upstreams may answer without the block being in flight
        let block_hash = response.block_hash;
        let trusted = self.network.is_trusted_upstream(peer);
        let entry = self.context.lookup(peer).filter(|entry| {
            entry.block_hash == block_hash
                && (trusted || self.in_flight.is_in_flight(peer, &block_hash))
                && entry.session.lock().state() == SessionState::AwaitingMissing
        });
        let Some(entry) = entry else {
            if trusted {
                return Ok(RelayOutcome::Ignored {
                    peer,
                    reason: "unrequested blocktxn from trusted upstream",
                });
            }
            return self.reject(RelayError::UnsolicitedResponse { peer, block_hash });
        };

        if self.store.has_block_on_disk(&block_hash) {
            self.context.teardown(peer, Some(entry.id));
            self.in_flight.clear(&block_hash);
            return Ok(RelayOutcome::AlreadyHave { peer, block_hash });
        }

        debug!(
            peer = %peer,
            block_hash = %HashHex(&block_hash),
            tx_count = response.transactions.len(),
            message_size,
            "received blocktxn"
        );
        entry.session.lock().accept_response(&response, message_size);
        self.drive(&entry, Pass::Response)
    }

    fn handle_wire(
        &self,
        peer: PeerId,
        command: &str,
        payload: &[u8],
    ) -> Result<RelayOutcome, RelayError> {
        let message = match command {
            RelayMessage::CMPCTBLOCK => RelayMessage::CMPCTBLOCK,
            RelayMessage::GETBLOCKTXN => RelayMessage::GETBLOCKTXN,
            RelayMessage::BLOCKTXN => RelayMessage::BLOCKTXN,
            _ => {
                return Ok(RelayOutcome::Ignored {
                    peer,
                    reason: "not a compact relay message",
                })
            }
        };
        if !self.network.supports_compact_blocks(peer) {
            return self.reject(RelayError::NotCapable { peer, message });
        }

        let message_size = payload.len() as u64;
        if message_size > self.max_message_size() {
            return self.reject(RelayError::Malformed {
                peer,
                message,
                reason: format!("oversized message of {} bytes", message_size),
            });
        }

        match RelayMessage::decode(command, payload) {
            Ok(Some(RelayMessage::CompactBlock(compact))) => {
                self.on_compact_block_received(peer, compact, message_size)
            }
            Ok(Some(RelayMessage::GetBlockTxn(request))) => {
                self.on_get_block_txn_received(peer, request)
            }
            Ok(Some(RelayMessage::BlockTxn(response))) => {
                self.on_block_txn_received(peer, response, message_size)
            }
            Ok(None) => Ok(RelayOutcome::Ignored {
                peer,
                reason: "not a compact relay message",
            }),
            Err(source) => {
                if message == RelayMessage::BLOCKTXN {
                    self.context.teardown(peer, None);
                }
                self.reject(RelayError::Decode {
                    peer,
                    message,
                    source,
                })
            }
        }
    }

    fn build_announcement_for(
        &self,
        block: &Block,
        peer_knows: &dyn Fn(&Hash) -> bool,
    ) -> Result<CompactBlock, PrefillGapTooLarge> {
        build_compact_block(block, rand::random::<u64>(), peer_knows)
    }

    fn send_compact_block(
        &self,
        peer: PeerId,
        block: &Block,
        peer_knows: &dyn Fn(&Hash) -> bool,
    ) -> Result<RelayOutcome, RelayError> {
        if !self.network.supports_compact_blocks(peer) {
            return Ok(RelayOutcome::Ignored {
                peer,
                reason: "peer does not support compact blocks",
            });
        }

        let block_size = block.serialized_size() as u64;
        let compact = match self.build_announcement_for(block, peer_knows) {
            Ok(compact) => compact,
            Err(gap) => {
                let block_hash = block.hash();
                warn!(
                    peer = %peer,
                    block_hash = %HashHex(&block_hash),
                    error = %gap,
                    "cannot announce compactly, sending full block"
                );
                self.network.send_block(peer, block)?;
                return Ok(RelayOutcome::FullBlockSent {
                    peer,
                    block_hash,
                    block_size,
                });
            }
        };
        let block_hash = compact.block_hash();
        let message = RelayMessage::CompactBlock(compact);
        let message_size = message.to_bytes().len() as u64;

        self.network.send(peer, message)?;
        self.context
            .stats
            .record_outbound(self.clock.now_ms(), message_size, block_size);
        debug!(
            peer = %peer,
            block_hash = %HashHex(&block_hash),
            message_size,
            block_size,
            "sent compact block"
        );
        Ok(RelayOutcome::Announced {
            peer,
            block_hash,
            message_size,
            block_size,
        })
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        self.context.teardown(peer, None);
        self.context.rate_limiter.forget(&peer);
    }

    fn stats_snapshot(&self) -> StatsSnapshot {
        self.context.stats.snapshot(self.clock.now_ms())
    }

    fn session_state(&self, peer: PeerId) -> SessionState {
        self.context
            .lookup(peer)
            .map_or(SessionState::Empty, |entry| entry.session.lock().state())
    }

    fn active_sessions(&self) -> usize {
        self.context.active_sessions()
    }

    fn memory_in_use(&self) -> u64 {
        self.context.governor.in_use()
    }
}
