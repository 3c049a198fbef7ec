//! Inbound ports (API) for the Compact Relay subsystem.

use shared_types::{Block, Hash};

use crate::domain::{
    BlockTxn, CompactBlock, GetBlockTxn, PeerId, PrefillGapTooLarge, SessionState,
    StatsSnapshot,
};
use crate::events::{RelayError, RelayOutcome};

/// Primary API for compact block relay.
///
/// The transport delivers each peer's messages in order from a single
/// thread; different peers may be handled concurrently.
pub trait CompactRelayApi: Send + Sync {
    /// Handle an incoming compact block announcement.
    ///
    /// # Arguments
    /// * `peer` - Sending peer
    /// * `compact` - Decoded announcement
    /// * `message_size` - Bytes received on the wire
    fn on_compact_block_received(
        &self,
        peer: PeerId,
        compact: CompactBlock,
        message_size: u64,
    ) -> Result<RelayOutcome, RelayError>;

    /// Answer a peer's request for transactions of a block we store.
    fn on_get_block_txn_received(
        &self,
        peer: PeerId,
        request: GetBlockTxn,
    ) -> Result<RelayOutcome, RelayError>;

    /// Handle the response to one of our re-requests.
    fn on_block_txn_received(
        &self,
        peer: PeerId,
        response: BlockTxn,
        message_size: u64,
    ) -> Result<RelayOutcome, RelayError>;

    /// Decode a raw payload and dispatch it to the matching handler.
    ///
    /// Commands other than the three relay messages are `Ignored`.
    fn handle_wire(
        &self,
        peer: PeerId,
        command: &str,
        payload: &[u8],
    ) -> Result<RelayOutcome, RelayError>;

    /// Build an announcement of `block` for a peer whose inventory is
    /// described by `peer_knows`.
    fn build_announcement_for(
        &self,
        block: &Block,
        peer_knows: &dyn Fn(&Hash) -> bool,
    ) -> Result<CompactBlock, PrefillGapTooLarge>;

    /// Build, send and account an announcement of `block` to `peer`.
    ///
    /// A block that cannot be announced compactly is sent in full.
    fn send_compact_block(
        &self,
        peer: PeerId,
        block: &Block,
        peer_knows: &dyn Fn(&Hash) -> bool,
    ) -> Result<RelayOutcome, RelayError>;

    /// Drop all state held for a disconnected peer.
    fn on_peer_disconnected(&self, peer: PeerId);

    /// Rolling bandwidth statistics.
    fn stats_snapshot(&self) -> StatsSnapshot;

    /// State of the peer's session, `Empty` if none.
    fn session_state(&self, peer: PeerId) -> SessionState;

    fn active_sessions(&self) -> usize;

    /// Bytes currently charged to the memory governor.
    fn memory_in_use(&self) -> u64;
}
