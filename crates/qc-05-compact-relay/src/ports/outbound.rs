//! Outbound ports (SPI) for the Compact Relay subsystem.

use shared_types::{Block, BlockHeader, Hash};

use crate::domain::{PeerId, PoolView};
use crate::events::{RelayError, RelayMessage};

/// Transaction sources used for reconstruction.
///
/// # Lock Order
///
/// Implementations must take their locks in the fixed order orphan cache,
/// pending pool, commit queue, and hold all of them while `f` runs.
pub trait TransactionPools: Send + Sync {
    fn with_view<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&dyn PoolView) -> R;
}

/// Local block storage.
pub trait BlockStore: Send + Sync {
    /// Whether the block is known to the block index.
    fn has_block_index(&self, block_hash: &Hash) -> bool;

    /// Read a stored block; `None` if it cannot be read.
    fn read_block(&self, block_hash: &Hash) -> Option<Block>;

    /// Whether the full block data is already stored.
    fn has_block_on_disk(&self, block_hash: &Hash) -> bool;
}

/// Result of the contextual header check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderCheck {
    Valid,
    /// Parent unknown; the block may simply be ahead of us.
    UnknownParent,
    Invalid(String),
}

/// Consensus entry points.
pub trait ConsensusGateway: Send + Sync {
    fn check_header(&self, header: &BlockHeader) -> HeaderCheck;

    /// Hand a reassembled block to full validation.
    fn process_block(&self, peer: PeerId, block: Block);
}

/// Peer management and message transport.
pub trait PeerNetwork: Send + Sync {
    /// Whether the peer negotiated compact block relay.
    fn supports_compact_blocks(&self, peer: PeerId) -> bool;

    /// Whether the peer is an always-trusted upstream relay.
    fn is_trusted_upstream(&self, peer: PeerId) -> bool;

    fn send(&self, peer: PeerId, message: RelayMessage) -> Result<(), RelayError>;

    /// Send `block` as a plain block message.
    fn send_block(&self, peer: PeerId, block: &Block) -> Result<(), RelayError>;

    /// Fall back to fetching the full block.
    fn request_full_block(&self, peer: PeerId, block_hash: Hash);

    fn disconnect(&self, peer: PeerId);

    /// Add `score` misbehaviour points to the peer.
    fn penalize(&self, peer: PeerId, score: u32, reason: &str);
}

/// Tracks blocks we asked peers for.
pub trait InFlightTracker: Send + Sync {
    fn is_in_flight(&self, peer: PeerId, block_hash: &Hash) -> bool;

    /// When the block was requested from the peer, in milliseconds.
    fn requested_at(&self, peer: PeerId, block_hash: &Hash) -> Option<u64>;

    fn clear(&self, block_hash: &Hash);
}

/// Time source abstraction.
pub trait TimeSource: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
