//! # Core Domain Entities
//!
//! Data structures exchanged during compact block relay.
//!
//! ## Entities
//!
//! - [`ShortId`]: 48-bit keyed hash standing in for a full transaction id
//! - [`PrefilledTransaction`]: transaction carried in full (coinbase, unknown txs)
//! - [`CompactBlock`]: header + nonce + short ids + prefilled transactions
//! - [`GetBlockTxn`]: re-request for transactions at given block positions
//! - [`BlockTxn`]: response carrying those transactions in requested order
//! - [`PeerId`]: 32-byte peer identifier

use shared_types::{BlockHeader, Hash, TransactionRef};

/// Short transaction ID (48 bits) for compact block relay.
///
/// Collisions between different transactions are possible and expected
/// to be handled; a short id never proves identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId(u64);

impl ShortId {
    /// Mask keeping the low 48 bits.
    pub const MASK: u64 = 0xFFFF_FFFF_FFFF;
    /// Bytes on the wire.
    pub const SIZE: usize = 6;

    /// Creates a short id, discarding bits above 48.
    pub const fn new(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Little-endian 6-byte encoding (4-byte low word, 2-byte high word).
    pub fn to_le_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(&self.0.to_le_bytes()[..Self::SIZE]);
        out
    }

    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut wide = [0u8; 8];
        wide[..Self::SIZE].copy_from_slice(&bytes);
        Self(u64::from_le_bytes(wide))
    }
}

/// Transaction included in full inside a compact block.
///
/// `position_delta` is differential: the absolute position is
/// `previous_position + position_delta + 1`, starting from `-1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefilledTransaction {
    pub position_delta: u16,
    pub tx: TransactionRef,
}

/// Compact block announcement.
///
/// # Wire Format
///
/// ```text
/// [header: 80][nonce: 8][count][short_ids: 6*N][count][{delta, tx}...]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactBlock {
    pub header: BlockHeader,
    /// Salt for short id key derivation, chosen fresh per announcement.
    pub nonce: u64,
    pub short_ids: Vec<ShortId>,
    pub prefilled: Vec<PrefilledTransaction>,
}

impl CompactBlock {
    pub fn block_hash(&self) -> Hash {
        self.header.hash()
    }

    /// Number of transactions in the announced block.
    pub fn tx_count(&self) -> usize {
        self.short_ids.len() + self.prefilled.len()
    }

    /// Absolute block positions of the prefilled transactions.
    ///
    /// Only meaningful for a message that passed structural validation.
    pub fn prefilled_positions(&self) -> Vec<usize> {
        let mut last: i64 = -1;
        self.prefilled
            .iter()
            .map(|p| {
                last += i64::from(p.position_delta) + 1;
                last as usize
            })
            .collect()
    }
}

/// Re-request for transactions at zero-based block positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBlockTxn {
    pub block_hash: Hash,
    /// Strictly increasing positions.
    pub indexes: Vec<u16>,
}

/// Response to a [`GetBlockTxn`], transactions in requested order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTxn {
    pub block_hash: Hash,
    pub transactions: Vec<TransactionRef>,
}

/// Peer identifier for P2P network communication.
///
/// # Example
///
/// ```rust
/// use qc_05_compact_relay::PeerId;
///
/// let peer = PeerId::new([0xAB; 32]);
/// let peer_from_bytes = PeerId::from_bytes(&[0xAB; 32]).unwrap();
/// assert_eq!(peer, peer_from_bytes);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn new(id: [u8; 32]) -> Self {
        Self(id)
    }

    /// Returns `None` if the slice is shorter than 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 32 {
            let mut id = [0u8; 32];
            id.copy_from_slice(&bytes[..32]);
            Some(Self(id))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Transaction;
    use std::sync::Arc;

    #[test]
    fn test_short_id_masks_to_48_bits() {
        let id = ShortId::new(u64::MAX);
        assert_eq!(id.as_u64(), ShortId::MASK);
    }

    #[test]
    fn test_short_id_byte_layout() {
        let id = ShortId::new(0x0000_BBAA_4433_2211);
        assert_eq!(id.to_le_bytes(), [0x11, 0x22, 0x33, 0x44, 0xAA, 0xBB]);
        assert_eq!(ShortId::from_le_bytes(id.to_le_bytes()), id);
    }

    #[test]
    fn test_prefilled_positions_are_cumulative() {
        let tx = Arc::new(Transaction::default());
        let compact = CompactBlock {
            header: BlockHeader::default(),
            nonce: 0,
            short_ids: vec![ShortId::new(1); 4],
            prefilled: vec![
                PrefilledTransaction {
                    position_delta: 0,
                    tx: tx.clone(),
                },
                PrefilledTransaction {
                    position_delta: 2,
                    tx: tx.clone(),
                },
                PrefilledTransaction {
                    position_delta: 0,
                    tx,
                },
            ],
        };
        assert_eq!(compact.prefilled_positions(), vec![0, 3, 4]);
        assert_eq!(compact.tx_count(), 7);
    }

    #[test]
    fn test_peer_id_from_bytes() {
        let bytes = [0xABu8; 32];
        let peer = PeerId::from_bytes(&bytes);
        assert!(peer.is_some());
        assert_eq!(peer.unwrap().0, bytes);
        assert!(PeerId::from_bytes(&bytes[..31]).is_none());
    }
}
