//! Domain services for compact block relay.
//!
//! Short id derivation and announcement building.

use shared_types::{sha256, Block, BlockHeader, Hash};
use siphasher::sip::SipHasher24;
use std::hash::Hasher;
use thiserror::Error;

use super::{CompactBlock, PrefilledTransaction, ShortId};

/// Per-announcement SipHash keys.
///
/// Derived as the first two little-endian words of
/// `SHA256(header || nonce)`. Sender and receiver must agree bit-for-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortIdKeys {
    pub k0: u64,
    pub k1: u64,
}

impl ShortIdKeys {
    pub fn derive(header: &BlockHeader, nonce: u64) -> Self {
        let mut preimage = Vec::with_capacity(BlockHeader::SIZE + 8);
        preimage.extend_from_slice(&header.to_bytes());
        preimage.extend_from_slice(&nonce.to_le_bytes());
        let digest = sha256(&preimage);

        let mut k0 = [0u8; 8];
        let mut k1 = [0u8; 8];
        k0.copy_from_slice(&digest[0..8]);
        k1.copy_from_slice(&digest[8..16]);
        Self {
            k0: u64::from_le_bytes(k0),
            k1: u64::from_le_bytes(k1),
        }
    }

    /// Formula: `SipHash-2-4(k0, k1, tx_hash) & 0xFFFF_FFFF_FFFF`
    pub fn short_id(&self, tx_hash: &Hash) -> ShortId {
        let mut hasher = SipHasher24::new_with_keys(self.k0, self.k1);
        hasher.write(tx_hash);
        ShortId::new(hasher.finish())
    }
}

impl CompactBlock {
    pub fn keys(&self) -> ShortIdKeys {
        ShortIdKeys::derive(&self.header, self.nonce)
    }
}

/// A prefilled transaction too far past the previous one for a 16-bit delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("prefilled transaction at position {position} is {gap} positions past the previous one")]
pub struct PrefillGapTooLarge {
    pub position: usize,
    pub gap: usize,
}

/// Build a compact announcement of `block` for one peer.
///
/// The coinbase is always prefilled. Any other transaction is prefilled
/// only when `peer_knows` reports the peer lacks it; everything else is
/// sent as a short id. Fails when a prefilled position cannot be encoded,
/// in which case the block has to be sent in full.
pub fn build_compact_block<F>(
    block: &Block,
    nonce: u64,
    peer_knows: F,
) -> Result<CompactBlock, PrefillGapTooLarge>
where
    F: Fn(&Hash) -> bool,
{
    let keys = ShortIdKeys::derive(&block.header, nonce);
    let mut short_ids = Vec::with_capacity(block.transactions.len().saturating_sub(1));
    let mut prefilled = Vec::new();

    let mut previous: Option<usize> = None;
    for (position, tx) in block.transactions.iter().enumerate() {
        let txid = tx.txid();
        if position == 0 || !peer_knows(&txid) {
            let gap = match previous {
                Some(prev) => position - prev - 1,
                None => position,
            };
            let position_delta =
                u16::try_from(gap).map_err(|_| PrefillGapTooLarge { position, gap })?;
            prefilled.push(PrefilledTransaction {
                position_delta,
                tx: tx.clone(),
            });
            previous = Some(position);
        } else {
            short_ids.push(keys.short_id(&txid));
        }
    }

    Ok(CompactBlock {
        header: block.header,
        nonce,
        short_ids,
        prefilled,
    })
}
