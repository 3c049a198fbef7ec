//! Structural invariants for relay messages.
//!
//! Pure checks with no side effects. A violation means the sender built
//! the message wrong, never that we lack data.

use shared_types::NULL_HASH;

use super::{BlockTxn, CompactBlock, GetBlockTxn};

/// Structural check failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    NullHeader,
    EmptyBlock,
    NullPrefilledTransaction { position: usize },
    /// Cumulative prefilled position does not fit 16 bits.
    PositionOverflow { position: i64 },
    /// Prefilled position skips past the short ids available so far.
    PositionOutOfRange { position: i64, limit: usize },
    EmptyIndexes,
    NullBlockHash,
    EmptyTransactions,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NullHeader => write!(f, "null header"),
            Self::EmptyBlock => write!(f, "no short ids and no prefilled transactions"),
            Self::NullPrefilledTransaction { position } => {
                write!(f, "null prefilled transaction at position {}", position)
            }
            Self::PositionOverflow { position } => {
                write!(f, "prefilled position {} overflows 16 bits", position)
            }
            Self::PositionOutOfRange { position, limit } => {
                write!(f, "prefilled position {} exceeds limit {}", position, limit)
            }
            Self::EmptyIndexes => write!(f, "empty index list"),
            Self::NullBlockHash => write!(f, "null block hash"),
            Self::EmptyTransactions => write!(f, "empty transaction list"),
        }
    }
}

/// INVARIANT: a compact block references every block position exactly once.
///
/// The cumulative prefilled position must fit 16 bits and may never be
/// greater than `short_ids.len()` plus the prefilled entries seen before it.
pub fn validate_compact_block(compact: &CompactBlock) -> Result<(), InvariantViolation> {
    if compact.header.is_null() {
        return Err(InvariantViolation::NullHeader);
    }
    if compact.short_ids.is_empty() && compact.prefilled.is_empty() {
        return Err(InvariantViolation::EmptyBlock);
    }

    let mut last: i64 = -1;
    for (seen, prefilled) in compact.prefilled.iter().enumerate() {
        last += i64::from(prefilled.position_delta) + 1;
        if prefilled.tx.is_null() {
            return Err(InvariantViolation::NullPrefilledTransaction {
                position: last.max(0) as usize,
            });
        }
        if last > i64::from(u16::MAX) {
            return Err(InvariantViolation::PositionOverflow { position: last });
        }
        let limit = compact.short_ids.len() + seen;
        if last > limit as i64 {
            return Err(InvariantViolation::PositionOutOfRange {
                position: last,
                limit,
            });
        }
    }
    Ok(())
}

/// INVARIANT: a re-request names a block and at least one position.
pub fn validate_get_block_txn(request: &GetBlockTxn) -> Result<(), InvariantViolation> {
    if request.indexes.is_empty() {
        return Err(InvariantViolation::EmptyIndexes);
    }
    if request.block_hash == NULL_HASH {
        return Err(InvariantViolation::NullBlockHash);
    }
    Ok(())
}

/// INVARIANT: a re-request response names a block and carries transactions.
pub fn validate_block_txn(response: &BlockTxn) -> Result<(), InvariantViolation> {
    if response.transactions.is_empty() {
        return Err(InvariantViolation::EmptyTransactions);
    }
    if response.block_hash == NULL_HASH {
        return Err(InvariantViolation::NullBlockHash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PrefilledTransaction, ShortId};
    use shared_types::{BlockHeader, Transaction};
    use std::sync::Arc;

    fn header() -> BlockHeader {
        BlockHeader {
            bits: 0x207F_FFFF,
            ..Default::default()
        }
    }

    fn prefilled(delta: u16) -> PrefilledTransaction {
        PrefilledTransaction {
            position_delta: delta,
            tx: Arc::new(Transaction::new_coinbase(b"t", 1, vec![0x51])),
        }
    }

    fn compact(short_ids: usize, deltas: &[u16]) -> CompactBlock {
        CompactBlock {
            header: header(),
            nonce: 1,
            short_ids: (0..short_ids as u64).map(ShortId::new).collect(),
            prefilled: deltas.iter().map(|d| prefilled(*d)).collect(),
        }
    }

    #[test]
    fn test_valid_compact_block() {
        assert!(validate_compact_block(&compact(4, &[0])).is_ok());
        // Prefilled entry appended after every short id
        assert!(validate_compact_block(&compact(4, &[0, 4])).is_ok());
        // Only prefilled
        assert!(validate_compact_block(&compact(0, &[0, 0, 0])).is_ok());
    }

    #[test]
    fn test_null_header_rejected() {
        let mut c = compact(1, &[0]);
        c.header = BlockHeader::default();
        assert_eq!(
            validate_compact_block(&c),
            Err(InvariantViolation::NullHeader)
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(
            validate_compact_block(&compact(0, &[])),
            Err(InvariantViolation::EmptyBlock)
        );
    }

    #[test]
    fn test_null_prefilled_rejected() {
        let mut c = compact(2, &[0]);
        c.prefilled[0].tx = Arc::new(Transaction::default());
        assert!(matches!(
            validate_compact_block(&c),
            Err(InvariantViolation::NullPrefilledTransaction { .. })
        ));
    }

    #[test]
    fn test_position_beyond_short_ids_rejected() {
        // Second prefilled lands at 6 but only 4 short ids + 1 prefilled exist
        assert_eq!(
            validate_compact_block(&compact(4, &[0, 5])),
            Err(InvariantViolation::PositionOutOfRange {
                position: 6,
                limit: 5
            })
        );
    }

    #[test]
    fn test_position_overflow_rejected() {
        let c = compact(1, &[u16::MAX, u16::MAX]);
        assert!(matches!(
            validate_compact_block(&c),
            Err(InvariantViolation::PositionOverflow { .. })
                | Err(InvariantViolation::PositionOutOfRange { .. })
        ));

        // Overflow is detected even with enough short ids
        let mut big = compact(0, &[u16::MAX, 0]);
        big.short_ids = vec![ShortId::new(1); 70_000];
        assert_eq!(
            validate_compact_block(&big),
            Err(InvariantViolation::PositionOverflow { position: 65_536 })
        );
    }

    #[test]
    fn test_rerequest_validation() {
        let ok = GetBlockTxn {
            block_hash: [1u8; 32],
            indexes: vec![1],
        };
        assert!(validate_get_block_txn(&ok).is_ok());
        assert_eq!(
            validate_get_block_txn(&GetBlockTxn {
                block_hash: [1u8; 32],
                indexes: vec![],
            }),
            Err(InvariantViolation::EmptyIndexes)
        );
        assert_eq!(
            validate_get_block_txn(&GetBlockTxn {
                block_hash: NULL_HASH,
                indexes: vec![0],
            }),
            Err(InvariantViolation::NullBlockHash)
        );
    }

    #[test]
    fn test_response_validation() {
        let tx = Arc::new(Transaction::new_coinbase(b"t", 1, vec![0x51]));
        assert!(validate_block_txn(&BlockTxn {
            block_hash: [1u8; 32],
            transactions: vec![tx.clone()],
        })
        .is_ok());
        assert_eq!(
            validate_block_txn(&BlockTxn {
                block_hash: [1u8; 32],
                transactions: vec![],
            }),
            Err(InvariantViolation::EmptyTransactions)
        );
        assert_eq!(
            validate_block_txn(&BlockTxn {
                block_hash: NULL_HASH,
                transactions: vec![tx],
            }),
            Err(InvariantViolation::NullBlockHash)
        );
    }
}
