//! # Re-request Coordination
//!
//! Both sides of the `GetBlockTxn` / `BlockTxn` exchange.
//!
//! - Client: [`build_rerequest`] lists the positions still unresolved.
//! - Server: [`RequestRateLimiter`] bounds how often a peer may ask, and
//!   [`serve_request`] answers from a stored block.

use parking_lot::Mutex;
use shared_types::{Block, Hash};
use std::collections::HashMap;

use super::{BlockTxn, GetBlockTxn, PeerId};

/// Re-request for every `None` position, or `None` if nothing is missing.
pub fn build_rerequest(block_hash: Hash, resolved: &[Option<Hash>]) -> Option<GetBlockTxn> {
    let indexes: Vec<u16> = resolved
        .iter()
        .enumerate()
        .filter(|(_, h)| h.is_none())
        .filter_map(|(i, _)| u16::try_from(i).ok())
        .collect();
    if indexes.is_empty() {
        None
    } else {
        Some(GetBlockTxn {
            block_hash,
            indexes,
        })
    }
}

/// Why a re-request cannot be served from a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    TooManyIndexes { requested: usize, available: usize },
    IndexOutOfRange { index: u16, available: usize },
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyIndexes {
                requested,
                available,
            } => write!(
                f,
                "{} indexes requested from a block of {} transactions",
                requested, available
            ),
            Self::IndexOutOfRange { index, available } => write!(
                f,
                "index {} out of range for a block of {} transactions",
                index, available
            ),
        }
    }
}

/// Transactions at `indexes` of `block`, in requested order.
pub fn serve_request(block: &Block, indexes: &[u16]) -> Result<BlockTxn, ServeError> {
    let available = block.transactions.len();
    if indexes.len() > available {
        return Err(ServeError::TooManyIndexes {
            requested: indexes.len(),
            available,
        });
    }
    let transactions = indexes
        .iter()
        .map(|&index| {
            block
                .transactions
                .get(usize::from(index))
                .cloned()
                .ok_or(ServeError::IndexOutOfRange { index, available })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockTxn {
        block_hash: block.hash(),
        transactions,
    })
}

/// Rate decision for one incoming re-request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed { count: f64 },
    Exceeded { count: f64 },
}

#[derive(Debug, Clone, Copy)]
struct DecayingCounter {
    count: f64,
    last_ms: u64,
}

/// Per-peer decaying request counter.
///
/// On each request: `count = count * decay^(elapsed_secs) + 1`. A request
/// that pushes the count above the threshold is refused.
#[derive(Debug)]
pub struct RequestRateLimiter {
    peers: Mutex<HashMap<PeerId, DecayingCounter>>,
    threshold: f64,
    decay: f64,
}

impl RequestRateLimiter {
    pub fn new(threshold: f64, decay: f64) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            threshold,
            decay,
        }
    }

    pub fn record(&self, peer: PeerId, now_ms: u64) -> RateDecision {
        let mut peers = self.peers.lock();
        let counter = peers.entry(peer).or_insert(DecayingCounter {
            count: 0.0,
            last_ms: now_ms,
        });
        let elapsed_secs = now_ms.saturating_sub(counter.last_ms) as f64 / 1000.0;
        counter.count = counter.count * self.decay.powf(elapsed_secs) + 1.0;
        counter.last_ms = now_ms;

        if counter.count > self.threshold {
            RateDecision::Exceeded {
                count: counter.count,
            }
        } else {
            RateDecision::Allowed {
                count: counter.count,
            }
        }
    }

    pub fn forget(&self, peer: &PeerId) {
        self.peers.lock().remove(peer);
    }

    pub fn tracked_peers(&self) -> usize {
        self.peers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reconstruct::tests::block_with;

    const DECAY: f64 = 1.0 - 1.0 / 600.0;

    #[test]
    fn test_build_rerequest_lists_null_positions() {
        let resolved = vec![Some([1u8; 32]), None, Some([2u8; 32]), None];
        let request = build_rerequest([9u8; 32], &resolved).unwrap();
        assert_eq!(request.indexes, vec![1, 3]);
        assert_eq!(request.block_hash, [9u8; 32]);

        assert!(build_rerequest([9u8; 32], &[Some([1u8; 32])]).is_none());
    }

    #[test]
    fn test_serve_request_in_requested_order() {
        let block = block_with(4);
        let response = serve_request(&block, &[3, 1]).unwrap();
        assert_eq!(response.block_hash, block.hash());
        assert_eq!(
            response.transactions,
            vec![block.transactions[3].clone(), block.transactions[1].clone()]
        );
    }

    #[test]
    fn test_serve_request_out_of_range() {
        let block = block_with(2);
        assert_eq!(
            serve_request(&block, &[5]),
            Err(ServeError::IndexOutOfRange {
                index: 5,
                available: 3
            })
        );
        assert!(matches!(
            serve_request(&block, &[0, 1, 2, 3]),
            Err(ServeError::TooManyIndexes { .. })
        ));
    }

    #[test]
    fn test_twenty_first_request_refused() {
        let limiter = RequestRateLimiter::new(20.0, DECAY);
        let peer = PeerId::new([1u8; 32]);
        for i in 0..20 {
            assert!(matches!(
                limiter.record(peer, 1_000 + i * 1_000),
                RateDecision::Allowed { .. }
            ));
        }
        assert!(matches!(
            limiter.record(peer, 21_000),
            RateDecision::Exceeded { .. }
        ));
    }

    #[test]
    fn test_counter_decays() {
        let limiter = RequestRateLimiter::new(20.0, DECAY);
        let peer = PeerId::new([1u8; 32]);
        for _ in 0..20 {
            limiter.record(peer, 0);
        }
        // An hour later the count has decayed to well under one
        match limiter.record(peer, 3_600_000) {
            RateDecision::Allowed { count } => assert!(count < 2.0),
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_peers_are_independent() {
        let limiter = RequestRateLimiter::new(1.0, DECAY);
        let a = PeerId::new([1u8; 32]);
        let b = PeerId::new([2u8; 32]);
        assert!(matches!(limiter.record(a, 0), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.record(a, 0), RateDecision::Exceeded { .. }));
        assert!(matches!(limiter.record(b, 0), RateDecision::Allowed { .. }));

        limiter.forget(&a);
        assert_eq!(limiter.tracked_peers(), 1);
    }
}
