//! Errors and outcomes for the Compact Relay subsystem.
//!
//! Entry points return `Result<RelayOutcome, RelayError>`. Fallbacks to a
//! full block are outcomes, not errors: they happen to honest peers.

use shared_types::{DecodeError, Hash, HashHex};
use thiserror::Error;

use crate::domain::{FallbackReason, PeerId, PenaltyScores, BAN_SCORE};

pub mod p2p;

pub use p2p::*;

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Error categories used to decide how the transport reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structural violation: penalize and drop.
    MalformedMessage,
    /// Unsolicited, non-capable or rate-exceeding peer: penalize and refuse.
    ProtocolViolation,
    /// Memory ceiling breached: disconnect, no extra penalty.
    ResourceExhaustion,
    /// Announcement does not connect to our chain.
    StaleChain,
    /// Local storage could not serve a request.
    Storage,
    /// Sending to the peer failed.
    Network,
}

/// Compact relay errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    #[error("{message} from non compact-block peer {peer}")]
    NotCapable { peer: PeerId, message: &'static str },

    #[error("malformed {message} from peer {peer}: {reason}")]
    Malformed {
        peer: PeerId,
        message: &'static str,
        reason: String,
    },

    #[error("undecodable {message} from peer {peer}: {source}")]
    Decode {
        peer: PeerId,
        message: &'static str,
        #[source]
        source: DecodeError,
    },

    #[error("compact block {} from peer {peer} does not connect to a known parent", HashHex(.block_hash))]
    UnknownParent { peer: PeerId, block_hash: Hash },

    #[error("compact block {} from peer {peer} failed header checks: {reason}", HashHex(.block_hash))]
    InvalidHeader {
        peer: PeerId,
        block_hash: Hash,
        reason: String,
    },

    #[error("unrequested compact block {} from peer {peer}", HashHex(.block_hash))]
    Unsolicited { peer: PeerId, block_hash: Hash },

    #[error("unrequested blocktxn {} from peer {peer}", HashHex(.block_hash))]
    UnsolicitedResponse { peer: PeerId, block_hash: Hash },

    #[error("peer {peer} sent too many getblocktxn requests (count {count:.2})")]
    ExcessiveRerequests { peer: PeerId, count: f64 },

    #[error("peer {peer} requested transactions of unknown block {}", HashHex(.block_hash))]
    PrematureRequest { peer: PeerId, block_hash: Hash },

    #[error("block {} from peer {peer} repeats transaction {}", HashHex(.block_hash), HashHex(.txid))]
    DuplicateTransactions {
        peer: PeerId,
        block_hash: Hash,
        txid: Hash,
    },

    #[error("block {} from peer {peer} exceeded the memory ceiling ({used} of {ceiling} bytes)", HashHex(.block_hash))]
    MemoryExhausted {
        peer: PeerId,
        block_hash: Hash,
        used: u64,
        ceiling: u64,
    },

    #[error("block {} is indexed but could not be read", HashHex(.block_hash))]
    BlockUnavailable { block_hash: Hash },

    #[error("network error: {0}")]
    Network(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed { .. } | Self::Decode { .. } => ErrorKind::MalformedMessage,
            Self::NotCapable { .. }
            | Self::Unsolicited { .. }
            | Self::UnsolicitedResponse { .. }
            | Self::ExcessiveRerequests { .. }
            | Self::PrematureRequest { .. }
            | Self::DuplicateTransactions { .. } => ErrorKind::ProtocolViolation,
            Self::MemoryExhausted { .. } => ErrorKind::ResourceExhaustion,
            Self::UnknownParent { .. } | Self::InvalidHeader { .. } => ErrorKind::StaleChain,
            Self::BlockUnavailable { .. } => ErrorKind::Storage,
            Self::Network(_) => ErrorKind::Network,
        }
    }

    /// Misbehaviour score to charge the sending peer.
    pub fn penalty(&self, scores: &PenaltyScores) -> u32 {
        match self {
            Self::Malformed { .. } | Self::Decode { .. } => scores.malformed,
            Self::NotCapable { .. } | Self::Unsolicited { .. } | Self::ExcessiveRerequests { .. } => {
                scores.protocol_violation
            }
            Self::InvalidHeader { .. } => scores.invalid_header,
            Self::PrematureRequest { .. } => scores.premature_request,
            Self::DuplicateTransactions { .. } => scores.duplicate_txids,
            Self::UnsolicitedResponse { .. } => scores.unsolicited_response,
            Self::UnknownParent { .. }
            | Self::MemoryExhausted { .. }
            | Self::BlockUnavailable { .. }
            | Self::Network(_) => 0,
        }
    }

    /// Whether the transport should drop the connection.
    pub fn disconnects(&self, scores: &PenaltyScores) -> bool {
        self.kind() == ErrorKind::ResourceExhaustion || self.penalty(scores) >= BAN_SCORE
    }

    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::NotCapable { peer, .. }
            | Self::Malformed { peer, .. }
            | Self::Decode { peer, .. }
            | Self::UnknownParent { peer, .. }
            | Self::InvalidHeader { peer, .. }
            | Self::Unsolicited { peer, .. }
            | Self::UnsolicitedResponse { peer, .. }
            | Self::ExcessiveRerequests { peer, .. }
            | Self::PrematureRequest { peer, .. }
            | Self::DuplicateTransactions { peer, .. }
            | Self::MemoryExhausted { peer, .. } => Some(*peer),
            Self::BlockUnavailable { .. } | Self::Network(_) => None,
        }
    }
}

/// A reassembled block handed to block processing.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBlock {
    pub peer: PeerId,
    pub block_hash: Hash,
    pub tx_count: usize,
    /// Serialized size of the full block.
    pub block_size: u64,
    /// Compact block plus re-request response bytes.
    pub message_size: u64,
    /// Percentage of bytes saved against the full block.
    pub compression_ratio: f64,
    pub unnecessary_prefilled: usize,
}

/// Successful handling results.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Completed(CompletedBlock),
    /// A `GetBlockTxn` for `missing` positions was sent.
    AwaitingTransactions {
        peer: PeerId,
        block_hash: Hash,
        missing: usize,
    },
    /// Reconstruction was abandoned and the full block requested.
    FullBlockRequested {
        peer: PeerId,
        block_hash: Hash,
        reason: FallbackReason,
    },
    /// The block is already stored; nothing requested.
    AlreadyHave { peer: PeerId, block_hash: Hash },
    /// A `GetBlockTxn` was answered.
    Served {
        peer: PeerId,
        block_hash: Hash,
        tx_count: usize,
    },
    /// Announcement sent to a peer.
    Announced {
        peer: PeerId,
        block_hash: Hash,
        message_size: u64,
        block_size: u64,
    },
    /// The block could not be announced compactly and was sent in full.
    FullBlockSent {
        peer: PeerId,
        block_hash: Hash,
        block_size: u64,
    },
    /// Dropped without penalty.
    Ignored { peer: PeerId, reason: &'static str },
}

impl RelayOutcome {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Completed(done) => done.peer,
            Self::AwaitingTransactions { peer, .. }
            | Self::FullBlockRequested { peer, .. }
            | Self::AlreadyHave { peer, .. }
            | Self::Served { peer, .. }
            | Self::Announced { peer, .. }
            | Self::FullBlockSent { peer, .. }
            | Self::Ignored { peer, .. } => *peer,
        }
    }
}

/// Percentage of bytes saved by sending `compact` instead of `original`.
pub fn compression_ratio(compact: u64, original: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        100.0 - 100.0 * compact as f64 / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::new([0xAB; 32])
    }

    #[test]
    fn test_penalties_follow_scores() {
        let scores = PenaltyScores::default();
        let premature = RelayError::PrematureRequest {
            peer: peer(),
            block_hash: [1u8; 32],
        };
        assert_eq!(premature.penalty(&scores), 20);
        assert_eq!(premature.kind(), ErrorKind::ProtocolViolation);
        assert!(!premature.disconnects(&scores));

        let unsolicited = RelayError::Unsolicited {
            peer: peer(),
            block_hash: [1u8; 32],
        };
        assert_eq!(unsolicited.penalty(&scores), 100);
        assert!(unsolicited.disconnects(&scores));
    }

    #[test]
    fn test_stale_chain_unknown_parent_is_silent() {
        let scores = PenaltyScores::default();
        let err = RelayError::UnknownParent {
            peer: peer(),
            block_hash: [2u8; 32],
        };
        assert_eq!(err.kind(), ErrorKind::StaleChain);
        assert_eq!(err.penalty(&scores), 0);
        assert!(!err.disconnects(&scores));
    }

    #[test]
    fn test_memory_exhaustion_disconnects_without_penalty() {
        let scores = PenaltyScores::default();
        let err = RelayError::MemoryExhausted {
            peer: peer(),
            block_hash: [3u8; 32],
            used: 10,
            ceiling: 5,
        };
        assert_eq!(err.penalty(&scores), 0);
        assert!(err.disconnects(&scores));
        assert_eq!(err.peer(), Some(peer()));
    }

    #[test]
    fn test_error_display_shows_peer_prefix() {
        let err = RelayError::NotCapable {
            peer: peer(),
            message: "cmpctblock",
        };
        assert_eq!(
            err.to_string(),
            "cmpctblock from non compact-block peer abababababababab"
        );
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(10, 0), 0.0);
        assert!((compression_ratio(25, 100) - 75.0).abs() < 1e-9);
    }
}
