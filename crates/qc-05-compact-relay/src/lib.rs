//! # Compact Relay Subsystem (qc-05)
//!
//! Receives blocks as compact announcements (header, nonce, 48-bit short ids
//! and a few prefilled transactions) and rebuilds them from transactions
//! already held locally, asking the sender only for what is missing.
//!
//! ## Architecture Role
//!
//! ```text
//! [Peer] ──cmpctblock──→ [Compact Relay (5)] ──process_block──→ [Consensus]
//!    ↑                        │      ↑
//!    └──────getblocktxn───────┘      └── orphan cache / mempool / commit queue
//!    ───────blocktxn─────────→
//! ```
//!
//! ## Failure Handling
//!
//! - Malformed or unsolicited messages: penalize the sender
//! - Short id collision, merkle mismatch, too many missing: request the full block, no penalty
//! - Memory ceiling breach: evict the largest session and disconnect its peer

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;

pub use domain::*;
pub use events::{CompletedBlock, ErrorKind, RelayError, RelayMessage, RelayOutcome};
pub use ports::inbound::CompactRelayApi;
pub use service::{CompactRelayService, ReconciliationContext};
