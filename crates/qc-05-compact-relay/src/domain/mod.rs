//! # Domain Layer for Compact Relay
//!
//! Pure business logic with no I/O dependencies. This is the innermost layer
//! of the hexagonal architecture.
//!
//! ## Contents
//!
//! - **entities**: Wire-level entities (`CompactBlock`, `ShortId`, `GetBlockTxn`, `PeerId`)
//! - **services**: Short id keys and announcement building
//! - **wire**: Encoding and bounded decoding of the three relay messages
//! - **invariants**: Structural checks on incoming messages
//! - **reconstruct**: Merge, reverse index, resolution, assembly
//! - **session**: Per-peer reconciliation state machine
//! - **retry**: Re-request building, serving and rate limiting
//! - **memory**: Global and per-session byte accounting
//! - **stats**: Rolling bandwidth statistics
//! - **value_objects**: Configuration
//!
//! ## Design Principles
//!
//! 1. **No I/O**: All functions are pure and synchronous
//! 2. **Pools behind a view**: Reconstruction reads transactions only through [`PoolView`]
//! 3. **Testable**: All logic can be unit tested without mocks

mod entities;
mod invariants;
mod memory;
pub mod reconstruct;
mod retry;
mod services;
mod session;
pub mod stats;
mod value_objects;
pub mod wire;

pub use entities::*;
pub use invariants::*;
pub use memory::*;
pub use reconstruct::{PoolSource, PoolView};
pub use retry::*;
pub use services::*;
pub use session::*;
pub use stats::{BandwidthStatsTracker, LatencySummary, StatsSnapshot, StatsWindow};
pub use value_objects::*;
