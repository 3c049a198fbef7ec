//! Adapters layer for the Compact Relay subsystem.
//!
//! In-process implementations of outbound ports, used by embedders that keep
//! their transaction sources in memory and by tests.

pub mod clock;
pub mod pools;

pub use clock::ManualTimeSource;
pub use pools::InMemoryTransactionPools;
