//! Ports layer for the Compact Relay subsystem.
//!
//! - Inbound (Driving) ports: entry points called by the transport
//! - Outbound (Driven) ports: pools, storage, consensus and peer management

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
