//! # Shared Types Crate
//!
//! Chain primitives shared across subsystems: hashes, headers, transactions,
//! blocks, and the consensus wire encoding they travel in.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Every crate serializes blocks and
//!   transactions through these types, so hashes agree bit-for-bit.
//! - **No I/O**: Encoding works on in-memory buffers only.

pub mod encoding;
pub mod entities;
pub mod errors;
pub mod hashing;

pub use encoding::{WireReader, WireWriter};
pub use entities::*;
pub use errors::*;
pub use hashing::{compute_merkle_root, sha256, sha256d};
