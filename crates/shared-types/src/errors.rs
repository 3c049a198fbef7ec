//! # Error Types
//!
//! Defines error types shared by the wire codecs of every crate.

use thiserror::Error;

/// Errors raised while decoding consensus-serialized data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// CompactSize value not in its shortest form.
    #[error("Non-canonical CompactSize encoding")]
    NonCanonicalSize,

    /// CompactSize value above the allowed maximum.
    #[error("Size {size} exceeds maximum {max}")]
    SizeTooLarge { size: u64, max: u64 },

    /// Bytes left over after the top-level value was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Semantic violation detected while decoding.
    #[error("Invalid data: {0}")]
    Invalid(String),
}
