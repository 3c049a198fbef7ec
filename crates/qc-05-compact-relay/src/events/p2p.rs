//! P2P message types for the Compact Relay subsystem.

use shared_types::DecodeError;

use crate::domain::{BlockTxn, CompactBlock, GetBlockTxn};

/// Relay messages carried by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayMessage {
    /// Compact block announcement
    CompactBlock(CompactBlock),
    /// Request missing transactions for a compact block
    GetBlockTxn(GetBlockTxn),
    /// Missing transactions response
    BlockTxn(BlockTxn),
}

impl RelayMessage {
    pub const CMPCTBLOCK: &'static str = "cmpctblock";
    pub const GETBLOCKTXN: &'static str = "getblocktxn";
    pub const BLOCKTXN: &'static str = "blocktxn";

    /// Command name used on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            Self::CompactBlock(_) => Self::CMPCTBLOCK,
            Self::GetBlockTxn(_) => Self::GETBLOCKTXN,
            Self::BlockTxn(_) => Self::BLOCKTXN,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::CompactBlock(compact) => compact.to_bytes(),
            Self::GetBlockTxn(request) => request.to_bytes(),
            Self::BlockTxn(response) => response.to_bytes(),
        }
    }

    /// Decode a payload for `command`.
    ///
    /// Returns `Ok(None)` for commands this subsystem does not handle.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Option<Self>, DecodeError> {
        let message = match command {
            Self::CMPCTBLOCK => Self::CompactBlock(CompactBlock::from_bytes(payload)?),
            Self::GETBLOCKTXN => Self::GetBlockTxn(GetBlockTxn::from_bytes(payload)?),
            Self::BLOCKTXN => Self::BlockTxn(BlockTxn::from_bytes(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}
