//! # Core Domain Entities
//!
//! Chain primitives shared by every subsystem.
//!
//! - [`BlockHeader`]: 80-byte proof-of-work header
//! - [`Transaction`]: UTXO transaction (inputs, outputs, lock time)
//! - [`Block`]: header plus ordered transaction list
//!
//! All entities use the consensus wire serialization (little-endian fields,
//! CompactSize counts). Identifiers are double SHA-256 of that serialization.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoding::{compact_size_len, WireReader, WireWriter};
use crate::errors::DecodeError;
use crate::hashing::{compute_merkle_root, sha256d};

/// A 32-byte hash (double SHA-256).
pub type Hash = [u8; 32];

/// The all-zero hash, used as "no value".
pub const NULL_HASH: Hash = [0u8; 32];

/// Shared, immutable transaction handle.
pub type TransactionRef = Arc<Transaction>;

/// Displays a hash the way block explorers do (byte-reversed hex).
pub struct HashHex<'a>(pub &'a Hash);

impl fmt::Display for HashHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = *self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

// =============================================================================
// BLOCK HEADER
// =============================================================================

/// Proof-of-work block header.
///
/// ```text
/// [version: 4][prev_block: 32][merkle_root: 32][time: 4][bits: 4][nonce: 4]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    pub version: i32,
    /// Hash of the parent block.
    pub prev_block: Hash,
    /// Merkle root of the block's transaction ids.
    pub merkle_root: Hash,
    pub time: u32,
    /// Compact difficulty target. Zero marks a null header.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 80;

    /// A header with `bits == 0` was never filled in.
    pub fn is_null(&self) -> bool {
        self.bits == 0
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.version);
        w.put_bytes(&self.prev_block);
        w.put_bytes(&self.merkle_root);
        w.put_u32(self.time);
        w.put_u32(self.bits);
        w.put_u32(self.nonce);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: r.get_i32()?,
            prev_block: r.take_array()?,
            merkle_root: r.take_array()?,
            time: r.get_u32()?,
            bits: r.get_u32()?,
            nonce: r.get_u32()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut w = WireWriter::with_capacity(Self::SIZE);
        self.encode(&mut w);
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(&w.into_bytes());
        out
    }

    /// Block hash (double SHA-256 of the 80 header bytes).
    pub fn hash(&self) -> Hash {
        sha256d(&self.to_bytes())
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Reference to a previous transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The outpoint spent by a coinbase input.
    pub const fn null() -> Self {
        Self {
            txid: NULL_HASH,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == NULL_HASH && self.index == u32::MAX
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in base units.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// A UTXO transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Builds a coinbase paying `value` to `script_pubkey`.
    ///
    /// `tag` goes into the coinbase script so different blocks get
    /// different coinbase ids.
    pub fn new_coinbase(tag: &[u8], value: i64, script_pubkey: Vec<u8>) -> Self {
        Self {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: tag.to_vec(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value,
                script_pubkey,
            }],
            lock_time: 0,
        }
    }

    /// No inputs and no outputs.
    pub fn is_null(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.version);
        w.put_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            w.put_bytes(&input.prevout.txid);
            w.put_u32(input.prevout.index);
            w.put_var_bytes(&input.script_sig);
            w.put_u32(input.sequence);
        }
        w.put_compact_size(self.outputs.len() as u64);
        for output in &self.outputs {
            w.put_bytes(&output.value.to_le_bytes());
            w.put_var_bytes(&output.script_pubkey);
        }
        w.put_u32(self.lock_time);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let version = r.get_i32()?;

        let input_count = r.get_compact_size()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1000));
        for _ in 0..input_count {
            let txid = r.take_array()?;
            let index = r.get_u32()?;
            let script_sig = r.get_var_bytes()?;
            let sequence = r.get_u32()?;
            inputs.push(TxIn {
                prevout: OutPoint { txid, index },
                script_sig,
                sequence,
            });
        }

        let output_count = r.get_compact_size()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1000));
        for _ in 0..output_count {
            let value = i64::from_le_bytes(r.take_array()?);
            let script_pubkey = r.get_var_bytes()?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        let lock_time = r.get_u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(self.serialized_size());
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Serialized size without building the buffer.
    pub fn serialized_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 32 + 4 + compact_size_len(i.script_sig.len() as u64) + i.script_sig.len() + 4)
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + compact_size_len(o.script_pubkey.len() as u64) + o.script_pubkey.len())
            .sum();
        4 + compact_size_len(self.inputs.len() as u64)
            + inputs
            + compact_size_len(self.outputs.len() as u64)
            + outputs
            + 4
    }

    /// Transaction id.
    pub fn txid(&self) -> Hash {
        sha256d(&self.to_bytes())
    }
}

// =============================================================================
// BLOCK
// =============================================================================

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<TransactionRef>,
}

impl Block {
    /// Builds a block whose header commits to `transactions`.
    pub fn new(mut header: BlockHeader, transactions: Vec<TransactionRef>) -> Self {
        let txids: Vec<Hash> = transactions.iter().map(|tx| tx.txid()).collect();
        header.merkle_root = compute_merkle_root(&txids).0;
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn txids(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.txid()).collect()
    }

    pub fn serialized_size(&self) -> usize {
        BlockHeader::SIZE
            + compact_size_len(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(|tx| tx.serialized_size())
                .sum::<usize>()
    }

    pub fn encode(&self, w: &mut WireWriter) {
        self.header.encode(w);
        w.put_compact_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode(w);
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(r)?;
        let count = r.get_compact_size()? as usize;
        let mut transactions = Vec::with_capacity(count.min(1000));
        for _ in 0..count {
            transactions.push(Arc::new(Transaction::decode(r)?));
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
