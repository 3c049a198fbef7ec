//! # Wire Codec
//!
//! ```text
//! CompactBlock: [header: 80][nonce: 8][count][short_id: 6]*[count][{delta, tx}]*
//! GetBlockTxn:  [block_hash: 32][count][index delta]*
//! BlockTxn:     [block_hash: 32][count][tx]*
//! ```
//!
//! Counts and deltas are CompactSize. `GetBlockTxn` indexes are stored as
//! the gap from the previous index plus one. Decoding grows vectors at most
//! [`READ_CHUNK`] entries at a time so a forged count cannot force a large
//! allocation before the bytes backing it are seen.

use std::sync::Arc;

use shared_types::{BlockHeader, DecodeError, Transaction, WireReader, WireWriter};

use super::{BlockTxn, CompactBlock, GetBlockTxn, PrefilledTransaction, ShortId};

/// Largest number of entries reserved ahead of reading them.
pub const READ_CHUNK: usize = 1000;

fn read_chunked<T>(
    r: &mut WireReader<'_>,
    count: usize,
    mut read_one: impl FnMut(&mut WireReader<'_>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let mut out = Vec::new();
    while out.len() < count {
        out.reserve((count - out.len()).min(READ_CHUNK));
        let chunk_end = (out.len() + READ_CHUNK).min(count);
        while out.len() < chunk_end {
            out.push(read_one(r)?);
        }
    }
    Ok(out)
}

fn read_u16_index(r: &mut WireReader<'_>) -> Result<u16, DecodeError> {
    let raw = r.get_compact_size_raw()?;
    u16::try_from(raw).map_err(|_| DecodeError::Invalid("index overflowed 16 bits".into()))
}

impl CompactBlock {
    pub fn encode(&self, w: &mut WireWriter) {
        self.header.encode(w);
        w.put_u64(self.nonce);
        w.put_compact_size(self.short_ids.len() as u64);
        for id in &self.short_ids {
            w.put_bytes(&id.to_le_bytes());
        }
        w.put_compact_size(self.prefilled.len() as u64);
        for p in &self.prefilled {
            w.put_compact_size(u64::from(p.position_delta));
            p.tx.encode(w);
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(r)?;
        let nonce = r.get_u64()?;

        let count = r.get_compact_size()? as usize;
        let short_ids = read_chunked(r, count, |r| {
            Ok(ShortId::from_le_bytes(r.take_array()?))
        })?;

        let count = r.get_compact_size()? as usize;
        let prefilled = read_chunked(r, count, |r| {
            let position_delta = read_u16_index(r)?;
            let tx = Arc::new(Transaction::decode(r)?);
            Ok(PrefilledTransaction { position_delta, tx })
        })?;

        Ok(Self {
            header,
            nonce,
            short_ids,
            prefilled,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode a complete payload, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        let compact = Self::decode(&mut r)?;
        r.finish()?;
        Ok(compact)
    }
}

impl GetBlockTxn {
    /// `indexes` must be strictly increasing.
    pub fn encode(&self, w: &mut WireWriter) {
        w.put_bytes(&self.block_hash);
        w.put_compact_size(self.indexes.len() as u64);
        let mut next: u32 = 0;
        for &index in &self.indexes {
            debug_assert!(u32::from(index) >= next, "indexes must increase");
            w.put_compact_size(u64::from(u32::from(index).saturating_sub(next)));
            next = u32::from(index) + 1;
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let block_hash = r.take_array()?;
        let count = r.get_compact_size()? as usize;
        let deltas = read_chunked(r, count, read_u16_index)?;

        let mut indexes = Vec::with_capacity(deltas.len());
        let mut offset: u32 = 0;
        for delta in deltas {
            let index = u32::from(delta) + offset;
            let index = u16::try_from(index)
                .map_err(|_| DecodeError::Invalid("indexes overflowed 16 bits".into()))?;
            indexes.push(index);
            offset = u32::from(index) + 1;
        }
        Ok(Self {
            block_hash,
            indexes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        let request = Self::decode(&mut r)?;
        r.finish()?;
        Ok(request)
    }
}

impl BlockTxn {
    pub fn encode(&self, w: &mut WireWriter) {
        w.put_bytes(&self.block_hash);
        w.put_compact_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode(w);
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let block_hash = r.take_array()?;
        let count = r.get_compact_size()? as usize;
        let transactions = read_chunked(r, count, |r| Ok(Arc::new(Transaction::decode(r)?)))?;
        Ok(Self {
            block_hash,
            transactions,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        let response = Self::decode(&mut r)?;
        r.finish()?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shared_types::{Hash, TxOut};

    fn coinbase() -> Arc<Transaction> {
        Arc::new(Transaction::new_coinbase(b"wire", 50, vec![0x51]))
    }

    fn sample_compact() -> CompactBlock {
        CompactBlock {
            header: BlockHeader {
                version: 2,
                prev_block: [3u8; 32],
                merkle_root: [4u8; 32],
                time: 1_700_000_000,
                bits: 0x1D00_FFFF,
                nonce: 9,
            },
            nonce: 0xDEAD_BEEF,
            short_ids: vec![ShortId::new(1), ShortId::new(ShortId::MASK)],
            prefilled: vec![PrefilledTransaction {
                position_delta: 0,
                tx: coinbase(),
            }],
        }
    }

    #[test]
    fn test_compact_block_layout() {
        let compact = sample_compact();
        let bytes = compact.to_bytes();
        let tx_len = compact.prefilled[0].tx.serialized_size();
        // header + nonce + count + 2 short ids + count + delta + tx
        assert_eq!(bytes.len(), 80 + 8 + 1 + 12 + 1 + 1 + tx_len);
        assert_eq!(&bytes[88..89], &[2]);
        assert_eq!(&bytes[89..95], &[1, 0, 0, 0, 0, 0]);
        assert_eq!(CompactBlock::from_bytes(&bytes).unwrap(), compact);
    }

    #[test]
    fn test_compact_block_truncated() {
        let bytes = sample_compact().to_bytes();
        assert!(matches!(
            CompactBlock::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_forged_count_fails_without_allocating() {
        let mut w = WireWriter::new();
        BlockHeader::default().encode(&mut w);
        w.put_u64(0);
        // Claims the maximum count but carries a single short id
        w.put_compact_size(shared_types::encoding::MAX_SIZE);
        w.put_bytes(&[0u8; 6]);
        let bytes = w.into_bytes();
        assert!(matches!(
            CompactBlock::from_bytes(&bytes),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_prefilled_delta_overflow() {
        let mut w = WireWriter::new();
        BlockHeader::default().encode(&mut w);
        w.put_u64(0);
        w.put_compact_size(0);
        w.put_compact_size(1);
        w.put_compact_size(70_000);
        coinbase().encode(&mut w);
        assert!(matches!(
            CompactBlock::from_bytes(&w.into_bytes()),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn test_get_block_txn_differential() {
        let request = GetBlockTxn {
            block_hash: [7u8; 32],
            indexes: vec![0, 1, 5, 300],
        };
        let bytes = request.to_bytes();
        // hash + count + deltas 0, 0, 3, 294 (3-byte CompactSize)
        assert_eq!(&bytes[32..], &[4, 0, 0, 3, 0xFD, 0x26, 0x01]);
        assert_eq!(GetBlockTxn::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_get_block_txn_cumulative_overflow() {
        let mut w = WireWriter::new();
        w.put_bytes(&[7u8; 32]);
        w.put_compact_size(2);
        w.put_compact_size(u64::from(u16::MAX));
        w.put_compact_size(0);
        assert!(matches!(
            GetBlockTxn::from_bytes(&w.into_bytes()),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn test_block_txn_roundtrip() {
        let mut tx = (*coinbase()).clone();
        tx.outputs.push(TxOut {
            value: 1,
            script_pubkey: vec![0xAA; 300],
        });
        let response = BlockTxn {
            block_hash: [8u8; 32],
            transactions: vec![coinbase(), Arc::new(tx)],
        };
        assert_eq!(BlockTxn::from_bytes(&response.to_bytes()).unwrap(), response);
    }

    proptest! {
        #[test]
        fn prop_get_block_txn_preserves_increasing_indexes(
            hash in any::<Hash>(),
            raw in proptest::collection::btree_set(any::<u16>(), 1..200),
        ) {
            let request = GetBlockTxn {
                block_hash: hash,
                indexes: raw.into_iter().collect(),
            };
            prop_assert_eq!(GetBlockTxn::from_bytes(&request.to_bytes()).unwrap(), request);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = CompactBlock::from_bytes(&bytes);
            let _ = GetBlockTxn::from_bytes(&bytes);
            let _ = BlockTxn::from_bytes(&bytes);
        }
    }
}
