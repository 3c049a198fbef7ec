//! # Wire Encoding Primitives
//!
//! Little-endian integers and the CompactSize variable-length integer used
//! by every P2P message on the network.
//!
//! ## CompactSize
//!
//! ```text
//! value < 0xFD         -> 1 byte
//! value <= 0xFFFF      -> 0xFD + u16 LE
//! value <= 0xFFFF_FFFF -> 0xFE + u32 LE
//! otherwise            -> 0xFF + u64 LE
//! ```
//!
//! Decoding rejects non-canonical (over-long) encodings.

use crate::errors::DecodeError;

/// Largest CompactSize accepted when it describes a length or count.
pub const MAX_SIZE: u64 = 0x0200_0000;

/// Serialized size of a CompactSize value.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Append-only byte writer.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_compact_size(&mut self, value: u64) {
        match value {
            0..=0xFC => self.put_u8(value as u8),
            0xFD..=0xFFFF => {
                self.put_u8(0xFD);
                self.put_u16(value as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.put_u8(0xFE);
                self.put_u32(value as u32);
            }
            _ => {
                self.put_u8(0xFF);
                self.put_u64(value);
            }
        }
    }

    /// Length-prefixed byte string.
    pub fn put_var_bytes(&mut self, bytes: &[u8]) {
        self.put_compact_size(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Reads a CompactSize without a range limit.
    pub fn get_compact_size_raw(&mut self) -> Result<u64, DecodeError> {
        let value = match self.get_u8()? {
            0xFD => {
                let v = u64::from(self.get_u16()?);
                if v < 0xFD {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
            0xFE => {
                let v = u64::from(self.get_u32()?);
                if v <= 0xFFFF {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
            0xFF => {
                let v = self.get_u64()?;
                if v <= 0xFFFF_FFFF {
                    return Err(DecodeError::NonCanonicalSize);
                }
                v
            }
            small => u64::from(small),
        };
        Ok(value)
    }

    /// Reads a CompactSize used as a length or count (bounded by [`MAX_SIZE`]).
    pub fn get_compact_size(&mut self) -> Result<u64, DecodeError> {
        let size = self.get_compact_size_raw()?;
        if size > MAX_SIZE {
            return Err(DecodeError::SizeTooLarge {
                size,
                max: MAX_SIZE,
            });
        }
        Ok(size)
    }

    pub fn get_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.get_compact_size()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
