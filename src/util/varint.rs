//! Variable-length integer encoding utilities.
//!
//! Unsigned values use LEB128 (7 bits per byte, high bit set on every byte
//! except the last). Signed values are zigzag-mapped first so small negative
//! numbers stay short.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, StrataError};

/// Maximum encoded length of a u64.
pub const MAX_VARINT_LEN64: usize = 10;

/// Append the LEB128 encoding of `value` to `buf`, returning the number of bytes written.
pub fn put_uvarint(buf: &mut Vec<u8>, value: u64) -> usize {
    let mut val = value;
    let mut written = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.push(byte);
        written += 1;

        if val == 0 {
            return written;
        }
    }
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN64);
    put_uvarint(&mut bytes, value);
    bytes
}

/// Decode a u64 value from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte > 1) {
            return Err(StrataError::corrupt("varint overflows u64"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(StrataError::corrupt("incomplete varint"))
}

/// Map a signed value onto an unsigned one (0, -1, 1, -2, ... => 0, 1, 2, 3, ...).
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append a zigzag-encoded signed varint.
pub fn put_varint(buf: &mut Vec<u8>, value: i64) -> usize {
    put_uvarint(buf, zigzag_encode(value))
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(StrataError::corrupt("varint overflows u64"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Sequential varint decoder over a byte slice.
///
/// Used by the chunk decoders, which read many small integers from one
/// bounded region of the segment.
#[derive(Debug, Clone)]
pub struct VarintReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VarintReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        VarintReader { data, pos: 0 }
    }

    /// Read the next unsigned varint.
    pub fn read_uvarint(&mut self) -> Result<u64> {
        let (value, read) = decode_u64(&self.data[self.pos..]).map_err(|e| {
            StrataError::corrupt(format!("{e} (at relative offset {})", self.pos))
        })?;
        self.pos += read;
        Ok(value)
    }

    /// Read the next zigzag-encoded signed varint.
    pub fn read_varint(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.read_uvarint()?))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                StrataError::corrupt(format!(
                    "read of {len} bytes at relative offset {} overruns {} byte region",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Current position within the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_zigzag() {
        for value in [0i64, -1, 1, -2, 2, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
    }

    #[test]
    fn test_write_read_u64() {
        let mut buffer = Vec::new();
        let value = 123456789012345u64;

        let bytes_written = write_u64(&mut buffer, value).unwrap();
        assert_eq!(bytes_written, buffer.len());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u64(&mut cursor).unwrap(), value);
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u64(0).len(), 1);
        assert_eq!(encode_u64(127).len(), 1);
        assert_eq!(encode_u64(128).len(), 2);
        assert_eq!(encode_u64(16384).len(), 3);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT_LEN64);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(decode_u64(&incomplete).is_err());

        let mut reader = VarintReader::new(&incomplete);
        assert!(reader.read_uvarint().is_err());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 11];
        assert!(decode_u64(&overflow_data).is_err());
    }

    #[test]
    fn test_varint_reader_sequence() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 300);
        put_varint(&mut buf, -42);
        buf.extend_from_slice(b"abc");

        let mut reader = VarintReader::new(&buf);
        assert_eq!(reader.read_uvarint().unwrap(), 300);
        assert_eq!(reader.read_varint().unwrap(), -42);
        assert_eq!(reader.read_bytes(3).unwrap(), b"abc");
        assert!(reader.is_empty());
        assert!(reader.read_bytes(1).is_err());
    }
}
