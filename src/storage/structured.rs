//! Structured binary output for segment files.
//!
//! Every byte of a segment passes through a [`CountHashWriter`], which keeps
//! the running file offset (sections record absolute offsets) and a CRC-32
//! of everything written so far (the footer stores it).

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::Result;
use crate::util::varint::{put_uvarint, put_varint};

/// A writer that counts and checksums the bytes passing through it.
pub struct CountHashWriter<'a> {
    inner: &'a mut dyn Write,
    count: u64,
    hasher: crc32fast::Hasher,
    buf: Vec<u8>,
}

impl<'a> CountHashWriter<'a> {
    /// Wrap a writer; counting starts at zero.
    pub fn new(inner: &'a mut dyn Write) -> Self {
        CountHashWriter {
            inner,
            count: 0,
            hasher: crc32fast::Hasher::new(),
            buf: Vec::with_capacity(64),
        }
    }

    /// Number of bytes written so far (the next write's absolute offset).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// CRC-32 of every byte written so far.
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Write raw bytes.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// Write one unsigned varint.
    pub fn write_uvarint(&mut self, value: u64) -> Result<()> {
        self.buf.clear();
        put_uvarint(&mut self.buf, value);
        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result?;
        Ok(())
    }

    /// Write several unsigned varints back to back.
    pub fn write_uvarints(&mut self, values: &[u64]) -> Result<()> {
        for &value in values {
            self.write_uvarint(value)?;
        }
        Ok(())
    }

    /// Write one zigzag-encoded signed varint.
    pub fn write_varint(&mut self, value: i64) -> Result<()> {
        self.buf.clear();
        put_varint(&mut self.buf, value);
        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result?;
        Ok(())
    }

    /// Write bytes preceded by their uvarint length.
    pub fn write_len_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_uvarint(bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Write a fixed 8-byte big-endian integer.
    pub fn write_u64_be(&mut self, value: u64) -> Result<()> {
        WriteBytesExt::write_u64::<BigEndian>(self, value)?;
        Ok(())
    }

    /// Write a fixed 4-byte big-endian integer.
    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        WriteBytesExt::write_u32::<BigEndian>(self, value)?;
        Ok(())
    }
}

impl Write for CountHashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_crc() {
        let mut sink = Vec::new();
        {
            let mut w = CountHashWriter::new(&mut sink);
            w.write_raw(b"abc").unwrap();
            w.write_uvarint(300).unwrap();
            w.write_u64_be(7).unwrap();
            assert_eq!(w.count(), 3 + 2 + 8);
            assert_eq!(w.crc32(), crc32fast::hash(&{
                let mut expected = b"abc".to_vec();
                expected.extend_from_slice(&[0xAC, 0x02]);
                expected.extend_from_slice(&7u64.to_be_bytes());
                expected
            }));
        }
        assert_eq!(sink.len(), 13);
    }

    #[test]
    fn test_len_prefixed() {
        let mut sink = Vec::new();
        let mut w = CountHashWriter::new(&mut sink);
        w.write_len_prefixed(b"term").unwrap();
        assert_eq!(w.count(), 5);
        drop(w);
        assert_eq!(sink, b"\x04term");
    }
}
