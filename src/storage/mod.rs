//! Storage layer for segment bytes.
//!
//! A segment is always read through a [`SegmentBytes`] value: either an
//! owned buffer (segments built or merged in memory) or a read-only memory
//! map of a persisted file. All reads go through [`ByteView`], whose
//! accessors are bounds-checked and report overruns as corruption errors
//! instead of panicking.

use std::ops::Deref;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;

use crate::error::{Result, StrataError};
use crate::util::varint::{VarintReader, decode_u64};

pub mod mmap;
pub mod structured;

/// Backing bytes of a segment.
#[derive(Debug)]
pub enum SegmentBytes {
    /// Bytes owned by the process (freshly built or merged segment).
    Owned(Vec<u8>),
    /// Read-only memory map of a segment file.
    Mapped(Mmap),
}

impl SegmentBytes {
    /// Borrow the bytes as a bounds-checked view.
    pub fn view(&self) -> ByteView<'_> {
        ByteView::new(self)
    }

    /// Whether the bytes come from a memory map.
    pub fn is_mapped(&self) -> bool {
        matches!(self, SegmentBytes::Mapped(_))
    }
}

impl Deref for SegmentBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            SegmentBytes::Owned(bytes) => bytes,
            SegmentBytes::Mapped(mmap) => mmap,
        }
    }
}

/// Bounds-checked, copy-free view over segment bytes.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
}

impl<'a> ByteView<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        ByteView { data }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The underlying slice.
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    /// `[start, end)` as a slice, or a corruption error naming the range.
    pub fn range(&self, start: u64, end: u64) -> Result<&'a [u8]> {
        if start > end || end > self.data.len() as u64 {
            return Err(StrataError::corrupt(format!(
                "range [{start}, {end}) outside segment of {} bytes",
                self.data.len()
            )));
        }
        Ok(&self.data[start as usize..end as usize])
    }

    /// `len` bytes starting at `start`.
    pub fn slice(&self, start: u64, len: u64) -> Result<&'a [u8]> {
        let end = start.checked_add(len).ok_or_else(|| {
            StrataError::corrupt(format!("length {len} at offset {start} overflows"))
        })?;
        self.range(start, end)
    }

    /// Everything from `start` to the end of the view.
    pub fn tail(&self, start: u64) -> Result<&'a [u8]> {
        self.range(start, self.data.len() as u64)
    }

    /// Fixed 8-byte big-endian integer at `offset`.
    pub fn read_u64_be(&self, offset: u64) -> Result<u64> {
        Ok(BigEndian::read_u64(self.slice(offset, 8)?))
    }

    /// Fixed 4-byte big-endian integer at `offset`.
    pub fn read_u32_be(&self, offset: u64) -> Result<u32> {
        Ok(BigEndian::read_u32(self.slice(offset, 4)?))
    }

    /// Unsigned varint at `offset`, returning the value and its encoded length.
    pub fn read_uvarint(&self, offset: u64) -> Result<(u64, usize)> {
        decode_u64(self.tail(offset)?)
            .map_err(|e| StrataError::corrupt(format!("{e} at offset {offset}")))
    }

    /// Length-prefixed byte string at `offset` (uvarint length, then bytes).
    pub fn read_len_prefixed(&self, offset: u64) -> Result<&'a [u8]> {
        let (len, read) = self.read_uvarint(offset)?;
        self.slice(offset + read as u64, len)
    }

    /// Sequential varint reader starting at `offset`.
    pub fn reader_at(&self, offset: u64) -> Result<VarintReader<'a>> {
        Ok(VarintReader::new(self.tail(offset)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::varint::put_uvarint;

    #[test]
    fn test_range_checks() {
        let data = vec![1u8, 2, 3, 4];
        let view = ByteView::new(&data);

        assert_eq!(view.range(1, 3).unwrap(), &[2, 3]);
        assert!(view.range(3, 5).unwrap_err().is_corrupt());
        assert!(view.slice(u64::MAX, 2).is_err());
        assert!(view.read_u64_be(0).is_err());
    }

    #[test]
    fn test_len_prefixed() {
        let mut data = Vec::new();
        put_uvarint(&mut data, 5);
        data.extend_from_slice(b"hello");
        let view = ByteView::new(&data);

        assert_eq!(view.read_len_prefixed(0).unwrap(), b"hello");

        data.truncate(4);
        let view = ByteView::new(&data);
        assert!(view.read_len_prefixed(0).is_err());
    }

    #[test]
    fn test_owned_segment_bytes() {
        let bytes = SegmentBytes::Owned(vec![0, 0, 0, 0, 0, 0, 1, 0]);
        assert!(!bytes.is_mapped());
        assert_eq!(bytes.view().read_u64_be(0).unwrap(), 256);
    }
}
