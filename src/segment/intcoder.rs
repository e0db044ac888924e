//! Chunked integer coder.
//!
//! Values are appended per document as uvarints into the chunk owning that
//! document (`doc / chunk_size`). Chunks are contiguous, so chunk `i` of a
//! decoder always holds documents `[i * chunk_size, (i + 1) * chunk_size)`
//! and distant documents can be reached without decoding earlier chunks.
//!
//! Layout: `uvarint num_chunks`, `num_chunks` cumulative chunk end offsets
//! (uvarints, relative to the data start), then the chunk data.

use crate::error::{Result, StrataError};
use crate::storage::structured::CountHashWriter;
use crate::util::varint::{VarintReader, put_uvarint};

/// Encoder for one chunked integer stream.
#[derive(Debug)]
pub struct IntCoder {
    chunk_size: u64,
    current_chunk: u64,
    chunk_buf: Vec<u8>,
    data: Vec<u8>,
    chunk_ends: Vec<u64>,
}

impl IntCoder {
    /// Create a coder; a zero chunk size is clamped to one.
    pub fn new(chunk_size: u64) -> Self {
        IntCoder {
            chunk_size: chunk_size.max(1),
            current_chunk: 0,
            chunk_buf: Vec::new(),
            data: Vec::new(),
            chunk_ends: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Append values for `doc_num`. Documents must arrive in ascending order.
    pub fn add(&mut self, doc_num: u64, values: &[u64]) {
        let chunk = doc_num / self.chunk_size;
        while chunk > self.current_chunk {
            self.close_chunk();
        }
        for &value in values {
            put_uvarint(&mut self.chunk_buf, value);
        }
    }

    fn close_chunk(&mut self) {
        self.data.append(&mut self.chunk_buf);
        self.chunk_ends.push(self.data.len() as u64);
        self.current_chunk += 1;
    }

    /// Seal the final chunk and write the coder, returning its offset.
    pub fn write_to(mut self, w: &mut CountHashWriter<'_>) -> Result<u64> {
        self.close_chunk();

        let offset = w.count();
        w.write_uvarint(self.chunk_ends.len() as u64)?;
        w.write_uvarints(&self.chunk_ends)?;
        w.write_raw(&self.data)?;
        Ok(offset)
    }
}

/// Random-access reader over an encoded [`IntCoder`] stream.
#[derive(Debug, Clone)]
pub struct IntDecoder<'a> {
    chunk_ends: Vec<u64>,
    data: &'a [u8],
}

impl<'a> IntDecoder<'a> {
    /// Parse the header of a stream starting at the front of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = VarintReader::new(bytes);
        let num_chunks = reader.read_uvarint()?;
        if num_chunks > bytes.len() as u64 {
            return Err(StrataError::corrupt(format!(
                "int coder declares {num_chunks} chunks in {} bytes",
                bytes.len()
            )));
        }

        let mut chunk_ends = Vec::with_capacity(num_chunks as usize);
        let mut last = 0;
        for _ in 0..num_chunks {
            let end = reader.read_uvarint()?;
            if end < last {
                return Err(StrataError::corrupt("int coder chunk offsets not ascending"));
            }
            last = end;
            chunk_ends.push(end);
        }

        let data = reader.read_bytes(last as usize)?;
        Ok(IntDecoder { chunk_ends, data })
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_ends.len()
    }

    /// Reader over chunk `chunk`, or an empty reader past the last chunk.
    pub fn chunk(&self, chunk: usize) -> VarintReader<'a> {
        if chunk >= self.chunk_ends.len() {
            return VarintReader::new(&[]);
        }
        let start = if chunk == 0 {
            0
        } else {
            self.chunk_ends[chunk - 1] as usize
        };
        let end = self.chunk_ends[chunk] as usize;
        VarintReader::new(&self.data[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(coder: IntCoder) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        coder.write_to(&mut w).unwrap();
        drop(w);
        buf
    }

    #[test]
    fn test_chunks_follow_doc_numbers() {
        let mut coder = IntCoder::new(2);
        coder.add(0, &[10, 11]);
        coder.add(1, &[12]);
        coder.add(5, &[50]);
        let buf = encode(coder);

        let decoder = IntDecoder::new(&buf).unwrap();
        assert_eq!(decoder.num_chunks(), 3);

        let mut chunk0 = decoder.chunk(0);
        assert_eq!(chunk0.read_uvarint().unwrap(), 10);
        assert_eq!(chunk0.read_uvarint().unwrap(), 11);
        assert_eq!(chunk0.read_uvarint().unwrap(), 12);
        assert!(chunk0.is_empty());

        assert!(decoder.chunk(1).is_empty());

        let mut chunk2 = decoder.chunk(2);
        assert_eq!(chunk2.read_uvarint().unwrap(), 50);
        assert!(decoder.chunk(9).is_empty());
    }

    #[test]
    fn test_zero_chunk_size_clamped() {
        let coder = IntCoder::new(0);
        assert_eq!(coder.chunk_size(), 1);
    }

    #[test]
    fn test_truncated_stream() {
        let mut coder = IntCoder::new(4);
        coder.add(0, &[1, 2, 3]);
        let buf = encode(coder);
        assert!(IntDecoder::new(&buf[..buf.len() - 1]).is_err());
    }
}
