//! Chunked content coder used for doc values.
//!
//! Each chunk starts with a small per-document index (`uvarint num_docs`,
//! then `(doc_num, end_offset)` pairs) followed by the raw value bytes of
//! those documents. The trailer lists the chunk end offsets as uvarints
//! and ends with three big-endian u64s: chunk size, byte length of the
//! offsets list, and chunk count. Readers locate everything from the end of
//! the stream.

use crate::error::{Result, StrataError};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;
use crate::util::varint::{VarintReader, put_uvarint};

const TRAILER_SIZE: u64 = 24;

/// Encoder for a chunked per-document byte stream.
#[derive(Debug)]
pub struct ContentCoder {
    chunk_size: u64,
    current_chunk: u64,
    chunk_docs: Vec<(u64, u64)>,
    chunk_bytes: Vec<u8>,
    data: Vec<u8>,
    chunk_ends: Vec<u64>,
}

impl ContentCoder {
    /// Create a coder; a zero chunk size is clamped to one.
    pub fn new(chunk_size: u64) -> Self {
        ContentCoder {
            chunk_size: chunk_size.max(1),
            current_chunk: 0,
            chunk_docs: Vec::new(),
            chunk_bytes: Vec::new(),
            data: Vec::new(),
            chunk_ends: Vec::new(),
        }
    }

    /// Append the value of `doc_num`. Documents must arrive in ascending order.
    pub fn add(&mut self, doc_num: u64, value: &[u8]) {
        let chunk = doc_num / self.chunk_size;
        while chunk > self.current_chunk {
            self.close_chunk();
        }
        self.chunk_bytes.extend_from_slice(value);
        self.chunk_docs.push((doc_num, self.chunk_bytes.len() as u64));
    }

    fn close_chunk(&mut self) {
        put_uvarint(&mut self.data, self.chunk_docs.len() as u64);
        for &(doc_num, end) in &self.chunk_docs {
            put_uvarint(&mut self.data, doc_num);
            put_uvarint(&mut self.data, end);
        }
        self.data.append(&mut self.chunk_bytes);
        self.chunk_docs.clear();
        self.chunk_ends.push(self.data.len() as u64);
        self.current_chunk += 1;
    }

    /// Write the stream, returning its `[start, end)` byte range.
    pub fn write_to(mut self, w: &mut CountHashWriter<'_>) -> Result<(u64, u64)> {
        self.close_chunk();

        let start = w.count();
        w.write_raw(&self.data)?;

        let offsets_start = w.count();
        w.write_uvarints(&self.chunk_ends)?;
        let offsets_len = w.count() - offsets_start;

        w.write_u64_be(self.chunk_size)?;
        w.write_u64_be(offsets_len)?;
        w.write_u64_be(self.chunk_ends.len() as u64)?;
        Ok((start, w.count()))
    }
}

/// Reader over a [`ContentCoder`] stream.
///
/// Keeps the most recently decoded chunk index so sequential lookups in the
/// same chunk do not re-parse it.
#[derive(Debug, Clone)]
pub struct ContentDecoder<'a> {
    data: &'a [u8],
    chunk_size: u64,
    chunk_ends: Vec<u64>,
    cached_chunk: Option<usize>,
    cached_docs: Vec<(u64, u64)>,
    cached_values: &'a [u8],
}

impl<'a> ContentDecoder<'a> {
    /// Open the stream stored at `[start, end)` of `view`.
    pub fn open(view: ByteView<'a>, start: u64, end: u64) -> Result<Self> {
        let trailer = end
            .checked_sub(TRAILER_SIZE)
            .filter(|&t| t >= start)
            .ok_or_else(|| {
                StrataError::corrupt(format!("doc values range [{start}, {end}) too short for its trailer"))
            })?;
        let chunk_size = view.read_u64_be(trailer)?;
        let offsets_len = view.read_u64_be(trailer + 8)?;
        let num_chunks = view.read_u64_be(trailer + 16)?;

        if chunk_size == 0 {
            return Err(StrataError::corrupt(format!(
                "doc values at {start} record a zero chunk size"
            )));
        }

        let offsets_start = trailer.checked_sub(offsets_len).filter(|&o| o >= start);
        let offsets_start = offsets_start.ok_or_else(|| {
            StrataError::corrupt(format!("doc values offsets overrun stream at {start}"))
        })?;

        let mut reader = VarintReader::new(view.range(offsets_start, trailer)?);
        let mut chunk_ends = Vec::new();
        for _ in 0..num_chunks {
            chunk_ends.push(reader.read_uvarint()?);
        }

        let data = view.range(start, offsets_start)?;
        if chunk_ends.iter().any(|&e| e > data.len() as u64) {
            return Err(StrataError::corrupt(format!(
                "doc values chunk offsets exceed data at {start}"
            )));
        }

        Ok(ContentDecoder {
            data,
            chunk_size,
            chunk_ends,
            cached_chunk: None,
            cached_docs: Vec::new(),
            cached_values: &[],
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_ends.len()
    }

    fn load_chunk(&mut self, chunk: usize) -> Result<()> {
        if self.cached_chunk == Some(chunk) {
            return Ok(());
        }
        let start = if chunk == 0 {
            0
        } else {
            self.chunk_ends[chunk - 1]
        };
        let end = self.chunk_ends[chunk];
        if start > end {
            return Err(StrataError::corrupt("doc values chunk offsets not ascending"));
        }
        let bytes = &self.data[start as usize..end as usize];

        let mut reader = VarintReader::new(bytes);
        let num_docs = reader.read_uvarint()?;
        self.cached_chunk = None;
        self.cached_docs.clear();
        for _ in 0..num_docs {
            let doc_num = reader.read_uvarint()?;
            let end = reader.read_uvarint()?;
            self.cached_docs.push((doc_num, end));
        }
        let values = reader.remaining();
        let mut prev = 0;
        for &(_, end) in &self.cached_docs {
            if end < prev {
                return Err(StrataError::corrupt("doc values entry offsets not ascending"));
            }
            if end > values.len() as u64 {
                return Err(StrataError::corrupt("doc values entry overruns its chunk"));
            }
            prev = end;
        }
        self.cached_values = values;
        self.cached_chunk = Some(chunk);
        Ok(())
    }

    /// Value bytes of `doc_num`, if it has one.
    pub fn get(&mut self, doc_num: u64) -> Result<Option<&'a [u8]>> {
        let chunk = (doc_num / self.chunk_size) as usize;
        if chunk >= self.chunk_ends.len() {
            return Ok(None);
        }
        self.load_chunk(chunk)?;

        let idx = match self.cached_docs.binary_search_by_key(&doc_num, |&(d, _)| d) {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        let start = if idx == 0 {
            0
        } else {
            self.cached_docs[idx - 1].1
        };
        let end = self.cached_docs[idx].1;
        let values = self.cached_values;
        Ok(Some(entry_bytes(values, start, end)?))
    }

    /// Visit every `(doc_num, value)` pair in document order.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &'a [u8]) -> Result<()>,
    {
        for chunk in 0..self.chunk_ends.len() {
            self.load_chunk(chunk)?;
            let values = self.cached_values;
            let mut start = 0;
            for idx in 0..self.cached_docs.len() {
                let (doc_num, end) = self.cached_docs[idx];
                f(doc_num, entry_bytes(values, start, end)?)?;
                start = end;
            }
        }
        Ok(())
    }
}

fn entry_bytes(values: &[u8], start: u64, end: u64) -> Result<&[u8]> {
    values
        .get(start as usize..end as usize)
        .ok_or_else(|| StrataError::corrupt(format!("doc values entry [{start}, {end}) outside its chunk")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(coder: ContentCoder) -> (Vec<u8>, u64, u64) {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"pad").unwrap();
        let (start, end) = coder.write_to(&mut w).unwrap();
        drop(w);
        (buf, start, end)
    }

    #[test]
    fn test_lookup_across_chunks() {
        let mut coder = ContentCoder::new(2);
        coder.add(0, b"zero");
        coder.add(3, b"three");
        coder.add(4, b"");
        coder.add(7, b"seven");
        let (buf, start, end) = encode(coder);

        let mut decoder = ContentDecoder::open(ByteView::new(&buf), start, end).unwrap();
        assert_eq!(decoder.chunk_size(), 2);
        assert_eq!(decoder.num_chunks(), 4);
        assert_eq!(decoder.get(0).unwrap(), Some(&b"zero"[..]));
        assert_eq!(decoder.get(1).unwrap(), None);
        assert_eq!(decoder.get(3).unwrap(), Some(&b"three"[..]));
        assert_eq!(decoder.get(4).unwrap(), Some(&b""[..]));
        assert_eq!(decoder.get(7).unwrap(), Some(&b"seven"[..]));
        assert_eq!(decoder.get(100).unwrap(), None);
    }

    #[test]
    fn test_for_each_in_order() {
        let mut coder = ContentCoder::new(1024);
        coder.add(1, b"a");
        coder.add(2, b"bb");
        let (buf, start, end) = encode(coder);

        let mut decoder = ContentDecoder::open(ByteView::new(&buf), start, end).unwrap();
        let mut seen = Vec::new();
        decoder
            .for_each(|doc, value| {
                seen.push((doc, value.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(1, b"a".to_vec()), (2, b"bb".to_vec())]);
    }

    #[test]
    fn test_descending_entry_offsets_are_corrupt() {
        // One chunk holding doc 0 ending at 10 and doc 1 ending at 5, over
        // five value bytes.
        let mut data = Vec::new();
        for v in [2, 0, 10, 1, 5] {
            put_uvarint(&mut data, v);
        }
        data.extend_from_slice(b"abcde");

        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(&data).unwrap();
        let offsets_start = w.count();
        w.write_uvarint(data.len() as u64).unwrap();
        let offsets_len = w.count() - offsets_start;
        w.write_u64_be(16).unwrap();
        w.write_u64_be(offsets_len).unwrap();
        w.write_u64_be(1).unwrap();
        let end = w.count();
        drop(w);

        let mut decoder = ContentDecoder::open(ByteView::new(&buf), 0, end).unwrap();
        assert!(decoder.get(0).unwrap_err().is_corrupt());
        assert!(decoder.get(1).unwrap_err().is_corrupt());
        assert!(decoder.for_each(|_, _| Ok(())).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_range_shorter_than_trailer_is_corrupt() {
        let buf = [0u8; 64];
        assert!(ContentDecoder::open(ByteView::new(&buf), 40, 50).unwrap_err().is_corrupt());
        assert!(ContentDecoder::open(ByteView::new(&buf), u64::MAX - 4, u64::MAX).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_zero_chunk_size_is_corrupt() {
        let (mut buf, start, end) = encode(ContentCoder::new(4));
        let trailer = (end - TRAILER_SIZE) as usize;
        buf[trailer..trailer + 8].copy_from_slice(&0u64.to_be_bytes());

        let err = ContentDecoder::open(ByteView::new(&buf), start, end).unwrap_err();
        assert!(err.is_corrupt());
    }
}
