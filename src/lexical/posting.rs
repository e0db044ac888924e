//! Posting lists: encoding, the single-hit optimization and iteration.
//!
//! A term's dictionary value is either the offset of its postings record or,
//! when the term occurs exactly once without locations, the whole posting
//! folded into the value itself:
//!
//! ```text
//! general:  00 | postings record offset (62 bits)
//! one-hit:  10 | norm bits (31 bits) | doc number (31 bits)
//! ```
//!
//! A postings record is `uvarint freq_offset`, `uvarint loc_offset` (0 when
//! no document has locations) and a length-prefixed roaring bitmap of the
//! document numbers. Frequencies, norms and locations live in chunked
//! [`IntCoder`] streams so iteration can skip whole chunks.

use roaring::RoaringBitmap;
use serde::Serialize;

use crate::config::ChunkMode;
use crate::document::TokenLocation;
use crate::error::{Result, StrataError};
use crate::segment::intcoder::{IntCoder, IntDecoder};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;
use crate::util::varint::VarintReader;

const DISCRIMINATOR_MASK: u64 = 0b11 << 62;
const ONE_HIT_FLAG: u64 = 1 << 63;
const MAX_ONE_HIT_DOC: u64 = (1 << 31) - 1;
const NORM_MASK: u64 = 0x7fff_ffff;

/// One document's entry in a posting list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posting {
    pub doc_num: u64,
    pub frequency: u64,
    pub norm: f32,
    pub locations: Vec<TokenLocation>,
}

impl Posting {
    pub fn new(doc_num: u64, frequency: u64, norm: f32) -> Self {
        Posting {
            doc_num,
            frequency,
            norm,
            locations: Vec::new(),
        }
    }
}

/// Norm factor of a field holding `length` tokens.
pub fn norm_for_length(length: u64) -> f32 {
    if length == 0 {
        1.0
    } else {
        1.0 / (length as f32).sqrt()
    }
}

/// Fold a single posting into a dictionary value, if it qualifies.
pub fn encode_one_hit(posting: &Posting) -> Option<u64> {
    if posting.frequency == 1 && posting.locations.is_empty() && posting.doc_num <= MAX_ONE_HIT_DOC {
        let norm_bits = posting.norm.to_bits() as u64 & NORM_MASK;
        Some(ONE_HIT_FLAG | (norm_bits << 31) | posting.doc_num)
    } else {
        None
    }
}

/// Decoded form of a dictionary value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostingsValue {
    /// Offset of a postings record.
    Offset(u64),
    /// A single posting with frequency 1 and no locations.
    OneHit { doc_num: u64, norm: f32 },
}

impl PostingsValue {
    pub fn decode(value: u64) -> Result<Self> {
        match value & DISCRIMINATOR_MASK {
            0 => Ok(PostingsValue::Offset(value)),
            ONE_HIT_FLAG => Ok(PostingsValue::OneHit {
                doc_num: value & MAX_ONE_HIT_DOC,
                norm: f32::from_bits(((value >> 31) & NORM_MASK) as u32),
            }),
            _ => Err(StrataError::corrupt(format!(
                "dictionary value {value:#018x} has an unknown discriminator"
            ))),
        }
    }
}

/// Write the posting list of one term and return its dictionary value.
///
/// `postings` must be non-empty and ordered by document number. Terms that
/// qualify for the single-hit encoding write no bytes at all.
pub fn write_postings(
    w: &mut CountHashWriter<'_>,
    postings: &[Posting],
    num_docs: u64,
    chunk_mode: ChunkMode,
) -> Result<u64> {
    if postings.is_empty() {
        return Err(StrataError::invalid_argument("cannot write an empty posting list"));
    }
    if let [single] = postings {
        if let Some(value) = encode_one_hit(single) {
            return Ok(value);
        }
    }

    let chunk_size = chunk_mode.write_chunk_size(postings.len() as u64, num_docs);
    let mut freqs = IntCoder::new(chunk_size);
    let mut locs = IntCoder::new(chunk_size);
    let mut any_locations = false;
    let mut docs = RoaringBitmap::new();
    let mut loc_values = Vec::new();

    for posting in postings {
        let doc = u32::try_from(posting.doc_num).map_err(|_| {
            StrataError::invalid_argument(format!("document number {} exceeds u32", posting.doc_num))
        })?;
        docs.insert(doc);

        let has_locations = !posting.locations.is_empty();
        freqs.add(
            posting.doc_num,
            &[
                (posting.frequency << 1) | has_locations as u64,
                posting.norm.to_bits() as u64,
            ],
        );

        if has_locations {
            any_locations = true;
            for location in &posting.locations {
                loc_values.clear();
                loc_values.extend_from_slice(&[
                    location.position,
                    location.start,
                    location.end,
                    location.array_positions.len() as u64,
                ]);
                loc_values.extend_from_slice(&location.array_positions);
                locs.add(posting.doc_num, &loc_values);
            }
        }
    }

    let freq_offset = freqs.write_to(w)?;
    let loc_offset = if any_locations { locs.write_to(w)? } else { 0 };

    let mut bitmap = Vec::with_capacity(docs.serialized_size());
    docs.serialize_into(&mut bitmap)?;

    let offset = w.count();
    if offset & DISCRIMINATOR_MASK != 0 {
        return Err(StrataError::invalid_argument(format!(
            "postings offset {offset} too large to encode"
        )));
    }
    w.write_uvarint(freq_offset)?;
    w.write_uvarint(loc_offset)?;
    w.write_len_prefixed(&bitmap)?;
    Ok(offset)
}

#[derive(Debug, Clone)]
enum PostingsKind<'a> {
    Empty,
    OneHit {
        doc_num: u64,
        norm: f32,
    },
    General {
        docs: RoaringBitmap,
        freqs: IntDecoder<'a>,
        locs: Option<IntDecoder<'a>>,
        chunk_size: u64,
    },
}

/// A term's posting list, read lazily from segment bytes.
#[derive(Debug, Clone)]
pub struct PostingsList<'a> {
    kind: PostingsKind<'a>,
    except: Option<RoaringBitmap>,
}

impl<'a> PostingsList<'a> {
    /// A posting list with no documents.
    pub fn empty() -> Self {
        PostingsList {
            kind: PostingsKind::Empty,
            except: None,
        }
    }

    /// Decode the posting list referenced by dictionary value `value`.
    ///
    /// Documents in `except` are hidden from iteration and counts.
    pub fn read(
        view: ByteView<'a>,
        value: u64,
        num_docs: u64,
        chunk_mode: ChunkMode,
        except: Option<&RoaringBitmap>,
    ) -> Result<Self> {
        let kind = match PostingsValue::decode(value)? {
            PostingsValue::OneHit { doc_num, norm } => PostingsKind::OneHit { doc_num, norm },
            PostingsValue::Offset(offset) => {
                let mut reader = view.reader_at(offset)?;
                let freq_offset = reader.read_uvarint()?;
                let loc_offset = reader.read_uvarint()?;
                let bitmap_len = reader.read_uvarint()?;
                let bitmap = reader.read_bytes(bitmap_len as usize)?;
                let docs = RoaringBitmap::deserialize_from(bitmap).map_err(|e| {
                    StrataError::corrupt(format!("postings bitmap at {offset}: {e}"))
                })?;

                let chunk_size = chunk_mode.read_chunk_size(docs.len(), num_docs)?;
                let freqs = IntDecoder::new(view.tail(freq_offset)?)?;
                let locs = if loc_offset == 0 {
                    None
                } else {
                    Some(IntDecoder::new(view.tail(loc_offset)?)?)
                };
                PostingsKind::General {
                    docs,
                    freqs,
                    locs,
                    chunk_size,
                }
            }
        };

        Ok(PostingsList {
            kind,
            except: except.filter(|e| !e.is_empty()).cloned(),
        })
    }

    /// Number of visible documents.
    pub fn count(&self) -> u64 {
        self.doc_numbers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Visible document numbers.
    pub fn doc_numbers(&self) -> RoaringBitmap {
        let mut docs = match &self.kind {
            PostingsKind::Empty => RoaringBitmap::new(),
            PostingsKind::OneHit { doc_num, .. } => {
                let mut docs = RoaringBitmap::new();
                if let Ok(doc) = u32::try_from(*doc_num) {
                    docs.insert(doc);
                }
                docs
            }
            PostingsKind::General { docs, .. } => docs.clone(),
        };
        if let Some(except) = &self.except {
            docs -= except;
        }
        docs
    }

    /// Iterate postings, decoding locations when `include_locations`.
    pub fn iter(&self, include_locations: bool) -> PostingsIterator<'_, 'a> {
        let docs = match &self.kind {
            PostingsKind::Empty => Vec::new(),
            PostingsKind::OneHit { doc_num, .. } => vec![*doc_num as u32],
            PostingsKind::General { docs, .. } => docs.iter().collect(),
        };
        PostingsIterator {
            list: self,
            docs,
            pos: 0,
            current_chunk: None,
            freq_reader: VarintReader::new(&[]),
            loc_reader: VarintReader::new(&[]),
            include_locations,
        }
    }

    /// Decode every visible posting.
    pub fn postings(&self, include_locations: bool) -> Result<Vec<Posting>> {
        self.iter(include_locations).collect()
    }
}

/// Iterator over a [`PostingsList`].
///
/// Yields `Result<Posting>` since decoding reads segment bytes.
pub struct PostingsIterator<'p, 'a> {
    list: &'p PostingsList<'a>,
    docs: Vec<u32>,
    pos: usize,
    current_chunk: Option<u64>,
    freq_reader: VarintReader<'a>,
    loc_reader: VarintReader<'a>,
    include_locations: bool,
}

impl<'p, 'a> PostingsIterator<'p, 'a> {
    fn load_chunk(&mut self, chunk: u64) {
        if let PostingsKind::General { freqs, locs, .. } = &self.list.kind {
            self.freq_reader = freqs.chunk(chunk as usize);
            self.loc_reader = match locs {
                Some(locs) => locs.chunk(chunk as usize),
                None => VarintReader::new(&[]),
            };
        }
        self.current_chunk = Some(chunk);
    }

    /// Decode the entry of `doc_num`, which must be the next entry of the
    /// current chunk.
    fn decode_entry(&mut self, doc_num: u64, keep_locations: bool) -> Result<Posting> {
        let (chunk_size, has_loc_stream) = match &self.list.kind {
            PostingsKind::Empty => {
                return Err(StrataError::other("decode on an empty posting list"));
            }
            PostingsKind::OneHit { doc_num, norm } => {
                return Ok(Posting::new(*doc_num, 1, *norm));
            }
            PostingsKind::General {
                chunk_size, locs, ..
            } => (*chunk_size, locs.is_some()),
        };

        let chunk = doc_num / chunk_size;
        if self.current_chunk != Some(chunk) {
            self.load_chunk(chunk);
        }

        let freq_has_locs = self.freq_reader.read_uvarint()?;
        let norm_bits = self.freq_reader.read_uvarint()?;
        let frequency = freq_has_locs >> 1;
        let has_locations = freq_has_locs & 1 == 1;
        let norm = f32::from_bits(u32::try_from(norm_bits).map_err(|_| {
            StrataError::corrupt(format!("norm bits {norm_bits:#x} of doc {doc_num} exceed u32"))
        })?);

        let mut locations = Vec::new();
        if has_locations {
            if !has_loc_stream {
                return Err(StrataError::corrupt(format!(
                    "doc {doc_num} flags locations but the list has none"
                )));
            }
            for _ in 0..frequency {
                let position = self.loc_reader.read_uvarint()?;
                let start = self.loc_reader.read_uvarint()?;
                let end = self.loc_reader.read_uvarint()?;
                let num_array_positions = self.loc_reader.read_uvarint()?;
                let mut array_positions = Vec::new();
                for _ in 0..num_array_positions {
                    array_positions.push(self.loc_reader.read_uvarint()?);
                }
                if keep_locations {
                    locations.push(TokenLocation {
                        position,
                        start,
                        end,
                        array_positions,
                    });
                }
            }
        }

        Ok(Posting {
            doc_num,
            frequency,
            norm,
            locations,
        })
    }

    fn is_hidden(&self, doc_num: u32) -> bool {
        self.list
            .except
            .as_ref()
            .is_some_and(|except| except.contains(doc_num))
    }

    /// Move to the first visible posting with a document number of at
    /// least `target`, skipping whole chunks without decoding them.
    pub fn advance(&mut self, target: u64) -> Option<Result<Posting>> {
        let remaining = &self.docs[self.pos..];
        let skip = remaining.partition_point(|&d| (d as u64) < target);
        let new_pos = self.pos + skip;
        if new_pos >= self.docs.len() {
            self.pos = self.docs.len();
            return None;
        }

        if let PostingsKind::General { chunk_size, .. } = &self.list.kind {
            let chunk_size = *chunk_size;
            let target_chunk = self.docs[new_pos] as u64 / chunk_size;
            if self.current_chunk != Some(target_chunk) {
                // Jump to the start of the target chunk, then decode forward.
                let chunk_start = target_chunk * chunk_size;
                self.pos = self.docs.partition_point(|&d| (d as u64) < chunk_start);
                self.load_chunk(target_chunk);
            }
            while self.pos < new_pos {
                let doc = self.docs[self.pos] as u64;
                self.pos += 1;
                if let Err(e) = self.decode_entry(doc, false) {
                    return Some(Err(e));
                }
            }
        } else {
            self.pos = new_pos;
        }

        self.next()
    }
}

impl Iterator for PostingsIterator<'_, '_> {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.docs.len() {
            let doc = self.docs[self.pos];
            self.pos += 1;
            let hidden = self.is_hidden(doc);
            let keep = self.include_locations && !hidden;
            match self.decode_entry(doc as u64, keep) {
                Ok(_) if hidden => continue,
                result => return Some(result),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(position: u64) -> TokenLocation {
        TokenLocation {
            position,
            start: position * 10,
            end: position * 10 + 4,
            array_positions: vec![position % 2],
        }
    }

    fn write(postings: &[Posting], num_docs: u64, mode: ChunkMode) -> (Vec<u8>, u64) {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"header").unwrap();
        let value = write_postings(&mut w, postings, num_docs, mode).unwrap();
        drop(w);
        (buf, value)
    }

    fn read_back(buf: &[u8], value: u64, num_docs: u64, mode: ChunkMode) -> Vec<Posting> {
        PostingsList::read(ByteView::new(buf), value, num_docs, mode, None)
            .unwrap()
            .postings(true)
            .unwrap()
    }

    #[test]
    fn test_one_hit_threshold() {
        let single = Posting::new(7, 1, 0.5);
        let (buf, value) = write(&[single.clone()], 10, ChunkMode::Balanced);
        assert_eq!(buf, b"header");
        assert_eq!(value & DISCRIMINATOR_MASK, ONE_HIT_FLAG);
        assert_eq!(read_back(&buf, value, 10, ChunkMode::Balanced), vec![single]);

        // Frequency 2 disqualifies.
        assert!(encode_one_hit(&Posting::new(7, 2, 0.5)).is_none());
        // Locations disqualify.
        let mut with_loc = Posting::new(7, 1, 0.5);
        with_loc.locations.push(location(1));
        assert!(encode_one_hit(&with_loc).is_none());
        // Largest 31-bit document number qualifies, the next does not.
        assert!(encode_one_hit(&Posting::new(MAX_ONE_HIT_DOC, 1, 1.0)).is_some());
        assert!(encode_one_hit(&Posting::new(MAX_ONE_HIT_DOC + 1, 1, 1.0)).is_none());
    }

    #[test]
    fn test_general_round_trip_with_locations() {
        let postings: Vec<Posting> = (0..50u64)
            .map(|i| {
                let doc = i * 3;
                let mut posting = Posting::new(doc, 1 + i % 3, norm_for_length(1 + i));
                if i % 2 == 0 {
                    posting.locations = (1..=posting.frequency).map(location).collect();
                }
                posting
            })
            .collect();

        for mode in [
            ChunkMode::Legacy,
            ChunkMode::LowCardinalityWhole,
            ChunkMode::Balanced,
        ] {
            let (buf, value) = write(&postings, 150, mode);
            assert_eq!(read_back(&buf, value, 150, mode), postings);
        }
    }

    #[test]
    fn test_advance_and_except() {
        let postings: Vec<Posting> = (0..3000u64).map(|d| Posting::new(d * 2, 1, 1.0)).collect();
        let (sink, value) = write(&postings, 6000, ChunkMode::Legacy);

        let list = PostingsList::read(ByteView::new(&sink), value, 6000, ChunkMode::Legacy, None)
            .unwrap();
        assert_eq!(list.count(), 3000);

        let mut iter = list.iter(false);
        assert_eq!(iter.next().unwrap().unwrap().doc_num, 0);
        assert_eq!(iter.advance(4097).unwrap().unwrap().doc_num, 4098);
        assert_eq!(iter.next().unwrap().unwrap().doc_num, 4100);
        assert_eq!(iter.advance(10).unwrap().unwrap().doc_num, 4102);
        assert!(iter.advance(6000).is_none());

        let mut except = RoaringBitmap::new();
        except.insert(0);
        except.insert(2);
        let list = PostingsList::read(
            ByteView::new(&sink),
            value,
            6000,
            ChunkMode::Legacy,
            Some(&except),
        )
        .unwrap();
        assert_eq!(list.count(), 2998);
        assert_eq!(list.iter(false).next().unwrap().unwrap().doc_num, 4);
    }

    #[test]
    fn test_unknown_discriminator() {
        assert!(PostingsValue::decode(0b11 << 62).unwrap_err().is_corrupt());
        assert!(PostingsValue::decode(0b01 << 62).is_err());
    }

    #[test]
    fn test_empty_postings_rejected() {
        let mut sink = Vec::new();
        let mut w = CountHashWriter::new(&mut sink);
        assert!(write_postings(&mut w, &[], 1, ChunkMode::Balanced).is_err());
    }
}
