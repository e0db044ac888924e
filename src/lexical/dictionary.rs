//! FST-backed term dictionary of one field.

use fst::automaton::{AlwaysMatch, StartsWith, Str};
use fst::{Automaton, IntoStreamer, Map, MapBuilder, Streamer};
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::config::ChunkMode;
use crate::error::{Result, StrataError};
use crate::lexical::posting::{PostingsList, PostingsValue};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;

/// Build an FST from terms in ascending byte order.
pub fn build_fst<'t, I>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'t [u8], u64)>,
{
    let mut builder = MapBuilder::memory();
    for (term, value) in entries {
        builder.insert(term, value)?;
    }
    Ok(builder.into_inner()?)
}

/// Write a length-prefixed FST, returning its offset.
pub fn write_fst(w: &mut CountHashWriter<'_>, fst_bytes: &[u8]) -> Result<u64> {
    let offset = w.count();
    w.write_len_prefixed(fst_bytes)?;
    Ok(offset)
}

/// Load the length-prefixed FST at `offset`.
pub fn read_fst<'a>(view: ByteView<'a>, offset: u64, what: &str) -> Result<Map<&'a [u8]>> {
    let bytes = view.read_len_prefixed(offset)?;
    if bytes.is_empty() {
        return Err(StrataError::corrupt(format!(
            "zero-length dictionary for {what} at offset {offset}"
        )));
    }
    Map::new(bytes).map_err(|e| StrataError::corrupt(format!("dictionary for {what}: {e}")))
}

/// One dictionary term and its document count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictEntry {
    pub term: Vec<u8>,
    pub count: u64,
}

impl DictEntry {
    /// The term as text, replacing invalid UTF-8.
    pub fn term_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.term)
    }
}

/// Sorted term dictionary of one field.
pub struct Dictionary<'a> {
    field: String,
    map: Option<Map<&'a [u8]>>,
    view: ByteView<'a>,
    num_docs: u64,
    chunk_mode: ChunkMode,
}

impl<'a> Dictionary<'a> {
    /// A dictionary without terms.
    pub fn empty(field: &str, view: ByteView<'a>, num_docs: u64, chunk_mode: ChunkMode) -> Self {
        Dictionary {
            field: field.to_string(),
            map: None,
            view,
            num_docs,
            chunk_mode,
        }
    }

    /// Open the dictionary stored at `dict_offset`; an offset of zero means
    /// the field has no terms.
    pub fn open(
        field: &str,
        view: ByteView<'a>,
        dict_offset: u64,
        num_docs: u64,
        chunk_mode: ChunkMode,
    ) -> Result<Self> {
        let map = if dict_offset == 0 {
            None
        } else {
            Some(read_fst(view, dict_offset, field)?)
        };
        Ok(Dictionary {
            field: field.to_string(),
            map,
            view,
            num_docs,
            chunk_mode,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Number of distinct terms.
    pub fn cardinality(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality() == 0
    }

    pub fn contains(&self, term: &[u8]) -> bool {
        self.map.as_ref().is_some_and(|m| m.contains_key(term))
    }

    /// Raw dictionary value of `term`.
    pub fn term_value(&self, term: &[u8]) -> Option<u64> {
        self.map.as_ref().and_then(|m| m.get(term))
    }

    /// The posting list of `term`, with `except` hidden. Unknown terms
    /// yield an empty list.
    pub fn postings_list(&self, term: &[u8], except: Option<&RoaringBitmap>) -> Result<PostingsList<'a>> {
        match self.term_value(term) {
            Some(value) => self.postings_for_value(value, except).map_err(|e| match e {
                StrataError::Corrupt(msg) => StrataError::corrupt(format!(
                    "{msg} (field {}, term {:?})",
                    self.field,
                    String::from_utf8_lossy(term)
                )),
                other => other,
            }),
            None => Ok(PostingsList::empty()),
        }
    }

    /// The posting list behind a raw dictionary value.
    pub fn postings_for_value(&self, value: u64, except: Option<&RoaringBitmap>) -> Result<PostingsList<'a>> {
        PostingsList::read(self.view, value, self.num_docs, self.chunk_mode, except)
    }

    fn count_for_value(&self, value: u64) -> Result<u64> {
        match PostingsValue::decode(value)? {
            PostingsValue::OneHit { .. } => Ok(1),
            PostingsValue::Offset(_) => Ok(self.postings_for_value(value, None)?.count()),
        }
    }

    /// Every term in order.
    pub fn iter(&self) -> DictionaryIterator<'_, 'a, AlwaysMatch> {
        DictionaryIterator {
            dict: self,
            stream: self.map.as_ref().map(|m| m.stream()),
        }
    }

    /// Terms starting with `prefix`.
    pub fn prefix_iter<'d>(&'d self, prefix: &'d str) -> DictionaryIterator<'d, 'a, StartsWith<Str<'d>>> {
        DictionaryIterator {
            dict: self,
            stream: self
                .map
                .as_ref()
                .map(|m| m.search(Str::new(prefix).starts_with()).into_stream()),
        }
    }

    /// Terms in `[start, end)`.
    pub fn range_iter(&self, start: &[u8], end: &[u8]) -> DictionaryIterator<'_, 'a, AlwaysMatch> {
        DictionaryIterator {
            dict: self,
            stream: self
                .map
                .as_ref()
                .map(|m| m.range().ge(start).lt(end).into_stream()),
        }
    }

    /// Terms accepted by an arbitrary automaton.
    pub fn automaton_iter<A: Automaton>(&self, automaton: A) -> DictionaryIterator<'_, 'a, A> {
        DictionaryIterator {
            dict: self,
            stream: self.map.as_ref().map(|m| m.search(automaton).into_stream()),
        }
    }

    /// The underlying FST, for k-way merges.
    pub fn fst(&self) -> Option<&Map<&'a [u8]>> {
        self.map.as_ref()
    }
}

/// Iterator over dictionary entries, yielding owned terms with counts.
pub struct DictionaryIterator<'d, 'a, A: Automaton> {
    dict: &'d Dictionary<'a>,
    stream: Option<fst::map::Stream<'d, A>>,
}

impl<A: Automaton> Iterator for DictionaryIterator<'_, '_, A> {
    type Item = Result<DictEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        let (term, value) = stream.next()?;
        let term = term.to_vec();
        Some(
            self.dict
                .count_for_value(value)
                .map(|count| DictEntry { term, count }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::posting::{Posting, write_postings};

    fn build(terms: &[(&str, Vec<Posting>)]) -> (Vec<u8>, u64) {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"pad").unwrap();
        let mut entries = Vec::new();
        for (term, postings) in terms {
            let value = write_postings(&mut w, postings, 10, ChunkMode::Balanced).unwrap();
            entries.push((term.as_bytes(), value));
        }
        let fst = build_fst(entries).unwrap();
        let offset = write_fst(&mut w, &fst).unwrap();
        drop(w);
        (buf, offset)
    }

    fn sample() -> (Vec<u8>, u64) {
        build(&[
            ("apple", vec![Posting::new(1, 1, 1.0)]),
            ("apricot", vec![Posting::new(0, 2, 1.0), Posting::new(3, 1, 1.0)]),
            ("banana", vec![Posting::new(2, 1, 0.5)]),
        ])
    }

    #[test]
    fn test_lookup_and_counts() {
        let (buf, offset) = sample();
        let dict = Dictionary::open("body", ByteView::new(&buf), offset, 10, ChunkMode::Balanced).unwrap();

        assert_eq!(dict.cardinality(), 3);
        assert!(dict.contains(b"banana"));
        assert!(!dict.contains(b"cherry"));

        let docs: Vec<u32> = dict
            .postings_list(b"apricot", None)
            .unwrap()
            .doc_numbers()
            .iter()
            .collect();
        assert_eq!(docs, vec![0, 3]);
        assert!(dict.postings_list(b"cherry", None).unwrap().is_empty());
    }

    #[test]
    fn test_iterators() {
        let (buf, offset) = sample();
        let dict = Dictionary::open("body", ByteView::new(&buf), offset, 10, ChunkMode::Balanced).unwrap();

        let all: Vec<DictEntry> = dict.iter().collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].count, 2);

        let prefixed: Vec<String> = dict
            .prefix_iter("ap")
            .map(|e| e.unwrap().term_str().into_owned())
            .collect();
        assert_eq!(prefixed, vec!["apple", "apricot"]);

        let ranged: Vec<String> = dict
            .range_iter(b"apricot", b"c")
            .map(|e| e.unwrap().term_str().into_owned())
            .collect();
        assert_eq!(ranged, vec!["apricot", "banana"]);

        let fuzzy: Vec<String> = dict
            .automaton_iter(Str::new("banana"))
            .map(|e| e.unwrap().term_str().into_owned())
            .collect();
        assert_eq!(fuzzy, vec!["banana"]);
    }

    #[test]
    fn test_empty_and_zero_length() {
        let data = vec![0u8; 4];
        let view = ByteView::new(&data);
        let dict = Dictionary::open("body", view, 0, 0, ChunkMode::Balanced).unwrap();
        assert!(dict.is_empty());
        assert_eq!(dict.iter().count(), 0);

        let err = Dictionary::open("body", view, 1, 0, ChunkMode::Balanced)
            .err()
            .unwrap();
        assert!(err.is_corrupt());
    }
}
