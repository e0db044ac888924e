//! Per-field thesaurus: FST from term to synonym postings.
//!
//! Layout: every term's postings (`uvarint len` + serialized
//! `RoaringTreemap` of `syn_id << 32 | doc_num`) come first; the thesaurus
//! itself is `uvarint fst_len`, the FST (term to postings offset),
//! `uvarint num_synonyms` and one `(uvarint syn_id, uvarint len, bytes)`
//! entry per synonym text.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use fst::automaton::{AlwaysMatch, StartsWith, Str};
use fst::{Automaton, IntoStreamer, Map, Streamer};
use roaring::{RoaringBitmap, RoaringTreemap};
use serde::Serialize;

use crate::error::{Result, StrataError};
use crate::lexical::dictionary::{build_fst, write_fst};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;

/// `(synonym text, doc_num)` pairs per left-hand term.
pub type SynonymPairs = BTreeMap<String, BTreeSet<(String, u64)>>;

/// Pack a synonym id and document number into one postings key.
pub fn encode_key(syn_id: u32, doc_num: u32) -> u64 {
    ((syn_id as u64) << 32) | doc_num as u64
}

pub fn decode_key(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

/// Write postings and thesaurus for `terms`, returning the thesaurus
/// offset, or `None` when there are no terms.
///
/// Synonym ids are assigned in ascending synonym text order.
pub fn write_thesaurus(w: &mut CountHashWriter<'_>, terms: &SynonymPairs) -> Result<Option<u64>> {
    if terms.is_empty() {
        return Ok(None);
    }

    let texts: BTreeSet<&str> = terms
        .values()
        .flat_map(|pairs| pairs.iter().map(|(syn, _)| syn.as_str()))
        .collect();
    let ids: AHashMap<&str, u32> = texts
        .iter()
        .enumerate()
        .map(|(id, &text)| (text, id as u32))
        .collect();

    let mut entries = Vec::with_capacity(terms.len());
    let mut buf = Vec::new();
    for (term, pairs) in terms {
        let mut postings = RoaringTreemap::new();
        for (synonym, doc_num) in pairs {
            let doc_num = u32::try_from(*doc_num).map_err(|_| {
                StrataError::invalid_argument(format!("document {doc_num} exceeds synonym key range"))
            })?;
            postings.insert(encode_key(ids[synonym.as_str()], doc_num));
        }
        buf.clear();
        postings.serialize_into(&mut buf)?;
        let offset = w.count();
        w.write_len_prefixed(&buf)?;
        entries.push((term.as_bytes(), offset));
    }

    let fst = build_fst(entries)?;
    let offset = write_fst(w, &fst)?;
    w.write_uvarint(texts.len() as u64)?;
    for (id, text) in texts.iter().enumerate() {
        w.write_uvarint(id as u64)?;
        w.write_len_prefixed(text.as_bytes())?;
    }
    Ok(Some(offset))
}

/// One synonym of a looked-up term and the documents carrying the pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynonymMatch {
    pub synonym_id: u32,
    pub synonym: String,
    #[serde(serialize_with = "serialize_bitmap")]
    pub docs: RoaringBitmap,
}

fn serialize_bitmap<S: serde::Serializer>(docs: &RoaringBitmap, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(docs.iter())
}

/// Thesaurus of one field.
pub struct Thesaurus<'a> {
    field: String,
    map: Option<Map<&'a [u8]>>,
    view: ByteView<'a>,
    synonyms: AHashMap<u32, &'a str>,
}

impl<'a> Thesaurus<'a> {
    pub fn empty(field: &str, view: ByteView<'a>) -> Self {
        Thesaurus {
            field: field.to_string(),
            map: None,
            view,
            synonyms: AHashMap::new(),
        }
    }

    /// Open the thesaurus at `offset`.
    pub fn open(field: &str, view: ByteView<'a>, offset: u64) -> Result<Self> {
        let mut reader = view.reader_at(offset)?;
        let fst_len = reader.read_uvarint()?;
        let fst_bytes = reader.read_bytes(fst_len as usize)?;
        if fst_bytes.is_empty() {
            return Err(StrataError::corrupt(format!(
                "zero-length thesaurus for field {field} at offset {offset}"
            )));
        }
        let map = Map::new(fst_bytes)
            .map_err(|e| StrataError::corrupt(format!("thesaurus for field {field}: {e}")))?;

        let num_synonyms = reader.read_uvarint()?;
        let mut synonyms = AHashMap::new();
        for _ in 0..num_synonyms {
            let id = reader.read_uvarint()?;
            let len = reader.read_uvarint()?;
            let text = std::str::from_utf8(reader.read_bytes(len as usize)?).map_err(|_| {
                StrataError::corrupt(format!("synonym {id} of field {field} is not UTF-8"))
            })?;
            let id = u32::try_from(id)
                .map_err(|_| StrataError::corrupt(format!("synonym id {id} out of range")))?;
            synonyms.insert(id, text);
        }

        Ok(Thesaurus {
            field: field.to_string(),
            map: Some(map),
            view,
            synonyms,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Number of left-hand terms.
    pub fn cardinality(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality() == 0
    }

    pub fn num_synonyms(&self) -> usize {
        self.synonyms.len()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.map.as_ref().is_some_and(|m| m.contains_key(term))
    }

    /// Text of synonym `id`.
    pub fn synonym(&self, id: u32) -> Option<&'a str> {
        self.synonyms.get(&id).copied()
    }

    /// Raw postings stored at `offset`.
    pub fn postings_at(&self, offset: u64) -> Result<RoaringTreemap> {
        let bytes = self.view.read_len_prefixed(offset)?;
        RoaringTreemap::deserialize_from(bytes).map_err(|e| {
            StrataError::corrupt(format!(
                "synonym postings of field {} at {offset}: {e}",
                self.field
            ))
        })
    }

    /// Synonym postings of `term`; empty when the term is unknown.
    pub fn postings(&self, term: &str) -> Result<RoaringTreemap> {
        match self.map.as_ref().and_then(|m| m.get(term)) {
            Some(offset) => self.postings_at(offset),
            None => Ok(RoaringTreemap::new()),
        }
    }

    /// Every synonym of `term` with the documents defining the pair,
    /// ordered by synonym id. Documents in `except` are left out.
    pub fn lookup(&self, term: &str, except: Option<&RoaringBitmap>) -> Result<Vec<SynonymMatch>> {
        let postings = self.postings(term)?;
        let mut grouped: BTreeMap<u32, RoaringBitmap> = BTreeMap::new();
        for key in postings.iter() {
            let (syn_id, doc_num) = decode_key(key);
            if except.is_some_and(|e| e.contains(doc_num)) {
                continue;
            }
            grouped.entry(syn_id).or_default().insert(doc_num);
        }

        grouped
            .into_iter()
            .map(|(synonym_id, docs)| {
                let synonym = self.synonym(synonym_id).ok_or_else(|| {
                    StrataError::corrupt(format!(
                        "field {}: term {term} references unknown synonym {synonym_id}",
                        self.field
                    ))
                })?;
                Ok(SynonymMatch {
                    synonym_id,
                    synonym: synonym.to_string(),
                    docs,
                })
            })
            .collect()
    }

    /// Left-hand terms in order.
    pub fn terms(&self) -> ThesaurusTerms<'_, AlwaysMatch> {
        self.automaton_terms(AlwaysMatch)
    }

    /// Left-hand terms starting with `prefix`.
    pub fn prefix_terms<'d>(&'d self, prefix: &'d str) -> ThesaurusTerms<'d, StartsWith<Str<'d>>> {
        self.automaton_terms(Str::new(prefix).starts_with())
    }

    fn automaton_terms<A: Automaton>(&self, automaton: A) -> ThesaurusTerms<'_, A> {
        ThesaurusTerms {
            stream: self.map.as_ref().map(|m| m.search(automaton).into_stream()),
        }
    }

    pub fn fst(&self) -> Option<&Map<&'a [u8]>> {
        self.map.as_ref()
    }
}

/// Iterator over thesaurus terms.
pub struct ThesaurusTerms<'d, A: Automaton> {
    stream: Option<fst::map::Stream<'d, A>>,
}

impl<A: Automaton> Iterator for ThesaurusTerms<'_, A> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let stream = self.stream.as_mut()?;
        stream
            .next()
            .map(|(term, _)| String::from_utf8_lossy(term).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<u8>, u64) {
        let mut terms = SynonymPairs::new();
        terms
            .entry("car".to_string())
            .or_default()
            .extend([("auto".to_string(), 0), ("automobile".to_string(), 0), ("auto".to_string(), 3)]);
        terms
            .entry("auto".to_string())
            .or_default()
            .insert(("car".to_string(), 3));

        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"header").unwrap();
        let offset = write_thesaurus(&mut w, &terms).unwrap().unwrap();
        drop(w);
        (buf, offset)
    }

    #[test]
    fn test_key_packing() {
        assert_eq!(encode_key(2, 7), (2 << 32) | 7);
        assert_eq!(decode_key(encode_key(u32::MAX, 1)), (u32::MAX, 1));
    }

    #[test]
    fn test_lookup() {
        let (buf, offset) = sample();
        let thesaurus = Thesaurus::open("syn", ByteView::new(&buf), offset).unwrap();
        assert_eq!(thesaurus.cardinality(), 2);
        assert_eq!(thesaurus.num_synonyms(), 3);
        assert!(thesaurus.contains("car"));
        assert!(!thesaurus.contains("bike"));

        let matches = thesaurus.lookup("car", None).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].synonym, "auto");
        assert_eq!(matches[0].docs.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(matches[1].synonym, "automobile");

        let except: RoaringBitmap = [0u32].into_iter().collect();
        let matches = thesaurus.lookup("car", Some(&except)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].docs.iter().collect::<Vec<_>>(), vec![3]);

        assert!(thesaurus.lookup("bike", None).unwrap().is_empty());
    }

    #[test]
    fn test_terms() {
        let (buf, offset) = sample();
        let thesaurus = Thesaurus::open("syn", ByteView::new(&buf), offset).unwrap();
        assert_eq!(thesaurus.terms().collect::<Vec<_>>(), vec!["auto", "car"]);
        assert_eq!(thesaurus.prefix_terms("ca").collect::<Vec<_>>(), vec!["car"]);

        let empty = Thesaurus::empty("syn", ByteView::new(&buf));
        assert!(empty.is_empty());
        assert_eq!(empty.terms().count(), 0);
    }

    #[test]
    fn test_empty_terms_write_nothing() {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        assert_eq!(write_thesaurus(&mut w, &SynonymPairs::new()).unwrap(), None);
        assert_eq!(w.count(), 0);
    }
}
