//! Per-document term values of a field.
//!
//! A document's doc value is the sorted list of its terms in the field,
//! each followed by a `0xFF` terminator, stored in a chunked content coder.

use crate::error::Result;
use crate::segment::contentcoder::ContentDecoder;
use crate::storage::ByteView;

/// Terminator following each term in a doc value.
pub const TERM_SEPARATOR: u8 = 0xFF;

/// Encode sorted terms as one doc value.
pub fn encode_terms<'t, I>(terms: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'t [u8]>,
{
    let mut out = Vec::new();
    for term in terms {
        out.extend_from_slice(term);
        out.push(TERM_SEPARATOR);
    }
    out
}

/// Split a doc value back into its terms.
pub fn split_terms(value: &[u8]) -> impl Iterator<Item = &[u8]> {
    value
        .split(|&b| b == TERM_SEPARATOR)
        .take(value.iter().filter(|&&b| b == TERM_SEPARATOR).count())
}

/// Doc-value reader of one field.
#[derive(Debug, Clone)]
pub struct DocValueReader<'a> {
    field: String,
    decoder: ContentDecoder<'a>,
}

impl<'a> DocValueReader<'a> {
    pub fn open(field: &str, view: ByteView<'a>, start: u64, end: u64) -> Result<Self> {
        Ok(DocValueReader {
            field: field.to_string(),
            decoder: ContentDecoder::open(view, start, end)?,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Visit each term `doc_num` holds in this field.
    pub fn visit<F>(&mut self, doc_num: u64, mut visitor: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]),
    {
        if let Some(value) = self.decoder.get(doc_num)? {
            for term in split_terms(value) {
                visitor(&self.field, term);
            }
        }
        Ok(())
    }

    /// Raw doc value of `doc_num`.
    pub fn raw(&mut self, doc_num: u64) -> Result<Option<&'a [u8]>> {
        self.decoder.get(doc_num)
    }

    /// Visit every `(doc_num, raw value)` pair.
    pub fn for_each<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(u64, &'a [u8]) -> Result<()>,
    {
        self.decoder.for_each(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::contentcoder::ContentCoder;
    use crate::storage::structured::CountHashWriter;

    #[test]
    fn test_encode_split() {
        let value = encode_terms([&b"a"[..], b"", b"cd"]);
        assert_eq!(value, b"a\xFF\xFFcd\xFF");
        let terms: Vec<&[u8]> = split_terms(&value).collect();
        assert_eq!(terms, vec![&b"a"[..], b"", b"cd"]);
        assert_eq!(split_terms(b"").count(), 0);
    }

    #[test]
    fn test_reader_visits_terms() {
        let mut coder = ContentCoder::new(16);
        coder.add(2, &encode_terms([&b"blue"[..], b"red"]));

        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        let (start, end) = coder.write_to(&mut w).unwrap();
        drop(w);

        let mut reader = DocValueReader::open("color", ByteView::new(&buf), start, end).unwrap();
        let mut seen = Vec::new();
        reader
            .visit(2, |field, term| seen.push(format!("{field}={}", String::from_utf8_lossy(term))))
            .unwrap();
        assert_eq!(seen, vec!["color=blue", "color=red"]);

        seen.clear();
        reader.visit(1, |_, _| seen.push(String::new())).unwrap();
        assert!(seen.is_empty());
    }
}
