//! Inverted text indexing.
//!
//! Term dictionaries are FSTs mapping terms to posting values; posting
//! lists carry frequencies, norms and optional locations in chunked
//! streams; doc values give per-document access to a field's terms.

pub mod dictionary;
pub mod doc_values;
pub mod posting;
pub mod section;

pub use dictionary::{DictEntry, Dictionary, DictionaryIterator};
pub use doc_values::DocValueReader;
pub use posting::{Posting, PostingsIterator, PostingsList};
pub use section::InvertedTextSection;
