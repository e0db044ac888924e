//! Synonym thesauri.
//!
//! A synonym field maps each left-hand term to the synonyms defined for it
//! and the documents that defined each pair.

pub mod section;
pub mod thesaurus;

pub use section::SynonymSection;
pub use thesaurus::{SynonymMatch, Thesaurus, ThesaurusTerms};
