//! Pluggable index sections.
//!
//! A segment file is assembled from independent sections (inverted text,
//! vector, synonym), each responsible for a subset of fields. The builder
//! and the merge engine drive every section through the same four entry
//! points of the [`Section`] trait; the per-field offsets sections report
//! end up in the segment's section index.
//!
//! Sections are stateless. Everything they accumulate while processing
//! documents lives in a [`SectionScratch`], which is pooled and reused
//! between builds by [`ScratchPool`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;

use crate::config::{ChunkMode, SegmentConfig};
use crate::document::Field;
use crate::error::{Result, StrataError};
use crate::lexical::section::{InvertedScratch, InvertedTextSection};
use crate::merge::{CancelSignal, MergeStats};
use crate::segment::{FieldInfo, Segment};
use crate::storage::structured::CountHashWriter;
use crate::synonym::section::{SynonymScratch, SynonymSection};
use crate::vector::section::{VectorScratch, VectorSection};

/// Number of known section types.
pub const NUM_SECTION_TYPES: usize = 3;

/// Identifier of a section kind, as recorded in the section index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionType {
    InvertedText = 0,
    Vector = 1,
    Synonym = 2,
}

impl SectionType {
    pub const ALL: [SectionType; NUM_SECTION_TYPES] = [
        SectionType::InvertedText,
        SectionType::Vector,
        SectionType::Synonym,
    ];

    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(SectionType::InvertedText),
            1 => Ok(SectionType::Vector),
            2 => Ok(SectionType::Synonym),
            _ => Err(StrataError::corrupt(format!("unknown section type {code}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionType::InvertedText => "inverted_text",
            SectionType::Vector => "vector",
            SectionType::Synonym => "synonym",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The single field-exclusion rule: fields carrying a vector or synonym
/// payload are left to their own sections and never reach the inverted
/// text section.
pub fn excluded_from_inverted(field: &Field) -> bool {
    field.is_vector() || field.is_synonym()
}

/// Per-build state of every section, one optional slot per section type.
#[derive(Debug, Default)]
pub struct SectionScratch {
    pub inverted: Option<InvertedScratch>,
    pub vector: Option<VectorScratch>,
    pub synonym: Option<SynonymScratch>,
}

impl SectionScratch {
    pub fn inverted_mut(&mut self) -> &mut InvertedScratch {
        self.inverted.get_or_insert_with(InvertedScratch::default)
    }

    pub fn vector_mut(&mut self) -> &mut VectorScratch {
        self.vector.get_or_insert_with(VectorScratch::default)
    }

    pub fn synonym_mut(&mut self) -> &mut SynonymScratch {
        self.synonym.get_or_insert_with(SynonymScratch::default)
    }

    /// Clear accumulated state, keeping allocations for reuse.
    pub fn reset(&mut self) {
        if let Some(scratch) = &mut self.inverted {
            scratch.reset();
        }
        if let Some(scratch) = &mut self.vector {
            scratch.reset();
        }
        if let Some(scratch) = &mut self.synonym {
            scratch.reset();
        }
    }
}

/// Pool of reusable scratch state.
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: Mutex<Vec<SectionScratch>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        ScratchPool::default()
    }

    /// Take a scratch from the pool, or a fresh one.
    pub fn acquire(&self) -> SectionScratch {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Reset a scratch and return it to the pool.
    pub fn release(&self, mut scratch: SectionScratch) {
        scratch.reset();
        self.free.lock().push(scratch);
    }

    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a section needs to persist freshly built state.
pub struct PersistContext<'a, 'w> {
    pub writer: &'a mut CountHashWriter<'w>,
    pub fields: &'a [FieldInfo],
    pub num_docs: u64,
    pub chunk_mode: ChunkMode,
    pub config: &'a SegmentConfig,
}

/// Everything a section needs to merge existing segments.
pub struct MergeContext<'a, 'w> {
    pub writer: &'a mut CountHashWriter<'w>,
    pub segments: &'a [Arc<Segment>],
    pub drops: &'a [Option<RoaringBitmap>],
    /// Old to new document number per segment; dropped documents map to
    /// [`crate::merge::DOC_DROPPED`].
    pub doc_num_maps: &'a [Vec<u64>],
    /// Field list of the merged segment; field ids are indexes into it.
    pub fields: &'a [FieldInfo],
    pub new_num_docs: u64,
    pub chunk_mode: ChunkMode,
    pub config: &'a SegmentConfig,
    pub cancel: &'a CancelSignal,
    pub stats: &'a mut MergeStats,
}

impl MergeContext<'_, '_> {
    /// Translate an old document number of segment `segment`.
    pub fn new_doc_num(&self, segment: usize, old: u64) -> Option<u64> {
        match self.doc_num_maps[segment].get(old as usize) {
            Some(&new) if new != crate::merge::DOC_DROPPED => Some(new),
            _ => None,
        }
    }

    /// Drop set of segment `segment`, if any.
    pub fn drops(&self, segment: usize) -> Option<&RoaringBitmap> {
        self.drops.get(segment).and_then(|d| d.as_ref())
    }
}

/// One index type sharing the segment file.
pub trait Section: fmt::Debug + Send + Sync {
    fn section_type(&self) -> SectionType;

    /// Accumulate one field of document `doc_num`. Called once per field
    /// per document, documents in ascending order.
    fn process(
        &self,
        scratch: &mut SectionScratch,
        doc_num: u64,
        field_id: u16,
        field: &Field,
    ) -> Result<()>;

    /// Serialize the accumulated state, recording each field's address.
    fn persist(&self, scratch: &mut SectionScratch, ctx: &mut PersistContext<'_, '_>) -> Result<()>;

    /// Offset of `field_id`'s section data written by the last persist or
    /// merge, if the field has any.
    fn addr_for_field(&self, scratch: &SectionScratch, field_id: u16) -> Option<u64>;

    /// Merge this section's data of every input segment into the writer,
    /// recording each field's address.
    fn merge(&self, scratch: &mut SectionScratch, ctx: &mut MergeContext<'_, '_>) -> Result<()>;
}

/// The ordered list of sections a builder or merger drives.
#[derive(Debug)]
pub struct SectionRegistry {
    sections: Vec<Box<dyn Section>>,
}

impl SectionRegistry {
    /// A registry over an explicit list of sections. Duplicate section
    /// types are rejected.
    pub fn new(sections: Vec<Box<dyn Section>>) -> Result<Self> {
        let mut seen = [false; NUM_SECTION_TYPES];
        for section in &sections {
            let idx = section.section_type().index();
            if seen[idx] {
                return Err(StrataError::invalid_argument(format!(
                    "section {} registered twice",
                    section.section_type()
                )));
            }
            seen[idx] = true;
        }
        Ok(SectionRegistry { sections })
    }

    pub fn sections(&self) -> &[Box<dyn Section>] {
        &self.sections
    }
}

impl Default for SectionRegistry {
    fn default() -> Self {
        SectionRegistry {
            sections: vec![
                Box::new(InvertedTextSection),
                Box::new(VectorSection),
                Box::new(SynonymSection),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{SynonymDefinition, VectorPayload};
    use crate::vector::VectorMetric;

    #[test]
    fn test_section_type_codes() {
        for section_type in SectionType::ALL {
            assert_eq!(SectionType::from_code(section_type.code()).unwrap(), section_type);
        }
        assert!(SectionType::from_code(3).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_exclusion_rule() {
        assert!(!excluded_from_inverted(&Field::text("body", "a b")));
        assert!(excluded_from_inverted(&Field::vector(
            "emb",
            VectorPayload::new(2, vec![1.0, 0.0], VectorMetric::L2)
        )));
        assert!(excluded_from_inverted(&Field::synonyms(
            "syn",
            vec![SynonymDefinition::equivalent(["a", "b"])]
        )));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let sections: Vec<Box<dyn Section>> =
            vec![Box::new(InvertedTextSection), Box::new(InvertedTextSection)];
        assert!(SectionRegistry::new(sections).is_err());
        assert_eq!(SectionRegistry::default().sections().len(), 3);
    }

    #[test]
    fn test_scratch_pool_reuse() {
        let pool = ScratchPool::new();
        let mut scratch = pool.acquire();
        scratch.inverted_mut();
        pool.release(scratch);
        assert_eq!(pool.len(), 1);

        let scratch = pool.acquire();
        assert!(scratch.inverted.is_some());
        assert!(pool.is_empty());
    }
}
