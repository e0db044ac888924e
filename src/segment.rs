//! Immutable index segments.
//!
//! A [`Segment`] wraps the bytes of one segment file (memory mapped, or
//! owned when built or merged in memory) and answers every read the query
//! side needs: dictionaries, thesauri, vector search, stored fields, doc
//! values and external id resolution. Segments are shared as
//! `Arc<Segment>`; the mapping is released when the last clone drops.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use roaring::RoaringBitmap;

use crate::config::{ChunkMode, SegmentConfig};
use crate::document::{FieldOptions, ID_FIELD, TEXT_TYPE};
use crate::error::{Result, StrataError};
use crate::lexical::section::InvertedFieldRecord;
use crate::lexical::{Dictionary, DocValueReader};
use crate::section::SectionType;
use crate::storage::{ByteView, SegmentBytes, mmap};
use crate::synonym::Thesaurus;
use crate::synonym::section::read_thesaurus_offset;
use crate::vector::{CacheHandle, VecPostingsList, VectorFieldData, VectorIndexCache, VectorSearchParams};

pub mod builder;
pub mod contentcoder;
pub mod fields;
pub mod footer;
pub mod intcoder;
pub mod stored;

pub use builder::{BuildOutcome, SegmentBuilder, ValidationHook};
pub use fields::{FieldInfo, FieldKind, FieldSections};
pub use footer::Footer;
pub use stored::{StoredFieldValue, StoredRecord};

/// One immutable segment.
pub struct Segment {
    bytes: SegmentBytes,
    path: Option<PathBuf>,
    footer: Footer,
    chunk_mode: ChunkMode,
    fields: Vec<FieldInfo>,
    sections: Vec<FieldSections>,
    field_ids: AHashMap<String, u16>,
    config: SegmentConfig,
    vector_cache: VectorIndexCache,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("num_docs", &self.footer.num_docs)
            .field("fields", &self.fields.len())
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Segment {
    /// Memory-map and open the segment file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: &SegmentConfig) -> Result<Arc<Segment>> {
        let path = path.as_ref();
        let mmap = mmap::map_file(path)?;
        let segment = Segment::load(SegmentBytes::Mapped(mmap), Some(path.to_path_buf()), config)?;
        log::info!(
            "opened segment {} ({} docs, {} fields)",
            path.display(),
            segment.count(),
            segment.fields.len()
        );
        Ok(Arc::new(segment))
    }

    /// Open a segment held in memory.
    pub fn from_bytes(bytes: Vec<u8>, config: &SegmentConfig) -> Result<Arc<Segment>> {
        Ok(Arc::new(Segment::load(SegmentBytes::Owned(bytes), None, config)?))
    }

    fn load(bytes: SegmentBytes, path: Option<PathBuf>, config: &SegmentConfig) -> Result<Segment> {
        config.validate()?;
        let view = bytes.view();
        let footer = Footer::parse(view, config.verify_checksum)?;
        let chunk_mode = footer.chunk_mode()?;
        let (fields, sections) = fields::read_fields(view, &footer)?;

        let mut field_ids = AHashMap::with_capacity(fields.len());
        for (id, field) in fields.iter().enumerate() {
            if field_ids.insert(field.name.clone(), id as u16).is_some() {
                return Err(StrataError::corrupt(format!(
                    "field {} appears twice in the section index",
                    field.name
                )));
            }
        }

        Ok(Segment {
            bytes,
            path,
            footer,
            chunk_mode,
            fields,
            sections,
            field_ids,
            config: config.clone(),
            vector_cache: VectorIndexCache::new(config.cache.clone()),
        })
    }

    /// Write this segment's bytes to `path`.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        mmap::write_file(path, &self.bytes)
    }

    /// Number of documents.
    pub fn count(&self) -> u64 {
        self.footer.num_docs
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field_id(&self, name: &str) -> Option<u16> {
        self.field_ids.get(name).copied()
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.field_id(name).map(|id| &self.fields[id as usize])
    }

    pub fn field_options(&self, name: &str) -> Option<FieldOptions> {
        self.field_info(name).map(|f| f.options)
    }

    /// Address of `field_id`'s data in `section`, if the field has any.
    pub fn section_addr(&self, field_id: u16, section: SectionType) -> Option<u64> {
        self.sections
            .get(field_id as usize)
            .and_then(|s| s[section.index()])
    }

    fn field_addr(&self, name: &str, section: SectionType) -> Option<u64> {
        self.field_id(name)
            .and_then(|id| self.section_addr(id, section))
    }

    pub fn view(&self) -> ByteView<'_> {
        self.bytes.view()
    }

    /// Raw segment bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn chunk_mode(&self) -> ChunkMode {
        self.chunk_mode
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_mapped(&self) -> bool {
        self.bytes.is_mapped()
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    pub fn vector_cache(&self) -> &VectorIndexCache {
        &self.vector_cache
    }

    /// Offset of `doc_num`'s stored record.
    pub fn stored_record_offset(&self, doc_num: u64) -> Result<u64> {
        stored::record_offset(
            self.view(),
            self.footer.stored_index_offset,
            self.footer.num_docs,
            doc_num,
        )
    }

    /// The stored record of `doc_num`.
    pub fn stored_record(&self, doc_num: u64) -> Result<StoredRecord<'_>> {
        let offset = self.stored_record_offset(doc_num)?;
        StoredRecord::read(self.view(), offset)
    }

    /// External identifier of `doc_num`.
    pub fn doc_id(&self, doc_num: u64) -> Result<String> {
        let record = self.stored_record(doc_num)?;
        String::from_utf8(record.id.to_vec())
            .map_err(|_| StrataError::corrupt(format!("id of document {doc_num} is not UTF-8")))
    }

    /// Visit the stored values of `doc_num`, `_id` first, until the visitor
    /// returns `false`.
    pub fn visit_stored_fields<F>(&self, doc_num: u64, mut visitor: F) -> Result<()>
    where
        F: FnMut(&str, u8, &[u8], &[u64]) -> bool,
    {
        let record = self.stored_record(doc_num)?;
        if !visitor(ID_FIELD, TEXT_TYPE, record.id, &[]) {
            return Ok(());
        }
        for value in record.values()? {
            let field = self.fields.get(value.field_id as usize).ok_or_else(|| {
                StrataError::corrupt(format!(
                    "document {doc_num} stores unknown field id {}",
                    value.field_id
                ))
            })?;
            if !visitor(&field.name, value.type_byte, value.value, &value.array_positions) {
                break;
            }
        }
        Ok(())
    }

    fn inverted_record(&self, field: &str) -> Result<Option<InvertedFieldRecord>> {
        self.field_addr(field, SectionType::InvertedText)
            .map(|addr| InvertedFieldRecord::read(self.view(), addr))
            .transpose()
    }

    /// Term dictionary of `field`; empty when the field has no terms.
    pub fn dictionary(&self, field: &str) -> Result<Dictionary<'_>> {
        match self.inverted_record(field)? {
            Some(record) => Dictionary::open(
                field,
                self.view(),
                record.dict_offset,
                self.footer.num_docs,
                self.chunk_mode,
            ),
            None => Ok(Dictionary::empty(
                field,
                self.view(),
                self.footer.num_docs,
                self.chunk_mode,
            )),
        }
    }

    /// Doc-value reader of `field`, if it has doc values.
    pub fn doc_value_reader(&self, field: &str) -> Result<Option<DocValueReader<'_>>> {
        let Some(record) = self.inverted_record(field)? else {
            return Ok(None);
        };
        match record.doc_values {
            Some((start, end)) => Ok(Some(DocValueReader::open(field, self.view(), start, end)?)),
            None => Ok(None),
        }
    }

    /// Visit every doc-value term `doc_num` holds in `fields`.
    pub fn visit_doc_values<F>(&self, doc_num: u64, fields: &[&str], mut visitor: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]),
    {
        if doc_num >= self.footer.num_docs {
            return Err(StrataError::invalid_argument(format!(
                "document number {doc_num} out of range (segment holds {})",
                self.footer.num_docs
            )));
        }
        for field in fields {
            if let Some(mut reader) = self.doc_value_reader(field)? {
                reader.visit(doc_num, &mut visitor)?;
            }
        }
        Ok(())
    }

    /// Document numbers of the given external ids; unknown ids are skipped.
    pub fn doc_numbers<S: AsRef<[u8]>>(&self, ids: &[S]) -> Result<RoaringBitmap> {
        let dict = self.dictionary(ID_FIELD)?;
        let mut docs = RoaringBitmap::new();
        for id in ids {
            docs |= dict.postings_list(id.as_ref(), None)?.doc_numbers();
        }
        Ok(docs)
    }

    /// Thesaurus of `field`; empty when the field has none.
    pub fn thesaurus(&self, field: &str) -> Result<Thesaurus<'_>> {
        match self.field_addr(field, SectionType::Synonym) {
            Some(addr) => {
                let offset = read_thesaurus_offset(self.view(), addr)?;
                Thesaurus::open(field, self.view(), offset)
            }
            None => Ok(Thesaurus::empty(field, self.view())),
        }
    }

    /// Decode `field`'s vector index, bypassing the cache.
    pub fn load_vector_field(&self, field: &str) -> Result<Option<VectorFieldData>> {
        self.field_addr(field, SectionType::Vector)
            .map(|addr| VectorFieldData::read(self.view(), addr))
            .transpose()
    }

    /// Cached vector index of `field`.
    pub fn vector_field(&self, field: &str) -> Result<Option<CacheHandle>> {
        let Some(field_id) = self.field_id(field) else {
            return Ok(None);
        };
        let Some(addr) = self.section_addr(field_id, SectionType::Vector) else {
            return Ok(None);
        };
        let handle = self
            .vector_cache
            .get_or_load(field_id, || VectorFieldData::read(self.view(), addr))?;
        Ok(Some(handle))
    }

    /// Nearest documents to `query` in `field`.
    pub fn vector_search(
        &self,
        field: &str,
        query: &[f32],
        params: VectorSearchParams,
    ) -> Result<VecPostingsList> {
        match self.vector_field(field)? {
            Some(data) => data.search(query, params),
            None => Ok(VecPostingsList::default()),
        }
    }

    /// Nearest documents to `query` in `field` among `eligible`.
    pub fn vector_search_with_filter(
        &self,
        field: &str,
        query: &[f32],
        params: VectorSearchParams,
        eligible: &RoaringBitmap,
    ) -> Result<VecPostingsList> {
        match self.vector_field(field)? {
            Some(data) => data.search_with_filter(query, params, eligible),
            None => Ok(VecPostingsList::default()),
        }
    }
}
