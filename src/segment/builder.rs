//! Building a segment from a batch of analyzed documents.
//!
//! The file is laid out as: stored records, stored index, every section's
//! payload in registry order, the legacy field index, the section index
//! and the footer.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;

use crate::config::SegmentConfig;
use crate::document::{Field, FieldOptions, FieldValue, ID_FIELD, IndexDocument};
use crate::error::{Result, StrataError};
use crate::merge::CancelSignal;
use crate::section::{NUM_SECTION_TYPES, PersistContext, ScratchPool, SectionRegistry};
use crate::segment::fields::{FieldSections, write_fields_index, write_sections_index};
use crate::segment::footer::{FORMAT_VERSION, Footer, NO_DOC_VALUES};
use crate::segment::stored::{StoredValue, encode_record, write_stored_index};
use crate::segment::{FieldInfo, FieldKind, Segment};
use crate::storage::mmap;
use crate::storage::structured::CountHashWriter;

/// Decides whether a rejected document aborts the build (`true`) or is
/// skipped (`false`).
pub type ValidationHook = Box<dyn Fn(&StrataError) -> bool + Send + Sync>;

/// A built segment and the documents left out of it.
#[derive(Debug)]
pub struct BuildOutcome {
    pub segment: Arc<Segment>,
    /// One [`StrataError::InvalidDocument`] per skipped input document.
    pub rejected: Vec<StrataError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum VectorShape {
    None,
    Vector(usize, crate::vector::VectorMetric),
}

#[derive(Debug, Clone)]
struct FieldPlan {
    options: FieldOptions,
    kind: FieldKind,
    shape: VectorShape,
}

/// Builds segments.
pub struct SegmentBuilder {
    config: SegmentConfig,
    registry: SectionRegistry,
    cancel: CancelSignal,
    hook: Option<ValidationHook>,
    scratch: ScratchPool,
}

impl fmt::Debug for SegmentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl SegmentBuilder {
    pub fn new(config: SegmentConfig) -> Self {
        SegmentBuilder {
            config,
            registry: SectionRegistry::default(),
            cancel: CancelSignal::never(),
            hook: None,
            scratch: ScratchPool::new(),
        }
    }

    pub fn with_registry(mut self, registry: SectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Install a hook deciding which rejected documents are fatal. Without
    /// one, rejected documents are skipped.
    pub fn with_validation_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StrataError) -> bool + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Build an in-memory segment.
    pub fn build<D: IndexDocument>(&self, docs: &[D]) -> Result<BuildOutcome> {
        let mut bytes = Vec::new();
        let rejected = self.write(docs, &mut bytes)?;
        let segment = Segment::from_bytes(bytes, &self.config)?;
        Ok(BuildOutcome { segment, rejected })
    }

    /// Build a segment file at `path` and open it memory-mapped. A partially
    /// written file is removed on failure.
    pub fn build_to_file<D: IndexDocument, P: AsRef<Path>>(&self, docs: &[D], path: P) -> Result<BuildOutcome> {
        let path = path.as_ref();
        let result = mmap::create_output(path).and_then(|mut output| {
            let rejected = self.write(docs, &mut output)?;
            mmap::finish_output(output)?;
            Ok(rejected)
        });
        let rejected = match result {
            Ok(rejected) => rejected,
            Err(e) => {
                mmap::remove_partial(path);
                return Err(e);
            }
        };
        let segment = Segment::open(path, &self.config)?;
        Ok(BuildOutcome { segment, rejected })
    }

    fn write<D: IndexDocument>(&self, docs: &[D], out: &mut dyn Write) -> Result<Vec<StrataError>> {
        let start = Instant::now();

        let mut plans: BTreeMap<String, FieldPlan> = BTreeMap::new();
        let mut accepted = Vec::with_capacity(docs.len());
        let mut rejected = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            match validate(index, doc, &plans) {
                Ok(doc_plans) => {
                    merge_plans(&mut plans, doc_plans);
                    accepted.push(doc);
                }
                Err(e) => {
                    if self.hook.as_ref().is_some_and(|hook| hook(&e)) {
                        return Err(e);
                    }
                    log::warn!("skipping document: {e}");
                    rejected.push(e);
                }
            }
        }

        let fields = field_list(plans);
        let field_ids: AHashMap<&str, u16> = fields
            .iter()
            .enumerate()
            .map(|(id, f)| (f.name.as_str(), id as u16))
            .collect();
        let num_docs = accepted.len() as u64;

        let mut w = CountHashWriter::new(out);

        // Stored records.
        let mut offsets = Vec::with_capacity(accepted.len());
        let mut record = Vec::new();
        for doc in &accepted {
            self.cancel.check()?;
            let mut owned: Vec<(u16, u8, Vec<u8>, Vec<u64>)> = Vec::new();
            doc.visit_fields(&mut |field: &Field| {
                let Some((type_byte, value)) = field.text_value() else {
                    return;
                };
                if field.name == ID_FIELD {
                    return;
                }
                if field.options.stored {
                    owned.push((
                        field_ids[field.name.as_str()],
                        type_byte,
                        value.to_vec(),
                        field.array_positions.clone(),
                    ));
                }
            });
            let id = doc_id(*doc).unwrap_or_default();
            let values: Vec<StoredValue<'_>> = owned
                .iter()
                .map(|(field_id, type_byte, value, positions)| StoredValue {
                    field_id: *field_id,
                    type_byte: *type_byte,
                    value,
                    array_positions: positions,
                })
                .collect();
            encode_record(&mut record, &id, &values);
            offsets.push(w.count());
            w.write_raw(&record)?;
        }
        let stored_index_offset = write_stored_index(&mut w, &offsets)?;

        // Sections.
        let mut scratch = self.scratch.acquire();
        for (doc_num, doc) in accepted.iter().enumerate() {
            self.cancel.check()?;
            let mut failure = None;
            let mut process = |field: &Field| {
                if failure.is_some() {
                    return;
                }
                let field_id = field_ids[field.name.as_str()];
                for section in self.registry.sections() {
                    if let Err(e) = section.process(&mut scratch, doc_num as u64, field_id, field) {
                        failure = Some(e);
                        return;
                    }
                }
            };
            doc.visit_fields(&mut process);
            doc.visit_composite(&mut process);
            if let Some(e) = failure {
                return Err(e);
            }
        }

        let mut ctx = PersistContext {
            writer: &mut w,
            fields: &fields,
            num_docs,
            chunk_mode: self.config.chunk_mode,
            config: &self.config,
        };
        for section in self.registry.sections() {
            section.persist(&mut scratch, &mut ctx)?;
        }

        let mut sections: Vec<FieldSections> = vec![[None; NUM_SECTION_TYPES]; fields.len()];
        for (field_id, field_sections) in sections.iter_mut().enumerate() {
            for section in self.registry.sections() {
                field_sections[section.section_type().index()] =
                    section.addr_for_field(&scratch, field_id as u16);
            }
        }
        self.scratch.release(scratch);

        let fields_index_offset = write_fields_index(&mut w, &fields)?;
        let sections_index_offset = write_sections_index(&mut w, &fields, &sections)?;
        let mut footer = Footer {
            num_docs,
            stored_index_offset,
            fields_index_offset,
            sections_index_offset,
            doc_value_offset: NO_DOC_VALUES,
            chunk_mode: self.config.chunk_mode.code(),
            version: FORMAT_VERSION,
            crc: 0,
        };
        footer.write(&mut w)?;
        w.flush()?;

        log::info!(
            "built segment: {num_docs} docs, {} fields, {} rejected, {} bytes in {:?}",
            fields.len(),
            rejected.len(),
            w.count(),
            start.elapsed()
        );
        Ok(rejected)
    }
}

fn doc_id<D: IndexDocument>(doc: &D) -> Option<Vec<u8>> {
    let mut id = None;
    doc.visit_fields(&mut |field: &Field| {
        if id.is_none() && field.name == ID_FIELD {
            id = field.text_value().map(|(_, value)| value.to_vec());
        }
    });
    id
}

/// Check one document against itself and the fields seen so far,
/// returning the field plans it contributes.
fn validate<D: IndexDocument>(
    index: usize,
    doc: &D,
    known: &BTreeMap<String, FieldPlan>,
) -> Result<BTreeMap<String, FieldPlan>> {
    let mut plans: BTreeMap<String, FieldPlan> = BTreeMap::new();
    let mut problem: Option<String> = None;
    let mut has_id = false;

    let mut check = |field: &Field, composite: bool| {
        if problem.is_some() {
            return;
        }
        if field.name.is_empty() {
            problem = Some("field with an empty name".to_string());
            return;
        }
        if field.name == ID_FIELD {
            if composite || field.text_value().is_none() {
                problem = Some(format!("{ID_FIELD} must be a regular text field"));
                return;
            }
            has_id = true;
        }

        let shape = match &field.value {
            FieldValue::Vector(payload) => {
                if payload.dims == 0 || payload.data.len() % payload.dims != 0 {
                    problem = Some(format!(
                        "field {}: {} floats do not divide into dimension {}",
                        field.name,
                        payload.data.len(),
                        payload.dims
                    ));
                    return;
                }
                VectorShape::Vector(payload.dims, payload.metric)
            }
            _ => VectorShape::None,
        };

        for token in &field.tokens {
            if !token.locations.is_empty() && token.locations.len() as u64 != token.frequency {
                problem = Some(format!(
                    "field {}: term {} has frequency {} but {} locations",
                    field.name,
                    String::from_utf8_lossy(&token.term),
                    token.frequency,
                    token.locations.len()
                ));
                return;
            }
        }

        let plan = FieldPlan {
            options: field.options,
            kind: FieldKind::of(field),
            shape,
        };
        for existing in [known.get(&field.name), plans.get(&field.name)].into_iter().flatten() {
            if existing.kind != plan.kind {
                problem = Some(format!(
                    "field {} is {:?} here but {:?} elsewhere",
                    field.name, plan.kind, existing.kind
                ));
                return;
            }
            if existing.shape != plan.shape {
                problem = Some(format!(
                    "field {}: vector shape {:?} conflicts with {:?}",
                    field.name, plan.shape, existing.shape
                ));
                return;
            }
        }
        plans
            .entry(field.name.clone())
            .and_modify(|p| p.options = union(p.options, plan.options))
            .or_insert(plan);
    };

    doc.visit_fields(&mut |field: &Field| check(field, false));
    doc.visit_composite(&mut |field: &Field| check(field, true));

    if let Some(reason) = problem {
        return Err(StrataError::invalid_document(index, reason));
    }
    if !has_id {
        return Err(StrataError::invalid_document(
            index,
            format!("missing {ID_FIELD} field"),
        ));
    }
    Ok(plans)
}

fn union(a: FieldOptions, b: FieldOptions) -> FieldOptions {
    FieldOptions {
        stored: a.stored || b.stored,
        indexed: a.indexed || b.indexed,
        doc_values: a.doc_values || b.doc_values,
    }
}

fn merge_plans(plans: &mut BTreeMap<String, FieldPlan>, doc_plans: BTreeMap<String, FieldPlan>) {
    for (name, plan) in doc_plans {
        plans
            .entry(name)
            .and_modify(|p| p.options = union(p.options, plan.options))
            .or_insert(plan);
    }
}

/// Field list ordered `_id` first, then by name.
fn field_list(plans: BTreeMap<String, FieldPlan>) -> Vec<FieldInfo> {
    let mut fields = Vec::with_capacity(plans.len());
    let mut rest = Vec::with_capacity(plans.len());
    for (name, plan) in plans {
        let info = FieldInfo::new(name, plan.options, plan.kind);
        if info.name == ID_FIELD {
            fields.push(info);
        } else {
            rest.push(info);
        }
    }
    fields.extend(rest);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, SynonymDefinition, TokenFreq, TokenLocation, VectorPayload};
    use crate::vector::VectorMetric;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a")
                .add_field(Field::text("title", "red fish"))
                .add_field(Field::text("body", "one fish two fish")),
            Document::new("b").add_field(Field::text("title", "blue fish")),
        ]
    }

    #[test]
    fn test_build_in_memory() {
        let outcome = SegmentBuilder::new(SegmentConfig::default()).build(&docs()).unwrap();
        let segment = outcome.segment;
        assert!(outcome.rejected.is_empty());
        assert_eq!(segment.count(), 2);

        let names: Vec<&str> = segment.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["_id", "body", "title"]);

        assert_eq!(segment.doc_id(1).unwrap(), "b");
        let fish = segment.dictionary("title").unwrap();
        assert_eq!(
            fish.postings_list(b"fish", None).unwrap().doc_numbers().len(),
            2
        );
        let found = segment.doc_numbers(&["b", "zzz"]).unwrap();
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_invalid_documents_are_skipped() {
        let mut bad_token = TokenFreq::new("x", 2);
        bad_token.locations.push(TokenLocation {
            position: 1,
            start: 0,
            end: 1,
            array_positions: Vec::new(),
        });
        let docs = vec![
            Document::new("ok").add_field(Field::text("body", "fine")),
            Document::without_id().add_field(Field::text("body", "no id")),
            Document::new("bad").add_field(Field::text_with_tokens("body", "x", vec![bad_token])),
            Document::new("shape").add_field(Field::vector(
                "emb",
                VectorPayload::new(2, vec![1.0, 2.0, 3.0], VectorMetric::L2),
            )),
            Document::new("kind").add_field(Field::synonyms(
                "body",
                vec![SynonymDefinition::equivalent(["a", "b"])],
            )),
        ];
        let outcome = SegmentBuilder::new(SegmentConfig::default()).build(&docs).unwrap();
        assert_eq!(outcome.segment.count(), 1);
        assert_eq!(outcome.rejected.len(), 4);
        assert!(matches!(
            outcome.rejected[0],
            StrataError::InvalidDocument { index: 1, .. }
        ));
    }

    #[test]
    fn test_hook_can_make_rejections_fatal() {
        let docs = vec![Document::without_id()];
        let builder = SegmentBuilder::new(SegmentConfig::default()).with_validation_hook(|_| true);
        assert!(builder.build(&docs).is_err());
    }

    #[test]
    fn test_vector_dimension_conflict_across_documents() {
        let docs = vec![
            Document::new("a").add_field(Field::vector(
                "emb",
                VectorPayload::new(2, vec![1.0, 2.0], VectorMetric::L2),
            )),
            Document::new("b").add_field(Field::vector(
                "emb",
                VectorPayload::new(3, vec![1.0, 2.0, 3.0], VectorMetric::L2),
            )),
        ];
        let outcome = SegmentBuilder::new(SegmentConfig::default()).build(&docs).unwrap();
        assert_eq!(outcome.segment.count(), 1);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn test_cancelled_build() {
        let (tx, signal) = CancelSignal::new();
        tx.send(()).unwrap();
        let builder = SegmentBuilder::new(SegmentConfig::default()).with_cancel(signal);
        let err = builder.build(&docs()).unwrap_err();
        assert!(err.is_closed());
    }
}
