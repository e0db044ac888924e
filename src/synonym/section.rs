//! Synonym section.
//!
//! Per field record: `uvarint u64::MAX` twice (no doc values) and the
//! `uvarint` offset of the field's thesaurus.

use ahash::AHashMap;
use fst::Streamer;
use fst::map::OpBuilder;

use crate::document::{Field, FieldValue};
use crate::error::{Result, StrataError};
use crate::section::{MergeContext, PersistContext, Section, SectionScratch, SectionType};
use crate::segment::FieldKind;
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;
use crate::synonym::thesaurus::{SynonymPairs, Thesaurus, decode_key, write_thesaurus};

const NO_DOC_VALUES: u64 = u64::MAX;

/// Offset of the thesaurus recorded at `addr`.
pub fn read_thesaurus_offset(view: ByteView<'_>, addr: u64) -> Result<u64> {
    let mut reader = view.reader_at(addr)?;
    let dv_start = reader.read_uvarint()?;
    let dv_end = reader.read_uvarint()?;
    if dv_start != NO_DOC_VALUES || dv_end != NO_DOC_VALUES {
        return Err(StrataError::corrupt(format!(
            "synonym field record at {addr} carries doc values"
        )));
    }
    reader.read_uvarint()
}

fn write_record(w: &mut CountHashWriter<'_>, thesaurus_offset: u64) -> Result<u64> {
    let addr = w.count();
    w.write_uvarint(NO_DOC_VALUES)?;
    w.write_uvarint(NO_DOC_VALUES)?;
    w.write_uvarint(thesaurus_offset)?;
    Ok(addr)
}

/// Build state of the synonym section.
#[derive(Debug, Default)]
pub struct SynonymScratch {
    fields: AHashMap<u16, SynonymPairs>,
    addrs: AHashMap<u16, u64>,
}

impl SynonymScratch {
    pub fn reset(&mut self) {
        self.fields.clear();
        self.addrs.clear();
    }
}

/// The synonym section.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynonymSection;

impl Section for SynonymSection {
    fn section_type(&self) -> SectionType {
        SectionType::Synonym
    }

    fn process(&self, scratch: &mut SectionScratch, doc_num: u64, field_id: u16, field: &Field) -> Result<()> {
        let FieldValue::Synonyms(definitions) = &field.value else {
            return Ok(());
        };
        let terms = scratch.synonym_mut().fields.entry(field_id).or_default();
        for definition in definitions {
            for (term, synonym) in definition.pairs() {
                terms
                    .entry(term.to_string())
                    .or_default()
                    .insert((synonym.to_string(), doc_num));
            }
        }
        Ok(())
    }

    fn persist(&self, scratch: &mut SectionScratch, ctx: &mut PersistContext<'_, '_>) -> Result<()> {
        let scratch = scratch.synonym_mut();
        let mut field_ids: Vec<u16> = scratch.fields.keys().copied().collect();
        field_ids.sort_unstable();

        for field_id in field_ids {
            let Some(terms) = scratch.fields.remove(&field_id) else {
                continue;
            };
            let Some(offset) = write_thesaurus(ctx.writer, &terms)? else {
                continue;
            };
            let addr = write_record(ctx.writer, offset)?;
            log::debug!(
                "persisted thesaurus of field {} ({} terms) at {addr}",
                ctx.fields[field_id as usize].name,
                terms.len()
            );
            scratch.addrs.insert(field_id, addr);
        }
        Ok(())
    }

    fn addr_for_field(&self, scratch: &SectionScratch, field_id: u16) -> Option<u64> {
        scratch
            .synonym
            .as_ref()
            .and_then(|s| s.addrs.get(&field_id).copied())
    }

    fn merge(&self, scratch: &mut SectionScratch, ctx: &mut MergeContext<'_, '_>) -> Result<()> {
        let scratch = scratch.synonym_mut();
        let segments = ctx.segments;
        let fields = ctx.fields;

        for (field_id, field) in fields.iter().enumerate() {
            if field.kind != FieldKind::Synonym {
                continue;
            }

            let mut thesauri: Vec<(usize, Thesaurus<'_>)> = Vec::new();
            for (idx, segment) in segments.iter().enumerate() {
                let thesaurus = segment.thesaurus(&field.name)?;
                if !thesaurus.is_empty() {
                    thesauri.push((idx, thesaurus));
                }
            }

            let mut op = OpBuilder::new();
            for (_, thesaurus) in &thesauri {
                if let Some(map) = thesaurus.fst() {
                    op.push(map.stream());
                }
            }
            let mut union = op.union();

            // Synonym ids are reassigned once every term has been read.
            let mut merged = SynonymPairs::new();
            while let Some((term, indexed)) = union.next() {
                ctx.cancel.check()?;
                let term = String::from_utf8(term.to_vec()).map_err(|_| {
                    StrataError::corrupt(format!("thesaurus term of field {} is not UTF-8", field.name))
                })?;

                for iv in indexed {
                    let (segment_idx, thesaurus) = &thesauri[iv.index];
                    let postings = thesaurus.postings_at(iv.value)?;
                    for key in postings.iter() {
                        let (syn_id, old_doc) = decode_key(key);
                        let Some(new_doc) = ctx.new_doc_num(*segment_idx, old_doc as u64) else {
                            continue;
                        };
                        let synonym = thesaurus.synonym(syn_id).ok_or_else(|| {
                            StrataError::corrupt(format!(
                                "field {}: term {term} references unknown synonym {syn_id}",
                                field.name
                            ))
                        })?;
                        merged
                            .entry(term.clone())
                            .or_default()
                            .insert((synonym.to_string(), new_doc));
                    }
                }
            }

            let num_terms = merged.len();
            let Some(offset) = write_thesaurus(ctx.writer, &merged)? else {
                continue;
            };
            let addr = write_record(ctx.writer, offset)?;
            ctx.stats.synonyms_merged += num_terms as u64;
            log::debug!("merged thesaurus of field {} ({num_terms} terms) at {addr}", field.name);
            scratch.addrs.insert(field_id as u16, addr);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::document::{FieldOptions, SynonymDefinition};
    use crate::segment::FieldInfo;

    #[test]
    fn test_process_and_persist() {
        let section = SynonymSection;
        let mut scratch = SectionScratch::default();

        let doc0 = Field::synonyms(
            "syn",
            vec![SynonymDefinition::equivalent(["quick", "fast", "rapid"])],
        );
        let doc1 = Field::synonyms("syn", vec![SynonymDefinition::mapping(["car"], ["auto"])]);
        section.process(&mut scratch, 0, 0, &doc0).unwrap();
        section.process(&mut scratch, 1, 0, &doc1).unwrap();
        // Text fields are ignored.
        section.process(&mut scratch, 1, 0, &Field::text("syn", "x")).unwrap();

        let fields = vec![FieldInfo::new("syn", FieldOptions::default(), FieldKind::Synonym)];
        let config = SegmentConfig::default();
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        let mut ctx = PersistContext {
            writer: &mut w,
            fields: &fields,
            num_docs: 2,
            chunk_mode: config.chunk_mode,
            config: &config,
        };
        section.persist(&mut scratch, &mut ctx).unwrap();
        let addr = section.addr_for_field(&scratch, 0).unwrap();
        drop(w);

        let view = ByteView::new(&buf);
        let offset = read_thesaurus_offset(view, addr).unwrap();
        let thesaurus = Thesaurus::open("syn", view, offset).unwrap();
        assert_eq!(
            thesaurus.terms().collect::<Vec<_>>(),
            vec!["car", "fast", "quick", "rapid"]
        );

        let quick: Vec<String> = thesaurus
            .lookup("quick", None)
            .unwrap()
            .into_iter()
            .map(|m| m.synonym)
            .collect();
        assert_eq!(quick, vec!["fast", "rapid"]);

        let car = thesaurus.lookup("car", None).unwrap();
        assert_eq!(car.len(), 1);
        assert_eq!(car[0].synonym, "auto");
        assert!(car[0].docs.contains(1));
    }
}
