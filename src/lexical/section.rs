//! Inverted text section: term dictionaries, postings and doc values.
//!
//! Per field the section writes every posting list, then the doc values,
//! then the dictionary FST, and finally a small field record
//! (`uvarint dv_start`, `uvarint dv_end`, `uvarint dict_offset`) whose
//! offset is the field's section address. Fields without doc values record
//! `u64::MAX` for both doc value bounds; fields without terms record a
//! dictionary offset of zero.

use std::collections::BTreeMap;

use ahash::AHashMap;
use fst::map::OpBuilder;
use fst::{MapBuilder, Streamer};

use crate::document::{Field, TokenLocation};
use crate::error::Result;
use crate::lexical::dictionary::{Dictionary, build_fst, write_fst};
use crate::lexical::doc_values::encode_terms;
use crate::lexical::posting::{Posting, norm_for_length, write_postings};
use crate::section::{
    MergeContext, PersistContext, Section, SectionScratch, SectionType, excluded_from_inverted,
};
use crate::segment::FieldKind;
use crate::segment::contentcoder::ContentCoder;
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;

/// Doc value bound recorded for fields without doc values.
pub const NO_DOC_VALUES: u64 = u64::MAX;

/// Decoded per-field record of the inverted text section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvertedFieldRecord {
    pub doc_values: Option<(u64, u64)>,
    pub dict_offset: u64,
}

impl InvertedFieldRecord {
    pub fn read(view: ByteView<'_>, addr: u64) -> Result<Self> {
        let mut reader = view.reader_at(addr)?;
        let dv_start = reader.read_uvarint()?;
        let dv_end = reader.read_uvarint()?;
        let dict_offset = reader.read_uvarint()?;
        let doc_values = if dv_start == NO_DOC_VALUES {
            None
        } else {
            Some((dv_start, dv_end))
        };
        Ok(InvertedFieldRecord {
            doc_values,
            dict_offset,
        })
    }

    fn write(w: &mut CountHashWriter<'_>, doc_values: Option<(u64, u64)>, dict_offset: u64) -> Result<u64> {
        let (dv_start, dv_end) = doc_values.unwrap_or((NO_DOC_VALUES, NO_DOC_VALUES));
        let addr = w.count();
        w.write_uvarint(dv_start)?;
        w.write_uvarint(dv_end)?;
        w.write_uvarint(dict_offset)?;
        Ok(addr)
    }
}

#[derive(Debug, Default)]
struct PendingField {
    length: u64,
    indexed: bool,
    doc_values: bool,
    terms: BTreeMap<Vec<u8>, (u64, Vec<TokenLocation>)>,
}

#[derive(Debug, Default)]
struct FieldPostings {
    terms: BTreeMap<Vec<u8>, Vec<Posting>>,
    doc_values: Vec<(u64, Vec<u8>)>,
}

/// Build state of the inverted text section.
#[derive(Debug, Default)]
pub struct InvertedScratch {
    fields: AHashMap<u16, FieldPostings>,
    pending_doc: Option<u64>,
    pending: AHashMap<u16, PendingField>,
    addrs: AHashMap<u16, u64>,
}

impl InvertedScratch {
    pub fn reset(&mut self) {
        self.fields.clear();
        self.pending_doc = None;
        self.pending.clear();
        self.addrs.clear();
    }

    /// Move the pending document's fields into the postings.
    fn flush_pending(&mut self) {
        let Some(doc_num) = self.pending_doc.take() else {
            return;
        };

        for (field_id, pending) in self.pending.drain() {
            let field = self.fields.entry(field_id).or_default();
            let norm = norm_for_length(pending.length);

            if pending.doc_values && !pending.terms.is_empty() {
                let value = encode_terms(pending.terms.keys().map(|t| t.as_slice()));
                field.doc_values.push((doc_num, value));
            }

            if pending.indexed {
                for (term, (frequency, mut locations)) in pending.terms {
                    // Locations are all-or-nothing per posting.
                    if locations.len() as u64 != frequency {
                        locations.clear();
                    }
                    field.terms.entry(term).or_default().push(Posting {
                        doc_num,
                        frequency,
                        norm,
                        locations,
                    });
                }
            }
        }
    }
}

/// The inverted text section.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvertedTextSection;

impl Section for InvertedTextSection {
    fn section_type(&self) -> SectionType {
        SectionType::InvertedText
    }

    fn process(&self, scratch: &mut SectionScratch, doc_num: u64, field_id: u16, field: &Field) -> Result<()> {
        if excluded_from_inverted(field) {
            return Ok(());
        }
        if !field.options.indexed && !field.options.doc_values {
            return Ok(());
        }

        let scratch = scratch.inverted_mut();
        if scratch.pending_doc != Some(doc_num) {
            scratch.flush_pending();
            scratch.pending_doc = Some(doc_num);
        }

        let pending = scratch.pending.entry(field_id).or_default();
        pending.length += field.length;
        pending.indexed |= field.options.indexed;
        pending.doc_values |= field.options.doc_values;
        for token in &field.tokens {
            let entry = pending.terms.entry(token.term.clone()).or_default();
            entry.0 += token.frequency;
            entry.1.extend(token.locations.iter().cloned());
        }
        Ok(())
    }

    fn persist(&self, scratch: &mut SectionScratch, ctx: &mut PersistContext<'_, '_>) -> Result<()> {
        let scratch = scratch.inverted_mut();
        scratch.flush_pending();

        let fields = ctx.fields;
        for field_id in 0..fields.len() as u16 {
            let Some(field) = scratch.fields.remove(&field_id) else {
                continue;
            };

            let mut entries = Vec::with_capacity(field.terms.len());
            for (term, postings) in &field.terms {
                let value = write_postings(ctx.writer, postings, ctx.num_docs, ctx.chunk_mode)?;
                entries.push((term.as_slice(), value));
            }

            let doc_values = if field.doc_values.is_empty() {
                None
            } else {
                let chunk_size = ctx
                    .chunk_mode
                    .write_chunk_size(field.doc_values.len() as u64, ctx.num_docs);
                let mut coder = ContentCoder::new(chunk_size);
                for (doc_num, value) in &field.doc_values {
                    coder.add(*doc_num, value);
                }
                Some(coder.write_to(ctx.writer)?)
            };

            let dict_offset = if entries.is_empty() {
                0
            } else {
                let fst = build_fst(entries)?;
                write_fst(ctx.writer, &fst)?
            };

            let addr = InvertedFieldRecord::write(ctx.writer, doc_values, dict_offset)?;
            log::debug!(
                "persisted inverted field {} ({} terms) at {addr}",
                fields[field_id as usize].name,
                field.terms.len()
            );
            scratch.addrs.insert(field_id, addr);
        }
        Ok(())
    }

    fn addr_for_field(&self, scratch: &SectionScratch, field_id: u16) -> Option<u64> {
        scratch
            .inverted
            .as_ref()
            .and_then(|s| s.addrs.get(&field_id).copied())
    }

    fn merge(&self, scratch: &mut SectionScratch, ctx: &mut MergeContext<'_, '_>) -> Result<()> {
        let scratch = scratch.inverted_mut();
        let segments = ctx.segments;
        let fields = ctx.fields;

        for (field_id, field) in fields.iter().enumerate() {
            if field.kind != FieldKind::Text {
                continue;
            }

            let mut dicts: Vec<(usize, Dictionary<'_>)> = Vec::new();
            for (idx, segment) in segments.iter().enumerate() {
                let dict = segment.dictionary(&field.name)?;
                if !dict.is_empty() {
                    dicts.push((idx, dict));
                }
            }

            let mut op = OpBuilder::new();
            for (_, dict) in &dicts {
                if let Some(map) = dict.fst() {
                    op.push(map.stream());
                }
            }
            let mut union = op.union();

            let mut builder = MapBuilder::memory();
            let mut num_terms = 0usize;
            let mut postings = Vec::new();
            let mut sources = Vec::new();

            while let Some((term, indexed)) = union.next() {
                ctx.cancel.check()?;

                sources.clear();
                sources.extend(indexed.iter().map(|iv| (iv.index, iv.value)));
                sources.sort_unstable();

                postings.clear();
                for &(dict_idx, value) in &sources {
                    let (segment_idx, dict) = &dicts[dict_idx];
                    let list = dict.postings_for_value(value, ctx.drops(*segment_idx))?;
                    for posting in list.iter(true) {
                        let mut posting = posting?;
                        if let Some(new_doc) = ctx.new_doc_num(*segment_idx, posting.doc_num) {
                            posting.doc_num = new_doc;
                            postings.push(posting);
                        }
                    }
                }

                // Terms whose every posting was dropped disappear.
                if postings.is_empty() {
                    continue;
                }

                let value = write_postings(ctx.writer, &postings, ctx.new_num_docs, ctx.chunk_mode)?;
                builder.insert(term, value)?;
                num_terms += 1;
                ctx.stats.postings_merged += postings.len() as u64;
            }
            ctx.stats.terms_merged += num_terms as u64;

            let doc_values = merge_doc_values(&field.name, ctx)?;

            let dict_offset = if num_terms == 0 {
                0
            } else {
                let fst = builder.into_inner()?;
                write_fst(ctx.writer, &fst)?
            };

            if num_terms == 0 && doc_values.is_none() {
                continue;
            }

            let addr = InvertedFieldRecord::write(ctx.writer, doc_values, dict_offset)?;
            log::debug!("merged inverted field {} ({num_terms} terms) at {addr}", field.name);
            scratch.addrs.insert(field_id as u16, addr);
        }
        Ok(())
    }
}

fn merge_doc_values(field: &str, ctx: &mut MergeContext<'_, '_>) -> Result<Option<(u64, u64)>> {
    let segments = ctx.segments;
    let mut values: Vec<(u64, Vec<u8>)> = Vec::new();
    for (idx, segment) in segments.iter().enumerate() {
        let Some(mut reader) = segment.doc_value_reader(field)? else {
            continue;
        };
        reader.for_each(|old_doc, value| {
            if let Some(new_doc) = ctx.new_doc_num(idx, old_doc) {
                values.push((new_doc, value.to_vec()));
            }
            Ok(())
        })?;
    }

    if values.is_empty() {
        return Ok(None);
    }

    let chunk_size = ctx
        .chunk_mode
        .write_chunk_size(values.len() as u64, ctx.new_num_docs);
    let mut coder = ContentCoder::new(chunk_size);
    for (doc_num, value) in &values {
        coder.add(*doc_num, value);
    }
    Ok(Some(coder.write_to(ctx.writer)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::document::FieldOptions;
    use crate::lexical::dictionary::Dictionary;
    use crate::segment::FieldInfo;

    #[test]
    fn test_process_and_persist() {
        let section = InvertedTextSection;
        let mut scratch = SectionScratch::default();

        let body = Field::text("body", "red fish blue fish").with_options(FieldOptions {
            stored: true,
            indexed: true,
            doc_values: true,
        });
        section.process(&mut scratch, 0, 0, &body).unwrap();
        section
            .process(&mut scratch, 1, 0, &Field::text("body", "red"))
            .unwrap();

        let fields = vec![FieldInfo::new("body", FieldOptions::default(), FieldKind::Text)];
        let config = SegmentConfig::default();
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"pad").unwrap();
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
        let record = InvertedFieldRecord::read(view, addr).unwrap();
        assert!(record.doc_values.is_some());

        let dict = Dictionary::open("body", view, record.dict_offset, 2, config.chunk_mode).unwrap();
        assert_eq!(dict.cardinality(), 3);

        let fish = dict.postings_list(b"fish", None).unwrap().postings(true).unwrap();
        assert_eq!(fish.len(), 1);
        assert_eq!(fish[0].frequency, 2);
        assert_eq!(fish[0].locations.len(), 2);
        assert_eq!(fish[0].norm, 0.5);

        let red: Vec<u32> = dict
            .postings_list(b"red", None)
            .unwrap()
            .doc_numbers()
            .iter()
            .collect();
        assert_eq!(red, vec![0, 1]);
    }

    #[test]
    fn test_excluded_fields_are_skipped() {
        use crate::document::VectorPayload;
        use crate::vector::VectorMetric;

        let section = InvertedTextSection;
        let mut scratch = SectionScratch::default();
        let field = Field::vector("emb", VectorPayload::new(1, vec![1.0], VectorMetric::L2));
        section.process(&mut scratch, 0, 0, &field).unwrap();
        assert!(scratch.inverted.is_none());
    }
}
