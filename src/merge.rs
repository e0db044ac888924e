//! N-way segment merge.
//!
//! Merging computes an old-to-new document number table per input segment
//! (dropped documents map to [`DOC_DROPPED`]), copies or rewrites the
//! stored records of surviving documents, then lets every registered
//! section merge its own per-field state before the field indexes and the
//! footer are written.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::config::SegmentConfig;
use crate::document::ID_FIELD;
use crate::error::{Result, StrataError};
use crate::section::{MergeContext, NUM_SECTION_TYPES, SectionRegistry, SectionScratch};
use crate::segment::fields::{write_fields_index, write_sections_index};
use crate::segment::footer::{FORMAT_VERSION, Footer, NO_DOC_VALUES};
use crate::segment::stored::{StoredValue, encode_record, write_stored_index};
use crate::segment::{FieldInfo, FieldSections, Segment};
use crate::storage::mmap;
use crate::storage::structured::CountHashWriter;

/// New document number of a dropped document.
pub const DOC_DROPPED: u64 = u64::MAX;

/// Cancellation signal checked at document and term boundaries.
///
/// The signal fires when a message arrives or when every sender is gone;
/// once fired it stays fired.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<Receiver<()>>,
    fired: Arc<AtomicBool>,
}

impl CancelSignal {
    /// A signal and the sender that fires it.
    pub fn new() -> (Sender<()>, CancelSignal) {
        let (tx, rx) = bounded(1);
        (tx, CancelSignal::from_receiver(rx))
    }

    pub fn from_receiver(rx: Receiver<()>) -> Self {
        CancelSignal {
            rx: Some(rx),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        CancelSignal {
            rx: None,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return true;
        }
        let Some(rx) = &self.rx else {
            return false;
        };
        match rx.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.fired.store(true, Ordering::Release);
                true
            }
        }
    }

    /// `Err(Closed)` once the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StrataError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::never()
    }
}

/// Statistics of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub segments_merged: usize,
    pub docs_kept: u64,
    pub docs_dropped: u64,
    pub terms_merged: u64,
    pub postings_merged: u64,
    pub vectors_merged: u64,
    pub synonyms_merged: u64,
    /// Stored records copied byte for byte.
    pub stored_copied: u64,
    /// Stored records decoded and re-encoded under new field ids.
    pub stored_rewritten: u64,
    pub bytes_written: u64,
    pub elapsed_ms: u64,
}

/// Outcome of a merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    /// Old to new document number per input segment.
    pub doc_num_maps: Vec<Vec<u64>>,
    pub stats: MergeStats,
}

/// Merges segments into one.
#[derive(Debug)]
pub struct MergeEngine {
    config: SegmentConfig,
    registry: SectionRegistry,
}

impl MergeEngine {
    pub fn new(config: SegmentConfig) -> Self {
        MergeEngine {
            config,
            registry: SectionRegistry::default(),
        }
    }

    pub fn with_registry(mut self, registry: SectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Merge `segments` into a new file at `path`. `drops` holds one
    /// optional drop set per segment, or is empty. The partial file is
    /// removed if the merge fails or is cancelled.
    pub fn merge<P: AsRef<Path>>(
        &self,
        segments: &[Arc<Segment>],
        drops: &[Option<RoaringBitmap>],
        path: P,
        cancel: &CancelSignal,
    ) -> Result<MergeResult> {
        let path = path.as_ref();
        let result = mmap::create_output(path).and_then(|mut output| {
            let result = self.write_merged(segments, drops, cancel, &mut output)?;
            mmap::finish_output(output)?;
            Ok(result)
        });
        match result {
            Ok(result) => {
                log::info!(
                    "merged {} segments into {} ({} docs kept, {} dropped, {} bytes in {} ms)",
                    result.stats.segments_merged,
                    path.display(),
                    result.stats.docs_kept,
                    result.stats.docs_dropped,
                    result.stats.bytes_written,
                    result.stats.elapsed_ms
                );
                Ok(result)
            }
            Err(e) => {
                mmap::remove_partial(path);
                Err(e)
            }
        }
    }

    /// Merge into an in-memory segment.
    pub fn merge_in_memory(
        &self,
        segments: &[Arc<Segment>],
        drops: &[Option<RoaringBitmap>],
        cancel: &CancelSignal,
    ) -> Result<(Arc<Segment>, MergeResult)> {
        let mut bytes = Vec::new();
        let result = self.write_merged(segments, drops, cancel, &mut bytes)?;
        let segment = Segment::from_bytes(bytes, &self.config)?;
        Ok((segment, result))
    }

    fn write_merged(
        &self,
        segments: &[Arc<Segment>],
        drops: &[Option<RoaringBitmap>],
        cancel: &CancelSignal,
        out: &mut dyn Write,
    ) -> Result<MergeResult> {
        let start = Instant::now();
        let drops: Vec<Option<RoaringBitmap>> = if drops.is_empty() {
            vec![None; segments.len()]
        } else if drops.len() == segments.len() {
            drops.to_vec()
        } else {
            return Err(StrataError::invalid_argument(format!(
                "{} drop sets given for {} segments",
                drops.len(),
                segments.len()
            )));
        };

        let mut stats = MergeStats {
            segments_merged: segments.len(),
            ..MergeStats::default()
        };

        let (doc_num_maps, new_num_docs) = doc_num_maps(segments, &drops);
        stats.docs_kept = new_num_docs;
        stats.docs_dropped = segments.iter().map(|s| s.count()).sum::<u64>() - new_num_docs;

        let (fields, fields_same) = merge_fields(segments)?;
        log::debug!(
            "merging {} segments: {} fields, fields-same {fields_same}",
            segments.len(),
            fields.len()
        );

        let mut w = CountHashWriter::new(out);
        let stored_index_offset =
            copy_stored(&mut w, segments, &drops, &doc_num_maps, &fields, fields_same, cancel, &mut stats)?;

        let mut scratch = SectionScratch::default();
        let mut ctx = MergeContext {
            writer: &mut w,
            segments,
            drops: &drops,
            doc_num_maps: &doc_num_maps,
            fields: &fields,
            new_num_docs,
            chunk_mode: self.config.chunk_mode,
            config: &self.config,
            cancel,
            stats: &mut stats,
        };
        for section in self.registry.sections() {
            section.merge(&mut scratch, &mut ctx)?;
        }

        let mut sections: Vec<FieldSections> = vec![[None; NUM_SECTION_TYPES]; fields.len()];
        for (field_id, field_sections) in sections.iter_mut().enumerate() {
            for section in self.registry.sections() {
                field_sections[section.section_type().index()] =
                    section.addr_for_field(&scratch, field_id as u16);
            }
        }

        let fields_index_offset = write_fields_index(&mut w, &fields)?;
        let sections_index_offset = write_sections_index(&mut w, &fields, &sections)?;
        let mut footer = Footer {
            num_docs: new_num_docs,
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

        stats.bytes_written = w.count();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(MergeResult {
            doc_num_maps,
            stats,
        })
    }
}

/// Old to new document numbers per segment, and the new document count.
pub fn doc_num_maps(segments: &[Arc<Segment>], drops: &[Option<RoaringBitmap>]) -> (Vec<Vec<u64>>, u64) {
    let mut next = 0u64;
    let maps = segments
        .iter()
        .zip(drops)
        .map(|(segment, drop)| {
            (0..segment.count())
                .map(|doc| {
                    if drop.as_ref().is_some_and(|d| d.contains(doc as u32)) {
                        DOC_DROPPED
                    } else {
                        next += 1;
                        next - 1
                    }
                })
                .collect()
        })
        .collect();
    (maps, next)
}

/// Union of the segments' fields, `_id` first then by name, and whether
/// every segment already has exactly that field list.
pub fn merge_fields(segments: &[Arc<Segment>]) -> Result<(Vec<FieldInfo>, bool)> {
    let mut by_name: AHashMap<&str, FieldInfo> = AHashMap::new();
    for segment in segments {
        for field in segment.fields() {
            match by_name.get_mut(field.name.as_str()) {
                Some(existing) => {
                    if existing.kind != field.kind {
                        return Err(StrataError::field(format!(
                            "field {} is {:?} in one segment and {:?} in another",
                            field.name, existing.kind, field.kind
                        )));
                    }
                    existing.options.stored |= field.options.stored;
                    existing.options.indexed |= field.options.indexed;
                    existing.options.doc_values |= field.options.doc_values;
                }
                None => {
                    by_name.insert(field.name.as_str(), field.clone());
                }
            }
        }
    }

    let mut fields: Vec<FieldInfo> = by_name.into_values().collect();
    fields.sort_by(|a, b| {
        (a.name != ID_FIELD)
            .cmp(&(b.name != ID_FIELD))
            .then_with(|| a.name.cmp(&b.name))
    });

    let fields_same = segments.iter().all(|s| s.fields() == fields.as_slice());
    Ok((fields, fields_same))
}

#[allow(clippy::too_many_arguments)]
fn copy_stored(
    w: &mut CountHashWriter<'_>,
    segments: &[Arc<Segment>],
    drops: &[Option<RoaringBitmap>],
    doc_num_maps: &[Vec<u64>],
    fields: &[FieldInfo],
    fields_same: bool,
    cancel: &CancelSignal,
    stats: &mut MergeStats,
) -> Result<u64> {
    let new_ids: AHashMap<&str, u16> = fields
        .iter()
        .enumerate()
        .map(|(id, f)| (f.name.as_str(), id as u16))
        .collect();

    let mut offsets = Vec::with_capacity(stats.docs_kept as usize);
    let mut record = Vec::new();

    for (seg_idx, segment) in segments.iter().enumerate() {
        cancel.check()?;
        let num_docs = segment.count();
        if num_docs == 0 {
            continue;
        }
        let no_drops = drops[seg_idx].as_ref().is_none_or(|d| d.is_empty());

        if fields_same && no_drops {
            // The records form one contiguous run ending at the stored index.
            let first = segment.stored_record_offset(0)?;
            let end = segment.footer().stored_index_offset;
            let region = segment.view().range(first, end)?;
            let base = w.count();
            for doc in 0..num_docs {
                offsets.push(base + segment.stored_record_offset(doc)? - first);
            }
            w.write_raw(region)?;
            stats.stored_copied += num_docs;
            continue;
        }

        for doc in 0..num_docs {
            if doc_num_maps[seg_idx][doc as usize] == DOC_DROPPED {
                continue;
            }
            cancel.check()?;
            let stored = segment.stored_record(doc)?;
            offsets.push(w.count());

            if fields_same {
                w.write_raw(stored.raw)?;
                stats.stored_copied += 1;
                continue;
            }

            let old_fields = segment.fields();
            let values = stored.values()?;
            let mut remapped = Vec::with_capacity(values.len());
            for value in &values {
                let field_id = old_fields
                    .get(value.field_id as usize)
                    .and_then(|f| new_ids.get(f.name.as_str()).copied())
                    .ok_or_else(|| {
                        StrataError::corrupt(format!(
                            "document {doc} stores unknown field id {}",
                            value.field_id
                        ))
                    })?;
                remapped.push(StoredValue {
                    field_id,
                    type_byte: value.type_byte,
                    value: value.value,
                    array_positions: &value.array_positions,
                });
            }
            encode_record(&mut record, stored.id, &remapped);
            w.write_raw(&record)?;
            stats.stored_rewritten += 1;
        }
    }

    write_stored_index(w, &offsets)
}
