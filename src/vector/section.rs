//! Vector section: per-field similarity indexes.
//!
//! Per field record: `uvarint u64::MAX` twice (no doc values), `uvarint
//! optimized_for`, `uvarint num_vectors`, then per vector a zigzag
//! `vec_id` and `uvarint doc_num`, then the length-prefixed bincode index.

use ahash::{AHashMap, AHashSet};
use roaring::RoaringBitmap;

use crate::document::{Field, FieldValue};
use crate::error::{Result, StrataError};
use crate::section::{MergeContext, PersistContext, Section, SectionScratch, SectionType};
use crate::segment::FieldKind;
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;
use crate::vector::distance::{IndexOptimization, VectorMetric};
use crate::vector::index::{IdSelector, VectorIndex};
use crate::vector::posting::VecPostingsList;

const NO_DOC_VALUES: u64 = u64::MAX;

/// Per-call search knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSearchParams {
    pub k: usize,
    /// Probe count override for clustered indexes.
    pub nprobe: Option<usize>,
}

impl VectorSearchParams {
    pub fn new(k: usize) -> Self {
        VectorSearchParams { k, nprobe: None }
    }

    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }
}

/// Decoded vector state of one field.
#[derive(Debug)]
pub struct VectorFieldData {
    index: VectorIndex,
    optimized_for: IndexOptimization,
    vec_docs: AHashMap<i64, u64>,
    doc_vecs: AHashMap<u64, Vec<i64>>,
    max_vectors_per_doc: usize,
}

impl VectorFieldData {
    /// `pairs` maps each vector id to its owning document.
    pub fn new(index: VectorIndex, optimized_for: IndexOptimization, pairs: Vec<(i64, u64)>) -> Self {
        let mut vec_docs = AHashMap::with_capacity(pairs.len());
        let mut doc_vecs: AHashMap<u64, Vec<i64>> = AHashMap::new();
        for (vec_id, doc_num) in pairs {
            vec_docs.insert(vec_id, doc_num);
            doc_vecs.entry(doc_num).or_default().push(vec_id);
        }
        let max_vectors_per_doc = doc_vecs.values().map(Vec::len).max().unwrap_or(0);
        VectorFieldData {
            index,
            optimized_for,
            vec_docs,
            doc_vecs,
            max_vectors_per_doc,
        }
    }

    /// Decode the field record at `addr`.
    pub fn read(view: ByteView<'_>, addr: u64) -> Result<Self> {
        let mut reader = view.reader_at(addr)?;
        let dv_start = reader.read_uvarint()?;
        let dv_end = reader.read_uvarint()?;
        if dv_start != NO_DOC_VALUES || dv_end != NO_DOC_VALUES {
            return Err(StrataError::corrupt(format!(
                "vector field record at {addr} carries doc values"
            )));
        }
        let optimized_for = IndexOptimization::from_code(reader.read_uvarint()?)?;
        let num_vectors = reader.read_uvarint()?;
        if num_vectors > reader.remaining().len() as u64 {
            return Err(StrataError::corrupt(format!(
                "vector field record at {addr} claims {num_vectors} vectors"
            )));
        }

        let mut pairs = Vec::with_capacity(num_vectors as usize);
        for _ in 0..num_vectors {
            let vec_id = reader.read_varint()?;
            let doc_num = reader.read_uvarint()?;
            pairs.push((vec_id, doc_num));
        }
        let len = reader.read_uvarint()?;
        let index = VectorIndex::from_bytes(reader.read_bytes(len as usize)?)?;
        if index.len() as u64 != num_vectors {
            return Err(StrataError::corrupt(format!(
                "vector index at {addr} holds {} vectors, id map {num_vectors}",
                index.len()
            )));
        }
        Ok(VectorFieldData::new(index, optimized_for, pairs))
    }

    fn write(
        w: &mut CountHashWriter<'_>,
        optimized_for: IndexOptimization,
        pairs: &[(i64, u64)],
        index: &VectorIndex,
    ) -> Result<u64> {
        let addr = w.count();
        w.write_uvarint(NO_DOC_VALUES)?;
        w.write_uvarint(NO_DOC_VALUES)?;
        w.write_uvarint(optimized_for.code())?;
        w.write_uvarint(pairs.len() as u64)?;
        for &(vec_id, doc_num) in pairs {
            w.write_varint(vec_id)?;
            w.write_uvarint(doc_num)?;
        }
        w.write_len_prefixed(&index.to_bytes()?)?;
        Ok(addr)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn optimized_for(&self) -> IndexOptimization {
        self.optimized_for
    }

    pub fn metric(&self) -> VectorMetric {
        self.index.metric()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn num_vectors(&self) -> usize {
        self.vec_docs.len()
    }

    pub fn doc_for(&self, vec_id: i64) -> Option<u64> {
        self.vec_docs.get(&vec_id).copied()
    }

    pub fn vectors_of(&self, doc_num: u64) -> &[i64] {
        self.doc_vecs.get(&doc_num).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(vec_id, doc_num)` pairs ordered by vector id.
    pub fn pairs(&self) -> Vec<(i64, u64)> {
        let mut pairs: Vec<(i64, u64)> = self.vec_docs.iter().map(|(&v, &d)| (v, d)).collect();
        pairs.sort_unstable();
        pairs
    }

    /// Vectors to fetch so that `k` distinct documents can be found.
    fn fetch_size(&self, k: usize) -> usize {
        k.saturating_mul(self.max_vectors_per_doc.max(1))
    }

    /// Top `k` documents nearest to `query`, one hit per document.
    pub fn search(&self, query: &[f32], params: VectorSearchParams) -> Result<VecPostingsList> {
        if params.k == 0 || self.index.is_empty() {
            return Ok(VecPostingsList::empty(self.metric()));
        }
        let neighbors = self.index.search(
            query,
            self.fetch_size(params.k),
            params.nprobe,
            &IdSelector::All,
        )?;
        Ok(VecPostingsList::from_neighbors(
            self.metric(),
            &neighbors,
            params.k,
            |id| self.doc_for(id),
        ))
    }

    /// Like [`search`](Self::search), restricted to documents in `eligible`.
    ///
    /// For clustered indexes only clusters holding eligible vectors are
    /// probed, and the probe count doubles until `k` distinct documents are
    /// found or every such cluster has been searched.
    pub fn search_with_filter(
        &self,
        query: &[f32],
        params: VectorSearchParams,
        eligible: &RoaringBitmap,
    ) -> Result<VecPostingsList> {
        let metric = self.metric();
        let mut included: Vec<i64> = Vec::new();
        for doc_num in eligible {
            included.extend_from_slice(self.vectors_of(doc_num as u64));
        }
        if params.k == 0 || included.is_empty() {
            return Ok(VecPostingsList::empty(metric));
        }

        let total = self.num_vectors();
        let selector = if included.len() <= total - included.len().min(total) {
            IdSelector::include(included.iter().copied())
        } else {
            let eligible_ids: AHashSet<i64> = included.iter().copied().collect();
            let excluded = self
                .vec_docs
                .keys()
                .copied()
                .filter(|id| !eligible_ids.contains(id));
            IdSelector::exclude(excluded, total)
        };

        let fetch = self.fetch_size(params.k);
        let owner = |id: i64| self.doc_for(id);

        let Some(ivf) = self.index.as_ivf() else {
            let neighbors = self.index.search(query, fetch, None, &selector)?;
            return Ok(VecPostingsList::from_neighbors(metric, &neighbors, params.k, owner));
        };

        let query = self.index.prepare_query(query)?;
        let candidate_lists: Vec<usize> = ivf
            .centroid_order(&query)
            .into_iter()
            .filter(|&list| ivf.list_ids(list).iter().any(|&id| selector.contains(id)))
            .collect();

        let mut nprobe = params.nprobe.unwrap_or(ivf.nprobe()).max(1);
        loop {
            let probe = &candidate_lists[..nprobe.min(candidate_lists.len())];
            let neighbors = ivf.search_lists(&query, probe, fetch, &selector);
            let found = VecPostingsList::from_neighbors(metric, &neighbors, params.k, owner);
            if found.len() >= params.k || probe.len() == candidate_lists.len() {
                return Ok(found);
            }
            log::debug!(
                "widening probe count from {nprobe}: {} of {} documents found",
                found.len(),
                params.k
            );
            nprobe = nprobe.saturating_mul(2);
        }
    }
}

#[derive(Debug)]
struct FieldVectors {
    dims: usize,
    metric: VectorMetric,
    optimized_for: IndexOptimization,
    pairs: Vec<(i64, u64)>,
    data: Vec<f32>,
    current_doc: Option<u64>,
    seen: AHashSet<Vec<u32>>,
}

/// Build state of the vector section.
#[derive(Debug, Default)]
pub struct VectorScratch {
    fields: AHashMap<u16, FieldVectors>,
    addrs: AHashMap<u16, u64>,
}

impl VectorScratch {
    pub fn reset(&mut self) {
        self.fields.clear();
        self.addrs.clear();
    }
}

/// The vector section.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorSection;

impl Section for VectorSection {
    fn section_type(&self) -> SectionType {
        SectionType::Vector
    }

    fn process(&self, scratch: &mut SectionScratch, doc_num: u64, field_id: u16, field: &Field) -> Result<()> {
        let FieldValue::Vector(payload) = &field.value else {
            return Ok(());
        };
        if payload.dims == 0 || payload.data.len() % payload.dims != 0 {
            return Err(StrataError::vector(format!(
                "field {}: {} floats do not divide into dimension {}",
                field.name,
                payload.data.len(),
                payload.dims
            )));
        }

        let scratch = scratch.vector_mut();
        let state = scratch.fields.entry(field_id).or_insert_with(|| FieldVectors {
            dims: payload.dims,
            metric: payload.metric,
            optimized_for: payload.optimized_for,
            pairs: Vec::new(),
            data: Vec::new(),
            current_doc: None,
            seen: AHashSet::new(),
        });
        if state.dims != payload.dims || state.metric != payload.metric {
            return Err(StrataError::vector(format!(
                "field {}: expected dimension {} ({}), got {} ({})",
                field.name, state.dims, state.metric, payload.dims, payload.metric
            )));
        }

        if state.current_doc != Some(doc_num) {
            state.current_doc = Some(doc_num);
            state.seen.clear();
        }
        for vector in payload.vectors() {
            // Identical vectors of one document are indexed once.
            let key: Vec<u32> = vector.iter().map(|v| v.to_bits()).collect();
            if !state.seen.insert(key) {
                continue;
            }
            let vec_id = state.pairs.len() as i64;
            state.pairs.push((vec_id, doc_num));
            state.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn persist(&self, scratch: &mut SectionScratch, ctx: &mut PersistContext<'_, '_>) -> Result<()> {
        let scratch = scratch.vector_mut();
        let mut field_ids: Vec<u16> = scratch.fields.keys().copied().collect();
        field_ids.sort_unstable();

        for field_id in field_ids {
            let Some(state) = scratch.fields.remove(&field_id) else {
                continue;
            };
            let ids = state.pairs.iter().map(|&(id, _)| id).collect();
            let index = VectorIndex::build(
                state.dims,
                state.metric,
                state.optimized_for,
                ids,
                state.data,
                &ctx.config.vector,
            )?;
            let addr = VectorFieldData::write(ctx.writer, state.optimized_for, &state.pairs, &index)?;
            log::debug!(
                "persisted {} vector index of field {} ({} vectors) at {addr}",
                index.kind_name(),
                ctx.fields[field_id as usize].name,
                state.pairs.len()
            );
            scratch.addrs.insert(field_id, addr);
        }
        Ok(())
    }

    fn addr_for_field(&self, scratch: &SectionScratch, field_id: u16) -> Option<u64> {
        scratch
            .vector
            .as_ref()
            .and_then(|s| s.addrs.get(&field_id).copied())
    }

    fn merge(&self, scratch: &mut SectionScratch, ctx: &mut MergeContext<'_, '_>) -> Result<()> {
        let scratch = scratch.vector_mut();
        let segments = ctx.segments;
        let fields = ctx.fields;

        for (field_id, field) in fields.iter().enumerate() {
            if field.kind != FieldKind::Vector {
                continue;
            }

            let mut layout: Option<(usize, VectorMetric, IndexOptimization)> = None;
            // (new doc, old vec id, segment, position in reconstructed data)
            let mut entries: Vec<(u64, i64, usize, usize)> = Vec::new();
            let mut reconstructed: Vec<Vec<f32>> = Vec::with_capacity(segments.len());

            for (seg_idx, segment) in segments.iter().enumerate() {
                ctx.cancel.check()?;
                let Some(data) = segment.load_vector_field(&field.name)? else {
                    reconstructed.push(Vec::new());
                    continue;
                };

                match layout {
                    None => layout = Some((data.dims(), data.metric(), data.optimized_for())),
                    Some((dims, metric, _)) if dims != data.dims() || metric != data.metric() => {
                        return Err(StrataError::vector(format!(
                            "field {}: cannot merge dimension {} ({}) into {dims} ({metric})",
                            field.name,
                            data.dims(),
                            data.metric()
                        )));
                    }
                    Some(_) => {}
                }

                let (ids, vectors) = data.index().reconstruct_all();
                for (pos, vec_id) in ids.into_iter().enumerate() {
                    let Some(old_doc) = data.doc_for(vec_id) else {
                        return Err(StrataError::corrupt(format!(
                            "field {}: vector {vec_id} has no owning document",
                            field.name
                        )));
                    };
                    if let Some(new_doc) = ctx.new_doc_num(seg_idx, old_doc) {
                        entries.push((new_doc, vec_id, seg_idx, pos));
                    }
                }
                reconstructed.push(vectors);
            }

            let Some((dims, metric, optimized_for)) = layout else {
                continue;
            };
            if entries.is_empty() {
                continue;
            }

            // Vector ids are reassigned densely in new document order.
            entries.sort_unstable_by_key(|&(doc, vec_id, seg, _)| (doc, seg, vec_id));
            let mut pairs = Vec::with_capacity(entries.len());
            let mut data = Vec::with_capacity(entries.len() * dims);
            for (new_id, &(new_doc, _, seg_idx, pos)) in entries.iter().enumerate() {
                pairs.push((new_id as i64, new_doc));
                data.extend_from_slice(&reconstructed[seg_idx][pos * dims..(pos + 1) * dims]);
            }

            let ids = pairs.iter().map(|&(id, _)| id).collect();
            let index = VectorIndex::build(dims, metric, optimized_for, ids, data, &ctx.config.vector)?;
            let addr = VectorFieldData::write(ctx.writer, optimized_for, &pairs, &index)?;
            ctx.stats.vectors_merged += pairs.len() as u64;
            log::debug!(
                "merged vector field {} ({} vectors) at {addr}",
                field.name,
                pairs.len()
            );
            scratch.addrs.insert(field_id as u16, addr);
        }
        Ok(())
    }
}
