//! Flat and IVF similarity indexes.
//!
//! Small corpora get a brute-force [`FlatIndex`]; larger ones a clustered
//! [`IvfIndex`] trained with seeded k-means++ so builds are reproducible.
//! Both serialize with bincode into the vector section.

use std::cmp::Ordering;

use ahash::AHashSet;
use bit_vec::BitVec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::VectorIndexConfig;
use crate::error::{Result, StrataError};
use crate::vector::distance::{IndexOptimization, VectorMetric};
use crate::vector::quantization::ScalarQuantizer;

/// Point count above which training and assignment run in parallel.
const PARALLEL_THRESHOLD: usize = 1000;

const CONVERGENCE_THRESHOLD: f32 = 1e-6;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub vec_id: i64,
    pub score: f32,
}

/// Restricts which vector ids a search may return.
#[derive(Debug, Clone, Default)]
pub enum IdSelector {
    #[default]
    All,
    Include(AHashSet<i64>),
    /// Bit `i` set means vector id `i` is excluded.
    Exclude(BitVec),
}

impl IdSelector {
    pub fn include<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        IdSelector::Include(ids.into_iter().collect())
    }

    /// Exclude `ids` out of the dense id space `0..num_vectors`.
    pub fn exclude<I: IntoIterator<Item = i64>>(ids: I, num_vectors: usize) -> Self {
        let mut bits = BitVec::from_elem(num_vectors, false);
        for id in ids {
            if id >= 0 && (id as usize) < num_vectors {
                bits.set(id as usize, true);
            }
        }
        IdSelector::Exclude(bits)
    }

    pub fn contains(&self, vec_id: i64) -> bool {
        match self {
            IdSelector::All => true,
            IdSelector::Include(ids) => ids.contains(&vec_id),
            IdSelector::Exclude(bits) => {
                vec_id < 0 || !bits.get(vec_id as usize).unwrap_or(false)
            }
        }
    }
}

/// Keep the best `k` candidates, best first; ties break on vector id.
pub fn top_k(metric: VectorMetric, mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    let order = |a: &Neighbor, b: &Neighbor| -> Ordering {
        metric
            .compare(a.score, b.score)
            .then_with(|| a.vec_id.cmp(&b.vec_id))
    };
    if k == 0 {
        return Vec::new();
    }
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, order);
        candidates.truncate(k);
    }
    candidates.sort_by(order);
    candidates
}

/// Brute-force index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dims: usize,
    metric: VectorMetric,
    ids: Vec<i64>,
    data: Vec<f32>,
}

impl FlatIndex {
    fn search(&self, query: &[f32], k: usize, selector: &IdSelector) -> Vec<Neighbor> {
        let candidates = self
            .ids
            .iter()
            .zip(self.data.chunks_exact(self.dims))
            .filter(|(id, _)| selector.contains(**id))
            .map(|(&vec_id, vector)| Neighbor {
                vec_id,
                score: self.metric.score(query, vector),
            })
            .collect();
        top_k(self.metric, candidates, k)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ListData {
    Float(Vec<f32>),
    Quantized(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<i64>,
    data: ListData,
}

/// Inverted-file index: vectors grouped under their nearest centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfIndex {
    dims: usize,
    metric: VectorMetric,
    nprobe: usize,
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    quantizer: Option<ScalarQuantizer>,
}

impl IvfIndex {
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Vector ids held by cluster `list`.
    pub fn list_ids(&self, list: usize) -> &[i64] {
        self.lists.get(list).map(|l| l.ids.as_slice()).unwrap_or(&[])
    }

    /// Cluster numbers ordered from closest to farthest centroid.
    pub fn centroid_order(&self, query: &[f32]) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, centroid)| (i, self.metric.score(query, centroid)))
            .collect();
        scored.sort_by(|a, b| self.metric.compare(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        scored.into_iter().map(|(i, _)| i).collect()
    }

    /// Search only the given clusters.
    pub fn search_lists(
        &self,
        query: &[f32],
        lists: &[usize],
        k: usize,
        selector: &IdSelector,
    ) -> Vec<Neighbor> {
        let mut candidates = Vec::new();
        let mut decoded = Vec::with_capacity(self.dims);
        for &list_no in lists {
            let Some(list) = self.lists.get(list_no) else {
                continue;
            };
            for (pos, &vec_id) in list.ids.iter().enumerate() {
                if !selector.contains(vec_id) {
                    continue;
                }
                let score = match (&list.data, &self.quantizer) {
                    (ListData::Float(data), _) => {
                        let start = pos * self.dims;
                        self.metric.score(query, &data[start..start + self.dims])
                    }
                    (ListData::Quantized(codes), Some(quantizer)) => {
                        let start = pos * self.dims;
                        quantizer.decode_into(&codes[start..start + self.dims], &mut decoded);
                        self.metric.score(query, &decoded)
                    }
                    (ListData::Quantized(_), None) => continue,
                };
                candidates.push(Neighbor { vec_id, score });
            }
        }
        top_k(self.metric, candidates, k)
    }

    fn reconstruct_into(&self, ids: &mut Vec<i64>, data: &mut Vec<f32>) {
        let mut decoded = Vec::with_capacity(self.dims);
        for list in &self.lists {
            ids.extend_from_slice(&list.ids);
            match (&list.data, &self.quantizer) {
                (ListData::Float(values), _) => data.extend_from_slice(values),
                (ListData::Quantized(codes), Some(quantizer)) => {
                    for chunk in codes.chunks_exact(self.dims) {
                        quantizer.decode_into(chunk, &mut decoded);
                        data.extend_from_slice(&decoded);
                    }
                }
                (ListData::Quantized(codes), None) => {
                    data.extend(std::iter::repeat_n(0.0, codes.len()));
                }
            }
        }
    }
}

/// A field's similarity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl VectorIndex {
    /// Build an index over `ids` with vectors laid out back to back in `data`.
    pub fn build(
        dims: usize,
        metric: VectorMetric,
        optimization: IndexOptimization,
        ids: Vec<i64>,
        mut data: Vec<f32>,
        config: &VectorIndexConfig,
    ) -> Result<Self> {
        if dims == 0 {
            return Err(StrataError::vector("vector dimension must be positive"));
        }
        if data.len() != ids.len() * dims {
            return Err(StrataError::vector(format!(
                "expected {} floats for {} vectors of dimension {dims}, got {}",
                ids.len() * dims,
                ids.len(),
                data.len()
            )));
        }
        if metric.normalizes() {
            for vector in data.chunks_exact_mut(dims) {
                crate::vector::distance::normalize(vector);
            }
        }

        let n = ids.len();
        if n == 0 || n < config.flat_threshold {
            return Ok(VectorIndex::Flat(FlatIndex {
                dims,
                metric,
                ids,
                data,
            }));
        }

        let nlist = nlist_for(n, config);
        let nprobe = nprobe_for(nlist, optimization);
        let centroids = train_centroids(dims, metric, &data, nlist, config);

        let assignments = assign(dims, metric, &data, &centroids);
        let mut grouped: Vec<(Vec<i64>, Vec<f32>)> = vec![(Vec::new(), Vec::new()); nlist];
        for ((&id, vector), &cluster) in ids.iter().zip(data.chunks_exact(dims)).zip(&assignments) {
            grouped[cluster].0.push(id);
            grouped[cluster].1.extend_from_slice(vector);
        }

        let quantizer = if optimization == IndexOptimization::MemoryEfficient {
            Some(ScalarQuantizer::train(dims, &data)?)
        } else {
            None
        };

        let lists = grouped
            .into_iter()
            .map(|(ids, vectors)| {
                let data = match &quantizer {
                    Some(quantizer) => {
                        let mut codes = Vec::with_capacity(vectors.len());
                        for vector in vectors.chunks_exact(dims) {
                            quantizer.encode_into(vector, &mut codes);
                        }
                        ListData::Quantized(codes)
                    }
                    None => ListData::Float(vectors),
                };
                InvertedList { ids, data }
            })
            .collect();

        log::debug!("trained ivf index: {n} vectors, nlist {nlist}, nprobe {nprobe}");

        Ok(VectorIndex::Ivf(IvfIndex {
            dims,
            metric,
            nprobe,
            centroids,
            lists,
            quantizer,
        }))
    }

    pub fn dims(&self) -> usize {
        match self {
            VectorIndex::Flat(index) => index.dims,
            VectorIndex::Ivf(index) => index.dims,
        }
    }

    pub fn metric(&self) -> VectorMetric {
        match self {
            VectorIndex::Flat(index) => index.metric,
            VectorIndex::Ivf(index) => index.metric,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Flat(index) => index.ids.len(),
            VectorIndex::Ivf(index) => index.lists.iter().map(|l| l.ids.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            VectorIndex::Flat(_) => "flat",
            VectorIndex::Ivf(index) if index.quantizer.is_some() => "ivf-sq8",
            VectorIndex::Ivf(_) => "ivf",
        }
    }

    pub fn as_ivf(&self) -> Option<&IvfIndex> {
        match self {
            VectorIndex::Ivf(index) => Some(index),
            VectorIndex::Flat(_) => None,
        }
    }

    /// Prepare a query for this index, checking its dimension.
    pub fn prepare_query(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.dims() {
            return Err(StrataError::vector(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dims()
            )));
        }
        Ok(self.metric().prepare(query))
    }

    /// Top `k` vectors for `query`, best first.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: Option<usize>,
        selector: &IdSelector,
    ) -> Result<Vec<Neighbor>> {
        let query = self.prepare_query(query)?;
        Ok(match self {
            VectorIndex::Flat(index) => index.search(&query, k, selector),
            VectorIndex::Ivf(index) => {
                let nprobe = nprobe.unwrap_or(index.nprobe).clamp(1, index.nlist().max(1));
                let order = index.centroid_order(&query);
                index.search_lists(&query, &order[..nprobe.min(order.len())], k, selector)
            }
        })
    }

    /// Every `(vec_id, vector)` held by the index, quantized vectors decoded.
    pub fn reconstruct_all(&self) -> (Vec<i64>, Vec<f32>) {
        match self {
            VectorIndex::Flat(index) => (index.ids.clone(), index.data.clone()),
            VectorIndex::Ivf(index) => {
                let mut ids = Vec::new();
                let mut data = Vec::new();
                index.reconstruct_into(&mut ids, &mut data);
                (ids, data)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let index: VectorIndex = bincode::deserialize(bytes)
            .map_err(|e| StrataError::corrupt(format!("undecodable vector index: {e}")))?;
        index.validate()?;
        Ok(index)
    }

    /// Check that every stored vector array matches the index dimension.
    fn validate(&self) -> Result<()> {
        let dims = self.dims();
        if dims == 0 {
            return Err(StrataError::corrupt("vector index has dimension 0"));
        }
        match self {
            VectorIndex::Flat(index) => check_len("flat index", index.data.len(), index.ids.len(), dims),
            VectorIndex::Ivf(index) => {
                check_len("ivf centroids", index.centroids.len(), index.lists.len(), dims)?;
                if let Some(quantizer) = &index.quantizer {
                    quantizer.validate()?;
                    if quantizer.dims() != dims {
                        return Err(StrataError::corrupt(format!(
                            "quantizer of dimension {} in an index of dimension {dims}",
                            quantizer.dims()
                        )));
                    }
                }
                for list in &index.lists {
                    match &list.data {
                        ListData::Float(data) => check_len("ivf list", data.len(), list.ids.len(), dims)?,
                        ListData::Quantized(codes) => {
                            if index.quantizer.is_none() {
                                return Err(StrataError::corrupt("quantized ivf list without a quantizer"));
                            }
                            check_len("ivf list codes", codes.len(), list.ids.len(), dims)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_len(what: &str, len: usize, count: usize, dims: usize) -> Result<()> {
    if count.checked_mul(dims) != Some(len) {
        return Err(StrataError::corrupt(format!(
            "{what} holds {len} values for {count} entries of dimension {dims}"
        )));
    }
    Ok(())
}

/// Centroid count for `n` vectors.
pub fn nlist_for(n: usize, config: &VectorIndexConfig) -> usize {
    let nlist = if n >= config.large_corpus_threshold {
        (4.0 * (n as f64).sqrt()) as usize
    } else {
        n / 100
    };
    nlist.clamp(1, n.max(1))
}

/// Default probe count for `nlist` clusters.
pub fn nprobe_for(nlist: usize, optimization: IndexOptimization) -> usize {
    let nprobe = ((nlist as f64).sqrt() as usize).max(1);
    if optimization == IndexOptimization::Latency {
        (nprobe / 2).max(1)
    } else {
        nprobe
    }
}

fn nearest(dims: usize, metric: VectorMetric, vector: &[f32], centroids: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = None;
    for (i, centroid) in centroids.chunks_exact(dims).enumerate() {
        let score = metric.score(vector, centroid);
        if best_score.is_none_or(|b| metric.is_better(score, b)) {
            best = i;
            best_score = Some(score);
        }
    }
    best
}

fn assign(dims: usize, metric: VectorMetric, data: &[f32], centroids: &[f32]) -> Vec<usize> {
    if data.len() / dims > PARALLEL_THRESHOLD {
        data.par_chunks_exact(dims)
            .map(|vector| nearest(dims, metric, vector, centroids))
            .collect()
    } else {
        data.chunks_exact(dims)
            .map(|vector| nearest(dims, metric, vector, centroids))
            .collect()
    }
}

fn train_centroids(
    dims: usize,
    metric: VectorMetric,
    data: &[f32],
    nlist: usize,
    config: &VectorIndexConfig,
) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(config.training_seed);
    let n = data.len() / dims;

    // Subsample the training set.
    let max_points = nlist.saturating_mul(config.max_training_points_per_centroid.max(1));
    let training: Vec<f32> = if n > max_points {
        let mut picked = rand::seq::index::sample(&mut rng, n, max_points).into_vec();
        picked.sort_unstable();
        picked
            .into_iter()
            .flat_map(|i| data[i * dims..(i + 1) * dims].iter().copied())
            .collect()
    } else {
        data.to_vec()
    };

    let mut centroids = init_kmeans_plus_plus(dims, &training, nlist, &mut rng);

    for iteration in 0..config.kmeans_iterations {
        let old = centroids.clone();
        let assignments = assign(dims, metric, &training, &centroids);
        update_centroids(dims, &training, &assignments, &mut centroids);

        let movement = old
            .chunks_exact(dims)
            .zip(centroids.chunks_exact(dims))
            .map(|(a, b)| VectorMetric::L2.score(a, b))
            .sum::<f32>()
            / nlist as f32;
        if movement < CONVERGENCE_THRESHOLD {
            log::debug!("k-means converged after {} iterations", iteration + 1);
            break;
        }
    }
    centroids
}

fn init_kmeans_plus_plus(dims: usize, data: &[f32], nlist: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dims;
    let mut centroids = Vec::with_capacity(nlist * dims);

    let first = rng.random_range(0..n);
    centroids.extend_from_slice(&data[first * dims..(first + 1) * dims]);

    // Squared distance to the closest chosen centroid so far.
    let mut min_dist: Vec<f32> = data
        .chunks_exact(dims)
        .map(|v| VectorMetric::L2.score(v, &centroids[..dims]))
        .collect();

    for _ in 1..nlist {
        let total: f32 = min_dist.iter().sum();
        let chosen = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumsum = 0.0;
            let mut chosen = n - 1;
            for (i, &weight) in min_dist.iter().enumerate() {
                cumsum += weight;
                if cumsum >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let start = centroids.len();
        centroids.extend_from_slice(&data[chosen * dims..(chosen + 1) * dims]);
        let newest = &centroids[start..start + dims];
        for (dist, vector) in min_dist.iter_mut().zip(data.chunks_exact(dims)) {
            *dist = dist.min(VectorMetric::L2.score(vector, newest));
        }
    }
    centroids
}

fn update_centroids(dims: usize, data: &[f32], assignments: &[usize], centroids: &mut [f32]) {
    let nlist = centroids.len() / dims;
    let mut sums = vec![0.0f32; nlist * dims];
    let mut counts = vec![0usize; nlist];

    for (vector, &cluster) in data.chunks_exact(dims).zip(assignments) {
        counts[cluster] += 1;
        for (sum, value) in sums[cluster * dims..(cluster + 1) * dims].iter_mut().zip(vector) {
            *sum += value;
        }
    }

    for (cluster, &count) in counts.iter().enumerate() {
        // Empty clusters keep their previous centroid.
        if count == 0 {
            continue;
        }
        let range = cluster * dims..(cluster + 1) * dims;
        for (c, s) in centroids[range.clone()].iter_mut().zip(&sums[range]) {
            *c = s / count as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> (Vec<i64>, Vec<f32>) {
        let ids = (0..n as i64).collect();
        let data = (0..n).flat_map(|i| [i as f32, (i % 7) as f32]).collect();
        (ids, data)
    }

    fn small_config() -> VectorIndexConfig {
        VectorIndexConfig {
            flat_threshold: 100,
            ..VectorIndexConfig::default()
        }
    }

    #[test]
    fn test_flat_search() {
        let (ids, data) = grid(10);
        let index = VectorIndex::build(
            2,
            VectorMetric::L2,
            IndexOptimization::Recall,
            ids,
            data,
            &VectorIndexConfig::default(),
        )
        .unwrap();
        assert_eq!(index.kind_name(), "flat");

        let hits = index.search(&[3.0, 3.0], 2, None, &IdSelector::All).unwrap();
        assert_eq!(hits[0].vec_id, 3);
        assert_eq!(hits[0].score, 0.0);
        assert_eq!(hits.len(), 2);

        let excluded = IdSelector::exclude([3], 10);
        let hits = index.search(&[3.0, 3.0], 1, None, &excluded).unwrap();
        assert_ne!(hits[0].vec_id, 3);

        assert!(index.search(&[1.0], 1, None, &IdSelector::All).is_err());
    }

    #[test]
    fn test_ivf_build_is_deterministic() {
        let (ids, data) = grid(500);
        let build = || {
            VectorIndex::build(
                2,
                VectorMetric::L2,
                IndexOptimization::Recall,
                ids.clone(),
                data.clone(),
                &small_config(),
            )
            .unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a, b);

        let ivf = a.as_ivf().unwrap();
        assert_eq!(ivf.nlist(), 5);
        assert_eq!(ivf.nprobe(), 2);
        assert_eq!(a.len(), 500);
    }

    #[test]
    fn test_ivf_full_probe_matches_flat() {
        let (ids, data) = grid(300);
        let flat = VectorIndex::build(
            2,
            VectorMetric::L2,
            IndexOptimization::Recall,
            ids.clone(),
            data.clone(),
            &VectorIndexConfig::default(),
        )
        .unwrap();
        let ivf = VectorIndex::build(
            2,
            VectorMetric::L2,
            IndexOptimization::Recall,
            ids,
            data,
            &small_config(),
        )
        .unwrap();

        let query = [150.0, 2.0];
        let expected = flat.search(&query, 5, None, &IdSelector::All).unwrap();
        let nlist = ivf.as_ivf().unwrap().nlist();
        let actual = ivf.search(&query, 5, Some(nlist), &IdSelector::All).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_memory_efficient_round_trip() {
        let (ids, data) = grid(200);
        let index = VectorIndex::build(
            2,
            VectorMetric::L2,
            IndexOptimization::MemoryEfficient,
            ids,
            data,
            &small_config(),
        )
        .unwrap();
        assert_eq!(index.kind_name(), "ivf-sq8");

        let bytes = index.to_bytes().unwrap();
        let decoded = VectorIndex::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, index);

        let (ids, vectors) = decoded.reconstruct_all();
        assert_eq!(ids.len(), 200);
        assert_eq!(vectors.len(), 400);
    }

    #[test]
    fn test_inconsistent_decoded_index_is_corrupt() {
        let zero_dims = VectorIndex::Flat(FlatIndex {
            dims: 0,
            metric: VectorMetric::L2,
            ids: vec![0, 1],
            data: vec![],
        });
        let short_flat = VectorIndex::Flat(FlatIndex {
            dims: 2,
            metric: VectorMetric::L2,
            ids: vec![0, 1],
            data: vec![1.0, 2.0, 3.0],
        });
        let short_list = VectorIndex::Ivf(IvfIndex {
            dims: 2,
            metric: VectorMetric::L2,
            nprobe: 1,
            centroids: vec![0.0, 0.0],
            lists: vec![InvertedList {
                ids: vec![0, 1],
                data: ListData::Float(vec![1.0, 2.0]),
            }],
            quantizer: None,
        });
        let missing_quantizer = VectorIndex::Ivf(IvfIndex {
            dims: 2,
            metric: VectorMetric::L2,
            nprobe: 1,
            centroids: vec![0.0, 0.0],
            lists: vec![InvertedList {
                ids: vec![0],
                data: ListData::Quantized(vec![1, 2]),
            }],
            quantizer: None,
        });

        for index in [zero_dims, short_flat, short_list, missing_quantizer] {
            let bytes = index.to_bytes().unwrap();
            let err = VectorIndex::from_bytes(&bytes).unwrap_err();
            assert!(err.is_corrupt(), "{index:?}: {err}");
        }
    }

    #[test]
    fn test_probe_counts() {
        let config = VectorIndexConfig::default();
        assert_eq!(nlist_for(5_000, &config), 50);
        assert_eq!(nlist_for(1_000_000, &config), 4000);
        assert_eq!(nprobe_for(50, IndexOptimization::Recall), 7);
        assert_eq!(nprobe_for(50, IndexOptimization::Latency), 3);
        assert_eq!(nprobe_for(1, IndexOptimization::Latency), 1);
    }

    #[test]
    fn test_top_k_orders_by_metric() {
        let hits = vec![
            Neighbor { vec_id: 0, score: 0.5 },
            Neighbor { vec_id: 1, score: 0.9 },
            Neighbor { vec_id: 2, score: 0.1 },
        ];
        let best = top_k(VectorMetric::DotProduct, hits.clone(), 2);
        assert_eq!(best.iter().map(|n| n.vec_id).collect::<Vec<_>>(), vec![1, 0]);
        let best = top_k(VectorMetric::L2, hits, 1);
        assert_eq!(best[0].vec_id, 2);
    }
}
