use std::collections::BTreeSet;
use std::sync::Arc;

use roaring::RoaringBitmap;
use strata::document::{Document, Field, VectorPayload};
use strata::{
    IndexOptimization, Segment, SegmentBuilder, SegmentConfig, VectorIndexConfig, VectorMetric, VectorSearchParams,
};

fn two_vector_docs() -> Arc<Segment> {
    let docs: Vec<Document> = (0..5)
        .map(|i| {
            let base = i as f32;
            Document::new(&format!("doc{i}")).add_field(Field::vector(
                "emb",
                VectorPayload::new(3, vec![base, 0.0, 1.0, base, 1.0, 0.0], VectorMetric::L2),
            ))
        })
        .collect();
    SegmentBuilder::new(SegmentConfig::default())
        .build(&docs)
        .unwrap()
        .segment
}

fn pseudo_random_docs(n: usize, dims: usize, optimization: IndexOptimization) -> Vec<Document> {
    let mut state = 0x9e37_79b9_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % 10_000) as f32 / 10_000.0
    };
    (0..n)
        .map(|i| {
            let data: Vec<f32> = (0..dims).map(|_| next()).collect();
            let mut payload = VectorPayload::new(dims, data, VectorMetric::L2);
            payload.optimized_for = optimization;
            Document::new(&format!("v{i}")).add_field(Field::vector("emb", payload))
        })
        .collect()
}

#[test]
fn test_filtered_search_returns_only_eligible_documents() {
    let segment = two_vector_docs();
    let data = segment.vector_field("emb").unwrap().unwrap();
    assert_eq!(data.num_vectors(), 10);

    let eligible: RoaringBitmap = [1u32, 3].into_iter().collect();
    let hits = segment
        .vector_search_with_filter("emb", &[2.0, 2.0, 1.0], VectorSearchParams::new(5), &eligible)
        .unwrap();

    let docs: Vec<u64> = hits.iter().map(|h| h.doc_num).collect();
    let unique: BTreeSet<u64> = docs.iter().copied().collect();
    assert!(hits.len() <= 2);
    assert_eq!(unique.len(), docs.len());
    assert!(unique.iter().all(|d| eligible.contains(*d as u32)));

    for hit in &hits {
        assert!(data.vectors_of(hit.doc_num).contains(&hit.vec_id));
        let owner = data.doc_for(hit.vec_id).unwrap();
        assert!(eligible.contains(owner as u32));
    }
}

#[test]
fn test_unfiltered_search_dedups_documents() {
    let segment = two_vector_docs();
    let hits = segment
        .vector_search("emb", &[1.0, 1.0, 1.0], VectorSearchParams::new(3))
        .unwrap();
    assert_eq!(hits.len(), 3);
    let unique: BTreeSet<u64> = hits.iter().map(|h| h.doc_num).collect();
    assert_eq!(unique.len(), 3);
    // doc1 holds [1, 0, 1] and [1, 1, 0], both at distance 1.
    assert_eq!(hits.postings()[0].doc_num, 1);

    // Scores are best first.
    let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
    assert!(scores.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_filter_over_whole_corpus_equals_unfiltered() {
    let segment = two_vector_docs();
    let all: RoaringBitmap = (0..5).collect();
    let query = [3.5, 0.5, 0.5];
    let params = VectorSearchParams::new(4);

    let plain = segment.vector_search("emb", &query, params).unwrap();
    let filtered = segment.vector_search_with_filter("emb", &query, params, &all).unwrap();
    assert_eq!(plain, filtered);
}

#[test]
fn test_ivf_filtered_search_is_subset_of_full_scan() {
    let config = SegmentConfig {
        vector: VectorIndexConfig {
            flat_threshold: 64,
            ..VectorIndexConfig::default()
        },
        ..SegmentConfig::default()
    };
    let docs = pseudo_random_docs(600, 8, IndexOptimization::Recall);
    let segment = SegmentBuilder::new(config).build(&docs).unwrap().segment;
    let data = segment.vector_field("emb").unwrap().unwrap();
    assert_eq!(data.index().kind_name(), "ivf");
    let nlist = data.index().as_ivf().unwrap().nlist();

    let eligible: RoaringBitmap = (0u32..600).filter(|d| d % 7 == 0).collect();
    let query = [0.5f32; 8];
    let params = VectorSearchParams::new(10).with_nprobe(nlist);

    // With every cluster probed the filtered result is the exact top 10
    // of the eligible documents.
    let filtered = segment
        .vector_search_with_filter("emb", &query, params, &eligible)
        .unwrap();
    assert_eq!(filtered.len(), 10);
    assert!(filtered.iter().all(|h| eligible.contains(h.doc_num as u32)));

    let exhaustive = segment
        .vector_search("emb", &query, VectorSearchParams::new(600).with_nprobe(nlist))
        .unwrap();
    let expected: Vec<u64> = exhaustive
        .iter()
        .filter(|h| eligible.contains(h.doc_num as u32))
        .take(10)
        .map(|h| h.doc_num)
        .collect();
    let got: Vec<u64> = filtered.iter().map(|h| h.doc_num).collect();
    assert_eq!(got, expected);

    // A narrow probe widens until enough eligible documents are found.
    let narrow = segment
        .vector_search_with_filter("emb", &query, VectorSearchParams::new(10).with_nprobe(1), &eligible)
        .unwrap();
    assert_eq!(narrow.len(), 10);
}

#[test]
fn test_quantized_index_search() {
    let config = SegmentConfig {
        vector: VectorIndexConfig {
            flat_threshold: 64,
            ..VectorIndexConfig::default()
        },
        ..SegmentConfig::default()
    };
    let docs = pseudo_random_docs(300, 4, IndexOptimization::MemoryEfficient);
    let segment = SegmentBuilder::new(config).build(&docs).unwrap().segment;
    let data = segment.vector_field("emb").unwrap().unwrap();
    assert_eq!(data.index().kind_name(), "ivf-sq8");
    assert_eq!(data.optimized_for(), IndexOptimization::MemoryEfficient);

    let hits = segment
        .vector_search("emb", &[0.25, 0.5, 0.75, 0.5], VectorSearchParams::new(5))
        .unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn test_dimension_mismatch_is_rejected() {
    let segment = two_vector_docs();
    let err = segment
        .vector_search("emb", &[1.0, 2.0], VectorSearchParams::new(1))
        .unwrap_err();
    assert!(matches!(err, strata::StrataError::Vector(_)), "unexpected error: {err}");
}

#[test]
fn test_missing_vector_field_is_empty() {
    let segment = two_vector_docs();
    let hits = segment
        .vector_search("nope", &[1.0, 2.0, 3.0], VectorSearchParams::new(1))
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_index_is_cached_per_field() {
    let segment = two_vector_docs();
    assert!(segment.vector_cache().is_empty());
    {
        let _first = segment.vector_field("emb").unwrap().unwrap();
        let _second = segment.vector_field("emb").unwrap().unwrap();
        assert_eq!(segment.vector_cache().len(), 1);
        assert!(segment.vector_cache().is_monitoring());
    }
    segment.vector_cache().shutdown();
    assert!(!segment.vector_cache().is_monitoring());
}
