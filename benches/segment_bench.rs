//! Criterion benchmarks for segment building, lookup and merging.

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use strata::document::{Document, Field, VectorPayload};
use strata::{CancelSignal, MergeEngine, SegmentBuilder, SegmentConfig, VectorMetric, VectorSearchParams};

const WORDS: [&str; 16] = [
    "segment", "index", "term", "posting", "vector", "merge", "field", "chunk", "footer", "stored",
    "dictionary", "thesaurus", "cluster", "probe", "query", "document",
];

/// Generate test documents for benchmarking.
fn generate_documents(count: usize, dims: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let length = 8 + i % 24;
            let text: Vec<&str> = (0..length).map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()]).collect();
            let data: Vec<f32> = (0..dims)
                .map(|d| ((i as f32 * 0.1 + d as f32 * 0.01).sin() * 0.5 + 0.5))
                .collect();
            Document::new(&format!("doc-{i}"))
                .add_field(Field::text("body", &text.join(" ")))
                .add_field(Field::vector("emb", VectorPayload::new(dims, data, VectorMetric::L2)))
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let docs = generate_documents(2_000, 32);
    let builder = SegmentBuilder::new(SegmentConfig::default());

    let mut group = c.benchmark_group("segment_build");
    group.throughput(Throughput::Elements(docs.len() as u64));
    group.sample_size(10);
    group.bench_function("build_2000_docs", |b| {
        b.iter(|| black_box(builder.build(black_box(&docs)).unwrap()))
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let docs = generate_documents(2_000, 32);
    let segment = SegmentBuilder::new(SegmentConfig::default())
        .build(&docs)
        .unwrap()
        .segment;
    let query: Vec<f32> = (0..32).map(|d| (d as f32 * 0.03).cos() * 0.5 + 0.5).collect();

    let mut group = c.benchmark_group("segment_lookup");
    group.bench_function("postings_list", |b| {
        b.iter(|| {
            let dict = segment.dictionary("body").unwrap();
            let list = dict.postings_list(black_box(b"posting"), None).unwrap();
            black_box(list.postings(false).unwrap().len())
        })
    });
    group.bench_function("vector_search_k10", |b| {
        b.iter(|| {
            black_box(
                segment
                    .vector_search("emb", black_box(&query), VectorSearchParams::new(10))
                    .unwrap(),
            )
        })
    });
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let builder = SegmentBuilder::new(SegmentConfig::default());
    let segments: Vec<_> = (0..4)
        .map(|_| builder.build(&generate_documents(500, 16)).unwrap().segment)
        .collect();
    let engine = MergeEngine::new(SegmentConfig::default());

    let mut group = c.benchmark_group("segment_merge");
    group.sample_size(10);
    group.bench_function("merge_4x500", |b| {
        b.iter(|| {
            black_box(
                engine
                    .merge_in_memory(black_box(&segments), &[], &CancelSignal::never())
                    .unwrap(),
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_lookup, bench_merge);
criterion_main!(benches);
