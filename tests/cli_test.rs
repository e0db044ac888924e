use clap::Parser;
use strata::cli::{StrataArgs, execute_command};
use strata::document::{Document, Field, SynonymDefinition, VectorPayload};
use strata::{Segment, SegmentBuilder, SegmentConfig, VectorMetric};
use tempfile::tempdir;

fn write_segment(path: &std::path::Path, prefix: &str) {
    let docs: Vec<Document> = (0..4)
        .map(|i| {
            Document::new(&format!("{prefix}{i}"))
                .add_field(Field::text("body", &format!("hello world {i}")))
                .add_field(Field::vector(
                    "emb",
                    VectorPayload::new(2, vec![i as f32, 1.0], VectorMetric::Cosine),
                ))
                .add_field(Field::synonyms(
                    "syn",
                    vec![SynonymDefinition::equivalent(["hello", "hi"])],
                ))
        })
        .collect();
    SegmentBuilder::new(SegmentConfig::default())
        .build_to_file(&docs, path)
        .unwrap();
}

fn run(args: &[&str]) -> strata::Result<()> {
    let mut argv = vec!["strata", "-q", "--format", "json"];
    argv.extend_from_slice(args);
    execute_command(StrataArgs::parse_from(argv))
}

#[test]
fn test_inspection_commands() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.strata");
    write_segment(&path, "a");
    let seg = path.to_str().unwrap();

    run(&["footer", seg]).unwrap();
    run(&["fields", seg]).unwrap();
    run(&["dict", seg, "body", "--prefix", "h"]).unwrap();
    run(&["postings", seg, "body", "hello", "--locations"]).unwrap();
    run(&["stored", seg, "2"]).unwrap();
    run(&["stored", seg, "--id", "a3"]).unwrap();
    run(&["thesaurus", seg, "syn"]).unwrap();
    run(&["thesaurus", seg, "syn", "hello"]).unwrap();
    run(&["knn", seg, "emb", "--vector", "1,0.5", "-k", "2"]).unwrap();
    run(&["knn", seg, "emb", "--vector", "1,0.5", "--filter-ids", "a0,a1"]).unwrap();

    assert!(run(&["stored", seg, "99"]).is_err());
    assert!(run(&["stored", seg, "--id", "missing"]).is_err());
    assert!(run(&["knn", seg, "emb", "--vector", "1,2,3"]).is_err());
}

#[test]
fn test_merge_command() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.strata");
    let b = dir.path().join("b.strata");
    let out = dir.path().join("out.strata");
    write_segment(&a, "a");
    write_segment(&b, "b");

    run(&[
        "merge",
        "-o",
        out.to_str().unwrap(),
        a.to_str().unwrap(),
        b.to_str().unwrap(),
        "--drop-ids",
        "a1,b2",
    ])
    .unwrap();

    let merged = Segment::open(&out, &SegmentConfig::default()).unwrap();
    assert_eq!(merged.count(), 6);
    assert_eq!(merged.doc_numbers(&["a1", "b2"]).unwrap().len(), 0);
    drop(merged);

    // The output exists now, so a second merge needs --force.
    let again = [
        "merge",
        "-o",
        out.to_str().unwrap(),
        a.to_str().unwrap(),
    ];
    assert!(run(&again).is_err());
    let mut forced = again.to_vec();
    forced.push("--force");
    run(&forced).unwrap();
    assert_eq!(Segment::open(&out, &SegmentConfig::default()).unwrap().count(), 4);
}

#[test]
fn test_missing_segment_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.strata");
    assert!(run(&["footer", path.to_str().unwrap()]).is_err());
}
