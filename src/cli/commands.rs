//! Command implementations for the strata CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::SegmentConfig;
use crate::error::{Result, StrataError};
use crate::lexical::DictEntry;
use crate::merge::{CancelSignal, MergeEngine};
use crate::section::SectionType;
use crate::segment::Segment;
use crate::vector::VectorSearchParams;

/// Execute a CLI command.
pub fn execute_command(args: StrataArgs) -> Result<()> {
    let config = load_config(&args)?;
    match &args.command {
        Command::Footer(cmd) => show_footer(cmd, &config, &args),
        Command::Fields(cmd) => show_fields(cmd, &config, &args),
        Command::Dict(cmd) => show_dict(cmd, &config, &args),
        Command::Postings(cmd) => show_postings(cmd, &config, &args),
        Command::Stored(cmd) => show_stored(cmd, &config, &args),
        Command::Thesaurus(cmd) => show_thesaurus(cmd, &config, &args),
        Command::Knn(cmd) => run_knn(cmd, &config, &args),
        Command::Merge(cmd) => merge_segments(cmd, &config, &args),
    }
}

fn load_config(args: &StrataArgs) -> Result<SegmentConfig> {
    match &args.config {
        Some(path) => {
            let config = SegmentConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            Ok(config)
        }
        None => Ok(SegmentConfig::default()),
    }
}

fn open_segment(path: &Path, config: &SegmentConfig) -> Result<Arc<Segment>> {
    let segment = Segment::open(path, config)
        .with_context(|| format!("opening segment {}", path.display()))?;
    Ok(segment)
}

fn show_footer(cmd: &SegmentArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let report = FooterReport {
        path: cmd.segment.display().to_string(),
        size_bytes: segment.size_in_bytes(),
        chunk_mode: format!("{:?}", segment.chunk_mode()),
        footer: *segment.footer(),
    };
    output_result("Segment footer", &report, args)
}

fn show_fields(cmd: &SegmentArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let fields = segment
        .fields()
        .iter()
        .enumerate()
        .map(|(id, field)| {
            let id = id as u16;
            FieldReport {
                id,
                name: field.name.clone(),
                kind: format!("{:?}", field.kind).to_lowercase(),
                stored: field.options.stored,
                indexed: field.options.indexed,
                doc_values: field.options.doc_values,
                sections: SectionType::ALL
                    .iter()
                    .filter(|st| segment.section_addr(id, **st).is_some())
                    .map(|st| st.name().to_string())
                    .collect(),
            }
        })
        .collect();
    let report = FieldsReport {
        num_docs: segment.count(),
        fields,
    };
    output_result("Segment fields", &report, args)
}

fn show_dict(cmd: &DictArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let dict = segment.dictionary(&cmd.field)?;

    let entries: Box<dyn Iterator<Item = Result<DictEntry>> + '_> = match &cmd.prefix {
        Some(prefix) => Box::new(dict.prefix_iter(prefix)),
        None => Box::new(dict.iter()),
    };
    let mut terms = Vec::new();
    for entry in entries.take(cmd.limit) {
        let entry = entry?;
        terms.push(DictTerm {
            term: entry.term_str().into_owned(),
            count: entry.count,
        });
    }

    let report = DictReport {
        field: cmd.field.clone(),
        cardinality: dict.cardinality(),
        terms,
    };
    output_result("Dictionary terms", &report, args)
}

fn show_postings(cmd: &PostingsArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let dict = segment.dictionary(&cmd.field)?;
    let list = dict.postings_list(cmd.term.as_bytes(), None)?;
    let report = PostingsReport {
        field: cmd.field.clone(),
        term: cmd.term.clone(),
        count: list.count(),
        postings: list.postings(cmd.locations)?,
    };
    output_result("Postings", &report, args)
}

fn show_stored(cmd: &StoredArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let doc_num = match (&cmd.id, cmd.doc_num) {
        (Some(id), _) => segment
            .doc_numbers(&[id.as_bytes()])?
            .min()
            .map(u64::from)
            .ok_or_else(|| StrataError::invalid_argument(format!("no document with id {id}")))?,
        (None, Some(doc_num)) => doc_num,
        (None, None) => {
            return Err(StrataError::invalid_argument("a document number or --id is required"));
        }
    };
    if doc_num >= segment.count() {
        return Err(StrataError::invalid_argument(format!(
            "document number {doc_num} out of range (segment holds {})",
            segment.count()
        )));
    }

    let mut values = Vec::new();
    segment.visit_stored_fields(doc_num, |field, type_byte, value, positions| {
        values.push(StoredValueReport {
            field: field.to_string(),
            type_byte,
            value: String::from_utf8_lossy(value).into_owned(),
            array_positions: positions.to_vec(),
        });
        true
    })?;
    output_result("Stored fields", &StoredReport { doc_num, values }, args)
}

fn show_thesaurus(cmd: &ThesaurusArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let thesaurus = segment.thesaurus(&cmd.field)?;

    if let Some(term) = &cmd.term {
        let report = SynonymLookupReport {
            field: cmd.field.clone(),
            term: term.clone(),
            matches: thesaurus.lookup(term, None)?,
        };
        return output_result("Synonym lookup", &report, args);
    }

    let terms = match &cmd.prefix {
        Some(prefix) => thesaurus.prefix_terms(prefix).collect(),
        None => thesaurus.terms().collect(),
    };
    let report = ThesaurusReport {
        field: cmd.field.clone(),
        terms,
    };
    output_result("Thesaurus terms", &report, args)
}

fn run_knn(cmd: &KnnArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    let segment = open_segment(&cmd.segment, config)?;
    let mut params = VectorSearchParams::new(cmd.k);
    if let Some(nprobe) = cmd.nprobe {
        params = params.with_nprobe(nprobe);
    }

    let start = Instant::now();
    let hits = if cmd.filter_ids.is_empty() {
        segment.vector_search(&cmd.field, &cmd.vector, params)?
    } else {
        let eligible = segment.doc_numbers(&cmd.filter_ids)?;
        log::info!("{} of {} filter ids resolved", eligible.len(), cmd.filter_ids.len());
        segment.vector_search_with_filter(&cmd.field, &cmd.vector, params, &eligible)?
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let mut report_hits = Vec::with_capacity(hits.len());
    for hit in &hits {
        report_hits.push(KnnHit {
            doc_num: hit.doc_num,
            id: segment.doc_id(hit.doc_num)?,
            vec_id: hit.vec_id,
            score: hit.score,
        });
    }
    let report = KnnReport {
        field: cmd.field.clone(),
        metric: hits.metric().to_string(),
        k: cmd.k,
        hits: report_hits,
        duration_ms,
    };
    output_result("Nearest neighbours", &report, args)
}

fn merge_segments(cmd: &MergeArgs, config: &SegmentConfig, args: &StrataArgs) -> Result<()> {
    if cmd.output.exists() && !cmd.force {
        return Err(StrataError::invalid_argument(format!(
            "{} already exists. Use --force to overwrite.",
            cmd.output.display()
        )));
    }
    if cmd.segments.iter().any(|s| s == &cmd.output) {
        return Err(StrataError::invalid_argument("the output may not be one of the inputs"));
    }

    let segments = cmd
        .segments
        .iter()
        .map(|path| open_segment(path, config))
        .collect::<Result<Vec<_>>>()?;

    let drops = if cmd.drop_ids.is_empty() {
        Vec::new()
    } else {
        segments
            .iter()
            .map(|segment| segment.doc_numbers(&cmd.drop_ids).map(Some))
            .collect::<Result<Vec<_>>>()?
    };

    for (path, segment) in cmd.segments.iter().zip(&segments) {
        log::info!("input {} holds {} documents", path.display(), segment.count());
    }

    let engine = MergeEngine::new(config.clone());
    let result = engine.merge(&segments, &drops, &cmd.output, &CancelSignal::never())?;

    let report = MergeReport {
        output: cmd.output.display().to_string(),
        inputs: cmd.segments.iter().map(|p| p.display().to_string()).collect(),
        stats: result.stats,
    };
    output_result("Merge complete", &report, args)
}
