//! Output formatting for CLI commands.

use std::fmt;

use serde::Serialize;

use crate::cli::args::{OutputFormat, StrataArgs};
use crate::error::Result;
use crate::lexical::Posting;
use crate::merge::MergeStats;
use crate::segment::Footer;
use crate::synonym::SynonymMatch;

/// Footer of one segment file.
#[derive(Debug, Serialize)]
pub struct FooterReport {
    pub path: String,
    pub size_bytes: u64,
    pub chunk_mode: String,
    pub footer: Footer,
}

/// One field and the sections holding its data.
#[derive(Debug, Serialize)]
pub struct FieldReport {
    pub id: u16,
    pub name: String,
    pub kind: String,
    pub stored: bool,
    pub indexed: bool,
    pub doc_values: bool,
    pub sections: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FieldsReport {
    pub num_docs: u64,
    pub fields: Vec<FieldReport>,
}

#[derive(Debug, Serialize)]
pub struct DictTerm {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct DictReport {
    pub field: String,
    pub cardinality: usize,
    pub terms: Vec<DictTerm>,
}

#[derive(Debug, Serialize)]
pub struct PostingsReport {
    pub field: String,
    pub term: String,
    pub count: u64,
    pub postings: Vec<Posting>,
}

#[derive(Debug, Serialize)]
pub struct StoredValueReport {
    pub field: String,
    pub type_byte: u8,
    pub value: String,
    pub array_positions: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct StoredReport {
    pub doc_num: u64,
    pub values: Vec<StoredValueReport>,
}

#[derive(Debug, Serialize)]
pub struct ThesaurusReport {
    pub field: String,
    pub terms: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SynonymLookupReport {
    pub field: String,
    pub term: String,
    pub matches: Vec<SynonymMatch>,
}

#[derive(Debug, Serialize)]
pub struct KnnHit {
    pub doc_num: u64,
    pub id: String,
    pub vec_id: i64,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct KnnReport {
    pub field: String,
    pub metric: String,
    pub k: usize,
    pub hits: Vec<KnnHit>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MergeReport {
    pub output: String,
    pub inputs: Vec<String>,
    pub stats: MergeStats,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize + fmt::Display>(message: &str, result: &T, args: &StrataArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                println!("{message}");
                println!();
            }
            print!("{result}");
        }
        OutputFormat::Json => println!("{}", to_json(result, args.pretty)?),
    }
    Ok(())
}

/// Serialize `result` as JSON.
pub fn to_json<T: Serialize>(result: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    Ok(json)
}

impl fmt::Display for FooterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Segment:            {}", self.path)?;
        writeln!(f, "Size:               {} bytes", self.size_bytes)?;
        writeln!(f, "Documents:          {}", self.footer.num_docs)?;
        writeln!(f, "Stored index:       {}", self.footer.stored_index_offset)?;
        writeln!(f, "Fields index:       {}", self.footer.fields_index_offset)?;
        writeln!(f, "Sections index:     {}", self.footer.sections_index_offset)?;
        writeln!(f, "Chunk mode:         {} ({})", self.chunk_mode, self.footer.chunk_mode)?;
        writeln!(f, "Version:            {}", self.footer.version)?;
        writeln!(f, "CRC:                {:08x}", self.footer.crc)
    }
}

impl fmt::Display for FieldsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} documents, {} fields", self.num_docs, self.fields.len())?;
        writeln!(f, "{:<4} {:<24} {:<8} {:<5} {:<5} {:<5} Sections", "Id", "Name", "Kind", "Store", "Index", "DV")?;
        writeln!(f, "{}", "-".repeat(72))?;
        for field in &self.fields {
            writeln!(
                f,
                "{:<4} {:<24} {:<8} {:<5} {:<5} {:<5} {}",
                field.id,
                field.name,
                field.kind,
                flag(field.stored),
                flag(field.indexed),
                flag(field.doc_values),
                field.sections.join(",")
            )?;
        }
        Ok(())
    }
}

fn flag(on: bool) -> &'static str {
    if on { "yes" } else { "-" }
}

impl fmt::Display for DictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Field {}: {} terms", self.field, self.cardinality)?;
        for term in &self.terms {
            writeln!(f, "  {:<32} {}", term.term, term.count)?;
        }
        if self.terms.len() < self.cardinality {
            writeln!(f, "  ... {} more", self.cardinality - self.terms.len())?;
        }
        Ok(())
    }
}

impl fmt::Display for PostingsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:{} in {} documents", self.field, self.term, self.count)?;
        for posting in &self.postings {
            write!(
                f,
                "  doc {:<8} freq {:<4} norm {:.4}",
                posting.doc_num, posting.frequency, posting.norm
            )?;
            for loc in &posting.locations {
                write!(f, " [{}@{}..{}]", loc.position, loc.start, loc.end)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for StoredReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Document {}", self.doc_num)?;
        for value in &self.values {
            write!(f, "  {}: {}", value.field, value.value)?;
            if !value.array_positions.is_empty() {
                write!(f, " {:?}", value.array_positions)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for ThesaurusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Field {}: {} terms", self.field, self.terms.len())?;
        for term in &self.terms {
            writeln!(f, "  {term}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SynonymLookupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches.is_empty() {
            return writeln!(f, "No synonyms for {} in {}", self.term, self.field);
        }
        writeln!(f, "Synonyms of {} in {}:", self.term, self.field)?;
        for m in &self.matches {
            let docs: Vec<String> = m.docs.iter().map(|d| d.to_string()).collect();
            writeln!(f, "  {:<24} docs {}", m.synonym, docs.join(","))?;
        }
        Ok(())
    }
}

impl fmt::Display for KnnReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} hits for k={} on {} ({}) in {} ms",
            self.hits.len(),
            self.k,
            self.field,
            self.metric,
            self.duration_ms
        )?;
        for (rank, hit) in self.hits.iter().enumerate() {
            writeln!(
                f,
                "{:>3}. doc {:<8} {:<24} vec {:<8} score {:.6}",
                rank + 1,
                hit.doc_num,
                hit.id,
                hit.vec_id,
                hit.score
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(f, "Merged {} segments into {}", s.segments_merged, self.output)?;
        writeln!(f, "  Documents kept:     {}", s.docs_kept)?;
        writeln!(f, "  Documents dropped:  {}", s.docs_dropped)?;
        writeln!(f, "  Terms merged:       {}", s.terms_merged)?;
        writeln!(f, "  Postings merged:    {}", s.postings_merged)?;
        writeln!(f, "  Vectors merged:     {}", s.vectors_merged)?;
        writeln!(f, "  Synonyms merged:    {}", s.synonyms_merged)?;
        writeln!(f, "  Stored copied:      {}", s.stored_copied)?;
        writeln!(f, "  Stored rewritten:   {}", s.stored_rewritten)?;
        writeln!(f, "  Bytes written:      {}", s.bytes_written)?;
        writeln!(f, "  Elapsed:            {} ms", s.elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_report_human() {
        let report = DictReport {
            field: "body".to_string(),
            cardinality: 3,
            terms: vec![
                DictTerm {
                    term: "alpha".to_string(),
                    count: 2,
                },
                DictTerm {
                    term: "beta".to_string(),
                    count: 1,
                },
            ],
        };
        let text = report.to_string();
        assert!(text.starts_with("Field body: 3 terms"));
        assert!(text.contains("... 1 more"));
    }

    #[test]
    fn test_to_json() {
        let report = ThesaurusReport {
            field: "syn".to_string(),
            terms: vec!["car".to_string()],
        };
        assert_eq!(to_json(&report, false).unwrap(), r#"{"field":"syn","terms":["car"]}"#);
        assert!(to_json(&report, true).unwrap().contains('\n'));
    }
}
