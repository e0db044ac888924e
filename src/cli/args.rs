//! Command line argument parsing for the strata CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// strata - inspect and merge immutable index segments
#[derive(Parser, Debug, Clone)]
#[command(name = "strata")]
#[command(about = "Inspect and merge immutable, memory-mapped index segments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct StrataArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Segment configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "STRATA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl StrataArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the footer of a segment
    Footer(SegmentArgs),

    /// List the fields of a segment and the sections holding them
    Fields(SegmentArgs),

    /// List the terms of a field's dictionary
    Dict(DictArgs),

    /// Show the postings of one term
    Postings(PostingsArgs),

    /// Show the stored fields of one document
    Stored(StoredArgs),

    /// List or look up the terms of a synonym field
    Thesaurus(ThesaurusArgs),

    /// Nearest neighbour search over a vector field
    Knn(KnnArgs),

    /// Merge segments into a new segment
    Merge(MergeArgs),
}

/// Arguments naming a single segment file
#[derive(Parser, Debug, Clone)]
pub struct SegmentArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,
}

/// Arguments for listing dictionary terms
#[derive(Parser, Debug, Clone)]
pub struct DictArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,

    /// Field whose dictionary to list
    #[arg(value_name = "FIELD")]
    pub field: String,

    /// Only list terms starting with this prefix
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Maximum number of terms to list
    #[arg(short, long, default_value = "100")]
    pub limit: usize,
}

/// Arguments for showing postings
#[derive(Parser, Debug, Clone)]
pub struct PostingsArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,

    /// Field to look the term up in
    #[arg(value_name = "FIELD")]
    pub field: String,

    /// Term to look up
    #[arg(value_name = "TERM")]
    pub term: String,

    /// Include token locations
    #[arg(long)]
    pub locations: bool,
}

/// Arguments for showing stored fields
#[derive(Parser, Debug, Clone)]
pub struct StoredArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,

    /// Document number
    #[arg(value_name = "DOC_NUM", required_unless_present = "id")]
    pub doc_num: Option<u64>,

    /// External document id, instead of a document number
    #[arg(long, conflicts_with = "doc_num")]
    pub id: Option<String>,
}

/// Arguments for the thesaurus command
#[derive(Parser, Debug, Clone)]
pub struct ThesaurusArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,

    /// Synonym field
    #[arg(value_name = "FIELD")]
    pub field: String,

    /// Term to look up; lists every term when omitted
    #[arg(value_name = "TERM")]
    pub term: Option<String>,

    /// Only list terms starting with this prefix
    #[arg(short, long, conflicts_with = "term")]
    pub prefix: Option<String>,
}

/// Arguments for nearest neighbour search
#[derive(Parser, Debug, Clone)]
pub struct KnnArgs {
    /// Path to the segment file
    #[arg(value_name = "SEGMENT")]
    pub segment: PathBuf,

    /// Vector field
    #[arg(value_name = "FIELD")]
    pub field: String,

    /// Query vector (comma-separated)
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
    pub vector: Vec<f32>,

    /// Number of documents to return
    #[arg(short, long, default_value = "10")]
    pub k: usize,

    /// Number of clusters to probe
    #[arg(long)]
    pub nprobe: Option<usize>,

    /// Restrict the search to these external ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub filter_ids: Vec<String>,
}

/// Arguments for merging segments
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path of the merged segment
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Segments to merge, in order
    #[arg(value_name = "SEGMENTS", required = true)]
    pub segments: Vec<PathBuf>,

    /// External ids to drop from every input (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub drop_ids: Vec<String>,

    /// Overwrite the output if it exists
    #[arg(long)]
    pub force: bool,
}

/// Output formats supported by CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_knn() {
        let args = StrataArgs::parse_from([
            "strata", "knn", "seg.strata", "emb", "--vector", "1.0,-2.5,3", "-k", "3", "-f", "json",
        ]);
        assert_eq!(args.output_format, OutputFormat::Json);
        match args.command {
            Command::Knn(knn) => {
                assert_eq!(knn.vector, vec![1.0, -2.5, 3.0]);
                assert_eq!(knn.k, 3);
                assert!(knn.nprobe.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbosity() {
        let args = StrataArgs::parse_from(["strata", "footer", "a"]);
        assert_eq!(args.verbosity(), 1);
        let args = StrataArgs::parse_from(["strata", "-vv", "footer", "a"]);
        assert_eq!(args.verbosity(), 2);
        let args = StrataArgs::parse_from(["strata", "-q", "-vv", "footer", "a"]);
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_parse_merge() {
        let args = StrataArgs::parse_from([
            "strata", "merge", "-o", "out.strata", "a.strata", "b.strata", "--drop-ids", "x,y",
        ]);
        let Command::Merge(merge) = args.command else {
            panic!("expected merge");
        };
        assert_eq!(merge.segments.len(), 2);
        assert_eq!(merge.drop_ids, vec!["x", "y"]);
    }
}
